//! Structured JSON logger
//!
//! Per OBSERVABILITY.md:
//! - Structured logs (JSON)
//! - Deterministic key ordering
//! - Explicit severity levels
//! - One log line = one event, tagged with the emitting component
//! - Synchronous, no buffering
//!
//! State-machine debug traces (client session boundaries, server state
//! transitions) log at `Trace` severity and are emitted only when the
//! server debug level allows them; everything else is unconditional.

use std::fmt;
use std::io::{self, Write};

/// Log severity levels per OBSERVABILITY.md
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Debug-level detail, gated by the server debug level
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
    /// Unrecoverable failures
    Fatal = 4,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured logger that outputs one JSON object per event.
///
/// The emitting component ("server_state", "client_state", "transaction")
/// is a first-class field so a node's interleaved state machines can be
/// separated in the log stream without parsing event names.
pub struct Logger;

impl Logger {
    /// Log an event from a component with the given severity and fields.
    ///
    /// Fields are output in deterministic order (alphabetical by key),
    /// after the fixed `event`, `severity` and `component` keys.
    pub fn log(severity: Severity, component: &str, event: &str, fields: &[(&str, &str)]) {
        if severity >= Severity::Error {
            Self::log_to_writer(severity, component, event, fields, &mut io::stderr());
        } else {
            Self::log_to_writer(severity, component, event, fields, &mut io::stdout());
        }
    }

    /// Internal log implementation that writes to a given writer
    fn log_to_writer<W: Write>(
        severity: Severity,
        component: &str,
        event: &str,
        fields: &[(&str, &str)],
        writer: &mut W,
    ) {
        // Build JSON manually to keep key order deterministic
        let mut output = String::with_capacity(256);

        output.push('{');

        output.push_str("\"event\":\"");
        Self::escape_json_string(&mut output, event);
        output.push('"');

        output.push_str(",\"severity\":\"");
        output.push_str(severity.as_str());
        output.push('"');

        output.push_str(",\"component\":\"");
        Self::escape_json_string(&mut output, component);
        output.push('"');

        // Sort fields alphabetically for deterministic output
        let mut sorted_fields: Vec<_> = fields.iter().collect();
        sorted_fields.sort_by_key(|(k, _)| *k);

        for (key, value) in sorted_fields {
            output.push_str(",\"");
            Self::escape_json_string(&mut output, key);
            output.push_str("\":\"");
            Self::escape_json_string(&mut output, value);
            output.push('"');
        }

        output.push('}');
        output.push('\n');

        // One write_all call, one line
        let _ = writer.write_all(output.as_bytes());
        let _ = writer.flush();
    }

    /// Escape special characters for JSON strings
    fn escape_json_string(output: &mut String, s: &str) {
        for c in s.chars() {
            match c {
                '"' => output.push_str("\\\""),
                '\\' => output.push_str("\\\\"),
                '\n' => output.push_str("\\n"),
                '\r' => output.push_str("\\r"),
                '\t' => output.push_str("\\t"),
                c if c.is_control() => {
                    output.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => output.push(c),
            }
        }
    }

    /// Log at TRACE level. Callers gate this on the server debug level.
    pub fn trace(component: &str, event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, component, event, fields);
    }

    /// Log at INFO level
    pub fn info(component: &str, event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, component, event, fields);
    }

    /// Log at WARN level
    pub fn warn(component: &str, event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, component, event, fields);
    }

    /// Log at ERROR level
    pub fn error(component: &str, event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, component, event, fields);
    }

    /// Log at FATAL level
    pub fn fatal(component: &str, event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Fatal, component, event, fields);
    }
}

/// Capture logs to a buffer for testing
#[cfg(test)]
pub fn capture_log(
    severity: Severity,
    component: &str,
    event: &str,
    fields: &[(&str, &str)],
) -> String {
    let mut buffer = Vec::new();
    Logger::log_to_writer(severity, component, event, fields, &mut buffer);
    String::from_utf8(buffer).unwrap()
}
