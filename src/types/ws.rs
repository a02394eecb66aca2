//! Write-set handle and metadata
//!
//! Per CLUSTER_MODEL.md §5:
//! - The provider identifies a write set by an opaque handle
//! - Ordered write sets carry metadata: GTID, origin, flags, dependency seqno
//! - Flags describe where the write set sits inside its transaction

use serde::{Deserialize, Serialize};

use super::gtid::Gtid;
use super::id::{ClientId, NodeId, TransactionId};
use super::seqno::Seqno;

/// Write-set flags.
///
/// A non-streaming transaction replicates one write set carrying both
/// `START_TRANSACTION` and `COMMIT`. Streaming transactions spread the flags
/// over their fragments.
pub mod ws_flags {
    /// First fragment of a transaction.
    pub const START_TRANSACTION: u32 = 1 << 0;
    /// Last fragment; the transaction commits at this write set.
    pub const COMMIT: u32 = 1 << 1;
    /// Rollback fragment of a streaming transaction.
    pub const ROLLBACK: u32 = 1 << 2;
    /// The write set must not be applied in parallel with others.
    pub const PA_UNSAFE: u32 = 1 << 3;
    /// Total-order-isolation operation, not a transaction.
    pub const TOI: u32 = 1 << 4;
}

/// Certification key for total-order and certification operations.
///
/// Key parts are opaque byte strings supplied by the host DBMS; the core
/// never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    parts: Vec<Vec<u8>>,
}

impl Key {
    /// Create a key from its parts.
    pub fn new(parts: Vec<Vec<u8>>) -> Self {
        Self { parts }
    }

    /// Key parts, outermost first.
    pub fn parts(&self) -> &[Vec<u8>] {
        &self.parts
    }
}

/// Opaque provider handle for a write set under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsHandle {
    transaction_id: TransactionId,
    opaque: u64,
}

impl WsHandle {
    /// Create a handle for the given transaction.
    pub fn new(transaction_id: TransactionId, opaque: u64) -> Self {
        Self {
            transaction_id,
            opaque,
        }
    }

    /// Transaction this handle belongs to.
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Provider-private token.
    pub fn opaque(&self) -> u64 {
        self.opaque
    }
}

/// Metadata of an ordered write set.
#[derive(Debug, Clone, PartialEq)]
pub struct WsMeta {
    gtid: Gtid,
    server_id: NodeId,
    client_id: ClientId,
    transaction_id: TransactionId,
    flags: u32,
    depends_on: Seqno,
}

impl WsMeta {
    /// Create write-set metadata.
    pub fn new(
        gtid: Gtid,
        server_id: NodeId,
        client_id: ClientId,
        transaction_id: TransactionId,
        flags: u32,
        depends_on: Seqno,
    ) -> Self {
        Self {
            gtid,
            server_id,
            client_id,
            transaction_id,
            flags,
            depends_on,
        }
    }

    /// Metadata with no position and no origin.
    pub fn undefined() -> Self {
        Self {
            gtid: Gtid::undefined(),
            server_id: NodeId::undefined(),
            client_id: ClientId::new(0),
            transaction_id: TransactionId::new(0),
            flags: 0,
            depends_on: Seqno::undefined(),
        }
    }

    /// Global position assigned by the provider.
    pub fn gtid(&self) -> Gtid {
        self.gtid
    }

    /// Seqno component of the position.
    pub fn seqno(&self) -> Seqno {
        self.gtid.seqno()
    }

    /// Origin node of the write set.
    pub fn server_id(&self) -> NodeId {
        self.server_id
    }

    /// Origin client session.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Origin transaction.
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Write-set flags (see `ws_flags`).
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Last seqno this write set depends on.
    pub fn depends_on(&self) -> Seqno {
        self.depends_on
    }

    /// True if the provider has assigned a position to this write set.
    pub fn is_ordered(&self) -> bool {
        self.gtid.seqno().is_defined()
    }
}
