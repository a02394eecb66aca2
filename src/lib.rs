//! aerosync - Coordination core between a DBMS and a write-set replication
//! provider in a synchronous multi-master cluster.
//!
//! The crate does not replicate anything itself. It owns the state machines
//! a replicating DBMS node must run — server lifecycle, per-connection
//! sessions, transaction certification/commit/replay, brute-force aborts and
//! streaming fragmentation — and drives an external provider through the
//! `provider::Provider` facade. Storage, SQL and the wire format stay on the
//! host side, reached through the `service` traits.

pub mod client;
pub mod observability;
pub mod provider;
pub mod server;
pub mod service;
pub mod sync_point;
pub mod transaction;
pub mod types;

pub use client::{ClientError, ClientResult, ClientState};
pub use server::{ServerConfig, ServerState};
pub use types::{Gtid, NodeId, Seqno, TransactionId, View};
