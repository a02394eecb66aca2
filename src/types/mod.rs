//! Value types shared across the coordination core
//!
//! All of these are plain data: identities, sequence numbers, global
//! transaction identifiers, cluster views and write-set metadata. None of
//! them hold locks or call into the provider.

mod gtid;
mod id;
mod seqno;
mod view;
mod ws;

pub use gtid::Gtid;
pub use id::{ClientId, NodeId, TransactionId};
pub use seqno::Seqno;
pub use view::{Member, View, ViewStatus};
pub use ws::{ws_flags, Key, WsHandle, WsMeta};
