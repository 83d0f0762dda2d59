//! Request-local index queue for collapsed catalog updates
//!
//! This module implements the per-thread, per-transaction queue:
//! - `TargetRef`: identity handle on a content object
//! - `IndexOperation`: one INDEX / REINDEX / UNINDEX request
//! - `IndexQueue`: the raw operation log and its processors
//! - `QueueOptimizer`: collapses the log before dispatch
//! - `QueueTM`: joins the transaction on first mutation, flushes at commit
//! - Thread-local ambient queue (`get_queue`, `with_queue`, `process_queue`)

pub mod key;
pub mod operation;
pub mod optimize;
pub mod persistence;
mod ops;
mod state;
mod xact;

pub use key::{Indexable, TargetKey, TargetRef};
pub use operation::{attrs, Attributes, IndexOperation, OpKind};
pub use optimize::{CollapsingOptimizer, PassthroughOptimizer, QueueOptimizer};
pub use ops::{IndexQueue, QueueHook};
pub use persistence::{QueueMetadata, SerializedOperation, SerializedQueue};
pub use state::{
    get_queue, get_queue_contents, get_queue_size, get_queue_tm, has_queue, install_queue,
    process_queue, remove_queue, request_scope, with_queue, RequestScope,
};
pub use xact::{QueueSavepoint, QueueTM, SharedQueue};
