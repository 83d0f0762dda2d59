//! Request-local catalog indexing queue
//!
//! Content events enqueue INDEX / REINDEX / UNINDEX operations on a
//! per-thread queue instead of touching the catalogs directly. The queue
//! joins the current transaction on its first mutation, collapses redundant
//! operations, and hands one operation per target to every registered
//! processor when the transaction commits. Aborts and savepoint rollbacks
//! discard the affected operations.
//!
//! ```ignore
//! use std::sync::Arc;
//! use reindex_queue::processor::{global_registry, CatalogProcessor, MemoryCatalog};
//! use reindex_queue::subscribers::{handle_event, ObjectEvent};
//!
//! let catalog = Arc::new(MemoryCatalog::new("portal_catalog"));
//! global_registry().register("portal_catalog", Arc::new(CatalogProcessor::new(catalog)));
//!
//! let _scope = reindex_queue::queue::request_scope();
//! reindex_queue::transaction::begin();
//! handle_event(&ObjectEvent::Added { object: doc })?;
//! reindex_queue::transaction::commit()?;
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod queue;
pub mod subscribers;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{QueueError, QueueResult};
pub use processor::{global_registry, ProcessorRegistry, ProcessorState, QueueProcessor};
pub use queue::{
    get_queue, process_queue, with_queue, IndexOperation, IndexQueue, Indexable, OpKind,
    TargetRef,
};
pub use subscribers::{dispatch_event, handle_event, ObjectEvent};

/// Version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
