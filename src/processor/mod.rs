//! Queue processors: backends that apply a flushed batch
//!
//! A processor receives every collapsed operation of a flush between
//! `begin()` and `commit()`/`abort()`. Processors are shared between all
//! threads' queues, so they take `&self` and guard their own state.
//!
//! ## Lifecycle per transaction
//!
//! ```text
//! Unknown --begin--> Started --commit--> Finished
//!    |                  |
//!    +------abort-------+--------------> Aborted
//! ```
//!
//! `Finished` and `Aborted` are terminal for one transaction; the next
//! `begin()` starts a fresh cycle.

pub mod catalog;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::queue::{IndexOperation, OpKind, TargetRef, Attributes};
use crate::QueueResult;

pub use catalog::{Catalog, CatalogProcessor, MemoryCatalog};

/// Where a processor is in its per-transaction cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    Unknown,
    Started,
    Finished,
    Aborted,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessorState::Unknown => "unknown",
            ProcessorState::Started => "started",
            ProcessorState::Finished => "finished",
            ProcessorState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Backend receiving collapsed index operations
pub trait QueueProcessor: Send + Sync {
    /// Start applying a flushed batch (repeated calls are harmless)
    fn begin(&self);

    fn index(&self, target: &TargetRef, attributes: Option<&Attributes>) -> QueueResult<()>;

    fn reindex(
        &self,
        target: &TargetRef,
        attributes: Option<&Attributes>,
        metadata_update: bool,
    ) -> QueueResult<()>;

    fn unindex(&self, target: &TargetRef) -> QueueResult<()>;

    /// Make everything applied since `begin()` durable
    fn commit(&self) -> QueueResult<()>;

    /// Drop everything applied or pending since `begin()`
    fn abort(&self);

    fn state(&self) -> ProcessorState;

    /// Number of operations received but not yet committed
    fn pending(&self) -> usize;

    /// Apply one collapsed operation via the kind-specific call
    fn process(&self, op: &IndexOperation) -> QueueResult<()> {
        match op.kind {
            OpKind::Index => self.index(&op.target, op.attributes.as_ref()),
            OpKind::Reindex => {
                self.reindex(&op.target, op.attributes.as_ref(), op.wants_metadata())
            }
            OpKind::Unindex => self.unindex(&op.target),
        }
    }
}

/// Named set of processors shared by queues
///
/// Cloning yields another handle on the same set.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    inner: Arc<RwLock<BTreeMap<String, Arc<dyn QueueProcessor>>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` under `name`, returning any processor it replaces
    pub fn register(
        &self,
        name: impl Into<String>,
        processor: Arc<dyn QueueProcessor>,
    ) -> Option<Arc<dyn QueueProcessor>> {
        let name = name.into();
        debug!("registering queue processor '{name}'");
        self.inner.write().insert(name, processor)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn QueueProcessor>> {
        debug!("unregistering queue processor '{name}'");
        self.inner.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn QueueProcessor>> {
        self.inner.read().get(name).cloned()
    }

    /// Snapshot of the registered processors, in name order
    pub fn processors(&self) -> Vec<(String, Arc<dyn QueueProcessor>)> {
        self.inner
            .read()
            .iter()
            .map(|(name, p)| (name.clone(), Arc::clone(p)))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Do both handles share the same underlying set?
    pub fn same_registry(&self, other: &ProcessorRegistry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.names())
            .finish()
    }
}

/// Process-wide registry used by the ambient per-thread queues
static GLOBAL_REGISTRY: Lazy<ProcessorRegistry> = Lazy::new(ProcessorRegistry::new);

pub fn global_registry() -> &'static ProcessorRegistry {
    &GLOBAL_REGISTRY
}
