use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::key::TargetRef;
use super::operation::{Attributes, IndexOperation};
use super::optimize::{CollapsingOptimizer, PassthroughOptimizer, QueueOptimizer};
use crate::config::QueueConfig;
use crate::metrics::metrics_api;
use crate::processor::{ProcessorRegistry, QueueProcessor};
use crate::QueueResult;

/// Mutation-notification callback
pub type QueueHook = Box<dyn Fn()>;

/// Operation log plus the processors it is flushed to
///
/// - Populated by `index`/`reindex`/`unindex` (content events)
/// - Collapsed and dispatched by `process()`
/// - Discarded by `abort()`/`clear()`
pub struct IndexQueue {
    log: Vec<IndexOperation>,
    hook: Option<QueueHook>,
    registry: ProcessorRegistry,
    optimizer: Box<dyn QueueOptimizer>,
    /// Processors begun since the last commit/abort
    in_flight: Vec<(String, Arc<dyn QueueProcessor>)>,
}

impl IndexQueue {
    /// Queue using the default optimizer
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self::with_optimizer(registry, Box::new(CollapsingOptimizer))
    }

    /// Queue whose optimizer follows `config`
    pub fn from_config(registry: ProcessorRegistry, config: &QueueConfig) -> Self {
        if config.optimization_enabled {
            Self::new(registry)
        } else {
            Self::with_optimizer(registry, Box::new(PassthroughOptimizer))
        }
    }

    pub fn with_optimizer(registry: ProcessorRegistry, optimizer: Box<dyn QueueOptimizer>) -> Self {
        Self {
            log: Vec::new(),
            hook: None,
            registry,
            optimizer,
            in_flight: Vec::new(),
        }
    }

    /// Replace the optimizer used by `optimize()`/`process()`
    pub fn set_optimizer(&mut self, optimizer: Box<dyn QueueOptimizer>) {
        self.optimizer = optimizer;
    }

    pub fn optimizer_name(&self) -> &'static str {
        self.optimizer.name()
    }

    /// Install the callback invoked after every append
    pub fn set_hook(&mut self, hook: QueueHook) {
        self.hook = Some(hook);
    }

    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn index(&mut self, target: TargetRef, attributes: Option<Attributes>) {
        self.append(IndexOperation::index(target, attributes));
    }

    pub fn reindex(&mut self, target: TargetRef, attributes: Option<Attributes>, metadata_update: bool) {
        self.append(IndexOperation::reindex(target, attributes, metadata_update));
    }

    pub fn unindex(&mut self, target: TargetRef) {
        self.append(IndexOperation::unindex(target));
    }

    fn append(&mut self, op: IndexOperation) {
        debug!("queue: {op}");
        self.log.push(op);
        metrics_api::record_enqueue();
        if let Some(hook) = &self.hook {
            hook();
        }
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Pending operations (raw, not yet optimized)
    pub fn operations(&self) -> &[IndexOperation] {
        &self.log
    }

    /// Copy of the raw log (used to take savepoints)
    pub fn get_state(&self) -> Vec<IndexOperation> {
        self.log.clone()
    }

    /// Replace the raw log (used to roll back savepoints)
    pub fn set_state(&mut self, state: Vec<IndexOperation>) {
        self.log = state;
    }

    /// Collapse the log in place
    pub fn optimize(&mut self) {
        let raw = std::mem::take(&mut self.log);
        let before = raw.len();
        self.log = self.optimizer.optimize(raw);
        debug!(
            "queue: {} optimizer reduced {} -> {} operations",
            self.optimizer.name(),
            before,
            self.log.len()
        );
    }

    /// Optimize the log and dispatch it to every registered processor.
    ///
    /// Returns the number of collapsed operations. The log is empty
    /// afterwards, also when a processor fails.
    pub fn process(&mut self) -> QueueResult<usize> {
        if self.log.is_empty() {
            return Ok(0);
        }

        let timer = metrics_api::record_flush_start();
        let raw_count = self.log.len();
        self.optimize();
        let ops = std::mem::take(&mut self.log);

        let processors = self.registry.processors();
        if processors.is_empty() {
            debug!("queue: no processors registered, dropping {} operations", ops.len());
            metrics_api::record_flush_complete(raw_count, ops.len(), timer);
            return Ok(ops.len());
        }

        for (name, processor) in &processors {
            processor.begin();
            if !self.in_flight.iter().any(|(n, p)| n == name && Arc::ptr_eq(p, processor)) {
                self.in_flight.push((name.clone(), Arc::clone(processor)));
            }
        }

        for op in &ops {
            for (name, processor) in &processors {
                if let Err(e) = processor.process(op) {
                    warn!("queue: processor '{name}' failed on {op}: {e}");
                    return Err(e);
                }
            }
        }

        metrics_api::record_flush_complete(raw_count, ops.len(), timer);
        debug!("queue: dispatched {} operations to {} processors", ops.len(), processors.len());
        Ok(ops.len())
    }

    /// Commit every processor begun since the last commit/abort
    pub fn commit(&mut self) -> QueueResult<()> {
        let in_flight = std::mem::take(&mut self.in_flight);
        for (name, processor) in &in_flight {
            if let Err(e) = processor.commit() {
                warn!("queue: processor '{name}' failed to commit: {e}");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Empty the log without dispatching
    pub fn clear(&mut self) {
        self.log.clear();
    }

    /// Drop the log and tell every processor to discard in-flight state
    pub fn abort(&mut self) {
        if !self.log.is_empty() {
            debug!("queue: aborting, discarding {} operations", self.log.len());
        }
        self.log.clear();

        let in_flight = std::mem::take(&mut self.in_flight);
        let registered = self.registry.processors();
        for (_, processor) in &registered {
            processor.abort();
        }
        // Processors unregistered mid-transaction still hold our batch
        for (_, processor) in &in_flight {
            if !registered.iter().any(|(_, p)| Arc::ptr_eq(p, processor)) {
                processor.abort();
            }
        }
        metrics_api::record_abort();
    }
}

impl fmt::Debug for IndexQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexQueue")
            .field("log", &self.log)
            .field("hook", &self.hook.is_some())
            .field("registry", &self.registry)
            .field("optimizer", &self.optimizer.name())
            .finish()
    }
}
