//! Catalog processor: two-phase application onto a catalog backend
//!
//! Operations received between `begin()` and `commit()` are buffered and
//! only handed to the [`Catalog`] at commit time, so an abort never leaves
//! the catalog half-updated.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{ProcessorState, QueueProcessor};
use crate::queue::{Attributes, IndexOperation, OpKind, TargetKey, TargetRef};
use crate::{QueueError, QueueResult};

/// The index/reindex/unindex contract consumed from a catalog
pub trait Catalog: Send + Sync {
    fn name(&self) -> &str;

    fn index_object(&self, target: &TargetRef, attributes: Option<&Attributes>) -> QueueResult<()>;

    fn reindex_object(
        &self,
        target: &TargetRef,
        attributes: Option<&Attributes>,
        update_metadata: bool,
    ) -> QueueResult<()>;

    fn unindex_object(&self, target: &TargetRef) -> QueueResult<()>;
}

#[derive(Debug)]
struct Batch {
    state: ProcessorState,
    pending: Vec<IndexOperation>,
}

impl Batch {
    fn new() -> Self {
        Self {
            state: ProcessorState::Unknown,
            pending: Vec::new(),
        }
    }

    fn start(&mut self) {
        if self.state != ProcessorState::Started {
            self.state = ProcessorState::Started;
            self.pending.clear();
        }
    }
}

/// Buffers flushed batches and applies them to a [`Catalog`] on commit
///
/// Processors are shared by every thread's queue, so each thread gets its
/// own batch: a commit applies only the calling thread's operations and an
/// abort discards only those. `state()` and `pending()` describe the
/// calling thread's batch.
pub struct CatalogProcessor<C: Catalog> {
    catalog: Arc<C>,
    batches: Mutex<HashMap<ThreadId, Batch>>,
}

impl<C: Catalog> CatalogProcessor<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self {
            catalog,
            batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<C> {
        &self.catalog
    }

    /// Copy of the calling thread's operations waiting for commit
    pub fn pending_operations(&self) -> Vec<IndexOperation> {
        self.batches
            .lock()
            .get(&thread::current().id())
            .map(|b| b.pending.clone())
            .unwrap_or_default()
    }

    /// Number of threads with a batch on record
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    fn with_batch<R>(&self, f: impl FnOnce(&mut Batch) -> R) -> R {
        let mut batches = self.batches.lock();
        f(batches.entry(thread::current().id()).or_insert_with(Batch::new))
    }

    fn push(&self, op: IndexOperation) {
        self.with_batch(|batch| {
            // Operations outside begin/commit still belong to a batch
            batch.start();
            batch.pending.push(op);
        });
    }

    fn apply(&self, op: &IndexOperation) -> QueueResult<()> {
        match op.kind {
            OpKind::Index => self.catalog.index_object(&op.target, op.attributes.as_ref()),
            OpKind::Reindex => self.catalog.reindex_object(
                &op.target,
                op.attributes.as_ref(),
                op.wants_metadata(),
            ),
            OpKind::Unindex => self.catalog.unindex_object(&op.target),
        }
    }
}

impl<C: Catalog> QueueProcessor for CatalogProcessor<C> {
    fn begin(&self) {
        self.with_batch(Batch::start);
    }

    fn index(&self, target: &TargetRef, attributes: Option<&Attributes>) -> QueueResult<()> {
        self.push(IndexOperation::index(target.clone(), attributes.cloned()));
        Ok(())
    }

    fn reindex(
        &self,
        target: &TargetRef,
        attributes: Option<&Attributes>,
        metadata_update: bool,
    ) -> QueueResult<()> {
        self.push(IndexOperation::reindex(target.clone(), attributes.cloned(), metadata_update));
        Ok(())
    }

    fn unindex(&self, target: &TargetRef) -> QueueResult<()> {
        self.push(IndexOperation::unindex(target.clone()));
        Ok(())
    }

    fn commit(&self) -> QueueResult<()> {
        let ops = self.with_batch(|batch| {
            if batch.state == ProcessorState::Started {
                Some(std::mem::take(&mut batch.pending))
            } else {
                None
            }
        });
        let Some(ops) = ops else {
            return Ok(());
        };

        debug!("catalog '{}': applying {} operations", self.catalog.name(), ops.len());

        for (applied, op) in ops.iter().enumerate() {
            if let Err(e) = self.apply(op) {
                warn!(
                    "catalog '{}': {} failed after {} applied operations: {}",
                    self.catalog.name(),
                    op,
                    applied,
                    e
                );
                self.with_batch(|batch| batch.pending = ops[applied..].to_vec());
                return Err(QueueError::CommitFailed {
                    processor: self.catalog.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }

        self.with_batch(|batch| batch.state = ProcessorState::Finished);
        Ok(())
    }

    fn abort(&self) {
        self.with_batch(|batch| {
            if !batch.pending.is_empty() {
                debug!(
                    "catalog '{}': discarding {} pending operations",
                    self.catalog.name(),
                    batch.pending.len()
                );
            }
            batch.pending.clear();
            batch.state = ProcessorState::Aborted;
        });
    }

    fn state(&self) -> ProcessorState {
        self.batches
            .lock()
            .get(&thread::current().id())
            .map_or(ProcessorState::Unknown, |b| b.state)
    }

    fn pending(&self) -> usize {
        self.batches
            .lock()
            .get(&thread::current().id())
            .map_or(0, |b| b.pending.len())
    }
}

/// What an in-memory catalog knows about one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    /// Keeps the object alive so its identity key cannot be reused
    pub target: TargetRef,
    pub path: Option<String>,
    /// Attributes indexed so far (`None` once a full index happened)
    pub indexed: Option<Attributes>,
    pub metadata_updates: usize,
    pub writes: usize,
}

/// In-memory catalog, keyed by object identity
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    name: String,
    records: Mutex<HashMap<TargetKey, CatalogRecord>>,
}

impl MemoryCatalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, target: &TargetRef) -> bool {
        self.records.lock().contains_key(&target.key())
    }

    pub fn record(&self, target: &TargetRef) -> Option<CatalogRecord> {
        self.records.lock().get(&target.key()).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Paths of every catalogued object, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .records
            .lock()
            .values()
            .filter_map(|r| r.path.clone())
            .collect();
        paths.sort();
        paths
    }

    fn write(&self, target: &TargetRef, attributes: Option<&Attributes>, metadata: bool) {
        let mut records = self.records.lock();
        let record = records.entry(target.key()).or_insert_with(|| CatalogRecord {
            target: target.clone(),
            path: target.physical_path(),
            indexed: Some(Attributes::new()),
            metadata_updates: 0,
            writes: 0,
        });
        record.path = target.physical_path();
        record.indexed = match (record.indexed.take(), attributes) {
            (Some(mut known), Some(attrs)) => {
                known.extend(attrs.iter().cloned());
                Some(known)
            }
            _ => None,
        };
        if metadata {
            record.metadata_updates += 1;
        }
        record.writes += 1;
    }
}

impl Catalog for MemoryCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn index_object(&self, target: &TargetRef, _attributes: Option<&Attributes>) -> QueueResult<()> {
        // A fresh catalog entry always covers every index
        self.write(target, None, true);
        Ok(())
    }

    fn reindex_object(
        &self,
        target: &TargetRef,
        attributes: Option<&Attributes>,
        update_metadata: bool,
    ) -> QueueResult<()> {
        self.write(target, attributes, update_metadata);
        Ok(())
    }

    fn unindex_object(&self, target: &TargetRef) -> QueueResult<()> {
        self.records.lock().remove(&target.key());
        Ok(())
    }
}
