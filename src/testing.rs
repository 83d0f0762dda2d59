//! Shared fixtures for unit tests

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::processor::{Catalog, ProcessorState, QueueProcessor};
use crate::queue::{Attributes, Indexable, OpKind, TargetRef};
use crate::{QueueError, QueueResult};

/// In-memory content object
#[derive(Debug, Default)]
pub struct Document {
    path: Option<String>,
    transient: bool,
    children: Mutex<Vec<TargetRef>>,
}

impl Document {
    pub fn at(path: &str) -> Self {
        Self {
            path: Some(path.to_string()),
            ..Self::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn transient(path: &str) -> Self {
        Self {
            transient: true,
            ..Self::at(path)
        }
    }

    pub fn add_child(&self, child: TargetRef) {
        self.children.lock().push(child);
    }
}

impl Indexable for Document {
    fn physical_path(&self) -> Option<String> {
        self.path.clone()
    }

    fn is_transient(&self) -> bool {
        self.transient
    }

    fn sub_objects(&self) -> Vec<TargetRef> {
        self.children.lock().clone()
    }
}

/// Tree of documents addressable by path
///
/// Each document becomes a child of its closest ancestor present in the site.
pub struct Site {
    objects: BTreeMap<String, Arc<Document>>,
}

impl Site {
    pub fn with_paths(paths: &[&str]) -> Self {
        let mut sorted: Vec<&str> = paths.to_vec();
        sorted.sort_unstable();

        let mut objects: BTreeMap<String, Arc<Document>> = BTreeMap::new();
        for path in sorted {
            let doc = Arc::new(Document::at(path));
            if let Some(parent) = closest_ancestor(&objects, path) {
                parent.add_child(TargetRef::from(Arc::clone(&doc)));
            }
            objects.insert(path.to_string(), doc);
        }
        Self { objects }
    }

    pub fn get(&self, path: &str) -> Option<TargetRef> {
        self.objects.get(path).map(|doc| TargetRef::from(Arc::clone(doc)))
    }
}

fn closest_ancestor<'a>(objects: &'a BTreeMap<String, Arc<Document>>, path: &str) -> Option<&'a Arc<Document>> {
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        if let Some(doc) = objects.get(current) {
            return Some(doc);
        }
    }
    None
}

fn describe(kind: OpKind, target: &TargetRef, attributes: Option<&Attributes>, meta: Option<bool>) -> String {
    let mut line = format!("{} {}", kind, target.label());
    if let Some(meta) = meta {
        line.push_str(&format!(" meta={meta}"));
    }
    if let Some(attributes) = attributes {
        let names: Vec<&str> = attributes.iter().map(String::as_str).collect();
        line.push_str(&format!(" [{}]", names.join(", ")));
    }
    line
}

#[derive(Debug)]
struct Recording {
    state: ProcessorState,
    calls: Vec<String>,
    pending: usize,
}

/// Processor recording every call it receives
///
/// The call history survives commit and abort; `pending()` does not.
#[derive(Debug)]
pub struct RecordingProcessor {
    inner: Mutex<Recording>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Recording {
                state: ProcessorState::Unknown,
                calls: Vec::new(),
                pending: 0,
            }),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    fn record(&self, call: String) -> QueueResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != ProcessorState::Started {
            inner.state = ProcessorState::Started;
            inner.pending = 0;
        }
        inner.calls.push(call);
        inner.pending += 1;
        Ok(())
    }
}

impl Default for RecordingProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueProcessor for RecordingProcessor {
    fn begin(&self) {
        let mut inner = self.inner.lock();
        if inner.state != ProcessorState::Started {
            inner.state = ProcessorState::Started;
            inner.pending = 0;
        }
    }

    fn index(&self, target: &TargetRef, attributes: Option<&Attributes>) -> QueueResult<()> {
        self.record(describe(OpKind::Index, target, attributes, None))
    }

    fn reindex(&self, target: &TargetRef, attributes: Option<&Attributes>, metadata_update: bool) -> QueueResult<()> {
        self.record(describe(OpKind::Reindex, target, attributes, Some(metadata_update)))
    }

    fn unindex(&self, target: &TargetRef) -> QueueResult<()> {
        self.record(describe(OpKind::Unindex, target, None, None))
    }

    fn commit(&self) -> QueueResult<()> {
        let mut inner = self.inner.lock();
        if inner.state == ProcessorState::Started {
            inner.state = ProcessorState::Finished;
            inner.pending = 0;
        }
        Ok(())
    }

    fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.state = ProcessorState::Aborted;
        inner.pending = 0;
    }

    fn state(&self) -> ProcessorState {
        self.inner.lock().state
    }

    fn pending(&self) -> usize {
        self.inner.lock().pending
    }
}

/// Processor rejecting every operation
pub struct FailingProcessor {
    name: String,
    state: Mutex<ProcessorState>,
}

impl FailingProcessor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ProcessorState::Unknown),
        }
    }

    fn fail(&self, kind: OpKind, target: &TargetRef) -> QueueResult<()> {
        Err(QueueError::ProcessorFailed {
            processor: self.name.clone(),
            kind: kind.to_string(),
            target: target.label(),
            reason: "backend unavailable".to_string(),
        })
    }
}

impl QueueProcessor for FailingProcessor {
    fn begin(&self) {
        *self.state.lock() = ProcessorState::Started;
    }

    fn index(&self, target: &TargetRef, _attributes: Option<&Attributes>) -> QueueResult<()> {
        self.fail(OpKind::Index, target)
    }

    fn reindex(&self, target: &TargetRef, _attributes: Option<&Attributes>, _metadata_update: bool) -> QueueResult<()> {
        self.fail(OpKind::Reindex, target)
    }

    fn unindex(&self, target: &TargetRef) -> QueueResult<()> {
        self.fail(OpKind::Unindex, target)
    }

    fn commit(&self) -> QueueResult<()> {
        *self.state.lock() = ProcessorState::Finished;
        Ok(())
    }

    fn abort(&self) {
        *self.state.lock() = ProcessorState::Aborted;
    }

    fn state(&self) -> ProcessorState {
        *self.state.lock()
    }

    fn pending(&self) -> usize {
        0
    }
}

/// Catalog whose writes always fail
pub struct FailingCatalog {
    name: String,
}

impl FailingCatalog {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }

    fn fail(&self, target: &TargetRef) -> QueueResult<()> {
        Err(QueueError::CatalogError {
            catalog: self.name.clone(),
            reason: format!("cannot write {}", target.label()),
        })
    }
}

impl Catalog for FailingCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn index_object(&self, target: &TargetRef, _attributes: Option<&Attributes>) -> QueueResult<()> {
        self.fail(target)
    }

    fn reindex_object(&self, target: &TargetRef, _attributes: Option<&Attributes>, _update_metadata: bool) -> QueueResult<()> {
        self.fail(target)
    }

    fn unindex_object(&self, target: &TargetRef) -> QueueResult<()> {
        self.fail(target)
    }
}
