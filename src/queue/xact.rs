use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use super::ops::IndexQueue;
use super::operation::IndexOperation;
use super::persistence::SerializedQueue;
use crate::metrics::metrics_api;
use crate::transaction::{self, RollbackPoint, TransactionParticipant};
use crate::{QueueError, QueueResult};

/// Queue shared between its thread-local slot and its transaction adapter
pub type SharedQueue = Rc<RefCell<IndexQueue>>;

/// Transaction adapter for one [`IndexQueue`]
///
/// - Joins the current transaction on the first queue mutation
/// - Flushes the queue to its processors when the transaction prepares
/// - Commits the processors once every participant voted yes
/// - Aborts queue and processors at transaction abort
/// - Snapshots the raw log for savepoints
pub struct QueueTM {
    queue: SharedQueue,
    registered: Cell<bool>,
    /// Operations flushed by `prepare()` and not yet committed
    prepared: Cell<usize>,
    /// Savepoints taken in the current transaction
    savepoint_depth: Cell<usize>,
    me: Weak<QueueTM>,
}

impl QueueTM {
    pub fn new(queue: SharedQueue) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            queue,
            registered: Cell::new(false),
            prepared: Cell::new(0),
            savepoint_depth: Cell::new(0),
            me: me.clone(),
        })
    }

    /// Make every mutation of the queue register this adapter.
    ///
    /// The hook holds only a weak reference, so dropping the adapter
    /// silently disables registration.
    pub fn install_hook(&self) -> QueueResult<()> {
        let me = self.me.clone();
        let mut queue = self.borrow_queue("installing hook")?;
        queue.set_hook(Box::new(move || {
            if let Some(tm) = me.upgrade() {
                tm.register();
            }
        }));
        Ok(())
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn is_registered(&self) -> bool {
        self.registered.get()
    }

    pub fn savepoint_depth(&self) -> usize {
        self.savepoint_depth.get()
    }

    /// Snapshot of the pending log, for inspection or hand-off
    pub fn export_state(&self) -> QueueResult<SerializedQueue> {
        let queue = self.borrow_queue("exporting state")?;
        SerializedQueue::from_operations(queue.operations(), self.savepoint_depth())
    }

    fn borrow_queue(&self, context: &str) -> QueueResult<std::cell::RefMut<'_, IndexQueue>> {
        self.queue.try_borrow_mut().map_err(|_| QueueError::QueueBusy {
            context: context.to_string(),
        })
    }

    fn reset(&self) {
        self.registered.set(false);
        self.prepared.set(0);
        self.savepoint_depth.set(0);
    }
}

impl TransactionParticipant for QueueTM {
    fn register(&self) {
        if self.registered.get() {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let txn = transaction::get();
        match txn.join(me) {
            Ok(()) => {
                self.registered.set(true);
                debug!("queue: registered with transaction {}", txn.id());
            }
            Err(e) => warn!("queue: failed to join transaction {}: {}", txn.id(), e),
        }
    }

    fn prepare(&self) -> QueueResult<()> {
        let mut queue = self.borrow_queue("transaction prepare")?;
        let processed = queue.process()?;
        self.prepared.set(self.prepared.get() + processed);
        Ok(())
    }

    fn commit(&self) -> QueueResult<()> {
        let result: QueueResult<usize> = (|| {
            let mut queue = self.borrow_queue("transaction commit")?;
            // Operations enqueued by participants that prepared after us
            let late = queue.process()?;
            queue.commit()?;
            Ok(self.prepared.get() + late)
        })();
        self.reset();
        let committed = result?;
        if committed > 0 {
            info!("queue: committed {committed} index operations");
        }
        Ok(())
    }

    fn abort(&self) {
        match self.borrow_queue("transaction abort") {
            Ok(mut queue) => queue.abort(),
            Err(e) => warn!("queue: {e}"),
        }
        self.reset();
    }

    fn savepoint(&self) -> QueueResult<Box<dyn RollbackPoint>> {
        let state = self
            .queue
            .try_borrow()
            .map_err(|_| QueueError::QueueBusy {
                context: "taking savepoint".to_string(),
            })?
            .get_state();
        self.savepoint_depth.set(self.savepoint_depth.get() + 1);
        Ok(Box::new(QueueSavepoint {
            queue: Rc::clone(&self.queue),
            state,
        }))
    }

    fn sort_key(&self) -> String {
        // Flush before other participants that may persist catalog data
        format!("!index-queue-{:p}", Rc::as_ptr(&self.queue))
    }
}

/// Raw log captured when a savepoint was taken
pub struct QueueSavepoint {
    queue: SharedQueue,
    state: Vec<IndexOperation>,
}

impl QueueSavepoint {
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

impl RollbackPoint for QueueSavepoint {
    fn rollback(&self) -> QueueResult<()> {
        let mut queue = self.queue.try_borrow_mut().map_err(|_| QueueError::QueueBusy {
            context: "savepoint rollback".to_string(),
        })?;
        debug!(
            "queue: rolling back {} -> {} operations",
            queue.len(),
            self.state.len()
        );
        queue.set_state(self.state.clone());
        metrics_api::record_savepoint_rollback();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ProcessorRegistry, ProcessorState, QueueProcessor};
    use crate::queue::key::TargetRef;
    use crate::testing::{Document, FailingProcessor, RecordingProcessor};
    use std::sync::Arc;

    fn setup() -> (Rc<QueueTM>, Arc<RecordingProcessor>) {
        let registry = ProcessorRegistry::new();
        let recorder = Arc::new(RecordingProcessor::new());
        registry.register("recorder", recorder.clone());
        let queue = Rc::new(RefCell::new(IndexQueue::new(registry)));
        let tm = QueueTM::new(queue);
        tm.install_hook().unwrap();
        (tm, recorder)
    }

    fn doc(path: &str) -> TargetRef {
        TargetRef::new(Document::at(path))
    }

    #[test]
    fn test_first_mutation_registers_once() {
        let (tm, _) = setup();
        let txn = transaction::begin();
        assert!(!tm.is_registered());

        tm.queue().borrow_mut().index(doc("/a"), None);
        tm.queue().borrow_mut().index(doc("/b"), None);

        assert!(tm.is_registered());
        assert_eq!(txn.participant_count(), 1);
        transaction::abort();
    }

    #[test]
    fn test_commit_flushes_and_finishes_processors() {
        let (tm, recorder) = setup();
        transaction::begin();
        let t = doc("/site/t");

        tm.queue().borrow_mut().index(t, None);
        transaction::commit().unwrap();

        assert!(tm.queue().borrow().is_empty());
        assert_eq!(recorder.calls(), vec!["index /site/t"]);
        assert_eq!(recorder.state(), ProcessorState::Finished);
        assert!(!tm.is_registered());
    }

    #[test]
    fn test_abort_before_processing() {
        let (tm, recorder) = setup();
        transaction::begin();

        tm.queue().borrow_mut().index(doc("/site/t"), None);
        transaction::abort();

        assert!(tm.queue().borrow().is_empty());
        assert!(recorder.calls().is_empty());
        assert_eq!(recorder.state(), ProcessorState::Aborted);
    }

    #[test]
    fn test_savepoint_rollback_discards_later_operations() {
        let (tm, recorder) = setup();
        transaction::begin();
        let (t1, t2) = (doc("/t1"), doc("/t2"));

        tm.queue().borrow_mut().index(t1, None);
        let savepoint = transaction::savepoint().unwrap();
        assert_eq!(tm.savepoint_depth(), 1);
        tm.queue().borrow_mut().index(t2, None);

        savepoint.rollback().unwrap();
        assert_eq!(tm.queue().borrow().len(), 1);

        transaction::commit().unwrap();
        assert_eq!(recorder.calls(), vec!["index /t1"]);
    }

    #[test]
    fn test_savepoint_before_first_mutation() {
        let (tm, recorder) = setup();
        transaction::begin();

        let savepoint = transaction::savepoint().unwrap();
        tm.queue().borrow_mut().index(doc("/late"), None);
        assert!(tm.is_registered());

        // the queue joined after the savepoint: rollback aborts it
        savepoint.rollback().unwrap();
        assert!(tm.queue().borrow().is_empty());
        assert!(!tm.is_registered());

        tm.queue().borrow_mut().index(doc("/again"), None);
        assert!(tm.is_registered());
        transaction::commit().unwrap();
        assert_eq!(recorder.calls(), vec!["index /again"]);
    }

    #[test]
    fn test_processor_failure_aborts_transaction() {
        let registry = ProcessorRegistry::new();
        let recorder = Arc::new(RecordingProcessor::new());
        registry.register("a-recorder", recorder.clone());
        registry.register("b-broken", Arc::new(FailingProcessor::new("b-broken")));
        let tm = QueueTM::new(Rc::new(RefCell::new(IndexQueue::new(registry))));
        tm.install_hook().unwrap();

        let txn = transaction::begin();
        tm.queue().borrow_mut().index(doc("/a"), None);

        let err = transaction::commit().unwrap_err();
        assert_eq!(err.code(), "P1001");
        assert_eq!(txn.status(), transaction::TransactionStatus::Aborted);
        assert_eq!(recorder.state(), ProcessorState::Aborted);
        assert_eq!(recorder.pending(), 0);
        assert!(tm.queue().borrow().is_empty());
    }

    #[test]
    fn test_prepare_flushes_but_defers_processor_commit() {
        let (tm, recorder) = setup();
        transaction::begin();
        tm.queue().borrow_mut().index(doc("/site/t"), None);

        tm.prepare().unwrap();
        assert!(tm.queue().borrow().is_empty());
        assert_eq!(recorder.state(), ProcessorState::Started);
        assert_eq!(recorder.pending(), 1);

        tm.commit().unwrap();
        assert_eq!(recorder.state(), ProcessorState::Finished);
        transaction::abort();
    }

    #[test]
    fn test_later_participant_failure_keeps_processors_uncommitted() {
        struct Storage;
        impl TransactionParticipant for Storage {
            fn register(&self) {}
            fn commit(&self) -> QueueResult<()> {
                Err(QueueError::CommitFailed {
                    processor: "zodb".to_string(),
                    reason: "conflict".to_string(),
                })
            }
            fn abort(&self) {}
            fn savepoint(&self) -> QueueResult<Box<dyn RollbackPoint>> {
                unreachable!()
            }
            fn sort_key(&self) -> String {
                "zodb".to_string()
            }
        }

        let (tm, recorder) = setup();
        let txn = transaction::begin();
        tm.queue().borrow_mut().index(doc("/site/t"), None);
        txn.join(Rc::new(Storage)).unwrap();

        assert_eq!(transaction::commit().unwrap_err().code(), "P1002");
        assert_eq!(txn.status(), transaction::TransactionStatus::Aborted);
        assert_eq!(recorder.state(), ProcessorState::Aborted);
        assert_eq!(recorder.pending(), 0);
    }

    #[test]
    fn test_savepoint_on_busy_queue_is_an_error() {
        let (tm, recorder) = setup();
        transaction::begin();
        tm.queue().borrow_mut().index(doc("/t1"), None);

        let err = {
            let mut queue = tm.queue().borrow_mut();
            queue.index(doc("/t2"), None);
            transaction::savepoint().unwrap_err()
        };
        assert_eq!(err.code(), "Q2001");
        assert_eq!(tm.savepoint_depth(), 0);
        assert_eq!(tm.queue().borrow().len(), 2);

        transaction::commit().unwrap();
        assert_eq!(recorder.calls(), vec!["index /t1", "index /t2"]);
    }

    #[test]
    fn test_commit_with_busy_queue_reports_error() {
        let (tm, _) = setup();
        let _guard = tm.queue().borrow_mut();

        let err = tm.commit().unwrap_err();
        assert_eq!(err.code(), "Q2001");
    }

    #[test]
    fn test_dropped_adapter_disables_hook() {
        let registry = ProcessorRegistry::new();
        let queue = Rc::new(RefCell::new(IndexQueue::new(registry)));
        {
            let tm = QueueTM::new(Rc::clone(&queue));
            tm.install_hook().unwrap();
        }
        let txn = transaction::begin();
        queue.borrow_mut().index(doc("/a"), None);
        assert_eq!(txn.participant_count(), 0);
        transaction::abort();
    }

    #[test]
    fn test_export_state() {
        let (tm, _) = setup();
        transaction::begin();
        tm.queue().borrow_mut().index(doc("/site/a"), None);
        let _sp = transaction::savepoint().unwrap();

        let exported = tm.export_state().unwrap();
        assert_eq!(exported.operations.len(), 1);
        assert_eq!(exported.metadata.savepoint_depth, 1);
        transaction::abort();
    }
}
