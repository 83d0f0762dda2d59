use std::cell::RefCell;
use std::rc::Rc;

use super::operation::IndexOperation;
use super::ops::IndexQueue;
use super::xact::{QueueTM, SharedQueue};
use crate::processor::{global_registry, ProcessorRegistry};
use crate::{QueueError, QueueResult};

/// A thread's queue together with its transaction adapter
#[derive(Clone)]
struct QueueContext {
    queue: SharedQueue,
    tm: Rc<QueueTM>,
}

thread_local! {
    /// Request-local index queue
    ///
    /// - Created on first access with the global processor registry
    /// - Registers with the current transaction on first mutation
    /// - Removed when the request scope ends
    static CURRENT_QUEUE: RefCell<Option<QueueContext>> = const { RefCell::new(None) };
}

fn create_context(registry: ProcessorRegistry) -> QueueResult<QueueContext> {
    let queue = Rc::new(RefCell::new(IndexQueue::from_config(
        registry,
        crate::config::current(),
    )));
    let tm = QueueTM::new(Rc::clone(&queue));
    tm.install_hook()?;
    Ok(QueueContext { queue, tm })
}

fn context() -> QueueResult<QueueContext> {
    CURRENT_QUEUE.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(ctx) = slot.as_ref() {
            return Ok(ctx.clone());
        }
        let ctx = create_context(global_registry().clone())?;
        *slot = Some(ctx.clone());
        Ok(ctx)
    })
}

/// The queue of the current thread, created lazily
pub fn get_queue() -> QueueResult<SharedQueue> {
    Ok(context()?.queue)
}

/// Transaction adapter of the current thread's queue
pub fn get_queue_tm() -> QueueResult<Rc<QueueTM>> {
    Ok(context()?.tm)
}

/// Run `f` against the current thread's queue
pub fn with_queue<R>(f: impl FnOnce(&mut IndexQueue) -> R) -> QueueResult<R> {
    let queue = get_queue()?;
    let mut queue = queue.try_borrow_mut().map_err(|_| QueueError::QueueBusy {
        context: "ambient queue access".to_string(),
    })?;
    Ok(f(&mut queue))
}

/// Does this thread currently own a queue?
pub fn has_queue() -> bool {
    CURRENT_QUEUE.with(|slot| slot.borrow().is_some())
}

/// Install a queue wired to `registry` for this thread, replacing any
/// existing one (pending operations of the old queue are discarded)
pub fn install_queue(registry: ProcessorRegistry) -> QueueResult<SharedQueue> {
    let ctx = create_context(registry)?;
    let previous = CURRENT_QUEUE.with(|slot| slot.borrow_mut().replace(ctx.clone()));
    if let Some(old) = previous {
        discard(&old);
    }
    Ok(ctx.queue)
}

/// Remove this thread's queue, discarding anything still pending
pub fn remove_queue() {
    let previous = CURRENT_QUEUE.with(|slot| slot.borrow_mut().take());
    if let Some(old) = previous {
        discard(&old);
    }
}

fn discard(ctx: &QueueContext) {
    if let Ok(mut queue) = ctx.queue.try_borrow_mut() {
        if !queue.is_empty() {
            tracing::warn!("queue: dropping {} unflushed operations", queue.len());
        }
        queue.clear();
        queue.clear_hook();
    }
}

/// Flush the current thread's pending operations to the processors now.
///
/// Searches call this so they observe changes made earlier in the same
/// request. Processors stay open until the transaction resolves.
pub fn process_queue() -> QueueResult<usize> {
    if !has_queue() {
        return Ok(0);
    }
    let queue = get_queue()?;
    let mut queue = queue.try_borrow_mut().map_err(|_| QueueError::QueueBusy {
        context: "process_queue".to_string(),
    })?;
    queue.process()
}

/// Get the current queue size (for metrics)
pub fn get_queue_size() -> usize {
    CURRENT_QUEUE.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(|ctx| ctx.queue.try_borrow().ok().map(|q| q.len()))
            .unwrap_or(0)
    })
}

/// Get a copy of current queue contents (for debugging)
pub fn get_queue_contents() -> Vec<IndexOperation> {
    CURRENT_QUEUE.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(|ctx| ctx.queue.try_borrow().ok().map(|q| q.get_state()))
            .unwrap_or_default()
    })
}

/// Removes the thread's queue when dropped
#[must_use = "the queue is removed as soon as the scope guard is dropped"]
pub struct RequestScope {
    _not_send: std::marker::PhantomData<Rc<()>>,
}

/// Open a request scope; the thread's queue lives until the guard drops
pub fn request_scope() -> RequestScope {
    RequestScope {
        _not_send: std::marker::PhantomData,
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        remove_queue();
    }
}
