//! Event Subscribers: Content Lifecycle to Queue Operations
//!
//! Translates content lifecycle events into index queue operations:
//! - **Added / Copied**: index the object
//! - **Modified**: reindex the attributes named by the change descriptions
//!   (everything if none are named)
//! - **Removed**: unindex the object
//! - **Moved**: index the object under its new parent
//! - **Transitioned**: full reindex after a workflow transition
//!
//! Transient objects are filtered out before anything reaches the queue.
//!
//! ## Security Cascade
//!
//! When a modification touches a security index (see
//! `QueueConfig::security_indexes`), every descendant is reindexed with just
//! those indexes and without a metadata update, since its effective
//! permissions derive from its ancestors.

use tracing::debug;

use crate::config::{self, QueueConfig};
use crate::queue::{self, Attributes, IndexQueue, TargetRef};
use crate::QueueResult;

/// Names the attributes changed by a modification
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeDescription {
    /// Schema or interface the attributes belong to, if any
    pub schema: Option<String>,
    pub attributes: Vec<String>,
}

impl ChangeDescription {
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schema: None,
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn for_schema<I, S>(schema: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schema: Some(schema.into()),
            ..Self::new(attributes)
        }
    }
}

/// Content lifecycle event
#[derive(Debug, Clone)]
pub enum ObjectEvent {
    Added {
        object: TargetRef,
    },
    Modified {
        object: TargetRef,
        descriptions: Vec<ChangeDescription>,
    },
    Copied {
        object: TargetRef,
        original: TargetRef,
    },
    Removed {
        object: TargetRef,
    },
    Moved {
        object: TargetRef,
        old_parent: Option<String>,
        new_parent: Option<String>,
    },
    Transitioned {
        object: TargetRef,
        transition: String,
    },
}

impl ObjectEvent {
    pub fn object(&self) -> &TargetRef {
        match self {
            ObjectEvent::Added { object }
            | ObjectEvent::Modified { object, .. }
            | ObjectEvent::Copied { object, .. }
            | ObjectEvent::Removed { object }
            | ObjectEvent::Moved { object, .. }
            | ObjectEvent::Transitioned { object, .. } => object,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ObjectEvent::Added { .. } => "added",
            ObjectEvent::Modified { .. } => "modified",
            ObjectEvent::Copied { .. } => "copied",
            ObjectEvent::Removed { .. } => "removed",
            ObjectEvent::Moved { .. } => "moved",
            ObjectEvent::Transitioned { .. } => "transitioned",
        }
    }
}

/// Enqueue the operations for `event` on an explicit queue.
///
/// Returns `false` when the event was ignored.
pub fn dispatch_event(queue: &mut IndexQueue, event: &ObjectEvent, config: &QueueConfig) -> bool {
    let object = event.object();
    if object.is_transient() {
        debug!("subscribers: skipping transient {} for {}", event.name(), object.label());
        return false;
    }

    match event {
        ObjectEvent::Added { object } | ObjectEvent::Copied { object, .. } => {
            queue.index(object.clone(), None);
        }
        ObjectEvent::Modified { object, descriptions } => {
            let attributes = changed_attributes(descriptions);
            let security: Attributes = attributes
                .iter()
                .flatten()
                .filter(|a| config.is_security_index(a))
                .cloned()
                .collect();

            queue.reindex(object.clone(), attributes, true);

            if !security.is_empty() {
                reindex_descendants(queue, object, &security);
            }
        }
        ObjectEvent::Removed { object } => {
            queue.unindex(object.clone());
        }
        ObjectEvent::Moved { object, new_parent, .. } => {
            // Without a new parent this is a removal, handled by Removed
            if new_parent.is_none() {
                return false;
            }
            queue.index(object.clone(), None);
        }
        ObjectEvent::Transitioned { object, transition } => {
            debug!("subscribers: '{}' on {}", transition, object.label());
            queue.reindex(object.clone(), None, true);
        }
    }
    true
}

/// Enqueue the operations for `event` on the current thread's queue
pub fn handle_event(event: &ObjectEvent) -> QueueResult<bool> {
    queue::with_queue(|q| dispatch_event(q, event, config::current()))
}

/// Union of the attribute names in `descriptions`; `None` means all
fn changed_attributes(descriptions: &[ChangeDescription]) -> Option<Attributes> {
    let attributes: Attributes = descriptions
        .iter()
        .flat_map(|d| d.attributes.iter().cloned())
        .collect();
    if attributes.is_empty() {
        None
    } else {
        Some(attributes)
    }
}

fn reindex_descendants(queue: &mut IndexQueue, root: &TargetRef, security: &Attributes) {
    let mut stack = root.object().sub_objects();
    let mut count = 0usize;
    while let Some(child) = stack.pop() {
        if child.is_transient() || child == *root {
            continue;
        }
        stack.extend(child.object().sub_objects());
        queue.reindex(child, Some(security.clone()), false);
        count += 1;
    }
    if count > 0 {
        debug!("subscribers: security cascade reindexed {} objects under {}", count, root.label());
    }
}
