use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A content object that can be catalogued.
///
/// The queue never looks inside the object; it only needs identity, an
/// optional physical path (for logging and persistence), whether the object
/// is transient, and its direct children for the security cascade.
pub trait Indexable: fmt::Debug + Send + Sync {
    /// Physical path of the object, e.g. `/site/news/item-1`
    fn physical_path(&self) -> Option<String> {
        None
    }

    /// Objects created and discarded before being persisted are never indexed
    fn is_transient(&self) -> bool {
        false
    }

    /// Direct children (used to cascade security reindexing)
    fn sub_objects(&self) -> Vec<TargetRef> {
        Vec::new()
    }
}

/// Identity-compared handle on an [`Indexable`] object
///
/// Two `TargetRef`s are equal iff they point at the same allocation, never
/// by value. Cloning is cheap.
#[derive(Clone)]
pub struct TargetRef(Arc<dyn Indexable>);

impl TargetRef {
    pub fn new<T: Indexable + 'static>(object: T) -> Self {
        Self(Arc::new(object))
    }

    pub fn from_arc(object: Arc<dyn Indexable>) -> Self {
        Self(object)
    }

    /// Identity key of the referenced object
    pub fn key(&self) -> TargetKey {
        TargetKey(Arc::as_ptr(&self.0).cast::<()>() as usize)
    }

    pub fn object(&self) -> &dyn Indexable {
        self.0.as_ref()
    }

    pub fn physical_path(&self) -> Option<String> {
        self.0.physical_path()
    }

    pub fn is_transient(&self) -> bool {
        self.0.is_transient()
    }

    /// Human readable label: the path if there is one, the identity otherwise
    pub fn label(&self) -> String {
        self.physical_path()
            .unwrap_or_else(|| format!("<object {:#x}>", self.key().0))
    }
}

impl PartialEq for TargetRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TargetRef {}

impl Hash for TargetRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetRef({})", self.label())
    }
}

impl<T: Indexable + 'static> From<Arc<T>> for TargetRef {
    fn from(object: Arc<T>) -> Self {
        Self(object)
    }
}

/// Identity of a target within one process (allocation address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey(usize);
