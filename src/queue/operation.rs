use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::key::TargetRef;

/// Attribute (index) names touched by a partial reindex
pub type Attributes = BTreeSet<String>;

/// Kind of a queued index operation.
///
/// Variants are declared in flush order: removals, then refreshes, then
/// additions. The derived `Ord` is what the default optimizer sorts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    Unindex,
    Reindex,
    Index,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Unindex => "unindex",
            OpKind::Reindex => "reindex",
            OpKind::Index => "index",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending index mutation
///
/// - `attributes == None` means all attributes
/// - `metadata_update` is only meaningful for reindex; index carries it
///   after absorbing a reindex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOperation {
    pub kind: OpKind,
    pub target: TargetRef,
    pub attributes: Option<Attributes>,
    pub metadata_update: Option<bool>,
}

impl IndexOperation {
    pub fn index(target: TargetRef, attributes: Option<Attributes>) -> Self {
        Self {
            kind: OpKind::Index,
            target,
            attributes: normalize(attributes),
            metadata_update: None,
        }
    }

    pub fn reindex(target: TargetRef, attributes: Option<Attributes>, metadata_update: bool) -> Self {
        Self {
            kind: OpKind::Reindex,
            target,
            attributes: normalize(attributes),
            metadata_update: Some(metadata_update),
        }
    }

    pub fn unindex(target: TargetRef) -> Self {
        Self {
            kind: OpKind::Unindex,
            target,
            attributes: None,
            metadata_update: None,
        }
    }

    /// Does this operation cover every attribute?
    pub fn is_full(&self) -> bool {
        self.attributes.is_none()
    }

    /// Metadata flag with the reindex default applied
    pub fn wants_metadata(&self) -> bool {
        self.metadata_update.unwrap_or(true)
    }
}

impl fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target.label())?;
        if let Some(attrs) = &self.attributes {
            let names: Vec<&str> = attrs.iter().map(String::as_str).collect();
            write!(f, " [{}]", names.join(", "))?;
        }
        Ok(())
    }
}

/// Empty attribute sets mean "everything"
fn normalize(attributes: Option<Attributes>) -> Option<Attributes> {
    attributes.filter(|a| !a.is_empty())
}

/// Build an attribute set from string slices
pub fn attrs<I, S>(names: I) -> Attributes
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}
