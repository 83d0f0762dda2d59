//! Queue optimizer: collapses the raw operation log
//!
//! The default optimizer folds every target's operations left to right and
//! keeps at most one operation per target:
//!
//! | earlier  | later    | result                                    |
//! |----------|----------|-------------------------------------------|
//! | index    | index    | index (all attributes)                    |
//! | index    | reindex  | index (all attributes, reindex's flag)    |
//! | index    | unindex  | nothing; the target leaves the batch      |
//! | reindex  | index    | reindex (all attributes)                  |
//! | reindex  | reindex  | reindex (attribute union, flags OR-ed)    |
//! | reindex  | unindex  | unindex                                   |
//! | unindex  | index    | reindex (all attributes)                  |
//! | unindex  | reindex  | reindex (all attributes)                  |
//! | unindex  | unindex  | unindex                                   |
//!
//! The collapsed log is then stably sorted: unindex, reindex, index.

use std::collections::HashMap;

use super::key::TargetKey;
use super::operation::{IndexOperation, OpKind};

/// Replaceable log optimizer.
///
/// A replacement consumes the whole raw log and must return at most one
/// operation per target. Ordering of the result is up to the implementation.
pub trait QueueOptimizer {
    fn optimize(&self, log: Vec<IndexOperation>) -> Vec<IndexOperation>;

    fn name(&self) -> &'static str;
}

/// Default optimizer (fold per target, then sort by kind)
#[derive(Debug, Clone, Copy, Default)]
pub struct CollapsingOptimizer;

impl QueueOptimizer for CollapsingOptimizer {
    fn optimize(&self, log: Vec<IndexOperation>) -> Vec<IndexOperation> {
        let mut collapsed = collapse(log);
        // Vec::sort_by_key is stable: same-kind operations keep their order
        collapsed.sort_by_key(|op| op.kind);
        collapsed
    }

    fn name(&self) -> &'static str {
        "collapsing"
    }
}

/// Dispatches the raw log untouched, in program order
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughOptimizer;

impl QueueOptimizer for PassthroughOptimizer {
    fn optimize(&self, log: Vec<IndexOperation>) -> Vec<IndexOperation> {
        log
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Fold the log per target, keeping first-appearance order between targets
fn collapse(log: Vec<IndexOperation>) -> Vec<IndexOperation> {
    let mut slots: Vec<Option<IndexOperation>> = Vec::with_capacity(log.len());
    let mut positions: HashMap<TargetKey, usize> = HashMap::with_capacity(log.len());

    for op in log {
        let key = op.target.key();
        match positions.get(&key).copied() {
            None => {
                positions.insert(key, slots.len());
                slots.push(Some(op));
            }
            Some(pos) => {
                let Some(earlier) = slots[pos].take() else {
                    continue;
                };
                match merge(&earlier, op) {
                    Some(merged) => slots[pos] = Some(merged),
                    None => {
                        // Cancelled; a later operation starts a new entry
                        positions.remove(&key);
                    }
                }
            }
        }
    }

    slots.into_iter().flatten().collect()
}

/// Combine two consecutive operations on the same target.
///
/// Returns `None` when they cancel out.
fn merge(earlier: &IndexOperation, later: IndexOperation) -> Option<IndexOperation> {
    use OpKind::*;

    let target = later.target.clone();
    let merged = match (earlier.kind, later.kind) {
        (Index, Unindex) => return None,

        (Index, Index) => IndexOperation {
            kind: Index,
            target,
            attributes: None,
            metadata_update: or_flags(earlier.metadata_update, later.metadata_update),
        },

        // A new object is indexed in full; it only inherits the flag
        (Index, Reindex) => IndexOperation {
            kind: Index,
            target,
            attributes: None,
            metadata_update: later.metadata_update,
        },

        (Reindex, Reindex) => {
            let attributes = match (&earlier.attributes, later.attributes) {
                (Some(a), Some(b)) => Some(a.union(&b).cloned().collect()),
                _ => None,
            };
            IndexOperation {
                kind: Reindex,
                target,
                attributes,
                metadata_update: or_flags(earlier.metadata_update, later.metadata_update),
            }
        }

        // The object may still be catalogued: refresh everything
        (Unindex, Index) | (Unindex, Reindex) | (Reindex, Index) => IndexOperation {
            kind: Reindex,
            target,
            attributes: None,
            metadata_update: Some(true),
        },

        (Reindex, Unindex) | (Unindex, Unindex) => IndexOperation::unindex(target),
    };

    Some(merged)
}

fn or_flags(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (None, None) => None,
        _ => Some(a.unwrap_or(false) || b.unwrap_or(false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::key::TargetRef;
    use crate::queue::operation::attrs;
    use crate::testing::Document;

    fn doc(path: &str) -> TargetRef {
        TargetRef::new(Document::at(path))
    }

    fn optimize(log: Vec<IndexOperation>) -> Vec<IndexOperation> {
        CollapsingOptimizer.optimize(log)
    }

    #[test]
    fn test_repeated_unindex_is_idempotent() {
        let t = doc("/t");
        let out = optimize(vec![IndexOperation::unindex(t.clone()), IndexOperation::unindex(t.clone())]);
        assert_eq!(out, vec![IndexOperation::unindex(t)]);
    }

    #[test]
    fn test_index_then_unindex_cancels() {
        let t = doc("/t");
        let out = optimize(vec![IndexOperation::index(t.clone(), None), IndexOperation::unindex(t)]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_unindex_then_index_becomes_full_reindex() {
        let t = doc("/t");
        let out = optimize(vec![IndexOperation::unindex(t.clone()), IndexOperation::index(t.clone(), None)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, OpKind::Reindex);
        assert_eq!(out[0].target, t);
        assert!(out[0].is_full());
    }

    #[test]
    fn test_reindex_attribute_union() {
        let t = doc("/t");
        let out = optimize(vec![
            IndexOperation::reindex(t.clone(), Some(attrs(["a", "b"])), true),
            IndexOperation::reindex(t.clone(), Some(attrs(["b", "c"])), true),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, OpKind::Reindex);
        assert_eq!(out[0].attributes, Some(attrs(["a", "b", "c"])));
    }

    #[test]
    fn test_full_reindex_absorbs_partial_in_both_orders() {
        let t = doc("/t");

        let out = optimize(vec![
            IndexOperation::reindex(t.clone(), Some(attrs(["a"])), true),
            IndexOperation::reindex(t.clone(), None, true),
        ]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_full());

        let out = optimize(vec![
            IndexOperation::reindex(t.clone(), None, true),
            IndexOperation::reindex(t.clone(), Some(attrs(["a"])), true),
        ]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_full());
    }

    #[test]
    fn test_sort_by_kind() {
        let (a, b, c) = (doc("/a"), doc("/b"), doc("/c"));
        let out = optimize(vec![
            IndexOperation::reindex(a.clone(), None, true),
            IndexOperation::unindex(b.clone()),
            IndexOperation::index(c.clone(), None),
        ]);
        assert_eq!(
            out,
            vec![
                IndexOperation::unindex(b),
                IndexOperation::reindex(a, None, true),
                IndexOperation::index(c, None),
            ]
        );
    }

    #[test]
    fn test_sort_is_stable_within_kind() {
        let (a, b, c) = (doc("/a"), doc("/b"), doc("/c"));
        let out = optimize(vec![
            IndexOperation::index(c.clone(), None),
            IndexOperation::reindex(b.clone(), Some(attrs(["x"])), false),
            IndexOperation::index(a.clone(), None),
            IndexOperation::reindex(c.clone(), None, false),
        ]);
        let order: Vec<(OpKind, TargetRef)> = out.into_iter().map(|op| (op.kind, op.target)).collect();
        assert_eq!(
            order,
            vec![(OpKind::Reindex, b), (OpKind::Index, c), (OpKind::Index, a)]
        );
    }

    #[test]
    fn test_index_absorbs_reindex_flag() {
        let t = doc("/t");
        let out = optimize(vec![
            IndexOperation::index(t.clone(), Some(attrs(["Title"]))),
            IndexOperation::reindex(t.clone(), Some(attrs(["Subject"])), false),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, OpKind::Index);
        assert!(out[0].is_full());
        assert_eq!(out[0].metadata_update, Some(false));
    }

    #[test]
    fn test_metadata_flags_are_ored() {
        let t = doc("/t");
        let out = optimize(vec![
            IndexOperation::reindex(t.clone(), Some(attrs(["a"])), false),
            IndexOperation::reindex(t.clone(), Some(attrs(["b"])), true),
            IndexOperation::reindex(t.clone(), Some(attrs(["c"])), false),
        ]);
        assert_eq!(out[0].metadata_update, Some(true));
    }

    #[test]
    fn test_anything_ending_in_unindex() {
        let t = doc("/t");
        let out = optimize(vec![
            IndexOperation::unindex(t.clone()),
            IndexOperation::index(t.clone(), None),
            IndexOperation::reindex(t.clone(), Some(attrs(["a"])), true),
            IndexOperation::unindex(t.clone()),
        ]);
        assert_eq!(out, vec![IndexOperation::unindex(t.clone())]);

        let out = optimize(vec![
            IndexOperation::reindex(t.clone(), Some(attrs(["a"])), true),
            IndexOperation::unindex(t.clone()),
        ]);
        assert_eq!(out, vec![IndexOperation::unindex(t)]);
    }

    #[test]
    fn test_cancelled_target_can_reappear() {
        let t = doc("/t");
        let other = doc("/other");
        let out = optimize(vec![
            IndexOperation::index(t.clone(), None),
            IndexOperation::index(other.clone(), None),
            IndexOperation::unindex(t.clone()),
            IndexOperation::index(t.clone(), None),
        ]);
        assert_eq!(out, vec![IndexOperation::index(other, None), IndexOperation::index(t, None)]);
    }

    #[test]
    fn test_same_path_different_objects_are_distinct() {
        let first = doc("/same");
        let second = doc("/same");
        let out = optimize(vec![IndexOperation::index(first, None), IndexOperation::unindex(second)]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_passthrough_keeps_raw_log() {
        let t = doc("/t");
        let log = vec![IndexOperation::index(t.clone(), None), IndexOperation::unindex(t)];
        assert_eq!(PassthroughOptimizer.optimize(log.clone()), log);
    }
}
