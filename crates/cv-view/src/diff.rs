//! Ordered-list-by-key reconciliation, independent of any rendering.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOp<K> {
    /// Drop the item with this key
    Delete { key: K },
    /// Keep the existing item; it ends up at position `at`
    Update { key: K, at: usize },
    /// Create a new item at position `at`
    Insert { key: K, at: usize },
}

impl<K: fmt::Display> fmt::Display for ListOp<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListOp::Delete { key } => write!(f, "delete {}", key),
            ListOp::Update { key, at } => write!(f, "update {} @{}", key, at),
            ListOp::Insert { key, at } => write!(f, "insert {} @{}", key, at),
        }
    }
}

/// Diff two keyed lists.
///
/// Deletes come first. The remaining ops walk the resulting list in order:
/// survivors keep their previous relative order and new keys follow them in
/// the order they appear in `next`. Duplicate keys in `next` count once.
pub fn reconcile_keys<K>(previous: &[K], next: &[K]) -> Vec<ListOp<K>>
where
    K: Eq + Hash + Clone,
{
    let wanted: HashSet<&K> = next.iter().collect();
    let existing: HashSet<&K> = previous.iter().collect();
    let mut ops = Vec::with_capacity(previous.len() + next.len());

    for key in previous {
        if !wanted.contains(key) {
            ops.push(ListOp::Delete { key: key.clone() });
        }
    }

    let mut at = 0;
    let mut placed: HashSet<&K> = HashSet::new();

    for key in previous.iter().filter(|k| wanted.contains(k)) {
        if placed.insert(key) {
            ops.push(ListOp::Update {
                key: key.clone(),
                at,
            });
            at += 1;
        }
    }

    for key in next.iter().filter(|k| !existing.contains(k)) {
        if placed.insert(key) {
            ops.push(ListOp::Insert {
                key: key.clone(),
                at,
            });
            at += 1;
        }
    }

    ops
}

/// Apply ops produced by [`reconcile_keys`] to a concrete list
pub fn apply_ops<K, T>(
    items: &mut Vec<T>,
    ops: &[ListOp<K>],
    key_of: impl Fn(&T) -> &K,
    mut create: impl FnMut(&K) -> T,
    mut update: impl FnMut(&mut T),
) where
    K: Eq,
{
    for op in ops {
        match op {
            ListOp::Delete { key } => items.retain(|item| key_of(item) != key),
            ListOp::Update { key, at } => {
                let Some(pos) = items.iter().position(|item| key_of(item) == key) else {
                    continue;
                };
                let target = (*at).min(items.len() - 1);
                if pos != target {
                    let item = items.remove(pos);
                    items.insert(target, item);
                }
                update(&mut items[target]);
            }
            ListOp::Insert { key, at } => {
                let at = (*at).min(items.len());
                items.insert(at, create(key));
            }
        }
    }
}
