//! Identity-set diffing of child collections.
//!
//! Compares the last-known server snapshot of an aggregate's children with the
//! collection the caller wants to persist, matching records by identifier.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

/// A dependent record owned by exactly one aggregate.
pub trait ChildRecord {
    /// Persisted identifier. `None` means the record has not been saved yet.
    fn id(&self) -> Option<i64>;

    /// Whether the comparison-relevant fields of two records match.
    ///
    /// Display-only fields must not take part. Text fields go through
    /// [`text_eq`] so absent, null and blank compare equal.
    fn same_content(&self, other: &Self) -> bool;
}

/// How a text field is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCompare {
    /// Byte-for-byte after null normalization.
    Exact,
    /// Leading and trailing whitespace ignored on both sides.
    Trimmed,
}

/// Compare two optional text values after mapping `None` to `""`.
#[must_use]
pub fn text_eq(a: Option<&str>, b: Option<&str>, mode: TextCompare) -> bool {
    let a = a.unwrap_or_default();
    let b = b.unwrap_or_default();
    match mode {
        TextCompare::Exact => a == b,
        TextCompare::Trimmed => a.trim() == b.trim(),
    }
}

/// Classification of a desired child collection against the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildDiff<C> {
    /// Desired records with no id, or with an id unknown to the current set.
    pub creates: Vec<C>,
    /// Desired records matched by id whose content changed.
    pub updates: Vec<C>,
    /// Current ids absent from the desired set.
    pub deletes: Vec<i64>,
}

impl<C> Default for ChildDiff<C> {
    fn default() -> Self {
        Self {
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

impl<C> ChildDiff<C> {
    /// Whether applying the diff would change anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of child writes the diff implies.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

/// Diff `desired` against `current`.
///
/// Output order follows the inputs: creates and updates in `desired` order,
/// deletes in `current` order. Current records without an id cannot be
/// matched and are ignored.
pub fn diff<C: ChildRecord + Clone>(current: &[C], desired: &[C]) -> ChildDiff<C> {
    let current_by_id: HashMap<i64, &C> = current
        .iter()
        .filter_map(|record| record.id().map(|id| (id, record)))
        .collect();
    let desired_ids: HashSet<i64> = desired.iter().filter_map(ChildRecord::id).collect();

    let mut result = ChildDiff::default();

    for record in desired {
        match record.id().and_then(|id| current_by_id.get(&id)) {
            Some(existing) => {
                if !existing.same_content(record) {
                    result.updates.push(record.clone());
                }
            }
            // No id, or a stale/client-supplied id: both become creates.
            None => result.creates.push(record.clone()),
        }
    }

    let mut seen_deletes = HashSet::new();
    for id in current.iter().filter_map(ChildRecord::id) {
        if !desired_ids.contains(&id) && seen_deletes.insert(id) {
            result.deletes.push(id);
        }
    }

    result
}
