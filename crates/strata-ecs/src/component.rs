//! Component metadata and id ordering.
//!
//! Every component, tag, and relationship kind is itself an entity; the
//! [`ComponentInfo`] describing it (its id and byte size) is stored on that
//! entity as a data component. A size of zero marks a tag, which occupies no
//! table column.
//!
//! This module also owns the id ordering used for archetype signatures and
//! query terms, including the wildcard rule for relationship pairs.

use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ---------------------------------------------------------------------------
// Builtin entities
// ---------------------------------------------------------------------------

/// Entities claimed by the world at construction time, in spawn order.
/// Their indices are fixed, which lets id-level code (the pair wildcard
/// comparison in particular) work without a world reference.
pub mod builtin {
    use crate::entity::EntityId;

    /// The self-describing metadata component (`ComponentInfo` itself).
    pub const COMPONENT_META: EntityId = EntityId::new(1, 0);
    /// Tag protecting an entity from `despawn`.
    pub const DO_NOT_DELETE: EntityId = EntityId::new(2, 0);
    /// Tag marking a zero-sized component entity.
    pub const TAG: EntityId = EntityId::new(3, 0);
    /// Tag marking a relationship kind as at-most-one-target per entity.
    pub const EXCLUSIVE: EntityId = EntityId::new(4, 0);
    /// Matches any id in the target position of a pair.
    pub const WILDCARD: EntityId = EntityId::new(5, 0);
    /// Parent/child relationship kind; exclusive.
    pub const CHILD_OF: EntityId = EntityId::new(6, 0);
    /// Event fired after a component is first attached to an entity.
    pub const ON_SET: EntityId = EntityId::new(7, 0);
    /// Event fired before a component is detached from an entity.
    pub const ON_UNSET: EntityId = EntityId::new(8, 0);
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata describing one component: the entity that names it and the byte
/// width of its payload. `size == 0` marks a tag (presence only, no column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    /// The entity representing this component.
    pub id: EntityId,
    /// Payload width in bytes; 0 for tags and pairs.
    pub size: usize,
    /// Payload alignment; 1 for tags and pairs.
    pub(crate) align: usize,
}

impl ComponentInfo {
    pub(crate) fn new(id: EntityId, size: usize, align: usize) -> Self {
        Self { id, size, align }
    }

    /// Metadata for a tag or pair id (no payload).
    pub fn tag(id: EntityId) -> Self {
        Self::new(id, 0, 1)
    }

    /// Metadata for a Rust component type attached to `id`.
    pub fn of<T: Copy + 'static>(id: EntityId) -> Self {
        Self::new(id, std::mem::size_of::<T>(), std::mem::align_of::<T>())
    }

    /// Whether this component stores data (occupies a table column).
    #[inline]
    pub fn is_data(&self) -> bool {
        self.size > 0
    }
}

// ---------------------------------------------------------------------------
// Id ordering
// ---------------------------------------------------------------------------

/// Total order over ids used for sorting signatures and terms: raw 64-bit
/// comparison. Pairs sort after plain ids (the pair flag is the top bit),
/// and pairs with the same kind sort adjacently, which groups relationship
/// instances together in a signature.
#[inline]
pub(crate) fn cmp_ids(a: EntityId, b: EntityId) -> Ordering {
    a.to_raw().cmp(&b.to_raw())
}

/// Wildcard-aware id equality used for matching (never for sorting: it is
/// not transitive). Two pairs match when both halves match, where the
/// [`builtin::WILDCARD`] index matches anything.
#[inline]
pub(crate) fn ids_match(a: EntityId, b: EntityId) -> bool {
    if a == b {
        return true;
    }
    if a.is_pair() && b.is_pair() {
        let w = builtin::WILDCARD.index();
        let first = a.pair_first() == b.pair_first() || a.pair_first() == w || b.pair_first() == w;
        let second =
            a.pair_second() == b.pair_second() || a.pair_second() == w || b.pair_second() == w;
        return first && second;
    }
    false
}

// ---------------------------------------------------------------------------
// Signature hashing
// ---------------------------------------------------------------------------

const HASH_SEED: u64 = 5381;

/// Rolling signature hash over a sorted id list (djb2 over raw ids).
pub(crate) fn signature_hash(ids: impl Iterator<Item = EntityId>) -> u64 {
    let mut hash = HASH_SEED;
    for id in ids {
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(id.to_raw());
    }
    hash
}

// ---------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------

/// Whether a term requires presence or absence of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermOp {
    With,
    Without,
}

/// One predicate element of a query: a component id and an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: EntityId,
    pub op: TermOp,
}

impl Term {
    pub fn with(id: EntityId) -> Self {
        Self {
            id,
            op: TermOp::With,
        }
    }

    pub fn without(id: EntityId) -> Self {
        Self {
            id,
            op: TermOp::Without,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
