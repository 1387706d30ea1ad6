//! Archetype nodes and the signature graph.
//!
//! An [`Archetype`] represents one exact, sorted set of component ids (tags
//! included). It owns the parallel entity array for its rows and points at
//! the [`Table`](crate::table::Table) holding its data columns; archetypes
//! that differ only by tags reference the same table, so each entity entry
//! carries its own table-row remap.
//!
//! Archetypes are arena-allocated in the world and reference each other by
//! index through add/remove edges, one edge per single-component difference.
//! The edges double as the query index: matching is a graph walk from the
//! empty root archetype, not a scan over all entities.

use crate::component::{cmp_ids, ids_match, ComponentInfo, Term, TermOp};
use crate::entity::EntityId;
use crate::table::TableId;

use std::cmp::Ordering;

/// Identifies an archetype within the world's arena. Index 0 is the empty
/// root archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub(crate) u32);

/// One entity stored in an archetype: its id plus the row it occupies in the
/// (possibly shared) table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArchetypeEntity {
    pub entity: EntityId,
    pub table_row: usize,
}

/// A graph edge: following `component` from this node leads to `archetype`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Edge {
    pub component: EntityId,
    pub archetype: ArchetypeId,
}

/// Outcome of matching one archetype against a sorted term list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchetypeMatch {
    /// A Without-term is present: prune this node and everything below it.
    Stop,
    /// All With-terms satisfied, no Without-term present.
    Found,
    /// Not satisfied here, but supersets further down may satisfy.
    Continue,
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

pub struct Archetype {
    /// Full signature, sorted by id. Uniquely identifies the archetype.
    components: Vec<ComponentInfo>,
    table: TableId,
    entities: Vec<ArchetypeEntity>,
    /// Edges to supersets reachable by adding one component.
    pub(crate) edges_add: Vec<Edge>,
    /// Edges to subsets reachable by removing one component.
    pub(crate) edges_remove: Vec<Edge>,
}

impl Archetype {
    pub(crate) fn new(components: Vec<ComponentInfo>, table: TableId) -> Self {
        debug_assert!(
            components.windows(2).all(|w| cmp_ids(w[0].id, w[1].id) == Ordering::Less),
            "archetype signature must be sorted and duplicate-free"
        );
        Self {
            components,
            table,
            entities: Vec::new(),
            edges_add: Vec::new(),
            edges_remove: Vec::new(),
        }
    }

    /// The full sorted signature, tags included.
    #[inline]
    pub fn components(&self) -> &[ComponentInfo] {
        &self.components
    }

    #[inline]
    pub(crate) fn table(&self) -> TableId {
        self.table
    }

    /// Number of entities stored here.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub(crate) fn entities(&self) -> &[ArchetypeEntity] {
        &self.entities
    }

    /// Position of `id` in the signature. Pair probes (wildcard halves) use
    /// a linear wildcard-aware scan; concrete ids binary-search.
    pub(crate) fn component_index(&self, id: EntityId) -> Option<usize> {
        if id.is_pair() {
            self.components.iter().position(|c| ids_match(c.id, id))
        } else {
            self.components
                .binary_search_by(|c| cmp_ids(c.id, id))
                .ok()
        }
    }

    #[inline]
    pub(crate) fn has(&self, id: EntityId) -> bool {
        self.component_index(id).is_some()
    }

    // -- row management -----------------------------------------------------

    /// Append an entity with its table row. Returns the archetype row.
    pub(crate) fn push_entity(&mut self, entity: EntityId, table_row: usize) -> usize {
        self.entities.push(ArchetypeEntity { entity, table_row });
        self.entities.len() - 1
    }

    /// Swap-pop the entity at `row`. Returns the removed entry and, when a
    /// swap happened, the entity that now occupies `row` (whose record the
    /// caller must repair).
    pub(crate) fn swap_remove_entity(&mut self, row: usize) -> (ArchetypeEntity, Option<EntityId>) {
        let last = self.entities.len() - 1;
        let removed = self.entities.swap_remove(row);
        let swapped = if row < last {
            Some(self.entities[row].entity)
        } else {
            None
        };
        (removed, swapped)
    }

    pub(crate) fn set_table_row(&mut self, row: usize, table_row: usize) {
        self.entities[row].table_row = table_row;
    }

    // -- graph predicates ---------------------------------------------------

    /// Two-pointer merge: true iff every id in `other` appears in this
    /// archetype's signature.
    pub(crate) fn is_superset(&self, other: &[ComponentInfo]) -> bool {
        let mut i = 0;
        let mut j = 0;
        while i < self.components.len() && j < other.len() {
            if self.components[i].id == other[j].id {
                j += 1;
            }
            i += 1;
        }
        j == other.len()
    }

    pub(crate) fn edge_add(&self, component: EntityId) -> Option<ArchetypeId> {
        self.edges_add
            .iter()
            .find(|e| e.component == component)
            .map(|e| e.archetype)
    }

    pub(crate) fn edge_remove(&self, component: EntityId) -> Option<ArchetypeId> {
        self.edges_remove
            .iter()
            .find(|e| e.component == component)
            .map(|e| e.archetype)
    }

    /// Match this archetype's sorted signature against a sorted term list.
    ///
    /// Two-pointer walk. A Without-term found in the signature stops the
    /// whole subtree (descendants only ever add components). A With-term not
    /// found here leaves the node unsatisfied but descendable. Without-terms
    /// whose id never shows up are skipped, both mid-walk (when the current
    /// component has already passed them) and in the trailing sweep.
    pub(crate) fn find_match(&self, terms: &[Term]) -> ArchetypeMatch {
        let comps = &self.components;
        let mut i = 0;
        let mut j = 0;

        while i < comps.len() && j < terms.len() {
            let current = comps[i].id;
            let term = terms[j];

            if ids_match(current, term.id) {
                if term.op == TermOp::Without {
                    return ArchetypeMatch::Stop;
                }
                j += 1;
                i += 1;
            } else if cmp_ids(current, term.id) == Ordering::Greater && term.op == TermOp::Without {
                j += 1;
            } else {
                i += 1;
            }
        }

        while j < terms.len() && terms[j].op == TermOp::Without {
            j += 1;
        }

        if j == terms.len() {
            ArchetypeMatch::Found
        } else {
            ArchetypeMatch::Continue
        }
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("signature", &self.components.iter().map(|c| c.id).collect::<Vec<_>>())
            .field("entities", &self.entities.len())
            .field("table", &self.table)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::builtin;

    fn id(index: u32) -> EntityId {
        EntityId::new(index, 0)
    }

    fn arch(ids: &[u32]) -> Archetype {
        let mut components: Vec<ComponentInfo> =
            ids.iter().map(|&i| ComponentInfo::tag(id(i))).collect();
        components.sort_by(|a, b| cmp_ids(a.id, b.id));
        Archetype::new(components, TableId(0))
    }

    #[test]
    fn superset_check() {
        let node = arch(&[1, 2, 3]);
        assert!(node.is_superset(&[ComponentInfo::tag(id(1)), ComponentInfo::tag(id(3))]));
        assert!(!node.is_superset(&[ComponentInfo::tag(id(1)), ComponentInfo::tag(id(4))]));
        assert!(node.is_superset(&[]));
    }

    #[test]
    fn swap_remove_reports_swapped_entity() {
        let mut node = arch(&[1]);
        node.push_entity(id(10), 0);
        node.push_entity(id(11), 1);
        node.push_entity(id(12), 2);

        let (removed, swapped) = node.swap_remove_entity(0);
        assert_eq!(removed.entity, id(10));
        assert_eq!(swapped, Some(id(12)));

        let (removed, swapped) = node.swap_remove_entity(1);
        assert_eq!(removed.entity, id(11));
        assert_eq!(swapped, None);
    }

    // -- find_match ---------------------------------------------------------

    fn terms(list: &[(u32, TermOp)]) -> Vec<Term> {
        let mut v: Vec<Term> = list
            .iter()
            .map(|&(i, op)| Term { id: id(i), op })
            .collect();
        v.sort_by(|a, b| cmp_ids(a.id, b.id));
        v
    }

    #[test]
    fn exact_satisfaction() {
        let node = arch(&[1, 2, 3]);
        let t = terms(&[(1, TermOp::With), (3, TermOp::With)]);
        assert_eq!(node.find_match(&t), ArchetypeMatch::Found);
    }

    #[test]
    fn missing_with_descends() {
        let node = arch(&[1, 3]);
        let t = terms(&[(1, TermOp::With), (2, TermOp::With)]);
        assert_eq!(node.find_match(&t), ArchetypeMatch::Continue);
    }

    #[test]
    fn present_without_stops() {
        let node = arch(&[1, 2, 3]);
        let t = terms(&[(1, TermOp::With), (2, TermOp::Without)]);
        assert_eq!(node.find_match(&t), ArchetypeMatch::Stop);
    }

    #[test]
    fn absent_without_is_skipped() {
        let node = arch(&[1, 3]);
        let t = terms(&[(1, TermOp::With), (2, TermOp::Without)]);
        assert_eq!(node.find_match(&t), ArchetypeMatch::Found);
    }

    #[test]
    fn trailing_without_terms_are_consumed() {
        let node = arch(&[1]);
        let t = terms(&[(1, TermOp::With), (5, TermOp::Without), (9, TermOp::Without)]);
        assert_eq!(node.find_match(&t), ArchetypeMatch::Found);
    }

    #[test]
    fn interleaved_without_before_with() {
        // Without-id lower than the With-id, absent from the signature.
        let node = arch(&[5]);
        let t = terms(&[(2, TermOp::Without), (5, TermOp::With)]);
        assert_eq!(node.find_match(&t), ArchetypeMatch::Found);

        // Present low Without prunes even though the With would match.
        let node = arch(&[2, 5]);
        assert_eq!(node.find_match(&t), ArchetypeMatch::Stop);
    }

    #[test]
    fn interleaved_without_between_withs() {
        let t = terms(&[(1, TermOp::With), (4, TermOp::Without), (7, TermOp::With)]);

        assert_eq!(arch(&[1, 7]).find_match(&t), ArchetypeMatch::Found);
        assert_eq!(arch(&[1, 4, 7]).find_match(&t), ArchetypeMatch::Stop);
        assert_eq!(arch(&[1]).find_match(&t), ArchetypeMatch::Continue);
        assert_eq!(arch(&[7]).find_match(&t), ArchetypeMatch::Continue);
        assert_eq!(arch(&[1, 2, 3, 7, 9]).find_match(&t), ArchetypeMatch::Found);
    }

    #[test]
    fn empty_terms_match_everything() {
        assert_eq!(arch(&[]).find_match(&[]), ArchetypeMatch::Found);
        assert_eq!(arch(&[1, 2]).find_match(&[]), ArchetypeMatch::Found);
    }

    #[test]
    fn root_continues_toward_with_terms() {
        let t = terms(&[(3, TermOp::With)]);
        assert_eq!(arch(&[]).find_match(&t), ArchetypeMatch::Continue);
    }

    #[test]
    fn wildcard_pair_term_matches_concrete_pair() {
        let kind = id(20);
        let concrete = EntityId::pair(kind, id(33));
        let mut components = vec![ComponentInfo::tag(id(1)), ComponentInfo::tag(concrete)];
        components.sort_by(|a, b| cmp_ids(a.id, b.id));
        let node = Archetype::new(components, TableId(0));

        let probe = EntityId::pair(kind, builtin::WILDCARD);
        let t = vec![Term::with(probe)];
        assert_eq!(node.find_match(&t), ArchetypeMatch::Found);
        assert!(node.has(probe));

        let other = EntityId::pair(id(21), builtin::WILDCARD);
        assert_eq!(node.find_match(&[Term::with(other)]), ArchetypeMatch::Continue);
    }
}
