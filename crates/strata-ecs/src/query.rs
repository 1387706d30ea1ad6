//! Query construction and iteration.
//!
//! A query is a sorted list of [`Term`]s. Matching walks the archetype graph
//! depth-first from the empty root: a present Without-term prunes a whole
//! subtree (descendants only ever add components), a missing With-term keeps
//! descending, and a full match yields the archetype. The cost of a query is
//! proportional to the archetype nodes its terms touch, never to the number
//! of entities in the world.
//!
//! Iteration hands out [`ArchetypeView`]s: a row count, per-column
//! [`Field`]s that resolve each archetype row through its table-row remap,
//! the entity id per row, and the frame delta time.

use crate::archetype::{ArchetypeEntity, ArchetypeId, ArchetypeMatch};
use crate::component::{cmp_ids, Term};
use crate::entity::EntityId;
use crate::world::World;
use crate::EcsError;

/// Construction-time cap on the number of terms in one query.
pub const MAX_TERMS: usize = 25;

// ---------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------

/// A reusable, sorted query signature.
#[derive(Debug, Clone)]
pub struct Terms {
    terms: Vec<Term>,
}

impl Terms {
    /// Sort and dedupe a term list.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_TERMS`] distinct terms are supplied.
    pub fn new(mut terms: Vec<Term>) -> Self {
        terms.sort_by(|a, b| cmp_ids(a.id, b.id));
        terms.dedup_by(|a, b| a.id == b.id);
        assert!(
            terms.len() <= MAX_TERMS,
            "query exceeds the {MAX_TERMS}-term limit"
        );
        Self { terms }
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[Term] {
        &self.terms
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

// ---------------------------------------------------------------------------
// QueryBuilder
// ---------------------------------------------------------------------------

/// Fluent builder collecting With/Without terms by type, id, or pair.
pub struct QueryBuilder<'w> {
    world: &'w mut World,
    terms: Vec<Term>,
}

impl<'w> QueryBuilder<'w> {
    pub fn with<T: Copy + 'static>(mut self) -> Self {
        let id = self.world.component::<T>().id;
        self.push(Term::with(id));
        self
    }

    pub fn without<T: Copy + 'static>(mut self) -> Self {
        let id = self.world.component::<T>().id;
        self.push(Term::without(id));
        self
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.push(Term::with(id));
        self
    }

    pub fn without_id(mut self, id: EntityId) -> Self {
        self.push(Term::without(id));
        self
    }

    pub fn with_pair(self, kind: EntityId, target: EntityId) -> Self {
        self.with_id(EntityId::pair(kind, target))
    }

    pub fn without_pair(self, kind: EntityId, target: EntityId) -> Self {
        self.without_id(EntityId::pair(kind, target))
    }

    fn push(&mut self, term: Term) {
        if !self.terms.iter().any(|t| t.id == term.id) {
            self.terms.push(term);
        }
    }

    pub fn build(self) -> Terms {
        Terms::new(self.terms)
    }
}

// ---------------------------------------------------------------------------
// Field views
// ---------------------------------------------------------------------------

/// Read view over one component column for the rows of one archetype.
/// Indexing goes through the archetype's table-row remap.
pub struct Field<'w, T> {
    column: &'w [T],
    entities: &'w [ArchetypeEntity],
}

impl<'w, T> Field<'w, T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn get(&self, row: usize) -> Option<&'w T> {
        let column = self.column;
        self.entities.get(row).map(|ae| &column[ae.table_row])
    }

    pub fn iter(&self) -> impl Iterator<Item = &'w T> + 'w {
        let column = self.column;
        self.entities.iter().map(move |ae| &column[ae.table_row])
    }
}

impl<T> std::ops::Index<usize> for Field<'_, T> {
    type Output = T;

    #[inline]
    fn index(&self, row: usize) -> &T {
        &self.column[self.entities[row].table_row]
    }
}

/// Mutable view over one component column for the rows of one archetype.
pub struct FieldMut<'w, T> {
    column: &'w mut [T],
    entities: &'w [ArchetypeEntity],
}

impl<T> FieldMut<'_, T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<T> std::ops::Index<usize> for FieldMut<'_, T> {
    type Output = T;

    #[inline]
    fn index(&self, row: usize) -> &T {
        &self.column[self.entities[row].table_row]
    }
}

impl<T> std::ops::IndexMut<usize> for FieldMut<'_, T> {
    #[inline]
    fn index_mut(&mut self, row: usize) -> &mut T {
        &mut self.column[self.entities[row].table_row]
    }
}

// ---------------------------------------------------------------------------
// ArchetypeView
// ---------------------------------------------------------------------------

/// One matching archetype handed to an iteration callback.
pub struct ArchetypeView<'w> {
    world: &'w World,
    id: ArchetypeId,
}

impl<'w> ArchetypeView<'w> {
    /// Number of rows (entities) in this archetype.
    #[inline]
    pub fn count(&self) -> usize {
        self.world.archetype_entities(self.id).len()
    }

    /// The entity stored at `row`.
    #[inline]
    pub fn entity(&self, row: usize) -> EntityId {
        self.world.archetype_entities(self.id)[row].entity
    }

    #[inline]
    pub fn delta_time(&self) -> f32 {
        self.world.delta_time()
    }

    /// Whether this archetype carries the component, without fetching it.
    pub fn has<T: Copy + 'static>(&self) -> bool {
        let Some(info) = self.world.component_info_of::<T>() else {
            return false;
        };
        self.world.archetypes[self.id.0 as usize].has(info.id)
    }

    /// Column view for a data component. `None` for absent components and
    /// tags.
    pub fn field<T: Copy + 'static>(&self) -> Option<Field<'w, T>> {
        let world = self.world;
        let info = world.component_info_of::<T>()?;
        if info.size == 0 {
            return None;
        }
        let archetype = &world.archetypes[self.id.0 as usize];
        let table = &world.tables[archetype.table().0 as usize];
        let column = table.column_index(info.id)?;
        Some(Field {
            column: table.column::<T>(column),
            entities: archetype.entities(),
        })
    }
}

// ---------------------------------------------------------------------------
// Cached (persisted) queries
// ---------------------------------------------------------------------------

/// Term list stored on an entity, with its match list cached until new
/// archetypes appear.
pub(crate) struct CachedQuery {
    terms: Terms,
    matched: Vec<ArchetypeId>,
    /// Archetype count at the last match; re-walk when it changes.
    watermark: usize,
}

// ---------------------------------------------------------------------------
// World query API
// ---------------------------------------------------------------------------

impl World {
    /// Start building a query signature.
    pub fn query(&mut self) -> QueryBuilder<'_> {
        QueryBuilder {
            world: self,
            terms: Vec::new(),
        }
    }

    /// Depth-first walk of the archetype graph collecting every archetype
    /// that satisfies `terms`, including currently empty ones.
    pub fn archetypes_matching(&self, terms: &Terms) -> Vec<ArchetypeId> {
        let mut matched = Vec::new();
        let mut visited = vec![false; self.archetypes.len()];
        let mut stack = vec![ArchetypeId(0)];

        while let Some(id) = stack.pop() {
            let index = id.0 as usize;
            if visited[index] {
                continue;
            }
            visited[index] = true;

            let archetype = &self.archetypes[index];
            match archetype.find_match(terms.as_slice()) {
                ArchetypeMatch::Stop => continue,
                ArchetypeMatch::Found => matched.push(id),
                ArchetypeMatch::Continue => {}
            }
            for edge in &archetype.edges_add {
                stack.push(edge.archetype);
            }
        }
        matched
    }

    /// Invoke `f` once per matching archetype that has at least one row.
    pub fn each<F>(&self, terms: &Terms, mut f: F)
    where
        F: FnMut(ArchetypeView<'_>),
    {
        for id in self.archetypes_matching(terms) {
            if self.archetypes[id.0 as usize].is_empty() {
                continue;
            }
            f(ArchetypeView { world: self, id });
        }
    }

    /// Total number of entities matching `terms`.
    pub fn count(&self, terms: &Terms) -> usize {
        self.archetypes_matching(terms)
            .iter()
            .map(|id| self.archetypes[id.0 as usize].len())
            .sum()
    }

    /// Collect every matching entity id. Convenience for tests and small
    /// result sets; iteration code should prefer [`each`](Self::each).
    pub fn entities_matching(&self, terms: &Terms) -> Vec<EntityId> {
        let mut out = Vec::new();
        self.each(terms, |view| {
            for row in 0..view.count() {
                out.push(view.entity(row));
            }
        });
        out
    }

    /// Mutable column view for one archetype. Multi-column mutation across
    /// a walk goes through a command buffer instead.
    pub fn field_mut<T: Copy + 'static>(&mut self, id: ArchetypeId) -> Option<FieldMut<'_, T>> {
        let info = self.component_info_of::<T>()?;
        if info.size == 0 {
            return None;
        }
        let archetype = self.archetypes.get(id.0 as usize)?;
        let table_id = archetype.table().0 as usize;
        let column = self.tables[table_id].column_index(info.id)?;
        Some(FieldMut {
            column: self.tables[table_id].column_mut::<T>(column),
            entities: archetype.entities(),
        })
    }

    // -- persisted queries --------------------------------------------------

    /// Persist a term list on a fresh entity so it can be referenced by id
    /// later (e.g. by a scheduler binding systems to pre-built queries).
    pub fn build_query(&mut self, terms: Terms) -> EntityId {
        let id = self.spawn();
        self.cached_queries.insert(
            id,
            CachedQuery {
                terms,
                matched: Vec::new(),
                watermark: 0,
            },
        );
        id
    }

    /// The term list persisted under `query`.
    pub fn query_terms(&self, query: EntityId) -> Option<&Terms> {
        self.cached_queries.get(&query).map(|c| &c.terms)
    }

    /// Iterate a persisted query. The cached match list is re-walked only
    /// when archetypes were created since the last run.
    pub fn each_query<F>(&mut self, query: EntityId, mut f: F) -> Result<(), EcsError>
    where
        F: FnMut(ArchetypeView<'_>),
    {
        let mut cached = self
            .cached_queries
            .remove(&query)
            .ok_or(EcsError::DeadEntity(query))?;

        if cached.watermark != self.archetypes.len() {
            cached.matched = self.archetypes_matching(&cached.terms);
            cached.watermark = self.archetypes.len();
        }

        let world: &World = self;
        for &id in &cached.matched {
            if world.archetypes[id.0 as usize].is_empty() {
                continue;
            }
            f(ArchetypeView { world, id });
        }

        self.cached_queries.insert(query, cached);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
