//! The [`World`] ties the engine together: the entity->record sparse index,
//! the component registry, the archetype/table arenas with their hash
//! indexes, structural-change orchestration, relationship pairs, and the
//! observer hook.
//!
//! Components are entities: registering a Rust type spawns an entity, stores
//! its [`ComponentInfo`] on it as a data component, and tags it with the
//! bookkeeping builtins. Structural changes (attach/detach) move an entity's
//! row between tables through a single `move_row` operation so that every
//! archetype sharing a table stays consistent.

use std::any::TypeId;
use std::collections::HashMap;

use crate::archetype::{Archetype, ArchetypeEntity, ArchetypeId, ArchetypeMatch, Edge};
use crate::component::{builtin, cmp_ids, ids_match, signature_hash, ComponentInfo, Term};
use crate::entity::EntityId;
use crate::query::Terms;
use crate::sparse::SparseSet;
use crate::table::{bytes_of, Table, TableId};
use crate::EcsError;

// ---------------------------------------------------------------------------
// EcsRecord
// ---------------------------------------------------------------------------

/// Where a live entity is stored: its archetype, its row in the archetype's
/// entity array, and its row in the (possibly shared) table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EcsRecord {
    pub archetype: ArchetypeId,
    pub row: usize,
    pub table_row: usize,
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

type ObserverFn = Box<dyn FnMut(&World, EntityId, ComponentInfo)>;

struct Observer {
    event: EntityId,
    terms: Terms,
    callback: ObserverFn,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

pub struct World {
    pub(crate) entities: SparseSet<EcsRecord>,
    pub(crate) archetypes: Vec<Archetype>,
    pub(crate) tables: Vec<Table>,
    /// Signature hash (all ids) -> archetype.
    type_index: HashMap<u64, ArchetypeId>,
    /// Signature hash (data ids only) -> shared table.
    table_index: HashMap<u64, TableId>,
    /// Memoized per-Rust-type component registration.
    components: HashMap<TypeId, ComponentInfo>,
    pub(crate) cached_queries: HashMap<EntityId, crate::query::CachedQuery>,
    observers: Vec<Observer>,
    delta_time: f32,
}

impl World {
    /// Create a world with the root archetype and the builtin entities.
    pub fn new() -> Self {
        let mut world = Self {
            entities: SparseSet::new(),
            archetypes: vec![Archetype::new(Vec::new(), TableId(0))],
            tables: vec![Table::new(&[])],
            type_index: HashMap::new(),
            table_index: HashMap::new(),
            components: HashMap::new(),
            cached_queries: HashMap::new(),
            observers: Vec::new(),
            delta_time: 0.0,
        };
        let empty_hash = signature_hash(std::iter::empty());
        world.type_index.insert(empty_hash, ArchetypeId(0));
        world.table_index.insert(empty_hash, TableId(0));

        let builtins = [
            builtin::COMPONENT_META,
            builtin::DO_NOT_DELETE,
            builtin::TAG,
            builtin::EXCLUSIVE,
            builtin::WILDCARD,
            builtin::CHILD_OF,
            builtin::ON_SET,
            builtin::ON_UNSET,
        ];
        for expected in builtins {
            let spawned = world.spawn();
            debug_assert_eq!(spawned, expected, "builtin spawn order violated");
        }

        // Every builtin is a component entity: it carries its own metadata,
        // is protected from deletion, and the sizeless ones are tags. The
        // meta component describes itself, which bootstraps the cycle.
        let meta = Self::meta_info();
        for id in builtins {
            let described = if id == builtin::COMPONENT_META {
                meta
            } else {
                ComponentInfo::tag(id)
            };
            world
                .set_raw(id, meta, bytes_of(&described))
                .expect("builtin metadata");
            world
                .add_id(id, builtin::DO_NOT_DELETE)
                .expect("builtin protection");
            if described.size == 0 {
                world.add_id(id, builtin::TAG).expect("builtin tag marker");
            }
        }
        world
            .add_id(builtin::CHILD_OF, builtin::EXCLUSIVE)
            .expect("child-of exclusivity");

        world
            .components
            .insert(TypeId::of::<ComponentInfo>(), meta);
        world
    }

    #[inline]
    fn meta_info() -> ComponentInfo {
        ComponentInfo::of::<ComponentInfo>(builtin::COMPONENT_META)
    }

    /// Frame delta time, exposed to iteration views.
    #[inline]
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    #[inline]
    pub fn set_delta_time(&mut self, dt: f32) {
        self.delta_time = dt;
    }

    /// Number of live entities (component entities included).
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Spawn a new empty entity in the root archetype.
    pub fn spawn(&mut self) -> EntityId {
        let raw = self.entities.create_new(EcsRecord {
            archetype: ArchetypeId(0),
            row: 0,
            table_row: 0,
        });
        let id = EntityId::from_raw(raw);
        let table_row = self.tables[0].add_row(id);
        let row = self.archetypes[0].push_entity(id, table_row);
        let record = self.entities.get_mut(raw).expect("fresh entity record");
        record.row = row;
        record.table_row = table_row;
        id
    }

    /// Despawn an entity, recursively despawning its `ChildOf` children
    /// first. The entity's index is recycled with a bumped generation.
    pub fn despawn(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let record = self.record(entity).ok_or(EcsError::DeadEntity(entity))?;
        if self.archetypes[record.archetype.0 as usize].has(builtin::DO_NOT_DELETE) {
            return Err(EcsError::ProtectedEntity(entity));
        }

        let child_pair = EntityId::pair(builtin::CHILD_OF, entity);
        let terms = Terms::new(vec![Term::with(child_pair)]);
        let mut children = Vec::new();
        for arch in self.archetypes_matching(&terms) {
            children.extend(
                self.archetypes[arch.0 as usize]
                    .entities()
                    .iter()
                    .map(|ae| ae.entity),
            );
        }
        for child in children {
            self.despawn(child)?;
        }

        // Children removal may have swapped our rows around.
        let record = self.record(entity).ok_or(EcsError::DeadEntity(entity))?;
        self.remove_entity_storage(entity, record);
        self.entities.remove(entity.to_raw());
        tracing::trace!(entity = %entity, "despawned");
        Ok(())
    }

    /// Whether the id refers to a live entity. A pair exists when both of
    /// its halves resolve to live indices.
    pub fn exists(&self, entity: EntityId) -> bool {
        if entity.is_pair() {
            self.entities.current_id(entity.pair_first() as u64).is_some()
                && self.entities.current_id(entity.pair_second() as u64).is_some()
        } else {
            self.entities.contains(entity.to_raw())
        }
    }

    /// The full component list (tags and pairs included) of an entity.
    pub fn components_of(&self, entity: EntityId) -> Option<&[ComponentInfo]> {
        let record = self.record(entity)?;
        Some(self.archetypes[record.archetype.0 as usize].components())
    }

    // -- component registration ---------------------------------------------

    /// Component metadata for a Rust type, registering it on first use.
    ///
    /// Registration spawns the component entity, stores its metadata on it,
    /// and tags it with the bookkeeping builtins.
    pub fn component<T: Copy + 'static>(&mut self) -> ComponentInfo {
        let key = TypeId::of::<T>();
        if let Some(&info) = self.components.get(&key) {
            return info;
        }
        let id = self.spawn();
        let info = ComponentInfo::of::<T>(id);
        self.set_raw(id, Self::meta_info(), bytes_of(&info))
            .expect("component registration");
        self.add_id(id, builtin::DO_NOT_DELETE)
            .expect("component protection");
        if info.size == 0 {
            self.add_id(id, builtin::TAG).expect("tag marker");
        }
        self.components.insert(key, info);
        tracing::debug!(component = %id, size = info.size, "registered component type");
        info
    }

    /// Metadata for an already-registered Rust type.
    pub fn component_info_of<T: 'static>(&self) -> Option<ComponentInfo> {
        self.components.get(&TypeId::of::<T>()).copied()
    }

    /// Metadata for an id-addressed component: pairs are sizeless, plain ids
    /// are read back from the meta component on the component entity.
    pub fn component_info(&self, id: EntityId) -> Option<ComponentInfo> {
        if id.is_pair() {
            return Some(ComponentInfo::tag(id));
        }
        let record = self.record(id)?;
        let archetype = &self.archetypes[record.archetype.0 as usize];
        let table = &self.tables[archetype.table().0 as usize];
        let column = table.column_index(builtin::COMPONENT_META)?;
        Some(table.column::<ComponentInfo>(column)[record.table_row])
    }

    // -- typed component access ---------------------------------------------

    /// Set a component value, attaching it first if absent. Setting an
    /// already-present component overwrites in place with no archetype move.
    pub fn set<T: Copy + 'static>(&mut self, entity: EntityId, value: T) -> Result<(), EcsError> {
        let info = self.component::<T>();
        if info.size == 0 {
            let newly = self.attach(entity, info)?;
            if newly {
                self.emit(builtin::ON_SET, entity, info);
            }
            return Ok(());
        }
        self.set_raw(entity, info, bytes_of(&value))
    }

    pub fn get<T: Copy + 'static>(&self, entity: EntityId) -> Option<&T> {
        let info = self.component_info_of::<T>()?;
        if info.size == 0 {
            return None;
        }
        let record = self.record(entity)?;
        let archetype = &self.archetypes[record.archetype.0 as usize];
        let table = &self.tables[archetype.table().0 as usize];
        let column = table.column_index(info.id)?;
        Some(&table.column::<T>(column)[record.table_row])
    }

    pub fn get_mut<T: Copy + 'static>(&mut self, entity: EntityId) -> Option<&mut T> {
        let info = self.component_info_of::<T>()?;
        if info.size == 0 {
            return None;
        }
        let record = self.record(entity)?;
        let archetype = &self.archetypes[record.archetype.0 as usize];
        let table_id = archetype.table().0 as usize;
        let column = self.tables[table_id].column_index(info.id)?;
        Some(&mut self.tables[table_id].column_mut::<T>(column)[record.table_row])
    }

    pub fn has<T: Copy + 'static>(&self, entity: EntityId) -> bool {
        let Some(info) = self.component_info_of::<T>() else {
            return false;
        };
        self.has_id(entity, info.id)
    }

    /// Detach a typed component. A no-op if the entity does not carry it.
    pub fn unset<T: Copy + 'static>(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let info = self.component::<T>();
        self.detach(entity, info.id).map(|_| ())
    }

    // -- id-addressed component access --------------------------------------

    /// Attach a tag or pair by id. Data-bearing component ids are rejected,
    /// since an attach without a payload would leave the column slot
    /// uninitialized.
    pub fn add_id(&mut self, entity: EntityId, id: EntityId) -> Result<(), EcsError> {
        let info = self.id_info(id)?;
        let newly = self.attach(entity, info)?;
        if newly {
            self.emit(builtin::ON_SET, entity, info);
        }
        Ok(())
    }

    /// Detach any component by id. Pair ids may use a wildcard half.
    pub fn remove_id(&mut self, entity: EntityId, id: EntityId) -> Result<(), EcsError> {
        self.detach(entity, id).map(|_| ())
    }

    pub fn has_id(&self, entity: EntityId, id: EntityId) -> bool {
        let Some(record) = self.record(entity) else {
            return false;
        };
        self.archetypes[record.archetype.0 as usize].has(id)
    }

    /// Set a component by raw bytes. `data` must match the declared size.
    pub fn set_raw(
        &mut self,
        entity: EntityId,
        info: ComponentInfo,
        data: &[u8],
    ) -> Result<(), EcsError> {
        if info.size > 0 && data.len() != info.size {
            return Err(EcsError::SizeMismatch {
                component: info.id,
                expected: info.size,
                got: data.len(),
            });
        }
        let newly = self.attach(entity, info)?;
        if info.size > 0 {
            let record = self.record(entity).ok_or(EcsError::DeadEntity(entity))?;
            let table_id = self.archetypes[record.archetype.0 as usize].table().0 as usize;
            let column = self.tables[table_id]
                .column_index(info.id)
                .expect("column missing after attach");
            self.tables[table_id].write(column, record.table_row, data);
        }
        if newly {
            self.emit(builtin::ON_SET, entity, info);
        }
        Ok(())
    }

    /// Raw payload bytes of a component on an entity.
    pub fn component_bytes(&self, entity: EntityId, id: EntityId) -> Option<&[u8]> {
        let record = self.record(entity)?;
        let archetype = &self.archetypes[record.archetype.0 as usize];
        let table = &self.tables[archetype.table().0 as usize];
        let column = table.column_index(id)?;
        Some(table.read(column, record.table_row))
    }

    // -- singletons ---------------------------------------------------------

    /// Store a value on its own component entity.
    pub fn set_singleton<T: Copy + 'static>(&mut self, value: T) -> Result<(), EcsError> {
        let id = self.component::<T>().id;
        self.set(id, value)
    }

    pub fn get_singleton<T: Copy + 'static>(&self) -> Option<&T> {
        let info = self.component_info_of::<T>()?;
        self.get(info.id)
    }

    // -- relationships ------------------------------------------------------

    /// Attach the pair `(kind, target)` to an entity. If `kind` is tagged
    /// [`builtin::EXCLUSIVE`], any existing pair with that kind is detached
    /// first, keeping at most one live target per kind.
    pub fn add_pair(
        &mut self,
        entity: EntityId,
        kind: EntityId,
        target: EntityId,
    ) -> Result<(), EcsError> {
        if self.has_id(kind, builtin::EXCLUSIVE) {
            if let Some(existing) = self.target(entity, kind, 0) {
                if existing.index() != target.index() {
                    self.detach(entity, EntityId::pair(kind, existing))?;
                }
            }
        }
        self.add_id(entity, EntityId::pair(kind, target))
    }

    pub fn unset_pair(
        &mut self,
        entity: EntityId,
        kind: EntityId,
        target: EntityId,
    ) -> Result<(), EcsError> {
        self.remove_id(entity, EntityId::pair(kind, target))
    }

    pub fn has_pair(&self, entity: EntityId, kind: EntityId, target: EntityId) -> bool {
        self.has_id(entity, EntityId::pair(kind, target))
    }

    /// The `index`-th target related to `entity` through `kind`.
    pub fn target(&self, entity: EntityId, kind: EntityId, index: usize) -> Option<EntityId> {
        let record = self.record(entity)?;
        let probe = EntityId::pair(kind, builtin::WILDCARD);
        let mut found = 0;
        for c in self.archetypes[record.archetype.0 as usize].components() {
            if ids_match(c.id, probe) {
                if found == index {
                    return self.resolve_index(c.id.pair_second());
                }
                found += 1;
            }
        }
        None
    }

    /// The `index`-th kind relating `entity` to `target`.
    pub fn action(&self, entity: EntityId, target: EntityId, index: usize) -> Option<EntityId> {
        let record = self.record(entity)?;
        let probe = EntityId::pair(builtin::WILDCARD, target);
        let mut found = 0;
        for c in self.archetypes[record.archetype.0 as usize].components() {
            if ids_match(c.id, probe) {
                if found == index {
                    return self.resolve_index(c.id.pair_first());
                }
                found += 1;
            }
        }
        None
    }

    // -- events -------------------------------------------------------------

    /// Register an observer for `event`, fired only when `terms` match the
    /// affected entity's archetype. Callbacks receive a shared world view;
    /// follow-up mutations must go through a command buffer.
    pub fn observe<F>(&mut self, event: EntityId, terms: Terms, callback: F)
    where
        F: FnMut(&World, EntityId, ComponentInfo) + 'static,
    {
        self.observers.push(Observer {
            event,
            terms,
            callback: Box::new(callback),
        });
    }

    /// Notify observers registered for `event` whose terms match the
    /// entity's current archetype.
    pub fn emit(&mut self, event: EntityId, entity: EntityId, component: ComponentInfo) {
        if self.observers.is_empty() {
            return;
        }
        let mut observers = std::mem::take(&mut self.observers);
        for observer in observers.iter_mut() {
            if observer.event != event {
                continue;
            }
            let Some(record) = self.record(entity) else {
                continue;
            };
            let archetype = &self.archetypes[record.archetype.0 as usize];
            if archetype.find_match(observer.terms.as_slice()) != ArchetypeMatch::Found {
                continue;
            }
            (observer.callback)(self, entity, component);
        }
        // Observers registered during dispatch land behind the existing ones.
        let added = std::mem::take(&mut self.observers);
        observers.extend(added);
        self.observers = observers;
    }

    // -- internals ----------------------------------------------------------

    #[inline]
    pub(crate) fn record(&self, entity: EntityId) -> Option<EcsRecord> {
        self.entities.get(entity.to_raw()).copied()
    }

    /// Current live id for a bare index (pairs store indices only).
    pub(crate) fn resolve_index(&self, index: u32) -> Option<EntityId> {
        self.entities
            .current_id(index as u64)
            .map(EntityId::from_raw)
    }

    fn id_info(&self, id: EntityId) -> Result<ComponentInfo, EcsError> {
        if id.is_pair() {
            return Ok(ComponentInfo::tag(id));
        }
        match self.component_info(id) {
            Some(info) if info.size > 0 => Err(EcsError::NotATag(id)),
            Some(info) => Ok(info),
            None => Ok(ComponentInfo::tag(id)),
        }
    }

    /// Move `entity` into the archetype that additionally has `info`.
    /// Returns whether an attach actually happened.
    fn attach(&mut self, entity: EntityId, info: ComponentInfo) -> Result<bool, EcsError> {
        let record = self.record(entity).ok_or(EcsError::DeadEntity(entity))?;
        if self.archetypes[record.archetype.0 as usize].has(info.id) {
            return Ok(false);
        }
        let destination = match self.archetypes[record.archetype.0 as usize].edge_add(info.id) {
            Some(found) => found,
            None => self.create_archetype(record.archetype, info, true),
        };
        self.move_entity(entity, destination)?;
        Ok(true)
    }

    /// Move `entity` into the archetype without `id`. Emits the unset event
    /// before the move so observers can still read the value. Wildcard pair
    /// ids resolve to the first concrete match. Returns whether a detach
    /// happened.
    fn detach(&mut self, entity: EntityId, id: EntityId) -> Result<bool, EcsError> {
        let record = self.record(entity).ok_or(EcsError::DeadEntity(entity))?;
        let archetype = &self.archetypes[record.archetype.0 as usize];
        let Some(index) = archetype.component_index(id) else {
            return Ok(false);
        };
        let concrete = archetype.components()[index];

        self.emit(builtin::ON_UNSET, entity, concrete);

        let record = self.record(entity).ok_or(EcsError::DeadEntity(entity))?;
        let destination =
            match self.archetypes[record.archetype.0 as usize].edge_remove(concrete.id) {
                Some(found) => found,
                None => self.create_archetype(record.archetype, concrete, false),
            };
        self.move_entity(entity, destination)?;
        Ok(true)
    }

    /// Find or create the archetype reached from `origin` by adding or
    /// removing `component`, and wire it into the graph.
    fn create_archetype(
        &mut self,
        origin: ArchetypeId,
        component: ComponentInfo,
        add: bool,
    ) -> ArchetypeId {
        let mut signature = self.archetypes[origin.0 as usize].components().to_vec();
        if add {
            signature.push(component);
            signature.sort_by(|a, b| cmp_ids(a.id, b.id));
        } else {
            signature.retain(|c| c.id != component.id);
        }
        let hash = signature_hash(signature.iter().map(|c| c.id));
        if let Some(&existing) = self.type_index.get(&hash) {
            return existing;
        }
        self.new_archetype(signature, hash)
    }

    /// Insert a new archetype vertex: create its (possibly shared) table,
    /// then diff its signature against every existing archetype to wire
    /// single-component edges in both directions. If no parent exists yet,
    /// the missing subset is created recursively so the node stays reachable
    /// from the root through add-edges alone.
    fn new_archetype(&mut self, signature: Vec<ComponentInfo>, hash: u64) -> ArchetypeId {
        let table_hash = signature_hash(signature.iter().filter(|c| c.is_data()).map(|c| c.id));
        let table = match self.table_index.get(&table_hash) {
            Some(&found) => found,
            None => {
                let id = TableId(self.tables.len() as u32);
                tracing::debug!(
                    table = id.0,
                    columns = signature.iter().filter(|c| c.is_data()).count(),
                    "created table"
                );
                self.tables.push(Table::new(&signature));
                self.table_index.insert(table_hash, id);
                id
            }
        };

        let id = ArchetypeId(self.archetypes.len() as u32);
        tracing::debug!(
            archetype = id.0,
            components = signature.len(),
            table = table.0,
            "created archetype"
        );
        self.archetypes.push(Archetype::new(signature, table));
        self.type_index.insert(hash, id);

        // (subset, superset, connecting component)
        let mut edges: Vec<(ArchetypeId, ArchetypeId, EntityId)> = Vec::new();
        {
            let new_arch = &self.archetypes[id.0 as usize];
            let new_len = new_arch.components().len();
            for (other_index, other) in self.archetypes.iter().enumerate().take(id.0 as usize) {
                let other_id = ArchetypeId(other_index as u32);
                if other.components().len() + 1 == new_len
                    && new_arch.is_superset(other.components())
                {
                    let c = diff_component(other.components(), new_arch.components());
                    edges.push((other_id, id, c));
                } else if other.components().len() == new_len + 1
                    && other.is_superset(new_arch.components())
                {
                    let c = diff_component(new_arch.components(), other.components());
                    edges.push((id, other_id, c));
                }
            }
        }
        let has_parent = edges.iter().any(|&(_, superset, _)| superset == id);
        for (subset, superset, component) in edges {
            self.connect(subset, superset, component);
        }

        if !has_parent && !self.archetypes[id.0 as usize].components().is_empty() {
            let mut subset = self.archetypes[id.0 as usize].components().to_vec();
            let dropped = subset.pop().expect("non-empty signature");
            let subset_hash = signature_hash(subset.iter().map(|c| c.id));
            let parent = match self.type_index.get(&subset_hash) {
                Some(&found) => found,
                None => self.new_archetype(subset, subset_hash),
            };
            self.connect(parent, id, dropped.id);
        }

        id
    }

    /// Add the edge pair between a subset and its one-component superset.
    /// Idempotent.
    fn connect(&mut self, subset: ArchetypeId, superset: ArchetypeId, component: EntityId) {
        if self.archetypes[subset.0 as usize].edge_add(component) == Some(superset) {
            return;
        }
        self.archetypes[subset.0 as usize].edges_add.push(Edge {
            component,
            archetype: superset,
        });
        self.archetypes[superset.0 as usize].edges_remove.push(Edge {
            component,
            archetype: subset,
        });
    }

    /// Move an entity's row from its current archetype into `destination`,
    /// carrying retained column bytes across tables and repairing the
    /// bookkeeping of every row displaced by the swap-pops.
    fn move_entity(&mut self, entity: EntityId, destination: ArchetypeId) -> Result<(), EcsError> {
        let record = self.record(entity).ok_or(EcsError::DeadEntity(entity))?;
        let source = record.archetype;
        debug_assert_ne!(source, destination);

        let (moved, swapped) = self.archetypes[source.0 as usize].swap_remove_entity(record.row);
        debug_assert_eq!(moved.entity.index(), entity.index());
        if let Some(displaced) = swapped {
            if let Some(r) = self.entities.get_mut(displaced.to_raw()) {
                r.row = record.row;
            }
        }

        let source_table = self.archetypes[source.0 as usize].table();
        let destination_table = self.archetypes[destination.0 as usize].table();

        let new_table_row;
        let mut displaced_owner = None;
        if source_table == destination_table {
            // Tag-only transition: the shared table row travels untouched.
            new_table_row = moved.table_row;
        } else {
            let (src, dst) = two_tables(
                &mut self.tables,
                source_table.0 as usize,
                destination_table.0 as usize,
            );
            let dst_row = dst.add_row(entity);
            displaced_owner = src.move_row(moved.table_row, dst, dst_row);
            new_table_row = dst_row;
        }
        if let Some(owner) = displaced_owner {
            self.fix_table_row(owner, moved.table_row);
        }

        let new_row = self.archetypes[destination.0 as usize].push_entity(entity, new_table_row);
        if let Some(r) = self.entities.get_mut(entity.to_raw()) {
            *r = EcsRecord {
                archetype: destination,
                row: new_row,
                table_row: new_table_row,
            };
        }
        tracing::trace!(entity = %entity, from = source.0, to = destination.0, "moved entity");
        Ok(())
    }

    /// Remove an entity's rows from its archetype and table.
    fn remove_entity_storage(&mut self, entity: EntityId, record: EcsRecord) {
        let (moved, swapped) =
            self.archetypes[record.archetype.0 as usize].swap_remove_entity(record.row);
        debug_assert_eq!(moved.entity.index(), entity.index());
        if let Some(displaced) = swapped {
            if let Some(r) = self.entities.get_mut(displaced.to_raw()) {
                r.row = record.row;
            }
        }
        let table = self.archetypes[record.archetype.0 as usize].table();
        if let Some(owner) = self.tables[table.0 as usize].remove_row(moved.table_row) {
            self.fix_table_row(owner, moved.table_row);
        }
    }

    /// After a table swap-pop, `owner` occupies `new_row`; patch its record
    /// and its archetype entry.
    fn fix_table_row(&mut self, owner: EntityId, new_row: usize) {
        let Some(record) = self.record(owner) else {
            debug_assert!(false, "table row owned by a dead entity");
            return;
        };
        if let Some(r) = self.entities.get_mut(owner.to_raw()) {
            r.table_row = new_row;
        }
        self.archetypes[record.archetype.0 as usize].set_table_row(record.row, new_row);
    }

    pub(crate) fn archetype_entities(&self, id: ArchetypeId) -> &[ArchetypeEntity] {
        self.archetypes[id.0 as usize].entities()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.len())
            .field("archetypes", &self.archetypes.len())
            .field("tables", &self.tables.len())
            .finish()
    }
}

/// First id present in `larger` but not in `smaller` (both sorted).
fn diff_component(smaller: &[ComponentInfo], larger: &[ComponentInfo]) -> EntityId {
    let mut i = 0;
    for c in larger {
        if i < smaller.len() && smaller[i].id == c.id {
            i += 1;
        } else {
            return c.id;
        }
    }
    debug_assert!(false, "signatures differ by exactly one component");
    larger[larger.len() - 1].id
}

/// Disjoint mutable borrows of two tables in the arena.
fn two_tables(tables: &mut [Table], a: usize, b: usize) -> (&mut Table, &mut Table) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = tables.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = tables.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Vel {
        dx: f32,
        dy: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Frozen;

    #[test]
    fn spawn_and_exists() {
        let mut world = World::new();
        let e = world.spawn();
        assert!(world.exists(e));
        assert_eq!(world.components_of(e), Some(&[][..]));
    }

    #[test]
    fn despawn_invalidates_handle_even_after_reuse() {
        let mut world = World::new();
        let e = world.spawn();
        world.despawn(e).unwrap();
        assert!(!world.exists(e));

        // The index comes back with a new generation.
        let reused = world.spawn();
        assert_eq!(reused.index(), e.index());
        assert_ne!(reused, e);
        assert!(!world.exists(e));
        assert!(world.exists(reused));
    }

    #[test]
    fn despawn_dead_entity_errors() {
        let mut world = World::new();
        let e = world.spawn();
        world.despawn(e).unwrap();
        assert!(matches!(world.despawn(e), Err(EcsError::DeadEntity(_))));
    }

    #[test]
    fn set_get_roundtrip() {
        let mut world = World::new();
        let e = world.spawn();
        world.set(e, Pos { x: 1.0, y: 2.0 }).unwrap();
        assert_eq!(world.get::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn set_unset_has() {
        let mut world = World::new();
        let e = world.spawn();
        world.set(e, Pos { x: 0.0, y: 0.0 }).unwrap();
        assert!(world.has::<Pos>(e));
        world.unset::<Pos>(e).unwrap();
        assert!(!world.has::<Pos>(e));
        assert_eq!(world.get::<Pos>(e), None);
    }

    #[test]
    fn set_twice_overwrites_in_place() {
        let mut world = World::new();
        let e = world.spawn();
        world.set(e, Pos { x: 1.0, y: 1.0 }).unwrap();
        let archetype_after_first = world.record(e).unwrap().archetype;
        let count_after_first = world.archetype_count();

        world.set(e, Pos { x: 9.0, y: 9.0 }).unwrap();
        assert_eq!(world.record(e).unwrap().archetype, archetype_after_first);
        assert_eq!(world.archetype_count(), count_after_first);
        assert_eq!(world.get::<Pos>(e), Some(&Pos { x: 9.0, y: 9.0 }));
    }

    #[test]
    fn retained_values_survive_signature_churn() {
        let mut world = World::new();
        let e = world.spawn();
        world.set(e, Pos { x: 3.0, y: 4.0 }).unwrap();

        for i in 0..8 {
            world
                .set(
                    e,
                    Vel {
                        dx: i as f32,
                        dy: 0.0,
                    },
                )
                .unwrap();
            world.unset::<Vel>(e).unwrap();
        }
        assert_eq!(world.get::<Pos>(e), Some(&Pos { x: 3.0, y: 4.0 }));
        assert!(!world.has::<Vel>(e));
    }

    #[test]
    fn tag_attach_reuses_parent_table() {
        let mut world = World::new();
        let e = world.spawn();
        world.set(e, Pos { x: 1.0, y: 2.0 }).unwrap();
        let data_arch = world.record(e).unwrap().archetype;

        world.set(e, Frozen).unwrap();
        let tagged_arch = world.record(e).unwrap().archetype;

        assert_ne!(data_arch, tagged_arch);
        assert_eq!(
            world.archetypes[data_arch.0 as usize].table(),
            world.archetypes[tagged_arch.0 as usize].table(),
            "tag-only archetypes must share the identical table"
        );
        assert_eq!(world.get::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn swap_fixup_repairs_shared_table_rows() {
        let mut world = World::new();
        // Three entities in the same table; move the middle one out.
        let a = world.spawn();
        let b = world.spawn();
        let c = world.spawn();
        for (i, e) in [a, b, c].iter().enumerate() {
            world
                .set(
                    *e,
                    Pos {
                        x: i as f32,
                        y: 0.0,
                    },
                )
                .unwrap();
        }
        world.set(b, Vel { dx: 1.0, dy: 1.0 }).unwrap();

        assert_eq!(world.get::<Pos>(a), Some(&Pos { x: 0.0, y: 0.0 }));
        assert_eq!(world.get::<Pos>(b), Some(&Pos { x: 1.0, y: 0.0 }));
        assert_eq!(world.get::<Pos>(c), Some(&Pos { x: 2.0, y: 0.0 }));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut world = World::new();
        let e = world.spawn();
        let info = world.component::<Pos>();
        let result = world.set_raw(e, info, &[0u8; 3]);
        assert!(matches!(result, Err(EcsError::SizeMismatch { .. })));
    }

    #[test]
    fn add_id_rejects_data_components() {
        let mut world = World::new();
        let e = world.spawn();
        let info = world.component::<Pos>();
        assert!(matches!(
            world.add_id(e, info.id),
            Err(EcsError::NotATag(_))
        ));
    }

    #[test]
    fn component_entities_are_protected() {
        let mut world = World::new();
        let info = world.component::<Pos>();
        assert!(matches!(
            world.despawn(info.id),
            Err(EcsError::ProtectedEntity(_))
        ));
        assert!(world.has_id(info.id, builtin::DO_NOT_DELETE));
    }

    #[test]
    fn tag_components_are_marked() {
        let mut world = World::new();
        let tag = world.component::<Frozen>();
        assert_eq!(tag.size, 0);
        assert!(world.has_id(tag.id, builtin::TAG));

        let data = world.component::<Pos>();
        assert!(!world.has_id(data.id, builtin::TAG));
    }

    #[test]
    fn component_metadata_readable_by_id() {
        let mut world = World::new();
        let info = world.component::<Pos>();
        let read_back = world.component_info(info.id).unwrap();
        assert_eq!(read_back, info);
    }

    #[test]
    fn singleton_roundtrip() {
        let mut world = World::new();
        world.set_singleton(Pos { x: 7.0, y: 8.0 }).unwrap();
        assert_eq!(world.get_singleton::<Pos>(), Some(&Pos { x: 7.0, y: 8.0 }));
    }

    // -- relationships ------------------------------------------------------

    #[test]
    fn pair_attach_and_target_lookup() {
        let mut world = World::new();
        let likes = world.spawn();
        let apple = world.spawn();
        let e = world.spawn();

        world.add_pair(e, likes, apple).unwrap();
        assert!(world.has_pair(e, likes, apple));
        assert_eq!(world.target(e, likes, 0), Some(apple));
        assert_eq!(world.action(e, apple, 0), Some(likes));
    }

    #[test]
    fn non_exclusive_kinds_allow_multiple_targets() {
        let mut world = World::new();
        let likes = world.spawn();
        let apple = world.spawn();
        let pear = world.spawn();
        let e = world.spawn();

        world.add_pair(e, likes, apple).unwrap();
        world.add_pair(e, likes, pear).unwrap();
        assert!(world.has_pair(e, likes, apple));
        assert!(world.has_pair(e, likes, pear));
    }

    #[test]
    fn exclusive_kind_keeps_single_target() {
        let mut world = World::new();
        let slot = world.spawn();
        world.add_id(slot, builtin::EXCLUSIVE).unwrap();
        let first = world.spawn();
        let second = world.spawn();
        let e = world.spawn();

        world.add_pair(e, slot, first).unwrap();
        world.add_pair(e, slot, second).unwrap();

        assert!(!world.has_pair(e, slot, first));
        assert!(world.has_pair(e, slot, second));
        assert_eq!(world.target(e, slot, 0), Some(second));
        assert_eq!(world.target(e, slot, 1), None);
    }

    #[test]
    fn despawn_tears_down_children_recursively() {
        let mut world = World::new();
        let parent = world.spawn();
        let child = world.spawn();
        let grandchild = world.spawn();
        world.add_pair(child, builtin::CHILD_OF, parent).unwrap();
        world
            .add_pair(grandchild, builtin::CHILD_OF, child)
            .unwrap();

        world.despawn(parent).unwrap();
        assert!(!world.exists(parent));
        assert!(!world.exists(child));
        assert!(!world.exists(grandchild));
    }

    #[test]
    fn child_of_is_exclusive() {
        let mut world = World::new();
        let p1 = world.spawn();
        let p2 = world.spawn();
        let child = world.spawn();

        world.add_pair(child, builtin::CHILD_OF, p1).unwrap();
        world.add_pair(child, builtin::CHILD_OF, p2).unwrap();

        assert!(!world.has_pair(child, builtin::CHILD_OF, p1));
        assert!(world.has_pair(child, builtin::CHILD_OF, p2));
    }

    // -- events -------------------------------------------------------------

    #[test]
    fn on_set_fires_only_on_first_attach() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut world = World::new();
        let pos = world.component::<Pos>();
        let fired = Rc::new(Cell::new(0));
        let seen = fired.clone();
        world.observe(
            builtin::ON_SET,
            Terms::new(vec![Term::with(pos.id)]),
            move |_, _, info| {
                if info.id == pos.id {
                    seen.set(seen.get() + 1);
                }
            },
        );

        let e = world.spawn();
        world.set(e, Pos { x: 1.0, y: 1.0 }).unwrap();
        world.set(e, Pos { x: 2.0, y: 2.0 }).unwrap();
        assert_eq!(fired.get(), 1, "overwrite must not re-fire on-set");
    }

    #[test]
    fn on_unset_sees_the_value_before_removal() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut world = World::new();
        let pos = world.component::<Pos>();
        let seen = Rc::new(Cell::new(None));
        let out = seen.clone();
        world.observe(
            builtin::ON_UNSET,
            Terms::new(vec![Term::with(pos.id)]),
            move |w, entity, info| {
                if info.id == pos.id {
                    out.set(w.get::<Pos>(entity).copied());
                }
            },
        );

        let e = world.spawn();
        world.set(e, Pos { x: 5.0, y: 6.0 }).unwrap();
        world.unset::<Pos>(e).unwrap();
        assert_eq!(seen.get(), Some(Pos { x: 5.0, y: 6.0 }));
        assert!(!world.has::<Pos>(e));
    }
}
