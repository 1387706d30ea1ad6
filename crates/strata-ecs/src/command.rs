//! Deferred command buffer.
//!
//! A [`Commands`] instance is a per-consumer staging area for structural
//! mutations decided while a query walk is borrowing the world. Staging
//! never touches the world, so "decide" (iteration, `&World`) and "mutate"
//! (`merge`, `&mut World`) are cleanly split by the borrow checker.
//!
//! Intents live in three generational sparse sets. Set and Unset entries are
//! appended under fresh staging ids, so for one `(entity, component)` the
//! last staged write replays last and wins; Despawn entries are keyed by the
//! target entity, so repeats collapse. [`Commands::merge`] applies all Sets,
//! then all Unsets, then all Despawns, then clears the buffer — a despawn
//! always wins over any same-batch change to the same entity, regardless of
//! staging order.
//!
//! Entries whose target died outside the batch are skipped with a warning
//! instead of poisoning the whole merge.

use tracing::warn;

use crate::component::ComponentInfo;
use crate::entity::EntityId;
use crate::sparse::SparseSet;
use crate::table::{bytes_of, value_from_bytes};
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Staged intents
// ---------------------------------------------------------------------------

struct SetOp {
    entity: EntityId,
    component: ComponentInfo,
    /// Raw payload bytes; empty for tags and pairs.
    data: Vec<u8>,
}

struct UnsetOp {
    entity: EntityId,
    component: EntityId,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Staging buffer for Set/Unset/Despawn intents, applied in one batch.
pub struct Commands {
    set: SparseSet<SetOp>,
    unset: SparseSet<UnsetOp>,
    despawn: SparseSet<EntityId>,
}

impl Commands {
    pub fn new() -> Self {
        Self {
            set: SparseSet::new(),
            unset: SparseSet::new(),
            despawn: SparseSet::new(),
        }
    }

    /// Number of staged intents.
    pub fn len(&self) -> usize {
        self.set.len() + self.unset.len() + self.despawn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- staging ------------------------------------------------------------

    /// Spawn an empty entity immediately so its id can be referenced by
    /// staged commands. Spawning allocates identity only; it never moves
    /// rows another consumer could be iterating.
    pub fn spawn(&mut self, world: &mut World) -> EntityId {
        world.spawn()
    }

    /// Stage a despawn. Repeats for the same entity collapse.
    pub fn despawn(&mut self, entity: EntityId) {
        if !self.despawn.contains(entity.to_raw()) {
            self.despawn.add(entity.to_raw(), entity);
        }
    }

    /// Stage a typed component write. The component type must already be
    /// registered with the world.
    pub fn set<T: Copy + 'static>(
        &mut self,
        world: &World,
        entity: EntityId,
        value: T,
    ) -> Result<(), EcsError> {
        let info = world
            .component_info_of::<T>()
            .ok_or(EcsError::UnregisteredComponent(std::any::type_name::<T>()))?;
        let data = if info.size > 0 {
            bytes_of(&value).to_vec()
        } else {
            Vec::new()
        };
        self.set.create_new(SetOp {
            entity,
            component: info,
            data,
        });
        Ok(())
    }

    /// Stage an id-addressed tag attach.
    pub fn add_id(&mut self, entity: EntityId, id: EntityId) {
        self.set.create_new(SetOp {
            entity,
            component: ComponentInfo::tag(id),
            data: Vec::new(),
        });
    }

    /// Stage a relationship pair attach. Exclusivity of the kind is enforced
    /// when the batch is merged.
    pub fn set_pair(&mut self, entity: EntityId, kind: EntityId, target: EntityId) {
        self.add_id(entity, EntityId::pair(kind, target));
    }

    /// Stage a typed component removal.
    pub fn unset<T: Copy + 'static>(
        &mut self,
        world: &World,
        entity: EntityId,
    ) -> Result<(), EcsError> {
        let info = world
            .component_info_of::<T>()
            .ok_or(EcsError::UnregisteredComponent(std::any::type_name::<T>()))?;
        self.unset_id(entity, info.id);
        Ok(())
    }

    /// Stage an id-addressed removal.
    pub fn unset_id(&mut self, entity: EntityId, id: EntityId) {
        self.unset.create_new(UnsetOp {
            entity,
            component: id,
        });
    }

    /// Stage a relationship pair removal.
    pub fn unset_pair(&mut self, entity: EntityId, kind: EntityId, target: EntityId) {
        self.unset_id(entity, EntityId::pair(kind, target));
    }

    // -- reads --------------------------------------------------------------

    /// Read a component value, preferring the latest staged write for this
    /// entity over the world's current value.
    pub fn get<T: Copy + 'static>(&self, world: &World, entity: EntityId) -> Option<T> {
        let info = world.component_info_of::<T>()?;
        if info.size > 0 {
            let staged = self
                .set
                .iter()
                .filter(|op| op.entity == entity && op.component.id == info.id)
                .last();
            if let Some(op) = staged {
                return Some(value_from_bytes::<T>(&op.data));
            }
        }
        world.get::<T>(entity).copied()
    }

    /// Whether the entity currently has the component in the world. Staged
    /// intents are not consulted.
    pub fn has<T: Copy + 'static>(&self, world: &World, entity: EntityId) -> bool {
        world.has::<T>(entity)
    }

    // -- application --------------------------------------------------------

    /// Apply the batch: all Sets, then all Unsets, then all Despawns, then
    /// clear. Intents whose target is no longer alive are skipped with a
    /// warning.
    pub fn merge(&mut self, world: &mut World) {
        if self.is_empty() {
            return;
        }

        for op in self.set.drain_values() {
            if !world.exists(op.entity) {
                warn!(entity = %op.entity, component = %op.component.id, "skipping staged set for dead entity");
                continue;
            }
            let result = if op.component.id.is_pair() {
                apply_staged_pair(world, op.entity, op.component.id)
            } else if op.component.size == 0 {
                world.add_id(op.entity, op.component.id)
            } else {
                world.set_raw(op.entity, op.component, &op.data)
            };
            if let Err(err) = result {
                warn!(entity = %op.entity, component = %op.component.id, %err, "staged set failed");
            }
        }

        for op in self.unset.drain_values() {
            if !world.exists(op.entity) {
                warn!(entity = %op.entity, component = %op.component, "skipping staged unset for dead entity");
                continue;
            }
            if let Err(err) = world.remove_id(op.entity, op.component) {
                warn!(entity = %op.entity, component = %op.component, %err, "staged unset failed");
            }
        }

        for entity in self.despawn.drain_values() {
            if !world.exists(entity) {
                warn!(entity = %entity, "skipping staged despawn for dead entity");
                continue;
            }
            if let Err(err) = world.despawn(entity) {
                warn!(entity = %entity, %err, "staged despawn failed");
            }
        }

        self.clear();
    }

    /// Drop every staged intent without applying it.
    pub fn clear(&mut self) {
        self.set.clear();
        self.unset.clear();
        self.despawn.clear();
    }
}

impl Default for Commands {
    fn default() -> Self {
        Self::new()
    }
}

/// Replay a staged pair attach through the relationship path so kind
/// exclusivity applies at merge time, against the world as it is now.
fn apply_staged_pair(world: &mut World, entity: EntityId, pair: EntityId) -> Result<(), EcsError> {
    let kind = world
        .resolve_index(pair.pair_first())
        .ok_or(EcsError::DeadEntity(EntityId::new(pair.pair_first(), 0)))?;
    let target = world
        .resolve_index(pair.pair_second())
        .ok_or(EcsError::DeadEntity(EntityId::new(pair.pair_second(), 0)))?;
    world.add_pair(entity, kind, target)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
