//! Strata ECS -- archetype-based entity/component storage and query engine.
//!
//! Entities are 64-bit generational ids. Components, tags, and relationship
//! kinds are themselves entities carrying their own metadata, which unifies
//! everything under one identity space. Entities with the same exact
//! component signature share an archetype; archetypes that differ only by
//! zero-sized tags share one columnar table. Queries are sorted term lists
//! matched by walking the archetype graph, so their cost scales with the
//! archetypes their terms touch rather than with the number of entities.
//!
//! Structural mutation during iteration is made safe by the [`Commands`]
//! buffer: queries borrow the world immutably, intents are staged into a
//! separate buffer, and [`Commands::merge`] applies them in one batch
//! between iteration passes.
//!
//! # Quick start
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! let mut world = World::new();
//! let e = world.spawn();
//! world.set(e, Position { x: 0.0, y: 0.0 }).unwrap();
//! world.set(e, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//!
//! let moving = world.query().with::<Position>().with::<Velocity>().build();
//! world.each(&moving, |view| {
//!     let pos = view.field::<Position>().unwrap();
//!     let vel = view.field::<Velocity>().unwrap();
//!     for row in 0..view.count() {
//!         let _ = (pos[row], vel[row], view.entity(row));
//!     }
//! });
//! ```
//!
//! [`Commands`]: command::Commands
//! [`Commands::merge`]: command::Commands::merge

#![deny(unsafe_code)]

pub mod archetype;
pub mod command;
pub mod component;
pub mod entity;
pub mod query;
pub mod sparse;
#[allow(unsafe_code)]
pub mod table;
pub mod world;

use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity is dead (stale generation) or was never spawned.
    #[error("entity {0} is dead or was never spawned")]
    DeadEntity(EntityId),

    /// The entity carries the `DoNotDelete` tag.
    #[error("entity {0} is protected from deletion")]
    ProtectedEntity(EntityId),

    /// Supplied bytes do not match the component's declared size.
    #[error("component {component} expects {expected} bytes, got {got}")]
    SizeMismatch {
        component: EntityId,
        expected: usize,
        got: usize,
    },

    /// An id-addressed attach targeted a data-bearing component.
    #[error("component {0} carries data and cannot be attached as a tag")]
    NotATag(EntityId),

    /// A typed operation referenced a type never registered with the world.
    #[error("component type '{0}' is not registered")]
    UnregisteredComponent(&'static str),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId, ArchetypeMatch};
    pub use crate::command::Commands;
    pub use crate::component::{builtin, ComponentInfo, Term, TermOp};
    pub use crate::entity::EntityId;
    pub use crate::query::{ArchetypeView, Field, FieldMut, QueryBuilder, Terms, MAX_TERMS};
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
