//! Entity & attribute store (C3): attribute slots, prior/current snapshots,
//! states, event-handler groups, and a generational arena of entities.

mod arena;
mod handler;
mod store;

pub use arena::{ArenaIndex, EntityArena, Generation};
pub use handler::{Event, Handler, HandlerGroup, HandlerKey};
pub use store::{AttributeDescriptor, AttributeSlot, Entity, EntityKind, EntityTypeDescriptor};

use serde::{Deserialize, Serialize};

/// A stable handle into a replicate's entity arena: `(kind, index, generation)`
/// (§3.1). Stale references (index reused by a later entity) are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub index: ArenaIndex,
    pub generation: Generation,
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}#{}.{}", self.kind, self.index.0, self.generation.0)
    }
}
