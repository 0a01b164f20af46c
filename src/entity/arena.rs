//! Generational arena for one entity kind (§3.1, §9 design note: "arena and
//! index... eliminates the need for aliased mutable pointers").

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::{EntityError, JoshResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArenaIndex(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(pub u32);

struct Slot<T> {
    generation: Generation,
    occupied: bool,
    value: Option<T>,
}

/// Owns every live (and tombstoned) entity of one kind for a replicate.
/// Removing an entity tombstones its slot and bumps the generation so a
/// stale `(index, generation)` pair from before the removal is rejected
/// rather than aliasing into whatever later reuses that slot.
pub struct EntityArena<T> {
    kind: EntityKind,
    slots: Vec<Slot<T>>,
    free: Vec<ArenaIndex>,
}

impl<T> Default for EntityArena<T> {
    fn default() -> Self {
        EntityArena {
            kind: EntityKind::Simulation,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> EntityArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// An arena dedicated to one entity kind, so stale-reference errors
    /// report the kind that actually owns the slot.
    pub fn for_kind(kind: EntityKind) -> Self {
        EntityArena {
            kind,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> (ArenaIndex, Generation) {
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx.0 as usize];
            slot.occupied = true;
            slot.value = Some(value);
            (idx, slot.generation)
        } else {
            let idx = ArenaIndex(self.slots.len() as u32);
            let generation = Generation(0);
            self.slots.push(Slot {
                generation,
                occupied: true,
                value: Some(value),
            });
            (idx, generation)
        }
    }

    pub fn get(&self, index: ArenaIndex, generation: Generation) -> JoshResult<&T> {
        self.check(index, generation)?;
        Ok(self.slots[index.0 as usize].value.as_ref().expect("occupied slot always holds a value"))
    }

    pub fn get_mut(&mut self, index: ArenaIndex, generation: Generation) -> JoshResult<&mut T> {
        self.check(index, generation)?;
        Ok(self.slots[index.0 as usize].value.as_mut().expect("occupied slot always holds a value"))
    }

    fn check(&self, index: ArenaIndex, generation: Generation) -> JoshResult<()> {
        let slot = self
            .slots
            .get(index.0 as usize)
            .filter(|s| s.occupied && s.generation == generation);
        if slot.is_none() {
            return Err(EntityError::Stale(crate::entity::EntityRef {
                kind: self.kind,
                index,
                generation,
            })
            .into());
        }
        Ok(())
    }

    pub fn remove(&mut self, index: ArenaIndex, generation: Generation) -> JoshResult<T> {
        self.check(index, generation)?;
        let slot = &mut self.slots[index.0 as usize];
        slot.occupied = false;
        slot.generation = Generation(slot.generation.0 + 1);
        let value = slot.value.take().expect("occupied slot always holds a value");
        self.free.push(index);
        Ok(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, Generation, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.occupied
                .then(|| (ArenaIndex(i as u32), s.generation, s.value.as_ref().expect("occupied")))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ArenaIndex, Generation, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let occupied = s.occupied;
            let generation = s.generation;
            occupied.then(|| (ArenaIndex(i as u32), generation, s.value.as_mut().expect("occupied")))
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_reference_after_reuse_is_rejected() {
        let mut arena: EntityArena<i32> = EntityArena::new();
        let (idx, gen0) = arena.insert(1);
        arena.remove(idx, gen0).unwrap();
        let (idx2, gen1) = arena.insert(2);
        assert_eq!(idx, idx2, "slot should be reused from the free list");
        assert_ne!(gen0, gen1);
        assert!(arena.get(idx, gen0).is_err());
        assert_eq!(*arena.get(idx2, gen1).unwrap(), 2);
    }

    #[test]
    fn iteration_skips_tombstoned_slots() {
        let mut arena: EntityArena<i32> = EntityArena::new();
        let (a, ga) = arena.insert(1);
        let (_b, _gb) = arena.insert(2);
        arena.remove(a, ga).unwrap();
        let remaining: Vec<_> = arena.iter().map(|(_, _, v)| *v).collect();
        assert_eq!(remaining, vec![2]);
    }
}
