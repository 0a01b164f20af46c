//! The entity store a scheduler drives: one arena and one shared type
//! descriptor per entity kind (§3, §3.1). A model declares exactly one
//! entity type per kind; multi-species-per-kind modeling is out of scope
//! for this façade (see DESIGN.md).

use std::sync::Arc;

use crate::entity::{Entity, EntityArena, EntityKind, EntityTypeDescriptor};
use crate::error::{EntityError, JoshResult};
use crate::entity::EntityRef;
use crate::sorted_vec_map::SortedVecMap;
use crate::spatial::LatLon;

pub struct EntityStore {
    descriptors: SortedVecMap<EntityKind, Arc<EntityTypeDescriptor>>,
    arenas: SortedVecMap<EntityKind, EntityArena<Entity>>,
}

impl Default for EntityStore {
    fn default() -> Self {
        EntityStore {
            descriptors: SortedVecMap::new(),
            arenas: SortedVecMap::new(),
        }
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_type(&mut self, descriptor: EntityTypeDescriptor) {
        let kind = descriptor.kind;
        self.descriptors.insert(kind, Arc::new(descriptor));
        self.arenas.entry(kind).or_insert_with(|| EntityArena::for_kind(kind));
    }

    pub fn descriptor(&self, kind: EntityKind) -> Option<&Arc<EntityTypeDescriptor>> {
        self.descriptors.get(&kind)
    }

    /// Inserts a freshly constructed entity of `kind`, returning its stable
    /// reference. Panics if `kind` was never declared — a model-compilation
    /// bug, not a runtime condition.
    pub fn insert(&mut self, kind: EntityKind, geometry: Option<LatLon>, id: u64) -> EntityRef {
        let descriptor = self.descriptors.get(&kind).expect("entity kind declared before use").clone();
        let entity = Entity::new(descriptor, id, geometry);
        let arena = self.arenas.entry(kind).or_insert_with(|| EntityArena::for_kind(kind));
        let (index, generation) = arena.insert(entity);
        EntityRef { kind, index, generation }
    }

    pub fn insert_child(&mut self, kind: EntityKind, geometry: Option<LatLon>, id: u64, parent: EntityRef) -> EntityRef {
        let descriptor = self.descriptors.get(&kind).expect("entity kind declared before use").clone();
        let entity = Entity::new(descriptor, id, geometry).with_parent(parent);
        let arena = self.arenas.entry(kind).or_insert_with(|| EntityArena::for_kind(kind));
        let (index, generation) = arena.insert(entity);
        EntityRef { kind, index, generation }
    }

    pub fn get(&self, r: EntityRef) -> JoshResult<&Entity> {
        self.arenas
            .get(&r.kind)
            .ok_or_else(|| EntityError::Stale(r).into())
            .and_then(|arena| arena.get(r.index, r.generation))
    }

    pub fn get_mut(&mut self, r: EntityRef) -> JoshResult<&mut Entity> {
        self.arenas
            .get_mut(&r.kind)
            .ok_or_else(|| EntityError::Stale(r).into())
            .and_then(|arena| arena.get_mut(r.index, r.generation))
    }

    pub fn remove(&mut self, r: EntityRef) -> JoshResult<Entity> {
        let arena = self.arenas.get_mut(&r.kind).ok_or(EntityError::Stale(r))?;
        arena.remove(r.index, r.generation)
    }

    /// Snapshot of every live reference of `kind`, in arena (insertion) order
    /// (§5: "iteration order over entities of one kind is deterministic").
    pub fn refs_of_kind(&self, kind: EntityKind) -> Vec<EntityRef> {
        match self.arenas.get(&kind) {
            Some(arena) => arena.iter().map(|(index, generation, _)| EntityRef { kind, index, generation }).collect(),
            None => Vec::new(),
        }
    }

    pub fn iter_all(&self) -> impl Iterator<Item = EntityRef> + '_ {
        EntityKind::SCHEDULE_ORDER
            .into_iter()
            .chain(std::iter::once(EntityKind::External))
            .flat_map(move |kind| self.refs_of_kind(kind))
    }
}
