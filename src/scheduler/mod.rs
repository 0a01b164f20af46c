//! Substep scheduler (C5): drives the per-timestep phase order, owns the
//! entity store, resolver caches, and spatial index, and turns resolved
//! attributes into export tasks.
//!
//! Discovery (§4.3/§4.5, "walks all attributes... yields every attribute
//! value that is itself a distribution of entities") is realized
//! structurally here rather than as a separate attribute-walk pass: entities
//! live in flat per-kind arenas (`EntityStore`), so an entity created mid-phase
//! is already a member of its kind's arena, and `ResolveCtx::create_entity`
//! fast-forwards it through any phases its own kind's turn has already
//! passed this timestep. A later-ordered kind's own turn in the same phase
//! naturally reaches it via a fresh `refs_of_kind` snapshot.

mod resolve;
mod store;

use std::cell::RefCell;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::entity::{Entity, EntityKind, EntityRef, EntityTypeDescriptor, Event};
use crate::error::JoshResult;
use crate::export::ExportTask;
use crate::resolver::{AttributeIndexCache, ResolutionKey};
use crate::spatial::{LatLon, PriorPatchIndex};
use crate::units::ConversionGraph;
use crate::value::{Distribution, Scalar, ScalarKind, Value};

use resolve::ResolveCtx;
pub use store::EntityStore;

pub struct Scheduler {
    store: EntityStore,
    resolution_stack: Vec<ResolutionKey>,
    index_cache: AttributeIndexCache,
    spatial_index: PriorPatchIndex,
    graph: ConversionGraph,
    rng: RefCell<StdRng>,
    sample_size: usize,
    next_id: u64,
}

impl Scheduler {
    pub fn new(graph: ConversionGraph, seed: u64, sample_size: usize) -> Self {
        Scheduler {
            store: EntityStore::new(),
            resolution_stack: Vec::new(),
            index_cache: AttributeIndexCache::new(),
            spatial_index: PriorPatchIndex::new(),
            graph,
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            sample_size,
            next_id: 0,
        }
    }

    /// Reseeds the scheduler's RNG in place (§4.9: replicates reseed from a
    /// master seed plus replicate index, rather than sharing one stream).
    pub fn reseed(&mut self, seed: u64) {
        self.rng.replace(StdRng::seed_from_u64(seed));
    }

    pub fn declare_type(&mut self, descriptor: EntityTypeDescriptor) {
        self.store.declare_type(descriptor);
    }

    /// Spawns a root-level entity (simulation singleton, initial grid
    /// patches) outside of any handler body, before the timestep loop
    /// starts.
    pub fn spawn(&mut self, kind: EntityKind, geometry: Option<LatLon>) -> EntityRef {
        let id = self.next_id;
        self.next_id += 1;
        self.store.insert(kind, geometry, id)
    }

    pub fn entity(&self, r: EntityRef) -> JoshResult<&Entity> {
        self.store.get(r)
    }

    /// Advances one timestep: runs `init` (only when `include_init` is set,
    /// i.e. this is the first step of the replicate), then `start`, `step`,
    /// `end` in `EntityKind::SCHEDULE_ORDER`, and freezes `current` into
    /// `prior` for every entity at the end (§4.5).
    pub fn step(&mut self, timestep: i64, replicate: u32, include_init: bool) -> JoshResult<Vec<ExportTask>> {
        let mut phases = Vec::with_capacity(4);
        if include_init {
            phases.push(Event::Init);
        }
        phases.push(Event::Start);
        phases.push(Event::Step);
        phases.push(Event::End);

        let mut tasks = Vec::new();
        for phase in phases {
            for kind in EntityKind::SCHEDULE_ORDER {
                let mut phase_tasks = self.run_kind_phase(kind, phase, timestep, replicate)?;
                tasks.append(&mut phase_tasks);
            }
        }

        self.freeze_all();
        Ok(tasks)
    }

    /// Runs one phase for one kind (§4.5 step 1): resets the per-phase
    /// resolution markers, resolves every attribute of every live entity of
    /// that kind, fast-forwarding and exporting newly created entities, then
    /// commits any pending state transitions so they take effect starting
    /// the next phase (`end_substep`, called once per phase per entity).
    fn run_kind_phase(&mut self, kind: EntityKind, phase: Event, timestep: i64, replicate: u32) -> JoshResult<Vec<ExportTask>> {
        let refs = self.store.refs_of_kind(kind);
        for r in &refs {
            if let Ok(e) = self.store.get_mut(*r) {
                e.start_substep();
            }
        }

        let mut created_this_phase = Vec::new();
        for r in &refs {
            let names: Vec<String> = self.store.get(*r)?.iter_attribute_names().map(str::to_string).collect();
            for name in names {
                let index = self.store.get(*r)?.get_attribute_index(&name)?;
                let mut ctx = ResolveCtx {
                    store: &mut self.store,
                    resolution_stack: &mut self.resolution_stack,
                    index_cache: &self.index_cache,
                    spatial: &self.spatial_index,
                    graph: &self.graph,
                    rng: &self.rng,
                    sample_size: self.sample_size,
                    phase,
                    timestep,
                    next_id: &mut self.next_id,
                    current: *r,
                    created: Vec::new(),
                };
                let _ = ctx.resolve_entry(*r, index)?;
                created_this_phase.extend(ctx.created);
            }
        }

        for r in refs.iter().chain(created_this_phase.iter()) {
            if let Ok(e) = self.store.get_mut(*r) {
                e.end_substep();
            }
        }

        let mut tasks = Vec::with_capacity(refs.len() + created_this_phase.len());
        for r in refs.iter().chain(created_this_phase.iter()) {
            tasks.push(self.export_task(*r, timestep, replicate)?);
        }
        Ok(tasks)
    }

    fn export_task(&self, r: EntityRef, timestep: i64, replicate: u32) -> JoshResult<ExportTask> {
        let entity = self.store.get(r)?;
        let mut task = ExportTask::new(r.kind, timestep.max(0) as u64, replicate);
        if let Some(geometry) = entity.geometry {
            task = task.with_geometry(geometry);
        }
        for (index, attribute) in entity.type_descriptor.attributes.iter().enumerate() {
            if let Some(value) = entity.get_current(index) {
                task = task.with_attribute(attribute.name.clone(), format_value(value));
            }
        }
        Ok(task)
    }

    /// Swaps `current` into `prior` for every live entity and rebuilds the
    /// radial-query index from the new prior patch positions (§4.5 step 2,
    /// §4.6: "built once per timestep at `freeze_prior`").
    fn freeze_all(&mut self) {
        let all: Vec<EntityRef> = self.store.iter_all().collect();
        for r in all {
            if let Ok(e) = self.store.get_mut(r) {
                e.freeze_prior();
            }
        }
        let patches: Vec<(LatLon, EntityRef)> = self
            .store
            .refs_of_kind(EntityKind::Patch)
            .into_iter()
            .filter_map(|r| self.store.get(r).ok().and_then(|e| e.geometry.map(|g| (g, r))))
            .collect();
        self.spatial_index.rebuild(patches);
    }
}

fn format_scalar(s: &Scalar) -> String {
    match &s.kind {
        ScalarKind::Decimal(d) => d.to_string(),
        ScalarKind::Int(i) => i.to_string(),
        ScalarKind::Bool(b) => b.to_string(),
        ScalarKind::Str(s) => s.clone(),
    }
}

fn format_value(v: &Value) -> String {
    match v {
        Value::Scalar(s) => format_scalar(s),
        Value::Distribution(Distribution::Realized { values, .. }) => {
            values.iter().map(format_scalar).collect::<Vec<_>>().join(";")
        }
        Value::Distribution(Distribution::Virtual { .. }) => "virtual".to_string(),
        Value::EntityRef(r) => r.to_string(),
        Value::EntityRefs(refs) => refs.len().to_string(),
    }
}
