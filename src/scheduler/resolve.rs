//! Lazy attribute resolution (§4.5 "Lazy resolution" / "Interacting flow"):
//! the active-resolution-stack cycle check, handler-group evaluation order,
//! and conditional fall-through to the prior snapshot.

use std::cell::RefCell;

use tracing::{debug, trace};

use crate::entity::{Entity, EntityKind, EntityRef, Event, HandlerGroup};
use crate::error::{JoshError, JoshResult, ResolverError, SchedulerError};
use crate::expr::{Machine, Resolver as ExprResolver};
use crate::resolver::{AttributeIndexCache, Path, ResolutionKey, ScopeRoot};
use crate::spatial::PriorPatchIndex;
use crate::units::ConversionGraph;
use crate::value::{Value, ValueContext};

use super::store::EntityStore;

/// Everything a single `resolve`/handler-body evaluation needs, split into
/// fields disjoint from `ValueContext`'s so both can be live at once: the
/// store and resolution stack are mutably borrowed here, the unit graph and
/// RNG only ever as shared references (the RNG's actual mutation happens
/// behind its `RefCell`, see `value::ValueContext`).
pub struct ResolveCtx<'a> {
    pub store: &'a mut EntityStore,
    pub resolution_stack: &'a mut Vec<ResolutionKey>,
    pub index_cache: &'a AttributeIndexCache,
    pub spatial: &'a PriorPatchIndex,
    pub graph: &'a ConversionGraph,
    pub rng: &'a RefCell<rand::rngs::StdRng>,
    pub sample_size: usize,
    pub phase: Event,
    pub timestep: i64,
    pub next_id: &'a mut u64,
    /// The entity whose substep is currently executing; `current`/`prior`
    /// paths with no further entity hop resolve against this entity.
    pub current: EntityRef,
    pub created: Vec<EntityRef>,
}

impl<'a> ResolveCtx<'a> {
    fn next_id(&mut self) -> u64 {
        let id = *self.next_id;
        *self.next_id += 1;
        id
    }

    /// Resolves one entity's attribute for the current phase, returning
    /// `None` if no handler fired and no prior value exists (§4.5: "the
    /// slot remains unset"). Used by the scheduler's own per-substep drive,
    /// which tolerates absence.
    pub fn resolve_entry(&mut self, entity: EntityRef, index: usize) -> JoshResult<Option<Value>> {
        if let Ok(e) = self.store.get(entity) {
            if e.is_resolved_this_phase(index) {
                return Ok(e.get_current(index).cloned());
            }
        }
        let key = ResolutionKey { entity, attribute_index: index };
        if self.resolution_stack.contains(&key) {
            let mut path = self.resolution_stack.clone();
            path.push(key);
            return Err(SchedulerError::CycleDetected { path }.into());
        }
        self.resolution_stack.push(key);
        let result = self.resolve_inner(entity, index);
        self.resolution_stack.pop();
        if result.is_ok() {
            if let Ok(e) = self.store.get_mut(entity) {
                e.mark_resolved_this_phase(index);
            }
        }
        result
    }

    fn resolve_inner(&mut self, entity: EntityRef, index: usize) -> JoshResult<Option<Value>> {
        let (attribute, state) = {
            let e = self.store.get(entity)?;
            let attribute = e.type_descriptor.attributes[index].name.clone();
            (attribute, e.state.clone())
        };
        trace!(%entity, %attribute, phase = ?self.phase, %state, "resolving attribute");

        let group = {
            let e = self.store.get(entity)?;
            e.type_descriptor
                .handler_group(&attribute, self.phase, Some(state.as_str()))
                .or_else(|| e.type_descriptor.handler_group(&attribute, self.phase, None))
                .cloned()
        };

        let resolved = match group {
            Some(group) => self.fire_group(entity, &group)?,
            None => None,
        };

        match resolved {
            Some(value) => {
                self.store.get_mut(entity)?.set_current(index, value.clone());
                Ok(Some(value))
            }
            None => {
                // No handler fired this phase: keep whatever `current` already
                // holds, whether seeded by an earlier phase this timestep or
                // carried over unchanged from last timestep's frozen prior
                // (freeze_prior copies prior into current at timestep start).
                Ok(self.store.get(entity)?.get_current(index).cloned())
            }
        }
    }

    /// Evaluates one handler group in order (§3: conditionals first, each
    /// gated by its selector; an unconditional handler, if present, is the
    /// fallback). Returns the first handler's result, or `None` if nothing
    /// fired.
    fn fire_group(&mut self, entity: EntityRef, group: &HandlerGroup) -> JoshResult<Option<Value>> {
        for handler in group.ordered() {
            if let Some(selector) = &handler.selector {
                let saved_current = self.current;
                self.current = entity;
                let mut machine = Machine::new();
                let mut value_ctx = ValueContext {
                    graph: self.graph,
                    rng: self.rng,
                    sample_size: self.sample_size,
                };
                let fired = machine.run(selector, self, &mut value_ctx)?;
                self.current = saved_current;
                let truthy = match fired {
                    Some(v) => v.as_scalar()?.as_bool()?,
                    None => false,
                };
                if !truthy {
                    continue;
                }
            }
            let saved_current = self.current;
            self.current = entity;
            let mut machine = Machine::new();
            let mut value_ctx = ValueContext {
                graph: self.graph,
                rng: self.rng,
                sample_size: self.sample_size,
            };
            let result = machine.run(&handler.body, self, &mut value_ctx)?;
            self.current = saved_current;
            return Ok(result);
        }
        Ok(None)
    }

    fn resolve_path(&mut self, on: EntityRef, segments: &[String], temporal: Temporal) -> JoshResult<Value> {
        let first = segments.first().ok_or(ResolverError::EmptyPath)?;
        let index = self.attribute_index(on, first)?;

        match (index, temporal, segments.len()) {
            (Some(index), Temporal::Current, 1) => self
                .resolve_entry(on, index)?
                .ok_or_else(|| ResolverError::AttributeAbsent(first.clone()).into()),
            (Some(index), Temporal::Prior, 1) => self
                .store
                .get(on)?
                .get_prior(index)
                .cloned()
                .ok_or_else(|| ResolverError::AttributeAbsent(first.clone()).into()),
            (Some(index), temporal, _) => {
                // Multi-segment: the first hop must land on a reference (or
                // collection of references) to recurse into.
                let value = match temporal {
                    Temporal::Current => self
                        .resolve_entry(on, index)?
                        .ok_or_else(|| JoshError::from(ResolverError::AttributeAbsent(first.clone())))?,
                    Temporal::Prior => self
                        .store
                        .get(on)?
                        .get_prior(index)
                        .cloned()
                        .ok_or_else(|| JoshError::from(ResolverError::AttributeAbsent(first.clone())))?,
                };
                self.resolve_through(&value, &segments[1..], temporal)
            }
            (None, _, _) => Err(ResolverError::AttributeAbsent(first.clone()).into()),
        }
    }

    /// Follows an entity reference (or a `.count` reduction over a
    /// collection) for the remaining path segments.
    fn resolve_through(&mut self, value: &Value, rest: &[String], temporal: Temporal) -> JoshResult<Value> {
        match value {
            Value::EntityRef(r) if rest.is_empty() => Ok(Value::EntityRef(*r)),
            Value::EntityRef(r) => self.resolve_path(*r, rest, temporal),
            Value::EntityRefs(refs) if rest.len() == 1 && rest[0] == "count" => {
                Ok(Value::Scalar(crate::value::Scalar::count(refs.len() as i64)))
            }
            Value::EntityRefs(_) if rest.is_empty() => Ok(value.clone()),
            other => Err(ResolverError::AttributeAbsent(format!("{:?} has no further path", other.type_name())).into()),
        }
    }

    fn attribute_index(&self, on: EntityRef, name: &str) -> JoshResult<Option<usize>> {
        let e = self.store.get(on)?;
        let type_id = std::sync::Arc::as_ptr(&e.type_descriptor) as usize;
        Ok(self.index_cache.index_for(type_id, name, || e.type_descriptor.attribute_index(name)))
    }
}

#[derive(Clone, Copy)]
enum Temporal {
    Current,
    Prior,
}

impl ExprResolver for ResolveCtx<'_> {
    fn resolve(&mut self, path: &str) -> JoshResult<Value> {
        let parsed = Path::parse(path)?;
        match parsed.root {
            ScopeRoot::Current => {
                let entity = self.current;
                self.resolve_path(entity, &parsed.segments, Temporal::Current)
            }
            ScopeRoot::Prior => {
                let entity = self.current;
                self.resolve_path(entity, &parsed.segments, Temporal::Prior)
            }
            ScopeRoot::Here => {
                let here = self.store.get(self.current)?.parent.unwrap_or(self.current);
                self.resolve_path(here, &parsed.segments, Temporal::Current)
            }
            ScopeRoot::Meta => {
                let first = parsed.segments.first().ok_or(ResolverError::EmptyPath)?;
                match first.as_str() {
                    "step" => Ok(Value::Scalar(crate::value::Scalar::count(self.timestep))),
                    other => Err(ResolverError::UnknownScope(format!("meta.{other}")).into()),
                }
            }
        }
    }

    fn create_entity(&mut self, type_name: &str, count: &Value) -> JoshResult<Value> {
        let kind = kind_from_type_name(type_name)?;
        let n = count.as_scalar()?.as_decimal()?;
        let n: i64 = rust_decimal::prelude::ToPrimitive::to_i64(&n)
            .ok_or_else(|| crate::error::ValueError::NumericConversion(n.to_string()))?;
        let parent_patch = self.store.get(self.current)?.parent.or(Some(self.current)).filter(|r| r.kind == EntityKind::Patch);
        let mut refs = Vec::with_capacity(n.max(0) as usize);
        for _ in 0..n.max(0) {
            let id = self.next_id();
            let geometry = self.store.get(self.current).ok().and_then(|e: &Entity| e.geometry);
            let new_ref = match parent_patch {
                Some(patch) => self.store.insert_child(kind, geometry, id, patch),
                None => self.store.insert(kind, geometry, id),
            };
            self.fast_forward(new_ref)?;
            self.created.push(new_ref);
            refs.push(new_ref);
        }
        debug!(type_name, count = refs.len(), "created entities");
        Ok(Value::EntityRefs(refs))
    }

    fn spatial_query(&mut self, resolver_path: &str, radius: &Value) -> JoshResult<Value> {
        let radius_m = rust_decimal::prelude::ToPrimitive::to_f64(&radius.as_scalar()?.as_decimal()?)
            .ok_or_else(|| crate::error::ValueError::NumericConversion("radius".into()))?;
        let center = self
            .store
            .get(self.current)?
            .geometry
            .ok_or(crate::error::SpatialError::NoCenterGeometry)?;
        let hits = self.spatial.radial_query(center, radius_m)?;
        let parsed = Path::parse(resolver_path)?;
        let mut values = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Ok(v) = self.resolve_path(hit, &parsed.segments, Temporal::Prior) {
                if let Ok(s) = v.as_scalar() {
                    values.push(s.clone());
                }
            }
        }
        let unit = values.first().map(|s| s.unit.clone()).unwrap_or_else(crate::units::Unit::empty);
        Ok(Value::Distribution(crate::value::Distribution::realized(values, unit)))
    }

    fn set_state(&mut self, state: &str) {
        if let Ok(e) = self.store.get_mut(self.current) {
            e.set_pending_state(state);
        }
    }
}

/// Maps a compiled model's type name to the one `EntityKind` it is declared
/// against (§9 DESIGN.md: one entity type per kind in this façade).
fn kind_from_type_name(type_name: &str) -> JoshResult<EntityKind> {
    match type_name {
        "Simulation" => Ok(EntityKind::Simulation),
        "Patch" => Ok(EntityKind::Patch),
        "Management" => Ok(EntityKind::Management),
        "Organism" => Ok(EntityKind::Organism),
        "Disturbance" => Ok(EntityKind::Disturbance),
        "External" => Ok(EntityKind::External),
        other => Err(ResolverError::UnknownScope(other.to_string()).into()),
    }
}

impl<'a> ResolveCtx<'a> {
    /// Runs every phase before `self.phase` on a newly created entity
    /// (§4.5 "Newly created entities"), then, if the creating kind's slot
    /// in this timestep's phase has already passed `new_ref`'s kind in
    /// `EntityKind::SCHEDULE_ORDER`, also runs the current phase — covering
    /// same-kind (sibling) creation and creation of an earlier-ordered kind,
    /// neither of which later per-kind discovery would otherwise reach this
    /// phase.
    fn fast_forward(&mut self, new_ref: EntityRef) -> JoshResult<()> {
        const ORDER: [Event; 4] = [Event::Init, Event::Start, Event::Step, Event::End];
        let current_phase_pos = ORDER.iter().position(|p| *p == self.phase).unwrap_or(0);
        for &phase in &ORDER[..current_phase_pos] {
            self.run_phase_for(new_ref, phase)?;
        }
        let creator_pos = EntityKind::SCHEDULE_ORDER.iter().position(|k| *k == self.current.kind);
        let new_pos = EntityKind::SCHEDULE_ORDER.iter().position(|k| *k == new_ref.kind);
        if let (Some(c), Some(n)) = (creator_pos, new_pos) {
            if n <= c {
                self.run_phase_for(new_ref, self.phase)?;
            }
        }
        Ok(())
    }

    fn run_phase_for(&mut self, entity: EntityRef, phase: Event) -> JoshResult<()> {
        let saved_phase = self.phase;
        self.phase = phase;
        if let Ok(e) = self.store.get_mut(entity) {
            e.start_substep();
        }
        let names: Vec<String> = self
            .store
            .get(entity)?
            .iter_attribute_names()
            .map(str::to_string)
            .collect();
        for name in names {
            let index = self.store.get(entity)?.get_attribute_index(&name)?;
            let _ = self.resolve_entry(entity, index)?;
        }
        if let Ok(e) = self.store.get_mut(entity) {
            e.end_substep();
        }
        self.phase = saved_phase;
        Ok(())
    }
}
