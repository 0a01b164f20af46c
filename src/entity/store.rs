//! Per-entity attribute storage: dense, compile-time `name -> index` tables,
//! prior/current slots, and declaration-order iteration (§3, §3.2).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;

use crate::error::{EntityError, JoshResult};
use crate::sorted_vec_map::SortedVecMap;
use crate::value::Value;

use super::handler::{Event, Handler, HandlerGroup, HandlerKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Serialize, Deserialize)]
pub enum EntityKind {
    Simulation,
    Patch,
    Management,
    Organism,
    Disturbance,
    External,
}

impl EntityKind {
    /// Fixed per-kind iteration order within a phase (§4.5).
    pub const SCHEDULE_ORDER: [EntityKind; 5] = [
        EntityKind::Simulation,
        EntityKind::Patch,
        EntityKind::Management,
        EntityKind::Organism,
        EntityKind::Disturbance,
    ];
}

/// One declared attribute on an entity type, in declaration order.
#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    pub name: String,
    pub index: usize,
}

/// The compile-time shape of one entity type: its attribute order and the
/// handler groups declared for every `(attribute, event, state)` triple.
/// Shared by reference across every instance of the type (§3: "dense array
/// indexed by a compile-time name -> index map shared by all instances").
#[derive(Clone)]
pub struct EntityTypeDescriptor {
    pub kind: EntityKind,
    pub attributes: Vec<AttributeDescriptor>,
    name_to_index: SortedVecMap<String, usize>,
    handler_groups: SortedVecMap<HandlerKey, HandlerGroup>,
}

impl EntityTypeDescriptor {
    pub fn new(kind: EntityKind) -> Self {
        EntityTypeDescriptor {
            kind,
            attributes: Vec::new(),
            name_to_index: SortedVecMap::new(),
            handler_groups: SortedVecMap::new(),
        }
    }

    pub fn declare_attribute(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        let index = self.attributes.len();
        self.attributes.push(AttributeDescriptor { name: name.clone(), index });
        self.name_to_index.insert(name, index);
        index
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(&name.to_string()).copied()
    }

    pub fn add_handler(&mut self, handler: Handler) {
        let key = HandlerKey {
            attribute: handler.attribute.clone(),
            event: handler.event,
            state: handler.state.clone(),
        };
        self.handler_groups.entry(key).or_default().push(handler);
    }

    pub fn handler_groups_keys(&self) -> impl Iterator<Item = &HandlerKey> {
        self.handler_groups.keys()
    }

    pub fn handler_group(&self, attribute: &str, event: Event, state: Option<&str>) -> Option<&HandlerGroup> {
        self.handler_groups.get(&HandlerKey {
            attribute: attribute.to_string(),
            event,
            state: state.map(str::to_string),
        })
    }

    /// Attributes that have *some* handler declared for `event`, across any
    /// state. Informational only (§4.3): never used to skip resolution.
    pub fn attributes_with_any_handler(&self, event: Event) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| {
                self.handler_groups
                    .iter()
                    .any(|(key, group)| key.attribute == a.name && key.event == event && !group.handlers.is_empty())
            })
            .map(|a| a.name.as_str())
            .collect()
    }
}

/// A value slot for one attribute in one substep phase: unresolved, or
/// resolved to a value.
#[derive(Debug, Clone, Default)]
pub enum AttributeSlot {
    #[default]
    Unset,
    Resolved(Value),
}

impl AttributeSlot {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            AttributeSlot::Resolved(v) => Some(v),
            AttributeSlot::Unset => None,
        }
    }
}

/// One live entity: a shared type descriptor, prior/current attribute
/// tables, geometry, id, and the current state name.
#[derive(Clone)]
pub struct Entity {
    pub type_descriptor: Arc<EntityTypeDescriptor>,
    pub id: u64,
    pub geometry: Option<crate::spatial::LatLon>,
    pub state: String,
    pending_state: Option<String>,
    prior: Arc<SortedVecMap<usize, Value>>,
    current: Vec<AttributeSlot>,
    /// Reentrancy marker for the phase currently running: an attribute
    /// resolved once this phase is never recomputed even if several other
    /// attributes lazily depend on it (§4.5). Reset at the start of every
    /// phase; `current`'s actual values are untouched by that reset, so an
    /// attribute with no handler this phase keeps whatever value it already
    /// holds, whether seeded by an earlier phase this timestep or carried
    /// over from last timestep's frozen `prior`.
    resolved_this_phase: Vec<bool>,
    pub created_at_phase: Option<(i64, Event)>,
    /// The patch that exclusively owns this entity (§3 Ownership), used to
    /// resolve the `here` scope root. `None` for entities with no owner
    /// (patches themselves, and the simulation singleton).
    pub parent: Option<super::EntityRef>,
}

impl Entity {
    pub fn new(type_descriptor: Arc<EntityTypeDescriptor>, id: u64, geometry: Option<crate::spatial::LatLon>) -> Self {
        let n = type_descriptor.attributes.len();
        Entity {
            type_descriptor,
            id,
            geometry,
            state: "default".to_string(),
            pending_state: None,
            prior: Arc::new(SortedVecMap::new()),
            current: vec![AttributeSlot::Unset; n],
            resolved_this_phase: vec![false; n],
            created_at_phase: None,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: super::EntityRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Clears the per-phase reentrancy marker. Called once at the start of
    /// every phase for every entity of the kind whose turn it is (§4.5 step
    /// 1a). `current`'s actual values are untouched by this reset.
    pub fn start_substep(&mut self) {
        for flag in &mut self.resolved_this_phase {
            *flag = false;
        }
    }

    pub fn is_resolved_this_phase(&self, index: usize) -> bool {
        self.resolved_this_phase.get(index).copied().unwrap_or(false)
    }

    pub fn mark_resolved_this_phase(&mut self, index: usize) {
        if index >= self.resolved_this_phase.len() {
            self.resolved_this_phase.resize(index + 1, false);
        }
        self.resolved_this_phase[index] = true;
    }

    /// Commits any state transition requested via `SetState` during this
    /// phase, effective starting the next phase (§4.5 step 1e, §3 "a state
    /// transition that occurs during an event prevents that same event's
    /// handlers on the newly-entered state from firing in the same substep").
    pub fn end_substep(&mut self) {
        if let Some(new_state) = self.pending_state.take() {
            self.state = new_state;
        }
    }

    /// Snapshots every resolved `current` value into `prior`, at end of
    /// timestep. `current` itself is left untouched, so it carries forward
    /// as the seed for the next timestep's phases (§4.5 step 2).
    pub fn freeze_prior(&mut self) {
        let mut snapshot = SortedVecMap::new();
        for (idx, slot) in self.current.iter().enumerate() {
            if let Some(v) = slot.as_value() {
                snapshot.insert(idx, v.clone());
            }
        }
        self.prior = Arc::new(snapshot);
    }

    pub fn get_attribute_index(&self, name: &str) -> JoshResult<usize> {
        self.type_descriptor
            .attribute_index(name)
            .ok_or_else(|| EntityError::UnknownAttribute(name.to_string()).into())
    }

    pub fn get_current(&self, index: usize) -> Option<&Value> {
        self.current.get(index).and_then(AttributeSlot::as_value)
    }

    pub fn is_resolved(&self, index: usize) -> bool {
        matches!(self.current.get(index), Some(AttributeSlot::Resolved(_)))
    }

    pub fn set_current(&mut self, index: usize, value: Value) {
        if index >= self.current.len() {
            self.current.resize(index + 1, AttributeSlot::Unset);
        }
        self.current[index] = AttributeSlot::Resolved(value);
    }

    pub fn get_prior(&self, index: usize) -> Option<&Value> {
        self.prior.get(&index)
    }

    pub fn set_pending_state(&mut self, state: impl Into<String>) {
        self.pending_state = Some(state.into());
    }

    pub fn iter_attribute_names(&self) -> impl Iterator<Item = &str> {
        self.type_descriptor.attributes.iter().map(|a| a.name.as_str())
    }

    pub fn event_handlers(&self, attribute: &str, event: Event) -> Vec<&HandlerKey> {
        // Exposed for discovery/diagnostics; actual group lookup goes through
        // `type_descriptor.handler_group` directly in the scheduler.
        self.type_descriptor
            .handler_groups_keys()
            .filter(|key| key.attribute == attribute && key.event == event)
            .collect()
    }
}
