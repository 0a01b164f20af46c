//! Handler groups (§3, §4.3): `(attribute, event, optional selector,
//! compiled body, state_tag)`, grouped by `(attribute, event, state_tag)`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::EnumIter;

use crate::expr::Opcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Serialize, Deserialize)]
pub enum Event {
    Constant,
    Init,
    Start,
    Step,
    End,
    Remove,
}

/// A compiled handler. `selector` is `None` for an unconditional handler;
/// `state` is `None` for a default-state handler.
#[derive(Clone)]
pub struct Handler {
    pub attribute: String,
    pub event: Event,
    pub selector: Option<Arc<[Opcode]>>,
    pub body: Arc<[Opcode]>,
    pub state: Option<String>,
}

impl Handler {
    pub fn unconditional(attribute: impl Into<String>, event: Event, body: Vec<Opcode>, state: Option<String>) -> Self {
        Handler {
            attribute: attribute.into(),
            event,
            selector: None,
            body: body.into(),
            state,
        }
    }

    pub fn conditional(
        attribute: impl Into<String>,
        event: Event,
        selector: Vec<Opcode>,
        body: Vec<Opcode>,
        state: Option<String>,
    ) -> Self {
        Handler {
            attribute: attribute.into(),
            event,
            selector: Some(selector.into()),
            body: body.into(),
            state,
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.selector.is_some()
    }
}

/// Key identifying a handler group: `(attribute, event, state_tag)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerKey {
    pub attribute: String,
    pub event: Event,
    pub state: Option<String>,
}

/// All handlers declared for one `(attribute, event, state)` key. Evaluation
/// order within a group (§3): conditional handlers run first in declaration
/// order, each evaluating its selector; an unconditional handler (evaluated
/// last) always wins if reached, since the group is sorted that way.
#[derive(Clone, Default)]
pub struct HandlerGroup {
    pub handlers: Vec<Handler>,
}

impl HandlerGroup {
    pub fn push(&mut self, handler: Handler) {
        self.handlers.push(handler);
    }

    /// Declaration-order iteration with conditional handlers evaluated before
    /// unconditional ones (§3: "unconditional handlers are evaluated first
    /// when mixed with conditional ones" resolves, per DESIGN.md's decision,
    /// to: conditionals get first chance via their selector, then the first
    /// unconditional handler is the fallback).
    pub fn ordered(&self) -> impl Iterator<Item = &Handler> {
        let (conditional, unconditional): (Vec<_>, Vec<_>) = self.handlers.iter().partition(|h| h.is_conditional());
        conditional.into_iter().chain(unconditional)
    }
}
