//! In-repo compiled-model façade (§6.1). Stands in for the out-of-scope DSL
//! compiler: typed Rust constructors assembling the same shape a real
//! compiler would hand the core — entity type descriptors, handler bodies as
//! `Vec<Opcode>`, unit conversions, and a `SimulationConfig`. No parser.

use crate::config::SimulationConfig;
use crate::entity::{EntityKind, EntityTypeDescriptor, Event, Handler};
use crate::expr::Opcode;
use crate::units::{ConversionGraph, Unit};
use rust_decimal::Decimal;

/// One entity type under construction: its declared attributes and handlers,
/// keyed to a single `EntityKind` (§3.1, §9 DESIGN.md: one type per kind).
pub struct EntityTypeBuilder {
    descriptor: EntityTypeDescriptor,
}

impl EntityTypeBuilder {
    pub fn new(kind: EntityKind) -> Self {
        EntityTypeBuilder {
            descriptor: EntityTypeDescriptor::new(kind),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.descriptor.declare_attribute(name);
        self
    }

    pub fn on(mut self, attribute: impl Into<String>, event: Event, body: Vec<Opcode>) -> Self {
        self.descriptor.add_handler(Handler::unconditional(attribute, event, body, None));
        self
    }

    pub fn on_state(mut self, attribute: impl Into<String>, event: Event, state: impl Into<String>, body: Vec<Opcode>) -> Self {
        self.descriptor
            .add_handler(Handler::unconditional(attribute, event, body, Some(state.into())));
        self
    }

    pub fn when(mut self, attribute: impl Into<String>, event: Event, selector: Vec<Opcode>, body: Vec<Opcode>) -> Self {
        self.descriptor.add_handler(Handler::conditional(attribute, event, selector, body, None));
        self
    }

    pub fn build(self) -> EntityTypeDescriptor {
        self.descriptor
    }
}

/// Assembles every declared entity type, unit conversion, and the
/// simulation's configuration into the shape `Scheduler::declare_type` and
/// the replicate driver consume.
#[derive(Default)]
pub struct ModelBuilder {
    pub types: Vec<EntityTypeDescriptor>,
    pub graph: ConversionGraph,
}

impl ModelBuilder {
    pub fn new() -> Self {
        ModelBuilder {
            types: Vec::new(),
            graph: ConversionGraph::new(),
        }
    }

    pub fn entity_type(mut self, builder: EntityTypeBuilder) -> Self {
        self.types.push(builder.build());
        self
    }

    pub fn unit_conversion(mut self, from: Unit, to: Unit, scale: Decimal) -> Self {
        self.graph.declare_linear(from, to, scale);
        self
    }

    pub fn build(self, config: SimulationConfig) -> CompiledModel {
        CompiledModel {
            types: self.types,
            graph: self.graph,
            config,
        }
    }
}

/// The finished, immutable model: everything a replicate driver needs to
/// spin up a fresh `Scheduler`.
pub struct CompiledModel {
    pub types: Vec<EntityTypeDescriptor>,
    pub graph: ConversionGraph,
    pub config: SimulationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, SamplingPolicy, StepRange};
    use crate::spatial::LatLon;
    use crate::value::{Scalar, Value};
    use rust_decimal_macros::dec;

    #[test]
    fn builder_assembles_one_type_per_kind() {
        let patch = EntityTypeBuilder::new(EntityKind::Patch)
            .attribute("height")
            .on(
                "height",
                Event::Step,
                vec![
                    Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(1), Unit::base("m")))),
                    Opcode::End,
                ],
            )
            .build();

        let model = ModelBuilder::new().entity_type(EntityTypeBuilder { descriptor: patch }).build(SimulationConfig {
            grid: GridConfig {
                sw: LatLon::new(0.0, 0.0),
                ne: LatLon::new(1.0, 1.0),
                cell_size_m: 1000.0,
            },
            steps: StepRange { low: 0, high: 0 },
            sampling: SamplingPolicy::default(),
            exports: Vec::new(),
            worker_count: 1,
            master_seed: 1,
            replicate_count: 1,
        });

        assert_eq!(model.types.len(), 1);
        assert_eq!(model.types[0].kind, EntityKind::Patch);
    }
}
