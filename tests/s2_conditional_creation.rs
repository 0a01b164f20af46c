//! A conditional handler creates one organism only on even timesteps after
//! the first; an unconditional `init` handler seeds the initial count, and
//! entities with no firing handler this phase simply keep what they held.

use josh_core::entity::{EntityKind, EntityTypeDescriptor, Event, Handler};
use josh_core::expr::Opcode;
use josh_core::scheduler::Scheduler;
use josh_core::units::{ConversionGraph, Unit};
use josh_core::value::{BinOp, Reduction, Scalar, Value};
use rust_decimal_macros::dec;

fn patch_type() -> EntityTypeDescriptor {
    let mut descriptor = EntityTypeDescriptor::new(EntityKind::Patch);
    descriptor.declare_attribute("tree_count");

    descriptor.add_handler(Handler::unconditional(
        "tree_count",
        Event::Init,
        vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::count(1))),
            Opcode::CreateEntity { type_name: "Organism".to_string() },
            Opcode::Reduce(Reduction::Count),
            Opcode::End,
        ],
        None,
    ));

    // Selector: meta.step > 0 and meta.step is even.
    let selector = vec![
        Opcode::PushResolver("meta.step".to_string()),
        Opcode::PushLiteral(Value::Scalar(Scalar::count(0))),
        Opcode::BinaryOp(BinOp::Gt),
        Opcode::PushResolver("meta.step".to_string()),
        Opcode::PushLiteral(Value::Scalar(Scalar::count(2))),
        Opcode::BinaryOp(BinOp::Mod),
        Opcode::PushLiteral(Value::Scalar(Scalar::count(0))),
        Opcode::BinaryOp(BinOp::Eq),
        Opcode::BinaryOp(BinOp::And),
    ];
    let body = vec![
        Opcode::PushLiteral(Value::Scalar(Scalar::count(1))),
        Opcode::CreateEntity { type_name: "Organism".to_string() },
        Opcode::Reduce(Reduction::Count),
        Opcode::PushResolver("prior.tree_count".to_string()),
        Opcode::BinaryOp(BinOp::Add),
        Opcode::End,
    ];
    // No unconditional fallback: when the selector is false the group fires
    // nothing, and the scheduler's own no-handler fallback keeps whatever
    // `tree_count` already holds from an earlier phase or the prior step.
    descriptor.add_handler(Handler::conditional("tree_count", Event::Step, selector, body, None));
    descriptor
}

fn organism_type() -> EntityTypeDescriptor {
    let mut descriptor = EntityTypeDescriptor::new(EntityKind::Organism);
    descriptor.declare_attribute("height");
    descriptor.add_handler(Handler::unconditional(
        "height",
        Event::Init,
        vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(0), Unit::base("m")))),
            Opcode::End,
        ],
        None,
    ));
    descriptor
}

#[test]
fn creation_only_fires_on_even_steps_after_the_first() {
    let mut scheduler = Scheduler::new(ConversionGraph::new(), 2, 10);
    scheduler.declare_type(patch_type());
    scheduler.declare_type(organism_type());
    let patch = scheduler.spawn(EntityKind::Patch, None);

    scheduler.step(0, 0, true).unwrap();
    let count_index = scheduler.entity(patch).unwrap().get_attribute_index("tree_count").unwrap();
    assert_eq!(scheduler.entity(patch).unwrap().get_prior(count_index), Some(&Value::Scalar(Scalar::count(1))));

    scheduler.step(1, 0, false).unwrap();
    assert_eq!(scheduler.entity(patch).unwrap().get_prior(count_index), Some(&Value::Scalar(Scalar::count(1))));

    scheduler.step(2, 0, false).unwrap();
    assert_eq!(scheduler.entity(patch).unwrap().get_prior(count_index), Some(&Value::Scalar(Scalar::count(2))));
}
