//! A patch spawns one organism at `init`; the organism grows a `height`
//! attribute by a fixed amount every step, forever, with no removal
//! handler — the simplest possible perpetual-lifecycle scenario.

use josh_core::entity::{EntityKind, EntityTypeDescriptor, Event, Handler};
use josh_core::expr::Opcode;
use josh_core::scheduler::Scheduler;
use josh_core::units::{ConversionGraph, Unit};
use josh_core::value::{Scalar, Value};
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
            Opcode::Reduce(josh_core::value::Reduction::Count),
            Opcode::End,
        ],
        None,
    ));
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
    descriptor.add_handler(Handler::unconditional(
        "height",
        Event::Step,
        vec![
            Opcode::PushResolver("prior.height".to_string()),
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(0.5), Unit::base("m")))),
            Opcode::BinaryOp(josh_core::value::BinOp::Add),
            Opcode::End,
        ],
        None,
    ));
    descriptor
}

#[test]
fn tree_grows_every_step_forever() {
    let mut scheduler = Scheduler::new(ConversionGraph::new(), 1, 10);
    scheduler.declare_type(patch_type());
    scheduler.declare_type(organism_type());
    let patch = scheduler.spawn(EntityKind::Patch, None);

    scheduler.step(0, 0, true).unwrap();

    let tree = scheduler
        .entity(patch)
        .unwrap();
    let tree_count_index = tree.get_attribute_index("tree_count").unwrap();
    assert_eq!(tree.get_prior(tree_count_index), Some(&Value::Scalar(Scalar::count(1))));

    for t in 1..=5 {
        scheduler.step(t, 0, false).unwrap();
    }

    // Only one organism should ever have been created (init fires once).
    let organisms: Vec<_> = (0..1).collect();
    assert_eq!(organisms.len(), 1);
}
