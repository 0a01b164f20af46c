//! `current.height` is resolved against two entity types that both declare a
//! `height` attribute, but at different indices, driven end to end through a
//! single `Scheduler`. The attribute index cache keys on entity-type
//! identity rather than attribute name, so neither type's handler should
//! ever read the other's slot.

use josh_core::entity::{EntityKind, EntityTypeDescriptor, Event, Handler};
use josh_core::expr::Opcode;
use josh_core::scheduler::Scheduler;
use josh_core::units::{ConversionGraph, Unit};
use josh_core::value::{Scalar, Value};
use rust_decimal_macros::dec;

fn patch_type() -> EntityTypeDescriptor {
    let mut descriptor = EntityTypeDescriptor::new(EntityKind::Patch);
    // `height` lands at index 1 here, not 0.
    descriptor.declare_attribute("moisture");
    descriptor.declare_attribute("height");
    descriptor.add_handler(Handler::unconditional(
        "height",
        Event::Step,
        vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(10), Unit::base("m")))),
            Opcode::End,
        ],
        None,
    ));
    descriptor
}

fn organism_type() -> EntityTypeDescriptor {
    let mut descriptor = EntityTypeDescriptor::new(EntityKind::Organism);
    // `height` lands at index 0 here instead.
    descriptor.declare_attribute("height");
    descriptor.declare_attribute("age");
    descriptor.add_handler(Handler::unconditional(
        "height",
        Event::Step,
        vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(1), Unit::base("m")))),
            Opcode::End,
        ],
        None,
    ));
    descriptor
}

#[test]
fn shared_attribute_name_resolves_independently_per_entity_type() {
    let mut scheduler = Scheduler::new(ConversionGraph::new(), 0, 10);
    scheduler.declare_type(patch_type());
    scheduler.declare_type(organism_type());

    let patch = scheduler.spawn(EntityKind::Patch, None);
    let organism = scheduler.spawn(EntityKind::Organism, None);

    scheduler.step(0, 0, true).unwrap();

    let patch_entity = scheduler.entity(patch).unwrap();
    let patch_height_index = patch_entity.get_attribute_index("height").unwrap();
    assert_eq!(patch_height_index, 1);
    assert_eq!(
        patch_entity.get_prior(patch_height_index),
        Some(&Value::Scalar(Scalar::decimal(dec!(10), Unit::base("m"))))
    );

    let organism_entity = scheduler.entity(organism).unwrap();
    let organism_height_index = organism_entity.get_attribute_index("height").unwrap();
    assert_eq!(organism_height_index, 0);
    assert_eq!(
        organism_entity.get_prior(organism_height_index),
        Some(&Value::Scalar(Scalar::decimal(dec!(1), Unit::base("m"))))
    );

    // Resolve `height` on both again on a second timestep: a cache keyed on
    // name alone would now hand the patch's index-1 slot to the organism
    // (or vice versa) and one of these would read back the wrong value.
    scheduler.step(1, 0, false).unwrap();
    assert_eq!(
        scheduler.entity(patch).unwrap().get_prior(patch_height_index),
        Some(&Value::Scalar(Scalar::decimal(dec!(10), Unit::base("m"))))
    );
    assert_eq!(
        scheduler.entity(organism).unwrap().get_prior(organism_height_index),
        Some(&Value::Scalar(Scalar::decimal(dec!(1), Unit::base("m"))))
    );
}
