//! A patch's conditional `Step` handler runs a radial query against its
//! neighbors' prior `height` and sums the hits, end to end through
//! `ResolveCtx::spatial_query` and the reduction machinery. The query only
//! sees prior-patch positions frozen at the end of the previous timestep, so
//! it is exercised starting at timestep 1, not at the initial `Init` step.

use josh_core::entity::{EntityKind, EntityTypeDescriptor, Event, Handler};
use josh_core::expr::Opcode;
use josh_core::scheduler::Scheduler;
use josh_core::spatial::LatLon;
use josh_core::units::{ConversionGraph, Unit};
use josh_core::value::{BinOp, Reduction, Scalar, Value};
use rust_decimal_macros::dec;

fn patch_type() -> EntityTypeDescriptor {
    let mut descriptor = EntityTypeDescriptor::new(EntityKind::Patch);
    descriptor.declare_attribute("height");
    descriptor.declare_attribute("near_sum");

    descriptor.add_handler(Handler::unconditional(
        "height",
        Event::Init,
        vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(2), Unit::base("m")))),
            Opcode::End,
        ],
        None,
    ));

    // Selector: meta.step > 0, since the radial index is empty until the
    // first `freeze_prior` has run.
    let selector = vec![
        Opcode::PushResolver("meta.step".to_string()),
        Opcode::PushLiteral(Value::Scalar(Scalar::count(0))),
        Opcode::BinaryOp(BinOp::Gt),
    ];
    let body = vec![
        Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(5), Unit::base("m")))),
        Opcode::ExecuteSpatialQuery { resolver: "height".to_string() },
        Opcode::Reduce(Reduction::Sum),
        Opcode::End,
    ];
    descriptor.add_handler(Handler::conditional("near_sum", Event::Step, selector, body, None));
    descriptor
}

#[test]
fn radial_query_sums_prior_height_within_radius() {
    let mut scheduler = Scheduler::new(ConversionGraph::new(), 0, 10);
    scheduler.declare_type(patch_type());

    // A and B sit ~1.11m apart (within the 5m query radius); C sits
    // ~111km from both (well outside it).
    let a = scheduler.spawn(EntityKind::Patch, Some(LatLon::new(0.0, 0.0)));
    let b = scheduler.spawn(EntityKind::Patch, Some(LatLon::new(0.0, 0.00001)));
    let c = scheduler.spawn(EntityKind::Patch, Some(LatLon::new(0.0, 1.0)));

    // Timestep 0: only `Init` seeds `height`; the conditional `near_sum`
    // handler stays silent since `meta.step > 0` is false.
    scheduler.step(0, 0, true).unwrap();

    // Timestep 1: `freeze_prior` has run once, so the radial index now holds
    // every patch's prior position and the query can fire.
    scheduler.step(1, 0, false).unwrap();

    let sum_index = scheduler.entity(a).unwrap().get_attribute_index("near_sum").unwrap();
    let expected_two_m = Value::Scalar(Scalar::decimal(dec!(4), Unit::base("m")));
    let expected_one_m = Value::Scalar(Scalar::decimal(dec!(2), Unit::base("m")));

    assert_eq!(
        scheduler.entity(a).unwrap().get_prior(sum_index),
        Some(&expected_two_m),
        "A should see its own height plus B's, within the 5m radius"
    );
    assert_eq!(
        scheduler.entity(b).unwrap().get_prior(sum_index),
        Some(&expected_two_m),
        "B should see its own height plus A's, within the 5m radius"
    );
    assert_eq!(
        scheduler.entity(c).unwrap().get_prior(sum_index),
        Some(&expected_one_m),
        "C is isolated; only its own height is within the 5m radius"
    );
}
