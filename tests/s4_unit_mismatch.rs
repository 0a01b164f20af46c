//! Adding two scalars in incompatible units with no registered conversion
//! between them is a fatal `UnitMismatch`, surfaced through the full
//! handler -> expression-machine -> scheduler path rather than only at the
//! value-engine layer.

use josh_core::entity::{EntityKind, EntityTypeDescriptor, Event, Handler};
use josh_core::error::{JoshError, ValueError};
use josh_core::expr::Opcode;
use josh_core::scheduler::Scheduler;
use josh_core::units::{ConversionGraph, Unit};
use josh_core::value::{BinOp, Scalar, Value};
use rust_decimal_macros::dec;

fn mismatched_patch_type() -> EntityTypeDescriptor {
    let mut descriptor = EntityTypeDescriptor::new(EntityKind::Patch);
    descriptor.declare_attribute("total");
    descriptor.add_handler(Handler::unconditional(
        "total",
        Event::Step,
        vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(5), Unit::base("m")))),
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(3), Unit::base("s")))),
            Opcode::BinaryOp(BinOp::Add),
            Opcode::End,
        ],
        None,
    ));
    descriptor
}

#[test]
fn adding_unconvertible_units_is_fatal() {
    // An empty graph has no `m <-> s` conversion registered.
    let mut scheduler = Scheduler::new(ConversionGraph::new(), 0, 10);
    scheduler.declare_type(mismatched_patch_type());
    scheduler.spawn(EntityKind::Patch, None);

    let err = scheduler.step(0, 0, true).unwrap_err();
    assert!(
        matches!(err, JoshError::Value(ValueError::UnitMismatch { .. })),
        "expected UnitMismatch, got {err:?}"
    );
}
