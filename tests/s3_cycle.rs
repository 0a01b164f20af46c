//! Two attributes that each read the other through `current.*` form a direct
//! cycle; the scheduler must surface `CycleDetected` rather than recurse
//! forever, driven end-to-end through `Scheduler::step`.

use josh_core::entity::{EntityKind, EntityTypeDescriptor, Event, Handler};
use josh_core::error::{JoshError, SchedulerError};
use josh_core::expr::Opcode;
use josh_core::scheduler::Scheduler;
use josh_core::units::ConversionGraph;

fn cyclic_patch_type() -> EntityTypeDescriptor {
    let mut descriptor = EntityTypeDescriptor::new(EntityKind::Patch);
    descriptor.declare_attribute("predator_count");
    descriptor.declare_attribute("prey_count");
    descriptor.add_handler(Handler::unconditional(
        "predator_count",
        Event::Step,
        vec![Opcode::PushResolver("current.prey_count".to_string()), Opcode::End],
        None,
    ));
    descriptor.add_handler(Handler::unconditional(
        "prey_count",
        Event::Step,
        vec![Opcode::PushResolver("current.predator_count".to_string()), Opcode::End],
        None,
    ));
    descriptor
}

#[test]
fn mutually_dependent_attributes_are_reported_as_a_cycle() {
    let mut scheduler = Scheduler::new(ConversionGraph::new(), 0, 10);
    scheduler.declare_type(cyclic_patch_type());
    scheduler.spawn(EntityKind::Patch, None);

    let err = scheduler.step(0, 0, true).unwrap_err();
    match err {
        JoshError::Scheduler(SchedulerError::CycleDetected { path }) => {
            assert!(path.len() >= 2, "cycle path should record every attribute involved in the loop");
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }
}
