//! A GeoTIFF-like writer's path template must carry `{step}` or `{variable}`;
//! rejecting a bad template is only half the contract, so this also wires a
//! valid one through a real `ExportRouter` fed by `Scheduler::step` and
//! checks the rendered paths.

use std::sync::{Arc, Mutex};

use josh_core::entity::{EntityKind, EntityTypeDescriptor, Event, Handler};
use josh_core::error::{ExportError, JoshError, JoshResult};
use josh_core::export::{ExportPipeline, ExportRouter, ExportTask, ExportWriter, GeoTiffLikeWriter, PathTemplate, PipelineBounds, TemplateKind};
use josh_core::expr::Opcode;
use josh_core::scheduler::Scheduler;
use josh_core::units::{ConversionGraph, Unit};
use josh_core::value::{Scalar, Value};
use rust_decimal_macros::dec;

/// Renders each task's path with a shared `PathTemplate` and records it,
/// so the rendered output is observable after the writer has been boxed
/// and moved onto the pipeline's writer thread.
struct TemplatedSink {
    template: PathTemplate,
    rendered: Arc<Mutex<Vec<String>>>,
}

impl ExportWriter for TemplatedSink {
    fn write(&mut self, task: &ExportTask) -> JoshResult<()> {
        let variable = task.attributes.keys().next().map(String::as_str);
        let path = self.template.render(Some(task.step), variable, Some(task.replicate));
        self.rendered.lock().expect("rendered paths mutex").push(path);
        Ok(())
    }
    fn close(&mut self) -> JoshResult<()> {
        Ok(())
    }
}

fn patch_type() -> EntityTypeDescriptor {
    let mut descriptor = EntityTypeDescriptor::new(EntityKind::Patch);
    descriptor.declare_attribute("height");
    descriptor.add_handler(Handler::unconditional(
        "height",
        Event::Init,
        vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(3), Unit::base("m")))),
            Opcode::End,
        ],
        None,
    ));
    descriptor.add_handler(Handler::unconditional(
        "height",
        Event::Step,
        vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(3), Unit::base("m")))),
            Opcode::End,
        ],
        None,
    ));
    descriptor
}

#[test]
fn a_template_with_neither_placeholder_is_rejected_at_construction() {
    let err = GeoTiffLikeWriter::new("rasters/out.tif").unwrap_err();
    assert!(matches!(err, JoshError::Export(ExportError::TemplateRequired(_))));
}

#[test]
fn a_valid_template_renders_one_path_per_routed_task() {
    let template = PathTemplate::new("rasters/{variable}_{step}.tif", TemplateKind::PerReplicate).unwrap();
    let rendered = Arc::new(Mutex::new(Vec::new()));
    let writer = TemplatedSink { template, rendered: rendered.clone() };
    let pipeline = ExportPipeline::spawn(Box::new(writer), PipelineBounds::default());
    let mut router = ExportRouter::new();
    router.route(EntityKind::Patch, pipeline);

    let mut scheduler = Scheduler::new(ConversionGraph::new(), 0, 10);
    scheduler.declare_type(patch_type());
    scheduler.spawn(EntityKind::Patch, None);

    for timestep in 0..3i64 {
        let tasks = scheduler.step(timestep, 0, timestep == 0).unwrap();
        for task in tasks {
            router.dispatch(task).unwrap();
        }
    }
    router.close_all().unwrap();

    // Every phase of every timestep produces its own export task, so the
    // same rendered path repeats several times per step; what matters is
    // that each step's path was rendered at all, and rendered correctly.
    let mut distinct_paths: Vec<String> = rendered.lock().unwrap().clone();
    distinct_paths.sort();
    distinct_paths.dedup();
    assert_eq!(
        distinct_paths,
        vec!["rasters/height_0.tif", "rasters/height_1.tif", "rasters/height_2.tif"]
    );
}
