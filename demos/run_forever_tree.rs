//! Builds the forever-tree model in memory, runs a handful of replicates,
//! and prints a summary. Stands in for the out-of-scope DSL compiler and CLI
//! so the core is runnable without either attached.

use josh_core::config::{ExportTarget, GridConfig, SamplingPolicy, SimulationConfig, StepRange};
use josh_core::entity::{EntityKind, Event};
use josh_core::error::JoshResult;
use josh_core::export::{ExportRouter, ExportPipeline, PipelineBounds, StdoutWriter};
use josh_core::expr::Opcode;
use josh_core::model::{EntityTypeBuilder, ModelBuilder};
use josh_core::replicate::ReplicateDriver;
use josh_core::spatial::LatLon;
use josh_core::units::Unit;
use josh_core::value::{BinOp, Reduction, Scalar, Value};
use josh_core::scheduler::Scheduler;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

fn main() -> JoshResult<()> {
    tracing_subscriber::fmt::init();

    let patch = EntityTypeBuilder::new(EntityKind::Patch)
        .attribute("tree_count")
        .on(
            "tree_count",
            Event::Init,
            vec![
                Opcode::PushLiteral(Value::Scalar(Scalar::count(1))),
                Opcode::CreateEntity { type_name: "Organism".to_string() },
                Opcode::Reduce(Reduction::Count),
                Opcode::End,
            ],
        );

    let organism = EntityTypeBuilder::new(EntityKind::Organism)
        .attribute("height")
        .on(
            "height",
            Event::Init,
            vec![
                Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(0), Unit::base("m")))),
                Opcode::End,
            ],
        )
        .on(
            "height",
            Event::Step,
            vec![
                Opcode::PushResolver("prior.height".to_string()),
                Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(0.5), Unit::base("m")))),
                Opcode::BinaryOp(BinOp::Add),
                Opcode::End,
            ],
        );

    let config = SimulationConfig {
        grid: GridConfig {
            sw: LatLon::new(0.0, 0.0),
            ne: LatLon::new(1.0, 1.0),
            cell_size_m: 1000.0,
        },
        steps: StepRange { low: 0, high: 9 },
        sampling: SamplingPolicy::default(),
        exports: vec![ExportTarget {
            name: "height".to_string(),
            path_template: "stdout".to_string(),
        }],
        worker_count: 2,
        master_seed: 7,
        replicate_count: 3,
    };

    let model = ModelBuilder::new()
        .entity_type(patch)
        .entity_type(organism)
        .build(config);

    let mut router = ExportRouter::new();
    router.route(EntityKind::Patch, ExportPipeline::spawn(Box::new(StdoutWriter), PipelineBounds::default()));
    router.route(EntityKind::Organism, ExportPipeline::spawn(Box::new(StdoutWriter), PipelineBounds::default()));

    let spawn_roots = |scheduler: &mut Scheduler| {
        scheduler.spawn(EntityKind::Patch, None);
    };

    let driver = ReplicateDriver::new(&model);
    let outcomes = driver.run(&router, &spawn_roots, CancellationToken::new())?;
    router.close_all()?;

    let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
    println!("{succeeded}/{} replicates completed", outcomes.len());
    for outcome in outcomes {
        match outcome {
            Ok(summary) => println!(
                "replicate {}: {} steps, {} export tasks",
                summary.replicate, summary.steps_completed, summary.export_tasks_emitted
            ),
            Err(err) => println!("replicate failed: {err}"),
        }
    }

    Ok(())
}
