//! Replicate driver (C9): runs independent, identically-configured
//! replicates of one compiled model in parallel, each with its own
//! deterministically reseeded RNG stream and its own `Scheduler`, fanning
//! their export tasks into a shared router. Modeled on the worker pool in
//! `gym::trading::env::Environment::evaluate_agents`: a `rayon` parallel
//! iterator over per-replicate work, a shared progress bar, and per-item
//! results collected rather than short-circuited on the first failure.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{JoshResult, ReplicateError};
use crate::export::ExportRouter;
use crate::model::CompiledModel;
use crate::scheduler::Scheduler;

/// Outcome of one completed (or aborted) replicate.
#[derive(Debug, Clone)]
pub struct ReplicateSummary {
    pub replicate: u32,
    pub steps_completed: u64,
    pub export_tasks_emitted: u64,
}

/// Spawns the root-level entities (simulation singleton, initial grid
/// patches) into a freshly constructed, empty scheduler. Supplied by the
/// caller since only it knows the model's initial conditions; called once
/// per replicate, before the timestep loop starts.
pub trait RootSpawner: Fn(&mut Scheduler) + Send + Sync {}
impl<T: Fn(&mut Scheduler) + Send + Sync> RootSpawner for T {}

pub struct ReplicateDriver<'a> {
    model: &'a CompiledModel,
}

impl<'a> ReplicateDriver<'a> {
    pub fn new(model: &'a CompiledModel) -> Self {
        ReplicateDriver { model }
    }

    /// Runs every replicate in `[0, replicate_count)`, each on its own
    /// `rayon` worker, dispatching export tasks into `router` as they're
    /// produced. A replicate failing or being cancelled does not stop its
    /// siblings; every outcome (success or failure) is returned (§4.9:
    /// replicates are evaluated independently).
    pub fn run(&self, router: &ExportRouter, spawn_roots: &(dyn RootSpawner), cancel: CancellationToken) -> JoshResult<Vec<JoshResult<ReplicateSummary>>> {
        let count = self.model.config.replicate_count;
        let bar = progress_bar(count as u64)?;
        bar.set_message("Running replicates...");

        let results: Vec<JoshResult<ReplicateSummary>> = (0..count)
            .into_par_iter()
            .map(|replicate| {
                let outcome = self.run_one(replicate, router, spawn_roots, &cancel);
                bar.inc(1);
                outcome
            })
            .collect();

        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            bar.finish_with_message(format!("{failures} of {count} replicates failed"));
        } else {
            bar.finish_with_message("All replicates complete.");
        }
        Ok(results)
    }

    fn run_one(&self, replicate: u32, router: &ExportRouter, spawn_roots: &(dyn RootSpawner), cancel: &CancellationToken) -> JoshResult<ReplicateSummary> {
        let seed = self.model.config.replicate_seed(replicate);
        let mut scheduler = Scheduler::new(self.model.graph.clone(), seed, self.model.config.sampling.sample_size);
        for descriptor in &self.model.types {
            scheduler.declare_type(descriptor.clone());
        }
        spawn_roots(&mut scheduler);

        let steps = self.model.config.steps;
        let mut emitted = 0u64;
        let mut completed = 0u64;
        for (offset, timestep) in (steps.low..=steps.high).enumerate() {
            if cancel.is_cancelled() {
                warn!(replicate, timestep, "replicate cancelled");
                return Err(ReplicateError::Cancelled.into());
            }
            let include_init = offset == 0;
            let tasks = scheduler.step(timestep, replicate, include_init).map_err(|source| ReplicateError::Aborted {
                replicate,
                step: timestep,
                source: Box::new(source),
            })?;
            for task in tasks {
                router.dispatch(task).map_err(|source| ReplicateError::Aborted {
                    replicate,
                    step: timestep,
                    source: Box::new(source),
                })?;
                emitted += 1;
            }
            completed += 1;
        }
        info!(replicate, steps_completed = completed, export_tasks_emitted = emitted, "replicate finished");
        Ok(ReplicateSummary {
            replicate,
            steps_completed: completed,
            export_tasks_emitted: emitted,
        })
    }
}

fn progress_bar(capacity: u64) -> JoshResult<ProgressBar> {
    let bar = ProgressBar::new(capacity);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta_precise}) {msg}")
            .map_err(ReplicateError::ProgressBar)?
            .progress_chars("#>-"),
    );
    Ok(bar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, SamplingPolicy, SimulationConfig, StepRange};
    use crate::entity::{EntityKind, Event, Handler};
    use crate::expr::Opcode;
    use crate::export::PipelineBounds;
    use crate::spatial::LatLon;
    use crate::units::{ConversionGraph, Unit};
    use crate::value::{Scalar, Value};
    use rust_decimal_macros::dec;

    fn config(replicate_count: u32, low: i64, high: i64) -> SimulationConfig {
        SimulationConfig {
            grid: GridConfig {
                sw: LatLon::new(0.0, 0.0),
                ne: LatLon::new(1.0, 1.0),
                cell_size_m: 1000.0,
            },
            steps: StepRange { low, high },
            sampling: SamplingPolicy::default(),
            exports: Vec::new(),
            worker_count: 2,
            master_seed: 7,
            replicate_count,
        }
    }

    fn patch_model(config: SimulationConfig) -> CompiledModel {
        let mut descriptor = crate::entity::EntityTypeDescriptor::new(EntityKind::Patch);
        descriptor.declare_attribute("height");
        descriptor.add_handler(Handler::unconditional(
            "height",
            Event::Step,
            vec![
                Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(1), Unit::base("m")))),
                Opcode::End,
            ],
            None,
        ));
        CompiledModel {
            types: vec![descriptor],
            graph: ConversionGraph::new(),
            config,
        }
    }

    #[test]
    fn every_replicate_reports_a_summary() {
        let model = patch_model(config(3, 0, 2));
        let driver = ReplicateDriver::new(&model);
        let router = ExportRouter::new();
        let spawn_roots = |scheduler: &mut Scheduler| {
            scheduler.spawn(EntityKind::Patch, None);
        };
        let results = driver.run(&router, &spawn_roots, CancellationToken::new()).unwrap();
        assert_eq!(results.len(), 3);
        for result in results {
            let summary = result.unwrap();
            assert_eq!(summary.steps_completed, 3);
        }
    }

    #[test]
    fn cancellation_aborts_in_flight_replicates() {
        let model = patch_model(config(2, 0, 9));
        let driver = ReplicateDriver::new(&model);
        let router = ExportRouter::new();
        let spawn_roots = |scheduler: &mut Scheduler| {
            scheduler.spawn(EntityKind::Patch, None);
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = driver.run(&router, &spawn_roots, cancel).unwrap();
        for result in results {
            assert!(result.is_err());
        }
    }

    #[test]
    fn routed_exports_reach_their_pipeline() {
        use crate::export::{ExportTask, ExportWriter};
        use std::sync::{Arc, Mutex};

        struct SharedSink(Arc<Mutex<Vec<ExportTask>>>);
        impl ExportWriter for SharedSink {
            fn write(&mut self, task: &ExportTask) -> JoshResult<()> {
                self.0.lock().expect("sink mutex").push(task.clone());
                Ok(())
            }
            fn close(&mut self) -> JoshResult<()> {
                Ok(())
            }
        }

        let model = patch_model(config(1, 0, 1));
        let driver = ReplicateDriver::new(&model);
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut router = ExportRouter::new();
        router.route(
            EntityKind::Patch,
            crate::export::ExportPipeline::spawn(Box::new(SharedSink(sink.clone())), PipelineBounds::default()),
        );
        let spawn_roots = |scheduler: &mut Scheduler| {
            scheduler.spawn(EntityKind::Patch, None);
        };
        driver.run(&router, &spawn_roots, CancellationToken::new()).unwrap();
        router.close_all().unwrap();
        assert!(!sink.lock().unwrap().is_empty());
    }
}
