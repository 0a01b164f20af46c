//! Per-entity-type routing in front of the export pipelines (§4.8.1): each
//! entity kind is wired to at most one pipeline; a kind with none configured
//! is a silent no-op rather than an error, since most models only export a
//! subset of their entity types.

use std::cell::Cell;

use crate::entity::EntityKind;
use crate::error::JoshResult;
use crate::sorted_vec_map::SortedVecMap;

use super::pipeline::ExportPipeline;
use super::task::ExportTask;

thread_local! {
    /// Set immediately before a combined writer (one pipeline serving
    /// several entity kinds) is asked to write, so the writer can format
    /// its output for the right table/raster without threading the kind
    /// through every call site.
    static CURRENT_ENTITY_KIND: Cell<Option<EntityKind>> = const { Cell::new(None) };
}

/// Reads the entity kind the router is currently dispatching for. `None`
/// outside of a router-mediated write.
pub fn current_entity_kind() -> Option<EntityKind> {
    CURRENT_ENTITY_KIND.with(|cell| cell.get())
}

/// Maps entity kinds to the pipeline responsible for exporting them. Several
/// kinds may share one pipeline (a single combined writer); a kind absent
/// from the map is simply not exported.
pub struct ExportRouter {
    routes: SortedVecMap<EntityKind, ExportPipeline>,
}

impl ExportRouter {
    pub fn new() -> Self {
        ExportRouter { routes: SortedVecMap::new() }
    }

    /// Wires `kind` to `pipeline`. Replacing an existing route closes and
    /// drops the pipeline it displaces.
    pub fn route(&mut self, kind: EntityKind, pipeline: ExportPipeline) {
        self.routes.insert(kind, pipeline);
    }

    /// Dispatches `task` to the pipeline configured for its entity kind. A
    /// no-op if no pipeline is configured for that kind.
    pub fn dispatch(&self, task: ExportTask) -> JoshResult<()> {
        let Some(pipeline) = self.routes.get(&task.entity_kind) else {
            return Ok(());
        };
        CURRENT_ENTITY_KIND.with(|cell| cell.set(Some(task.entity_kind)));
        let result = pipeline.push(task);
        CURRENT_ENTITY_KIND.with(|cell| cell.set(None));
        result
    }

    /// Closes every configured pipeline, collecting the first failure (if
    /// any) while still attempting to close the rest.
    pub fn close_all(&mut self) -> JoshResult<()> {
        let mut first_err = None;
        for (_, pipeline) in self.routes.iter_mut() {
            if let Err(err) = pipeline.close() {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::writer::ExportWriter;
    use crate::export::PipelineBounds;
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

    #[test]
    fn unrouted_kind_is_a_silent_no_op() {
        let router = ExportRouter::new();
        let result = router.dispatch(ExportTask::new(EntityKind::Patch, 0, 0));
        assert!(result.is_ok());
    }

    #[test]
    fn routed_kind_reaches_its_pipeline() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ExportPipeline::spawn(Box::new(SharedSink(sink.clone())), PipelineBounds::default());
        let mut router = ExportRouter::new();
        router.route(EntityKind::Patch, pipeline);
        router.dispatch(ExportTask::new(EntityKind::Patch, 1, 0)).unwrap();
        router.dispatch(ExportTask::new(EntityKind::Organism, 1, 0)).unwrap();
        router.close_all().unwrap();
        assert_eq!(sink.lock().unwrap().len(), 1);
    }
}
