//! Bounded producer-consumer pipe behind every writer (§4.8): the scheduler
//! thread produces `ExportTask`s, a dedicated writer thread drains them, and
//! the bounded channel applies backpressure instead of buffering without
//! limit. Modeled on the fan-out/fan-in loaders in `transport::loader`,
//! collapsed to a single writer stage since `ExportWriter` is synchronous.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{Sender, TrySendError, bounded};
use tracing::{error, warn};

use crate::error::{ExportError, JoshError, JoshResult};

use super::task::ExportTask;
use super::writer::ExportWriter;

enum Message {
    Task(ExportTask),
    Close,
}

/// Owns the writer thread and the bounded queue feeding it. A write that
/// would overflow the queue blocks the producer (§4.8: fixed chunk size,
/// fixed queue capacity, backpressure rather than unbounded buffering). A
/// failure inside the writer thread is not raised until the *next* call to
/// [`ExportPipeline::push`] or [`ExportPipeline::close`] (§7).
pub struct ExportPipeline {
    tx: Option<Sender<Message>>,
    handle: Option<JoinHandle<JoshResult<()>>>,
    poisoned: Arc<Mutex<Option<JoshError>>>,
}

impl ExportPipeline {
    /// Spawns the writer thread with a queue sized at
    /// `bounds.queue_capacity_chunks` tasks.
    pub fn spawn(mut writer: Box<dyn ExportWriter>, bounds: super::PipelineBounds) -> Self {
        let (tx, rx) = bounded::<Message>(bounds.queue_capacity_chunks.max(1));
        let poisoned = Arc::new(Mutex::new(None));
        let poisoned_thread = poisoned.clone();

        let handle = std::thread::spawn(move || -> JoshResult<()> {
            let result = (|| -> JoshResult<()> {
                while let Ok(message) = rx.recv() {
                    match message {
                        Message::Task(task) => writer.write(&task)?,
                        Message::Close => break,
                    }
                }
                writer.close()
            })();
            if let Err(err) = &result {
                error!(?err, "export writer thread failed; draining remaining tasks");
                *poisoned_thread.lock().expect("pipeline poison mutex") =
                    Some(ExportError::WriterFailed(err.to_string()).into());
                while rx.try_recv().is_ok() {}
            }
            result
        });

        ExportPipeline {
            tx: Some(tx),
            handle: Some(handle),
            poisoned,
        }
    }

    /// Queues one task. Blocks the caller while the queue is full
    /// (backpressure). Returns the writer thread's stashed failure, if any,
    /// before attempting to send.
    pub fn push(&self, task: ExportTask) -> JoshResult<()> {
        self.check_poisoned()?;
        let Some(tx) = &self.tx else {
            return Err(ExportError::WriterClosed.into());
        };
        match tx.send(Message::Task(task)) {
            Ok(()) => Ok(()),
            Err(_) => {
                // The writer thread has already exited; surface its error.
                self.check_poisoned()?;
                Err(ExportError::WriterClosed.into())
            }
        }
    }

    /// Non-blocking variant for producers that would rather drop a chunk
    /// than stall (not used by the scheduler today, kept for CLI tooling).
    pub fn try_push(&self, task: ExportTask) -> JoshResult<()> {
        self.check_poisoned()?;
        let Some(tx) = &self.tx else {
            return Err(ExportError::WriterClosed.into());
        };
        match tx.try_send(Message::Task(task)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("export queue full; dropping task under try_push backpressure policy");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                self.check_poisoned()?;
                Err(ExportError::WriterClosed.into())
            }
        }
    }

    /// Signals end-of-input, drains whatever is already queued, and joins
    /// the writer thread, propagating any failure it recorded.
    pub fn close(&mut self) -> JoshResult<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Close);
        }
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(ExportError::WriterClosed.into()),
            }
        } else {
            Ok(())
        }
    }

    fn check_poisoned(&self) -> JoshResult<()> {
        let mut guard = self.poisoned.lock().expect("pipeline poison mutex");
        if let Some(err) = guard.take() {
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for ExportPipeline {
    fn drop(&mut self) {
        if self.tx.is_some() || self.handle.is_some() {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;

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
    fn pushed_tasks_reach_the_writer() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = ExportPipeline::spawn(
            Box::new(SharedSink(sink.clone())),
            super::super::PipelineBounds::default(),
        );
        for step in 0..5 {
            pipeline
                .push(ExportTask::new(EntityKind::Patch, step, 0))
                .unwrap();
        }
        pipeline.close().unwrap();
        assert_eq!(sink.lock().unwrap().len(), 5);
    }

    #[test]
    fn a_writer_failure_surfaces_on_the_next_push() {
        struct FailingWriter;
        impl ExportWriter for FailingWriter {
            fn write(&mut self, _task: &ExportTask) -> JoshResult<()> {
                Err(ExportError::WriterClosed.into())
            }
            fn close(&mut self) -> JoshResult<()> {
                Ok(())
            }
        }
        let mut pipeline =
            ExportPipeline::spawn(Box::new(FailingWriter), super::super::PipelineBounds::default());
        pipeline.push(ExportTask::new(EntityKind::Patch, 0, 0)).ok();

        // The failing write happens on the writer thread, off the calling
        // thread's timeline, so poll rather than assume one push is enough
        // time for it to land in the poison stash.
        let mut surfaced = None;
        for _ in 0..200 {
            match pipeline.push(ExportTask::new(EntityKind::Patch, 1, 0)) {
                Ok(()) => std::thread::sleep(std::time::Duration::from_millis(5)),
                Err(err) => {
                    surfaced = Some(err);
                    break;
                }
            }
        }
        let err = surfaced.expect("writer failure never surfaced on a subsequent push");
        assert!(
            matches!(err, JoshError::Export(ExportError::WriterFailed(_))),
            "expected WriterFailed, got {err:?}"
        );
    }
}
