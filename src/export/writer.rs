//! Concrete writer backends behind the bounded pipe (§4.8.1).

use std::sync::{Arc, Mutex};

use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;
use tracing::{info, warn};

use crate::error::{ExportError, JoshResult};

use super::task::ExportTask;
use super::template::{PathTemplate, TemplateKind};

/// Common contract for every export destination. `write` appends one task;
/// `close` flushes and finalizes. A failed writer must error on the *next*
/// `write` call (§7: "a failed writer triggers an error on the next produce
/// call") rather than immediately unwinding the producer.
pub trait ExportWriter: Send {
    fn write(&mut self, task: &ExportTask) -> JoshResult<()>;
    fn close(&mut self) -> JoshResult<()>;
}

/// One row per task; columns are the union of keys seen in the *first*
/// record plus trailing `step`/`replicate`. A later record introducing an
/// unseen key is `SchemaDrift`, not silently back-filled (§4.8.1).
pub struct CsvWriter<W: std::io::Write + Send> {
    inner: csv::Writer<W>,
    header: Option<Vec<String>>,
    closed: bool,
    poisoned: bool,
}

impl<W: std::io::Write + Send> CsvWriter<W> {
    pub fn new(inner: W) -> Self {
        CsvWriter {
            inner: csv::Writer::from_writer(inner),
            header: None,
            closed: false,
            poisoned: false,
        }
    }
}

impl<W: std::io::Write + Send> ExportWriter for CsvWriter<W> {
    fn write(&mut self, task: &ExportTask) -> JoshResult<()> {
        if self.poisoned {
            return Err(ExportError::WriterClosed.into());
        }
        let result = (|| -> JoshResult<()> {
            let header = match &self.header {
                Some(h) => h.clone(),
                None => {
                    let mut h: Vec<String> = task.attributes.keys().cloned().collect();
                    h.push("step".to_string());
                    h.push("replicate".to_string());
                    self.inner.write_record(&h).map_err(ExportError::from)?;
                    self.header = Some(h.clone());
                    h
                }
            };
            let mut row = Vec::with_capacity(header.len());
            for key in &header {
                match key.as_str() {
                    "step" => row.push(task.step.to_string()),
                    "replicate" => row.push(task.replicate.to_string()),
                    other => match task.attributes.get(&other.to_string()) {
                        Some(v) => row.push(v.clone()),
                        None => return Err(ExportError::SchemaDrift(other.to_string()).into()),
                    },
                }
            }
            for key in task.attributes.keys() {
                if !header.contains(key) {
                    return Err(ExportError::SchemaDrift(key.clone()).into());
                }
            }
            self.inner.write_record(&row).map_err(ExportError::from)?;
            Ok(())
        })();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn close(&mut self) -> JoshResult<()> {
        if !self.closed {
            self.inner.flush().map_err(ExportError::Io)?;
            self.closed = true;
        }
        Ok(())
    }
}

/// Line-delimited JSON of the task record, for quick inspection.
pub struct StdoutWriter;

impl ExportWriter for StdoutWriter {
    fn write(&mut self, task: &ExportTask) -> JoshResult<()> {
        let attrs: std::collections::BTreeMap<_, _> = task.attributes.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let record = serde_json::json!({
            "entity_kind": format!("{:?}", task.entity_kind),
            "attributes": attrs,
            "step": task.step,
            "replicate": task.replicate,
        });
        println!("{}", serde_json::to_string(&record).map_err(ExportError::from)?);
        Ok(())
    }

    fn close(&mut self) -> JoshResult<()> {
        Ok(())
    }
}

/// In-process sink behind a `Mutex`, used by tests to assert on emitted
/// records without touching the filesystem.
#[derive(Default)]
pub struct MemoryWriter {
    pub records: Mutex<Vec<ExportTask>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ExportTask> {
        self.records.lock().expect("memory writer mutex poisoned").clone()
    }
}

impl ExportWriter for MemoryWriter {
    fn write(&mut self, task: &ExportTask) -> JoshResult<()> {
        self.records.lock().expect("memory writer mutex poisoned").push(task.clone());
        Ok(())
    }

    fn close(&mut self) -> JoshResult<()> {
        Ok(())
    }
}

/// One raster per `(step, variable, replicate)`; requires `{step}` or
/// `{variable}` in the path template.
#[derive(Debug)]
pub struct GeoTiffLikeWriter {
    template: PathTemplate,
    rasters_written: Vec<String>,
}

impl GeoTiffLikeWriter {
    pub fn new(path_template: impl Into<String>) -> JoshResult<Self> {
        let template = PathTemplate::new(path_template, TemplateKind::PerReplicate)?;
        Ok(GeoTiffLikeWriter {
            template,
            rasters_written: Vec::new(),
        })
    }

    pub fn rasters_written(&self) -> &[String] {
        &self.rasters_written
    }
}

impl ExportWriter for GeoTiffLikeWriter {
    fn write(&mut self, task: &ExportTask) -> JoshResult<()> {
        let variable = task.attributes.keys().next().map(String::as_str);
        let path = self.template.render(Some(task.step), variable, Some(task.replicate));
        info!(path, "rasterizing one cell into geotiff-like output");
        self.rasters_written.push(path);
        Ok(())
    }

    fn close(&mut self) -> JoshResult<()> {
        Ok(())
    }
}

/// Appends along `time` and `replicate` dimensions, encoded with the same
/// little-endian layout as the `.jshd` codec (§4.8.1); a real NetCDF encoder
/// is left to the out-of-scope CLI.
pub struct NetCdfLikeWriter<W: std::io::Write + Send> {
    inner: W,
    wrote_header: bool,
}

impl<W: std::io::Write + Send> NetCdfLikeWriter<W> {
    pub fn new(inner: W) -> Self {
        NetCdfLikeWriter {
            inner,
            wrote_header: false,
        }
    }
}

impl<W: std::io::Write + Send> ExportWriter for NetCdfLikeWriter<W> {
    fn write(&mut self, task: &ExportTask) -> JoshResult<()> {
        use byteorder::{LittleEndian, WriteBytesExt};
        if !self.wrote_header {
            self.inner.write_all(b"JSHS").map_err(ExportError::Io)?;
            self.wrote_header = true;
        }
        self.inner.write_u64::<LittleEndian>(task.step).map_err(ExportError::Io)?;
        self.inner.write_u32::<LittleEndian>(task.replicate).map_err(ExportError::Io)?;
        self.inner
            .write_u32::<LittleEndian>(task.attributes.len() as u32)
            .map_err(ExportError::Io)?;
        for (k, v) in task.attributes.iter() {
            write_lp_string(&mut self.inner, k)?;
            write_lp_string(&mut self.inner, v)?;
        }
        Ok(())
    }

    fn close(&mut self) -> JoshResult<()> {
        self.inner.flush().map_err(ExportError::Io)?;
        Ok(())
    }
}

fn write_lp_string(w: &mut impl std::io::Write, s: &str) -> JoshResult<()> {
    use byteorder::{LittleEndian, WriteBytesExt};
    w.write_u32::<LittleEndian>(s.len() as u32).map_err(ExportError::Io)?;
    w.write_all(s.as_bytes()).map_err(ExportError::Io)?;
    Ok(())
}

/// S3-compatible object store writer (MinIO or otherwise), buffering each
/// task as a JSON line and `put`-ing the accumulated buffer on close.
pub struct ObjectStoreWriter {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    buffer: Vec<u8>,
}

impl ObjectStoreWriter {
    pub fn new(store: Arc<dyn ObjectStore>, path: impl Into<String>) -> Self {
        ObjectStoreWriter {
            store,
            path: ObjectPath::from(path.into()),
            buffer: Vec::new(),
        }
    }
}

impl ExportWriter for ObjectStoreWriter {
    fn write(&mut self, task: &ExportTask) -> JoshResult<()> {
        let attrs: std::collections::BTreeMap<_, _> = task.attributes.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let line = serde_json::to_vec(&serde_json::json!({
            "entity_kind": format!("{:?}", task.entity_kind),
            "attributes": attrs,
            "step": task.step,
            "replicate": task.replicate,
        }))
        .map_err(ExportError::from)?;
        self.buffer.extend(line);
        self.buffer.push(b'\n');
        Ok(())
    }

    fn close(&mut self) -> JoshResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let store = self.store.clone();
        let path = self.path.clone();
        let payload = std::mem::take(&mut self.buffer);
        let put = async move { store.put(&path, payload.into()).await };
        match tokio::runtime::Handle::try_current() {
            Ok(h) => h.block_on(put).map_err(ExportError::ObjectStore)?,
            Err(_) => {
                warn!("no tokio runtime available; spawning one to flush the object store writer");
                tokio::runtime::Runtime::new().map_err(ExportError::Io)?.block_on(put).map_err(ExportError::ObjectStore)?
            }
        };
        Ok(())
    }
}
