//! Path templates (§4.8): `{step}`, `{variable}`, `{replicate}`, substituted
//! per writer-format rules.

use crate::error::{ExportError, JoshResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Consolidates replicates into one file/stream (CSV, NetCDF-like):
    /// `{replicate}` is forbidden in the path, emitted as a column/dimension
    /// instead.
    Consolidating,
    /// One output per replicate (GeoTIFF-like): requires `{step}` or
    /// `{variable}`, substitutes `{replicate}`.
    PerReplicate,
}

#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
}

impl PathTemplate {
    pub fn new(raw: impl Into<String>, kind: TemplateKind) -> JoshResult<Self> {
        let raw = raw.into();
        match kind {
            TemplateKind::Consolidating => {
                if raw.contains("{replicate}") {
                    return Err(ExportError::TemplateForbidden(raw).into());
                }
            }
            TemplateKind::PerReplicate => {
                if !raw.contains("{step}") && !raw.contains("{variable}") {
                    return Err(ExportError::TemplateRequired(raw).into());
                }
            }
        }
        Ok(PathTemplate { raw })
    }

    pub fn render(&self, step: Option<u64>, variable: Option<&str>, replicate: Option<u32>) -> String {
        let mut out = self.raw.clone();
        if let Some(step) = step {
            out = out.replace("{step}", &step.to_string());
        }
        if let Some(variable) = variable {
            out = out.replace("{variable}", variable);
        }
        if let Some(replicate) = replicate {
            out = out.replace("{replicate}", &replicate.to_string());
        }
        out
    }
}
