//! Crate-wide error taxonomy. One top-level [`JoshError`] wraps a per-component
//! sub-error enum; every fallible public operation returns [`JoshResult`].

use thiserror::Error;

pub type JoshResult<T> = Result<T, JoshError>;

#[derive(Debug, Error)]
pub enum JoshError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Replicate(#[from] ReplicateError),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Errors from the value engine (C1): units, scalars, distributions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    #[error("unit mismatch: lhs has units {lhs}, rhs has units {rhs}")]
    UnitMismatch { lhs: String, rhs: String },

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("no conversion path from {from} to {to}")]
    NoConversionPath { from: String, to: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("sample size error: requested {requested}, available {available}")]
    SampleSize { requested: usize, available: usize },

    #[error("realized distributions of different sizes cannot combine: {a} vs {b}")]
    SizeMismatch { a: usize, b: usize },

    #[error("cannot reduce an empty distribution")]
    EmptyReduction,

    #[error("invalid map domain: from_lo == from_hi")]
    DegenerateDomain,

    #[error("numeric conversion failed for value: {0}")]
    NumericConversion(String),
}

/// Errors from the expression machine (C2).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("local name '{0}' already bound in this handler body")]
    LocalAlreadyBound(String),

    #[error("local name '{0}' is not bound")]
    UnboundLocal(String),

    #[error("machine already ended")]
    AlreadyEnded,

    #[error("no result produced before get_result")]
    NoResult,
}

/// Errors from the entity & attribute store (C3).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntityError {
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("unknown entity state: {0}")]
    UnknownState(String),

    #[error("stale entity reference: {0:?}")]
    Stale(crate::entity::EntityRef),

    #[error("entity has no geometry")]
    NoGeometry,
}

/// Errors from the resolver (C4).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolverError {
    #[error("empty dotted path")]
    EmptyPath,

    #[error("unknown scope root: {0}")]
    UnknownScope(String),

    #[error("attribute absent: {0}")]
    AttributeAbsent(String),
}

/// Errors from the substep scheduler (C5).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(
        "cycle detected: {}",
        path.iter().map(|k| format!("{k:?}")).collect::<Vec<_>>().join(" -> ")
    )]
    CycleDetected {
        path: Vec<crate::resolver::ResolutionKey>,
    },

    #[error("handler for {attribute} on {entity:?} failed: {source}")]
    HandlerFailed {
        entity: crate::entity::EntityRef,
        attribute: String,
        #[source]
        source: Box<JoshError>,
    },
}

/// Errors from the spatial layer (C6).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpatialError {
    #[error("coordinate out of grid bounds: lat={lat}, lon={lon}")]
    OutOfBounds { lat: f64, lon: f64 },

    #[error("radial query issued against a non-geometric entity")]
    NoCenterGeometry,

    #[error("negative radius: {0}")]
    NegativeRadius(f64),
}

/// Errors from the external resource layer (C7) and `.jshd` codec (C12).
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("bad .jshd magic bytes")]
    BadMagic,

    #[error("unsupported .jshd version: {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt .jshd payload: expected {expected} cells, found {found}")]
    SizeMismatch { expected: usize, found: usize },

    #[error("timestep {0} outside grid range")]
    StepOutOfRange(i64),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the export pipeline (C8).
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("GeoTIFF path template requires {{step}} or {{variable}}: {0}")]
    TemplateRequired(String),

    #[error("path template forbids {{replicate}} for a consolidating format: {0}")]
    TemplateForbidden(String),

    #[error("schema drift: column '{0}' not present in the established CSV header")]
    SchemaDrift(String),

    #[error("writer closed after a prior failure")]
    WriterClosed,

    #[error("export writer thread failed: {0}")]
    WriterFailed(String),

    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the replicate driver (C9).
#[derive(Debug, Error)]
pub enum ReplicateError {
    #[error("replicate cancelled")]
    Cancelled,

    #[error("replicate {replicate} aborted at step {step}: {source}")]
    Aborted {
        replicate: u32,
        step: i64,
        #[source]
        source: Box<JoshError>,
    },

    #[error(transparent)]
    ProgressBar(#[from] indicatif::style::TemplateError),
}

/// Generic I/O wrapper, distinct from the component-specific I/O variants above.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("writer error: {0}")]
    Writer(String),

    #[error("reader error: {0}")]
    Reader(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Std(#[from] std::io::Error),
}
