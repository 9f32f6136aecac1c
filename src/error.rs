use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid execution configuration: {0}")]
    Configuration(String),

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("Projector chain misuse: {0}")]
    ChainMisuse(String),

    #[error("Query execution error: {0}")]
    Execution(String),

    #[error("{phase} failed on shard {shard}: {source}")]
    ShardFailure {
        phase: String,
        shard: String,
        source: Box<ExecError>,
    },

    #[error(
        "Data too large, data for [{context}] would be [{used}] bytes, which is larger than the limit of [{limit}] bytes"
    )]
    MemoryLimit {
        context: String,
        used: u64,
        limit: u64,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ExecResult<T> = Result<T, ExecError>;

/// Coarse failure taxonomy used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before execution; no side effects happened.
    Validation,
    /// Defect in the calling layer.
    Programming,
    /// A participant failed while rows were streaming.
    Execution,
    /// The ram accounting ceiling was crossed.
    ResourceExhausted,
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Validation(_) | ExecError::Settings(_) => ErrorKind::Validation,
            ExecError::Configuration(_)
            | ExecError::UnsupportedOperation(_)
            | ExecError::ChainMisuse(_) => ErrorKind::Programming,
            ExecError::MemoryLimit { .. } => ErrorKind::ResourceExhausted,
            ExecError::ShardFailure { source, .. } => match source.kind() {
                ErrorKind::ResourceExhausted => ErrorKind::ResourceExhausted,
                _ => ErrorKind::Execution,
            },
            ExecError::Execution(_) | ExecError::Codec(_) | ExecError::Internal(_) => {
                ErrorKind::Execution
            }
        }
    }

    /// Attribute a failure to the shard and phase it originated from.
    /// Failures that already carry an origin are left untouched.
    pub fn on_shard(self, phase: impl Into<String>, shard: impl Into<String>) -> Self {
        match self {
            already @ ExecError::ShardFailure { .. } => already,
            other => ExecError::ShardFailure {
                phase: phase.into(),
                shard: shard.into(),
                source: Box::new(other),
            },
        }
    }
}

impl From<bincode::Error> for ExecError {
    fn from(err: bincode::Error) -> Self {
        ExecError::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for ExecError {
    fn from(err: serde_json::Error) -> Self {
        ExecError::Codec(err.to_string())
    }
}

impl serde::Serialize for ExecError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
