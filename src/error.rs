use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ShapeMismatch,
    DegenerateOrientation,
    BroadcastError,
    SubmissionFailed,
    EngineTerminated,
    UnsupportedPlacement,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("degenerate orientation: quaternion {index} has norm {norm}")]
    DegenerateOrientation { index: usize, norm: f32 },

    #[error("cannot broadcast batch shapes {shapes:?}: {detail}")]
    BroadcastError {
        shapes: Vec<Vec<usize>>,
        detail: String,
    },

    #[error("device rejected submission at {stage}: {detail}")]
    SubmissionFailed {
        stage: &'static str,
        detail: String,
    },

    #[error("engine is not ready (state: {state})")]
    EngineTerminated { state: &'static str },

    #[error("input '{name}' resides on {placement}; only host memory can be ingested")]
    UnsupportedPlacement { name: &'static str, placement: String },
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShapeMismatch(_) => ErrorKind::ShapeMismatch,
            Self::DegenerateOrientation { .. } => ErrorKind::DegenerateOrientation,
            Self::BroadcastError { .. } => ErrorKind::BroadcastError,
            Self::SubmissionFailed { .. } => ErrorKind::SubmissionFailed,
            Self::EngineTerminated { .. } => ErrorKind::EngineTerminated,
            Self::UnsupportedPlacement { .. } => ErrorKind::UnsupportedPlacement,
        }
    }

    pub(crate) fn shape(detail: impl Into<String>) -> Self {
        Self::ShapeMismatch(detail.into())
    }

    pub(crate) fn submission(stage: &'static str, detail: impl ToString) -> Self {
        Self::SubmissionFailed {
            stage,
            detail: detail.to_string(),
        }
    }
}

/// Failure reported by a rasterizer backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("output slice holds {actual} bytes, expected {expected}")]
    TargetSize { expected: usize, actual: usize },

    #[error("scene has {available} SH coefficients per channel, draw requested degree {requested}")]
    ShDegree { requested: u8, available: usize },

    #[error("{0}")]
    Other(String),
}

impl From<&str> for BackendError {
    fn from(value: &str) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<String> for BackendError {
    fn from(value: String) -> Self {
        Self::Other(value)
    }
}

impl From<std::num::TryFromIntError> for BackendError {
    fn from(err: std::num::TryFromIntError) -> Self {
        Self::Other(err.to_string())
    }
}
