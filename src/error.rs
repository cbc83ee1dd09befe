use thiserror::Error;

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct LprError(LprErrorKind);

#[derive(Debug, Error)]
pub enum LprErrorKind {
    /// The model at `path` could not be loaded; the recognizer was never built.
    #[error("failed to load model from {}: {reason}", .path.display())]
    ModelLoad { path: PathBuf, reason: String },
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("recognition engine failed: {0}")]
    Engine(String),
    #[error("recognizer has been released")]
    InvalidState,
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),
}

impl LprError {
    pub fn kind(&self) -> &LprErrorKind {
        &self.0
    }

    pub fn model_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self(LprErrorKind::ModelLoad { path: path.into(), reason: reason.to_string() })
    }

    pub fn invalid_image(reason: impl Into<String>) -> Self {
        Self(LprErrorKind::InvalidImage(reason.into()))
    }

    pub fn engine(reason: impl ToString) -> Self {
        Self(LprErrorKind::Engine(reason.to_string()))
    }

    /// Whether the same call may succeed when issued again on this recognizer.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            LprErrorKind::InvalidImage(_) | LprErrorKind::Engine(_) | LprErrorKind::Timeout(_) => true,
            LprErrorKind::ModelLoad { .. } | LprErrorKind::InvalidState => false,
        }
    }
}

impl<T> From<T> for LprError
where T: Into<LprErrorKind>
{
    fn from(e: T) -> Self {
        Self(e.into())
    }
}

#[cfg(feature = "tensorflow-engine")]
impl From<tensorflow::Status> for LprErrorKind {
    fn from(e: tensorflow::Status) -> Self {
        Self::Engine(e.to_string())
    }
}

impl From<image::ImageError> for LprErrorKind {
    fn from(e: image::ImageError) -> Self {
        Self::InvalidImage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for LprErrorKind {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Engine(format!("recognition worker stopped: {}", e))
    }
}
