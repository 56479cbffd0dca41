use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = SolveError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("character detection failed: {0}")]
    Detection(String),
    #[error("character classification failed: {0}")]
    Classification(String),
    #[error("browser automation failed: {0}")]
    Automation(String),
    #[error("failed to decode image {path:?}: {source}")]
    Image {
        path: Option<PathBuf>,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to read labels from {path:?}: {source}")]
    Labels {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Runtime(#[from] ort::Error),
}

/// Coarse failure classes a run report groups attempts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Detection,
    Classification,
    Automation,
    Setup,
}

impl SolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SolveError::Detection(_) | SolveError::Image { .. } => ErrorKind::Detection,
            SolveError::Classification(_) => ErrorKind::Classification,
            SolveError::Automation(_) | SolveError::Io(_) => ErrorKind::Automation,
            SolveError::Labels { .. } | SolveError::Runtime(_) => ErrorKind::Setup,
        }
    }

    pub(crate) fn automation(err: impl std::fmt::Display) -> Self {
        SolveError::Automation(err.to_string())
    }
}

impl From<fantoccini::error::CmdError> for SolveError {
    fn from(err: fantoccini::error::CmdError) -> Self {
        SolveError::automation(err)
    }
}

impl From<fantoccini::error::NewSessionError> for SolveError {
    fn from(err: fantoccini::error::NewSessionError) -> Self {
        SolveError::automation(err)
    }
}
