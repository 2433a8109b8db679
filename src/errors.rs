use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Auth(String),
    #[error("request failed ({status}): {message}")]
    Fetch { status: u16, message: String },
    #[error("{0}")]
    Import(String),
    #[error(transparent)]
    Network(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl AppError {
    /// True when no response arrived at all, as opposed to a non-2xx reply.
    pub fn is_network(&self) -> bool {
        matches!(self, AppError::Network(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Fetch { status, .. } => Some(*status),
            AppError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
