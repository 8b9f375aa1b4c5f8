use std::fmt;

use thiserror::Error;

use crate::types::SessionId;

pub type CairnResult<T> = Result<T, CairnError>;

/// How bad a corruption is.
///
/// `Soft` covers derived state (caches, indexes) that can be rebuilt from the
/// repository itself. `Hard` means primary data is damaged and the operation
/// must be aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Soft,
    Hard,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Soft => f.write_str("soft"),
            Severity::Hard => f.write_str("hard"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CairnError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("misuse: {0}")]
    Misuse(String),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("{severity} corruption: {message}")]
    Corruption { severity: Severity, message: String },

    #[error("commit in progress: the queue slot is already occupied")]
    CommitInProgress,

    #[error("index error: {0}")]
    Index(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CairnError {
    pub fn input(msg: impl Into<String>) -> Self {
        CairnError::Input(msg.into())
    }

    pub fn misuse(msg: impl Into<String>) -> Self {
        CairnError::Misuse(msg.into())
    }

    pub fn hard(msg: impl Into<String>) -> Self {
        CairnError::Corruption {
            severity: Severity::Hard,
            message: msg.into(),
        }
    }

    pub fn soft(msg: impl Into<String>) -> Self {
        CairnError::Corruption {
            severity: Severity::Soft,
            message: msg.into(),
        }
    }

    /// True for both soft and hard corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, CairnError::Corruption { .. })
    }

    pub fn is_hard_corruption(&self) -> bool {
        matches!(
            self,
            CairnError::Corruption {
                severity: Severity::Hard,
                ..
            }
        )
    }

    /// Errors caused by the caller rather than by the repository contents.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            CairnError::Input(_) | CairnError::Misuse(_) | CairnError::SessionNotFound(_)
        )
    }
}
