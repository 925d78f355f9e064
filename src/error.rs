//! Error types for session loading and control

use std::fmt;

/// Errors surfaced at the session boundary.
///
/// `InvalidInput` is rejected before the previous backend is touched;
/// `LoadFailure` covers fetch and decode failures after teardown. Seeking an
/// unseekable source is deliberately not an error (it is a silent no-op).
#[derive(Debug, Clone, PartialEq)]
pub enum DeckError {
    /// Malformed descriptor: bad URL syntax, non-audio file bytes,
    /// unparseable score data.
    InvalidInput(String),
    /// The source was accepted but could not be brought up: network error,
    /// HTTP failure, corrupt or unsupported audio content.
    LoadFailure(String),
}

impl DeckError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        DeckError::InvalidInput(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        DeckError::LoadFailure(msg.into())
    }

    /// The user-facing message, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            DeckError::InvalidInput(m) => m,
            DeckError::LoadFailure(m) => m,
        }
    }
}

impl fmt::Display for DeckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeckError::InvalidInput(m) => write!(f, "Invalid input: {m}"),
            DeckError::LoadFailure(m) => write!(f, "Load failed: {m}"),
        }
    }
}

impl std::error::Error for DeckError {}
