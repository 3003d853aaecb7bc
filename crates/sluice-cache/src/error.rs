//! Cache error type.

/// Failure of one cache operation.
///
/// Deliberately coarse: consumers treat every variant as "cache unavailable"
/// and fall back to in-memory state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable during {op}: {message}")]
    Unavailable { op: &'static str, message: String },

    #[error("cache state corrupted: {0}")]
    Corrupt(String),
}

impl CacheError {
    pub fn unavailable(op: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            op,
            message: message.into(),
        }
    }

    /// Operation name, or `open` for state corruption found while loading.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Unavailable { op, .. } => op,
            Self::Corrupt(_) => "open",
        }
    }
}
