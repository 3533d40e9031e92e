use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackError>;

#[derive(Error, Debug)]
pub enum TrackError {
    /// Malformed, out-of-range or oversized request. Nothing was written.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown media (or viewer/media pairing) with no timeline to track against.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent writers kept racing on the same watch state; retry with fresh state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0:#}")]
    StorageUnavailable(anyhow::Error),
}

impl TrackError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TrackError::InvalidInput(_) => "invalidInput",
            TrackError::NotFound(_) => "notFound",
            TrackError::Conflict(_) => "conflict",
            TrackError::StorageUnavailable(_) => "storageUnavailable",
        }
    }
}

impl From<anyhow::Error> for TrackError {
    fn from(err: anyhow::Error) -> Self {
        TrackError::StorageUnavailable(err)
    }
}

/// Rejects empty identifiers; identity is always resolved upstream and passed in.
pub fn require_id(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TrackError::invalid(format!("{field} must not be empty")));
    }
    Ok(())
}
