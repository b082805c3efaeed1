use thiserror::Error;

/// Every failure the localization front-end can produce.
///
/// The first four variants are the request-time taxonomy: they are converted to a JSON
/// `{"message": ...}` body at the HTTP boundary. The remaining variants only occur while the
/// process starts (registry loading, parameter validation) or on local I/O.
///
/// "No estimate" is deliberately absent: an engine that could not localize the image is a
/// successful call answered with the empty pose.
#[derive(Error, Debug)]
pub enum LocalizeError {
    /// Missing or malformed request parameters.
    #[error("{0}")]
    InvalidInput(String),

    /// Unknown user/map identifier, or no history for a user.
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    UpstreamFetchFailed(#[from] reqwest::Error),

    #[error("Localization engine failed: {0}")]
    EngineFailure(String),

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid server parameter: {0}")]
    InvalidParameter(String),
}

impl LocalizeError {
    /// Whether the error comes from the request itself rather than from the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, LocalizeError::InvalidInput(_))
    }
}

impl PartialEq for LocalizeError {
    fn eq(&self, other: &Self) -> bool {
        use LocalizeError::*;
        match (self, other) {
            (InvalidInput(a), InvalidInput(b)) => a == b,
            (NotFound(a), NotFound(b)) => a == b,
            (EngineFailure(a), EngineFailure(b)) => a == b,
            (ConfigNotFound(a), ConfigNotFound(b)) => a == b,
            (InvalidConfig(a), InvalidConfig(b)) => a == b,
            (InvalidParameter(a), InvalidParameter(b)) => a == b,

            // payloads are not comparable, same variant is enough
            (UpstreamFetchFailed(_), UpstreamFetchFailed(_)) => true,
            (Json(_), Json(_)) => true,
            (IoError(_), IoError(_)) => true,

            _ => false,
        }
    }
}
