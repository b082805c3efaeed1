//! # Service parameters
//!
//! This module defines [`ServerParams`], the runtime knobs of the localization front-end,
//! and its validating builder [`ServerParamsBuilder`].
//!
//! The limits only affect requests that exceed them; a request completing within them gets
//! the same response with or without the limits.
//!
//! Quick-Start
//! -----------------
//! ```rust
//! use std::time::Duration;
//! use vision_localize_server::params::ServerParams;
//!
//! let params = ServerParams::builder()
//!     .history_capacity(10)
//!     .engine_timeout(Duration::from_secs(60))
//!     .max_concurrent_localizations(2)
//!     .build()
//!     .unwrap();
//! assert_eq!(params.history_capacity, 10);
//! ```
use std::{fmt, time::Duration};

use camino::Utf8PathBuf;

use crate::{
    constants::{MAX_USER_HISTORY_LENGTH, TMP_DIR_NAME},
    localize_errors::LocalizeError,
};

/// Runtime parameters shared by every request.
#[derive(Debug, Clone)]
pub struct ServerParams {
    /// Maximum number of entries kept per user history.
    pub history_capacity: usize,
    /// Upper bound on the whole image download (connect + body).
    pub fetch_timeout: Duration,
    /// Upper bound on one engine invocation.
    pub engine_timeout: Duration,
    /// Maximum accepted image size in bytes, `None` for unbounded.
    pub max_image_bytes: Option<usize>,
    /// Number of engine invocations allowed to run at the same time.
    pub max_concurrent_localizations: usize,
    /// Directory receiving multipart uploads before they are localized.
    pub upload_dir: Utf8PathBuf,
}

impl ServerParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`ServerParamsBuilder`] initialized with the default values.
    ///
    /// See also
    /// ------------
    /// * [`ServerParamsBuilder::build`] – Validation rules.
    pub fn builder() -> ServerParamsBuilder {
        ServerParamsBuilder::new()
    }
}

/// Default scratch directory for uploads, under the system temp directory.
///
/// Falls back to a relative path when the temp directory is not valid UTF-8.
pub fn default_upload_dir() -> Utf8PathBuf {
    let tmp = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("tmp"));
    tmp.join(TMP_DIR_NAME).join("uploads")
}

impl Default for ServerParams {
    fn default() -> Self {
        ServerParams {
            history_capacity: MAX_USER_HISTORY_LENGTH,
            fetch_timeout: Duration::from_secs(30),
            engine_timeout: Duration::from_secs(120),
            max_image_bytes: Some(32 * 1024 * 1024),
            max_concurrent_localizations: 4,
            upload_dir: default_upload_dir(),
        }
    }
}

/// Builder for [`ServerParams`], with validation.
#[derive(Debug, Clone)]
pub struct ServerParamsBuilder {
    params: ServerParams,
}

impl Default for ServerParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerParamsBuilder {
    /// Create a new builder initialized with default values.
    pub fn new() -> Self {
        Self {
            params: ServerParams::default(),
        }
    }

    pub fn history_capacity(mut self, v: usize) -> Self {
        self.params.history_capacity = v;
        self
    }
    pub fn fetch_timeout(mut self, v: Duration) -> Self {
        self.params.fetch_timeout = v;
        self
    }
    pub fn engine_timeout(mut self, v: Duration) -> Self {
        self.params.engine_timeout = v;
        self
    }
    pub fn max_image_bytes(mut self, v: Option<usize>) -> Self {
        self.params.max_image_bytes = v;
        self
    }
    pub fn max_concurrent_localizations(mut self, v: usize) -> Self {
        self.params.max_concurrent_localizations = v;
        self
    }
    pub fn upload_dir(mut self, v: impl Into<Utf8PathBuf>) -> Self {
        self.params.upload_dir = v.into();
        self
    }

    /// Finalize the builder and produce a [`ServerParams`] instance.
    ///
    /// Validation rules
    /// -----------------
    /// * `history_capacity ≥ 1`
    /// * `fetch_timeout > 0`, `engine_timeout > 0`
    /// * `max_image_bytes > 0` when set
    /// * `max_concurrent_localizations ≥ 1`
    /// * `upload_dir` is not empty
    ///
    /// Returns
    /// -----------------
    /// * `Ok(ServerParams)` if all values are valid.
    /// * `Err(LocalizeError::InvalidParameter)` naming the first failing rule.
    pub fn build(self) -> Result<ServerParams, LocalizeError> {
        let p = &self.params;

        if p.history_capacity == 0 {
            return Err(LocalizeError::InvalidParameter(
                "history_capacity must be >= 1".into(),
            ));
        }
        if p.fetch_timeout.is_zero() || p.engine_timeout.is_zero() {
            return Err(LocalizeError::InvalidParameter(
                "timeouts must be > 0".into(),
            ));
        }
        if p.max_image_bytes == Some(0) {
            return Err(LocalizeError::InvalidParameter(
                "max_image_bytes must be > 0 when set".into(),
            ));
        }
        if p.max_concurrent_localizations == 0 {
            return Err(LocalizeError::InvalidParameter(
                "max_concurrent_localizations must be >= 1".into(),
            ));
        }
        if p.upload_dir.as_str().is_empty() {
            return Err(LocalizeError::InvalidParameter(
                "upload_dir must not be empty".into(),
            ));
        }

        Ok(self.params)
    }
}

impl fmt::Display for ServerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max_image = match self.max_image_bytes {
            Some(n) => format!("{n} bytes"),
            None => "unbounded".to_string(),
        };
        write!(
            f,
            "history_capacity={}, fetch_timeout={:?}, engine_timeout={:?}, max_image={}, workers={}, upload_dir={}",
            self.history_capacity,
            self.fetch_timeout,
            self.engine_timeout,
            max_image,
            self.max_concurrent_localizations,
            self.upload_dir
        )
    }
}
