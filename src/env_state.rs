//! # Shared environment state
//!
//! [`LocalizeEnv`] owns the long-lived **HTTP client** used to fetch query images. It is
//! built once at startup with the configured timeout and cloned cheaply into every request
//! (the underlying `reqwest::Client` is reference-counted).
//!
//! ## Structure
//!
//! ```text
//! LocalizeEnv
//! └── http_client  (reqwest::Client, global timeout)
//! ```
//!
//! ## Notes
//!
//! - A fetch is a single streamed GET; there is no retry.
//! - If the client disconnects while an image is downloading, the download is not cancelled.
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::{Client, Url};
use tokio_stream::StreamExt;
use tracing::debug;

use crate::{constants::IMAGE_TOO_LARGE, localize_errors::LocalizeError};

#[derive(Debug, Clone)]
pub struct LocalizeEnv {
    pub http_client: Client,
}

impl LocalizeEnv {
    /// Create the environment with an HTTP client bounded by `fetch_timeout`.
    pub fn new(fetch_timeout: Duration) -> Result<Self, LocalizeError> {
        let http_client = Client::builder().timeout(fetch_timeout).build()?;
        Ok(LocalizeEnv { http_client })
    }

    /// Download a resource fully into memory.
    ///
    /// The body is read chunk by chunk so the size cap is enforced before the whole body is
    /// buffered.
    ///
    /// Arguments
    /// -----------------
    /// * `url`: The resource to GET.
    /// * `max_bytes`: Optional cap on the body size.
    ///
    /// Return
    /// ----------
    /// * The body bytes.
    /// * `UpstreamFetchFailed` on transport errors or a non-2xx status,
    ///   `InvalidInput` when the body exceeds `max_bytes`.
    pub async fn fetch_bytes(
        &self,
        url: Url,
        max_bytes: Option<usize>,
    ) -> Result<Bytes, LocalizeError> {
        let response = self.http_client.get(url).send().await?.error_for_status()?;

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            if max_bytes.is_some_and(|max| body.len() + chunk.len() > max) {
                return Err(LocalizeError::InvalidInput(IMAGE_TOO_LARGE.into()));
            }
            body.extend_from_slice(&chunk);
            debug!("download size : {}", body.len());
        }

        Ok(body.freeze())
    }
}
