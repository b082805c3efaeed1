//! # Image acquisition
//!
//! A query image reaches the service in one of two ways:
//!
//! * **URL** – the client passes an image URL; it is syntax-checked before any network access
//!   and then fetched with a single streamed GET ([`LocalizeEnv::fetch_bytes`]).
//! * **Upload** – the client posts a multipart body; the image part is streamed to a temporary
//!   file in the upload directory ([`UploadedImage::persist_stream`]) and read back when the
//!   pipeline reaches the acquisition step.
//!
//! Both paths end in a single in-memory buffer handed to the engine.
//!
//! Temporary uploads are removed when their [`UploadedImage`] is dropped, whether the request
//! succeeded or failed validation.
use std::{
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::{
    constants::{IMAGE_DATA_NOT_SPECIFIED, IMAGE_TOO_LARGE, IMAGE_URL_NOT_VALID},
    env_state::LocalizeEnv,
    localize_errors::LocalizeError,
};

static UNIQUE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique name for scratch files and directories.
pub(crate) fn unique_task_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = UNIQUE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos:x}-{seq}", std::process::id())
}

/// A multipart image persisted to local storage.
#[derive(Debug)]
pub struct UploadedImage {
    path: Utf8PathBuf,
    file_name: Option<String>,
}

impl UploadedImage {
    /// Stream an uploaded body into a new file of `dir`.
    ///
    /// Arguments
    /// -----------------
    /// * `dir`: Upload directory, created if missing.
    /// * `file_name`: Client-side file name, kept for logging.
    /// * `stream`: The body chunks.
    /// * `max_bytes`: Optional cap on the body size.
    ///
    /// Return
    /// ----------
    /// * The persisted upload, or `InvalidInput` when the body is unreadable or too large.
    pub async fn persist_stream<S, E>(
        dir: &Utf8Path,
        file_name: Option<String>,
        stream: S,
        max_bytes: Option<usize>,
    ) -> Result<Self, LocalizeError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        tokio::fs::create_dir_all(dir).await?;
        let upload = UploadedImage {
            path: dir.join(format!("{}.upload", unique_task_id())),
            file_name,
        };
        let mut file = File::create(&upload.path).await?;

        tokio::pin!(stream);
        let mut size = 0usize;
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|err| {
                warn!("failed to receive uploaded image : {err}");
                LocalizeError::InvalidInput(IMAGE_DATA_NOT_SPECIFIED.into())
            })?;
            size += chunk.len();
            if max_bytes.is_some_and(|max| size > max) {
                return Err(LocalizeError::InvalidInput(IMAGE_TOO_LARGE.into()));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(
            file_name = upload.file_name.as_deref().unwrap_or(""),
            size, "upload stored at {}", upload.path
        );
        Ok(upload)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Read the stored upload back; a missing, unreadable or empty file is `InvalidInput`.
    pub async fn read(&self) -> Result<Bytes, LocalizeError> {
        let data = tokio::fs::read(&self.path).await.map_err(|err| {
            warn!("failed to load uploaded image {} : {err}", self.path);
            LocalizeError::InvalidInput(IMAGE_DATA_NOT_SPECIFIED.into())
        })?;
        if data.is_empty() {
            return Err(LocalizeError::InvalidInput(IMAGE_DATA_NOT_SPECIFIED.into()));
        }
        Ok(Bytes::from(data))
    }
}

impl Drop for UploadedImage {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to delete upload {} : {err}", self.path);
            }
        }
    }
}

/// Where the query image comes from.
#[derive(Debug)]
pub enum ImageSource {
    Url(Url),
    Upload(UploadedImage),
}

impl ImageSource {
    /// Validate an image URL without touching the network.
    ///
    /// The URL must be absolute, use `http` or `https`, and name a host.
    pub fn parse_url(raw: &str) -> Result<Self, LocalizeError> {
        let invalid = || LocalizeError::InvalidInput(IMAGE_URL_NOT_VALID.into());
        let url = Url::parse(raw.trim()).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid());
        }
        Ok(ImageSource::Url(url))
    }

    /// Obtain the raw image bytes.
    ///
    /// Return
    /// ----------
    /// * The image buffer.
    /// * `UpstreamFetchFailed` when the URL cannot be fetched, `InvalidInput` when the upload is
    ///   missing or any body exceeds `max_bytes`.
    pub async fn acquire(
        &self,
        env: &LocalizeEnv,
        max_bytes: Option<usize>,
    ) -> Result<Bytes, LocalizeError> {
        match self {
            ImageSource::Url(url) => env.fetch_bytes(url.clone(), max_bytes).await,
            ImageSource::Upload(upload) => {
                let data = upload.read().await?;
                if max_bytes.is_some_and(|max| data.len() > max) {
                    return Err(LocalizeError::InvalidInput(IMAGE_TOO_LARGE.into()));
                }
                Ok(data)
            }
        }
    }
}
