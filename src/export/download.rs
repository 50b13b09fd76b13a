// Download side effect — platform-neutral save action behind a trait so the
// orchestrator is testable without a browser.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use tracing::{debug, error};

/// A fully materialized download: decoded bytes plus the metadata a save
/// action needs.
#[derive(Debug, Clone)]
pub struct DownloadPayload {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Bytes,
}

impl DownloadPayload {
    /// Build from a base64 cache slot, decoding to raw bytes.
    pub fn from_base64(
        file_name: String,
        content_type: &'static str,
        payload: &str,
    ) -> Result<Self> {
        let bytes = BASE64
            .decode(payload)
            .map_err(|e| anyhow!("payload for {} is not valid base64: {}", file_name, e))?;
        Ok(Self {
            file_name,
            content_type,
            bytes: Bytes::from(bytes),
        })
    }

    /// Build from raw text (the pseudo-format path).
    pub fn from_text(file_name: String, content_type: &'static str, text: String) -> Self {
        Self {
            file_name,
            content_type,
            bytes: Bytes::from(text.into_bytes()),
        }
    }

    /// Locally-addressable reference to the payload, suitable for handing to
    /// a browser anchor.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            BASE64.encode(&self.bytes)
        )
    }
}

/// Receives download payloads once the orchestrator reaches `Ready`.
pub trait DownloadSink: Send + Sync {
    fn deliver(&self, payload: DownloadPayload);
}

/// Sink that saves payloads into a directory. Failures are logged, not
/// propagated — the save action is fire-and-forget like a browser download.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DownloadSink for DirectorySink {
    fn deliver(&self, payload: DownloadPayload) {
        let path = self.dir.join(&payload.file_name);
        match fs::write(&path, &payload.bytes) {
            Ok(()) => debug!("saved {} ({} bytes)", path.display(), payload.bytes.len()),
            Err(e) => error!("could not save {}: {}", path.display(), e),
        }
    }
}
