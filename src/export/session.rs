// Export session state machine — drives ready/loading/failed transitions for
// one displayed generation result.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::cache::{OutputCache, Resolution};
use super::download::{DownloadPayload, DownloadSink};
use super::stats::ExportStats;
use crate::convert::traits::Converter;
use crate::formats::{derive_file_name, ExportFormat, CANONICAL_SOURCE_FORMAT};
use crate::generation::GenerationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    /// A payload for the selected format is available; a download has been
    /// (or can be) triggered.
    Ready,
    /// A conversion request is in flight for the selected format.
    Loading,
    /// The last conversion attempt failed. Recoverable only by re-selecting
    /// a format, which re-enters the machine from the top.
    Failed,
}

/// Observable state: every derived display value is a pure function of
/// these two fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportState {
    pub selected: ExportFormat,
    pub status: ExportStatus,
}

/// Per-viewer-session orchestrator for one generation result.
///
/// Owns the output cache and converts cache misses through the
/// [`Converter`]. All failures are absorbed here and surfaced as the
/// `Failed` status; nothing propagates to the caller of
/// [`ExportSession::select_format`].
pub struct ExportSession {
    prompt: String,
    code: Option<String>,
    source_format: ExportFormat,
    cache: Arc<OutputCache>,
    converter: Arc<dyn Converter>,
    sink: Arc<dyn DownloadSink>,
    stats: Arc<ExportStats>,
    state_tx: watch::Sender<ExportState>,
    in_flight: Mutex<HashSet<ExportFormat>>,
}

impl ExportSession {
    /// Create a session for a displayed result. Seeds the cache from the
    /// result's outputs; the initial selection is the canonical default.
    pub fn new(
        result: GenerationResult,
        converter: Arc<dyn Converter>,
        sink: Arc<dyn DownloadSink>,
    ) -> Self {
        let cache = Arc::new(OutputCache::from_outputs(&result.outputs));
        let (state_tx, _) = watch::channel(ExportState {
            selected: CANONICAL_SOURCE_FORMAT,
            status: ExportStatus::Ready,
        });

        info!(
            "export session created: {} cached format(s), code={}",
            cache.len(),
            result.code.is_some()
        );

        Self {
            prompt: result.prompt,
            code: result.code,
            source_format: CANONICAL_SOURCE_FORMAT,
            cache,
            converter,
            sink,
            stats: Arc::new(ExportStats::new()),
            state_tx,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Handle a format-selection event. Runs the full flow to completion:
    /// pseudo-format short circuit, cache lookup, at most one conversion
    /// call, then the download side effect on success.
    ///
    /// Concurrent calls for different formats are allowed; each format's
    /// cache slot is independent. A format already in flight is never
    /// double-fetched.
    pub async fn select_format(&self, format: ExportFormat) {
        self.stats.record_selection();

        if format.is_pseudo() {
            // Embedded source text — never a network call.
            match self.code.clone() {
                Some(text) => {
                    self.publish(format, ExportStatus::Ready);
                    self.deliver(DownloadPayload::from_text(
                        derive_file_name(&self.prompt, format),
                        format.content_type(),
                        text,
                    ));
                }
                None => {
                    warn!("{} selected but no source text was supplied", format);
                    self.stats.record_failure();
                    self.publish(format, ExportStatus::Failed);
                }
            }
            return;
        }

        let resolution = match self.cache.resolve(format, self.source_format) {
            Ok(r) => r,
            Err(e) => {
                warn!("resolve failed for {}: {}", format, e);
                self.stats.record_failure();
                self.publish(format, ExportStatus::Failed);
                return;
            }
        };

        let source_payload = match resolution {
            Resolution::Hit(payload) => {
                self.stats.record_cache_hit();
                debug!("cache hit for {}", format);
                self.publish(format, ExportStatus::Ready);
                self.deliver_cached(format, &payload);
                return;
            }
            Resolution::Miss { source_payload } => source_payload,
        };

        // Same-format double-fetch guard: one outstanding request per slot.
        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(format) {
                debug!("conversion for {} already in flight", format);
                self.publish(format, ExportStatus::Loading);
                return;
            }
        }

        self.publish(format, ExportStatus::Loading);
        let result = self.run_conversion(format, &source_payload).await;
        self.in_flight.lock().remove(&format);

        match result {
            Ok(payload) => {
                // A slot is only ever written by its own response, so this
                // is safe even when the response is stale — a later
                // re-select of this format becomes a cache hit.
                self.cache.set_output(format, payload.clone());
                if self.is_selected(format) {
                    self.publish(format, ExportStatus::Ready);
                    self.deliver_cached(format, &payload);
                } else {
                    debug!("stale response for {} ignored", format);
                }
            }
            Err(e) => {
                self.stats.record_failure();
                warn!("conversion to {} failed: {}", format, e);
                if self.is_selected(format) {
                    self.publish(format, ExportStatus::Failed);
                } else {
                    debug!("stale failure for {} ignored", format);
                }
            }
        }
    }

    /// Issue exactly one conversion request with the decoded canonical
    /// source payload as input.
    async fn run_conversion(&self, format: ExportFormat, source_payload: &str) -> Result<String> {
        let source_bytes = BASE64
            .decode(source_payload)
            .map_err(|e| anyhow!("canonical source payload is not valid base64: {}", e))?;

        self.stats.record_conversion();
        let payload = self
            .converter
            .convert(Bytes::from(source_bytes), format)
            .await?;

        if payload.is_empty() {
            return Err(anyhow!("conversion returned an empty payload for {}", format));
        }
        Ok(payload)
    }

    /// Subscribe to state transitions. Transitions for one request are
    /// published in response order; the `Ready` state is always observable
    /// on this channel before the corresponding download fires.
    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ExportState {
        *self.state_tx.borrow()
    }

    pub fn cache(&self) -> &Arc<OutputCache> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<ExportStats> {
        &self.stats
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    fn is_selected(&self, format: ExportFormat) -> bool {
        self.state_tx.borrow().selected == format
    }

    fn publish(&self, selected: ExportFormat, status: ExportStatus) {
        debug!("state -> selected={} status={:?}", selected, status);
        self.state_tx.send_replace(ExportState { selected, status });
    }

    fn deliver_cached(&self, format: ExportFormat, payload: &str) {
        match DownloadPayload::from_base64(
            derive_file_name(&self.prompt, format),
            format.content_type(),
            payload,
        ) {
            Ok(download) => self.deliver(download),
            Err(e) => warn!("could not decode {} payload for download: {}", format, e),
        }
    }

    fn deliver(&self, payload: DownloadPayload) {
        self.stats.record_download();
        self.sink.deliver(payload);
    }
}
