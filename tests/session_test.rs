// Orchestrator state machine tests with mock converter and sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use cad_export_engine::convert::traits::Converter;
use cad_export_engine::export::download::{DownloadPayload, DownloadSink};
use cad_export_engine::export::session::{ExportSession, ExportStatus};
use cad_export_engine::formats::ExportFormat;
use cad_export_engine::generation::GenerationResult;

const SOURCE_GLTF: &[u8] = br#"{"asset":{"version":"2.0"}}"#;
const PROMPT: &str = "A 320mm vented brake rotor!";

fn result_with_source() -> GenerationResult {
    let mut outputs = HashMap::new();
    outputs.insert("source.gltf".to_string(), BASE64.encode(SOURCE_GLTF));
    GenerationResult {
        prompt: PROMPT.to_string(),
        outputs,
        code: None,
    }
}

#[derive(Default)]
struct RecordingSink {
    downloads: Mutex<Vec<DownloadPayload>>,
}

impl DownloadSink for RecordingSink {
    fn deliver(&self, payload: DownloadPayload) {
        self.downloads.lock().push(payload);
    }
}

/// Converter that records every call and replies with a fixed outcome.
struct ScriptedConverter {
    calls: Mutex<Vec<(Vec<u8>, ExportFormat)>>,
    response: std::result::Result<String, String>,
}

impl ScriptedConverter {
    fn succeeding(payload: &[u8]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response: Ok(BASE64.encode(payload)),
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response: Err(message.to_string()),
        }
    }

    fn raw(response: std::result::Result<String, String>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Converter for ScriptedConverter {
    async fn convert(&self, source: Bytes, target: ExportFormat) -> Result<String> {
        self.calls.lock().push((source.to_vec(), target));
        match &self.response {
            Ok(payload) => Ok(payload.clone()),
            Err(message) => Err(anyhow!("{}", message)),
        }
    }
}

/// Converter that blocks until released, for in-flight race scenarios.
struct GatedConverter {
    release: Mutex<Option<oneshot::Receiver<()>>>,
    payload: String,
    calls: AtomicUsize,
}

impl GatedConverter {
    fn new(payload: &[u8]) -> (Arc<Self>, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let converter = Arc::new(Self {
            release: Mutex::new(Some(rx)),
            payload: BASE64.encode(payload),
            calls: AtomicUsize::new(0),
        });
        (converter, tx)
    }
}

#[async_trait]
impl Converter for GatedConverter {
    async fn convert(&self, _source: Bytes, _target: ExportFormat) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rx = self.release.lock().take();
        if let Some(rx) = rx {
            let _ = rx.await;
        }
        Ok(self.payload.clone())
    }
}

async fn wait_for_call(converter: &GatedConverter) {
    for _ in 0..1000 {
        if converter.calls.load(Ordering::SeqCst) > 0 {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("conversion request never started");
}

#[tokio::test]
async fn test_cached_format_ready_without_conversion() {
    let converter = Arc::new(ScriptedConverter::failing("must not be called"));
    let sink = Arc::new(RecordingSink::default());
    let session = ExportSession::new(result_with_source(), converter.clone(), sink.clone());
    let mut state_rx = session.subscribe();

    session.select_format(ExportFormat::Gltf).await;

    assert_eq!(session.prompt(), PROMPT);
    let state = session.state();
    assert_eq!(state.selected, ExportFormat::Gltf);
    assert_eq!(state.status, ExportStatus::Ready);
    assert_eq!(converter.call_count(), 0);
    // The transition was published on the watch channel.
    assert!(state_rx.has_changed().unwrap());
    assert_eq!(*state_rx.borrow_and_update(), state);

    let downloads = sink.downloads.lock();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].file_name, "a-320mm-vented-brake-rotor.gltf");
    assert_eq!(downloads[0].content_type, "model/gltf+json");
    assert_eq!(&downloads[0].bytes[..], SOURCE_GLTF);
}

#[tokio::test]
async fn test_cache_miss_issues_exactly_one_conversion() {
    let converted = b"solid rotor ... endsolid rotor";
    let converter = Arc::new(ScriptedConverter::succeeding(converted));
    let sink = Arc::new(RecordingSink::default());
    let session = ExportSession::new(result_with_source(), converter.clone(), sink.clone());

    session.select_format(ExportFormat::Stl).await;

    // Exactly one request, body equals the decoded canonical source payload,
    // target equals the requested format.
    {
        let calls = converter.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, SOURCE_GLTF);
        assert_eq!(calls[0].1, ExportFormat::Stl);
    }

    assert_eq!(session.state().status, ExportStatus::Ready);
    assert_eq!(
        session.cache().get(ExportFormat::Stl),
        Some(BASE64.encode(converted))
    );

    let stats = session.stats().snapshot();
    assert_eq!(stats.conversions, 1);
    assert_eq!(stats.downloads, 1);
    assert_eq!(stats.cache_hits, 0);

    let downloads = sink.downloads.lock();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].file_name, "a-320mm-vented-brake-rotor.stl");
    assert_eq!(downloads[0].content_type, "application/sla");
    assert_eq!(&downloads[0].bytes[..], converted);
}

#[tokio::test]
async fn test_reselecting_cached_format_is_idempotent() {
    let converter = Arc::new(ScriptedConverter::succeeding(b"obj data"));
    let sink = Arc::new(RecordingSink::default());
    let session = ExportSession::new(result_with_source(), converter.clone(), sink.clone());

    session.select_format(ExportFormat::Obj).await;
    session.select_format(ExportFormat::Obj).await;
    session.select_format(ExportFormat::Obj).await;

    // Only the original request; later selections are cache hits.
    assert_eq!(converter.call_count(), 1);
    assert_eq!(session.state().status, ExportStatus::Ready);
    assert_eq!(sink.downloads.lock().len(), 3);
}

#[tokio::test]
async fn test_failed_conversion_leaves_slot_unset() {
    let converter = Arc::new(ScriptedConverter::failing("upstream exploded"));
    let sink = Arc::new(RecordingSink::default());
    let session = ExportSession::new(result_with_source(), converter.clone(), sink.clone());

    session.select_format(ExportFormat::Step).await;

    let state = session.state();
    assert_eq!(state.selected, ExportFormat::Step);
    assert_eq!(state.status, ExportStatus::Failed);
    assert!(!session.cache().contains(ExportFormat::Step));
    assert_eq!(sink.downloads.lock().len(), 0);

    // Re-selecting retries the full flow from scratch.
    session.select_format(ExportFormat::Step).await;
    assert_eq!(converter.call_count(), 2);
    assert_eq!(session.state().status, ExportStatus::Failed);
}

#[tokio::test]
async fn test_empty_payload_treated_as_failure() {
    let converter = Arc::new(ScriptedConverter::raw(Ok(String::new())));
    let sink = Arc::new(RecordingSink::default());
    let session = ExportSession::new(result_with_source(), converter.clone(), sink.clone());

    session.select_format(ExportFormat::Ply).await;

    assert_eq!(session.state().status, ExportStatus::Failed);
    assert!(!session.cache().contains(ExportFormat::Ply));
    assert_eq!(sink.downloads.lock().len(), 0);
}

#[tokio::test]
async fn test_kcl_without_code_fails_without_network() {
    let converter = Arc::new(ScriptedConverter::failing("must not be called"));
    let sink = Arc::new(RecordingSink::default());
    let session = ExportSession::new(result_with_source(), converter.clone(), sink.clone());

    session.select_format(ExportFormat::Kcl).await;

    let state = session.state();
    assert_eq!(state.selected, ExportFormat::Kcl);
    assert_eq!(state.status, ExportStatus::Failed);
    assert_eq!(converter.call_count(), 0);
    assert_eq!(sink.downloads.lock().len(), 0);
}

#[tokio::test]
async fn test_kcl_with_code_downloads_plain_text() {
    let converter = Arc::new(ScriptedConverter::failing("must not be called"));
    let sink = Arc::new(RecordingSink::default());
    let mut result = result_with_source();
    result.code = Some("startSketchOn('XY')".to_string());
    let session = ExportSession::new(result, converter.clone(), sink.clone());

    session.select_format(ExportFormat::Kcl).await;

    assert_eq!(session.state().status, ExportStatus::Ready);
    assert_eq!(converter.call_count(), 0);

    let downloads = sink.downloads.lock();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].file_name, "a-320mm-vented-brake-rotor.kcl");
    assert_eq!(downloads[0].content_type, "text/plain");
    assert_eq!(&downloads[0].bytes[..], b"startSketchOn('XY')");
}

#[tokio::test]
async fn test_stale_response_does_not_override_new_selection() {
    let (converter, release) = GatedConverter::new(b"step data");
    let sink = Arc::new(RecordingSink::default());

    let mut result = result_with_source();
    result
        .outputs
        .insert("source.glb".to_string(), BASE64.encode(b"glb data"));
    let session = Arc::new(ExportSession::new(result, converter.clone(), sink.clone()));

    // Request A: step, blocks inside the converter.
    let task = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.select_format(ExportFormat::Step).await })
    };
    wait_for_call(&converter).await;
    assert_eq!(session.state().status, ExportStatus::Loading);

    // Request B: glb is cached, so the selection moves on immediately.
    session.select_format(ExportFormat::Glb).await;
    let state = session.state();
    assert_eq!(state.selected, ExportFormat::Glb);
    assert_eq!(state.status, ExportStatus::Ready);
    assert_eq!(sink.downloads.lock().len(), 1);

    // A's response arrives late: it must not flip status or download.
    release.send(()).unwrap();
    task.await.unwrap();

    let state = session.state();
    assert_eq!(state.selected, ExportFormat::Glb);
    assert_eq!(state.status, ExportStatus::Ready);
    assert_eq!(sink.downloads.lock().len(), 1);

    // The slot was still written by its own response: re-select is a hit.
    assert!(session.cache().contains(ExportFormat::Step));
    session.select_format(ExportFormat::Step).await;
    assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.state().status, ExportStatus::Ready);
    assert_eq!(sink.downloads.lock().len(), 2);
}

#[tokio::test]
async fn test_same_format_is_not_double_fetched_while_in_flight() {
    let (converter, release) = GatedConverter::new(b"fbx data");
    let sink = Arc::new(RecordingSink::default());
    let session = Arc::new(ExportSession::new(
        result_with_source(),
        converter.clone(),
        sink.clone(),
    ));

    let task = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.select_format(ExportFormat::Fbx).await })
    };
    wait_for_call(&converter).await;

    // Re-selecting the same format while its request is outstanding must
    // not issue a second request.
    session.select_format(ExportFormat::Fbx).await;
    assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.state().status, ExportStatus::Loading);

    release.send(()).unwrap();
    task.await.unwrap();

    assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.state().status, ExportStatus::Ready);
    assert_eq!(sink.downloads.lock().len(), 1);
}
