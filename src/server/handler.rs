// Axum conversion proxy — validates export requests, attaches the session
// credential server-side, and forwards to the conversion service.

use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, error, warn};

use crate::config::{EngineConfig, MAX_CONVERT_BODY_BYTES, SESSION_COOKIE_NAME};
use crate::formats::ExportFormat;

#[derive(Clone)]
struct ProxyState {
    client: Client,
    upstream_url: String,
    fallback_token: Option<String>,
}

pub struct ConvertProxy {
    port: u16,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ConvertProxy {
    /// Start the proxy on a random local port, returning a handle.
    pub async fn start(config: &EngineConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let state = ProxyState {
            client: Client::builder()
                .timeout(Duration::from_secs(config.convert_timeout_secs))
                .build()?,
            upstream_url: config.conversion_base_url.trim_end_matches('/').to_string(),
            fallback_token: config.fallback_token.clone(),
        };

        let app = Router::new()
            .route("/convert/{format}", post(convert_handler))
            .layer(DefaultBodyLimit::max(MAX_CONVERT_BODY_BYTES))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL of the running proxy.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Shutdown the proxy gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Extract the bearer token from the session cookie, if present.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
            if name == SESSION_COOKIE_NAME && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// POST /convert/{format} — forward the raw canonical source payload to the
/// conversion service and wrap its JSON reply.
async fn convert_handler(
    State(state): State<ProxyState>,
    Path(format): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let format = match ExportFormat::parse(&format) {
        Some(f) if !f.is_pseudo() => f,
        _ => {
            warn!("convert request rejected: unsupported format {:?}", format);
            return (
                StatusCode::BAD_REQUEST,
                format!("unsupported output format: {}", format),
            )
                .into_response();
        }
    };

    if body.is_empty() {
        warn!("convert request rejected: empty body");
        return (StatusCode::BAD_REQUEST, "request body is empty").into_response();
    }

    let token = match session_token(&headers).or_else(|| state.fallback_token.clone()) {
        Some(t) => t,
        None => {
            warn!("convert request rejected: no session credential");
            return (StatusCode::UNAUTHORIZED, "no session credential available").into_response();
        }
    };

    debug!("forwarding conversion: format={} body={} bytes", format, body.len());

    let url = format!("{}/convert/{}", state.upstream_url, format);
    let upstream = match state
        .client
        .post(&url)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            error!("conversion service unreachable: {}", e);
            return (StatusCode::BAD_GATEWAY, "conversion service unreachable").into_response();
        }
    };

    let upstream_status = upstream.status().as_u16();

    // Mirror the upstream HTTP status inside the JSON envelope so the client
    // can detect logical failure even when this hop returns 200. Both layers
    // are part of the contract.
    let mut envelope = match upstream.json::<Value>().await {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => {
            debug!("upstream returned non-object JSON: {}", other);
            json!({})
        }
        Err(e) => {
            debug!("upstream body is not JSON: {}", e);
            json!({})
        }
    };
    if let Value::Object(map) = &mut envelope {
        map.insert("status_code".to_string(), json!(upstream_status));
    }

    (StatusCode::OK, Json(envelope)).into_response()
}
