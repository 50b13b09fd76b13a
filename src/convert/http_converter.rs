use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::{debug, warn};

use super::traits::Converter;
use crate::config::{EngineConfig, SESSION_COOKIE_NAME};
use crate::formats::ExportFormat;
use crate::generation::qualified_output_key;

/// JSON envelope returned by the conversion endpoint. `status_code` mirrors
/// the upstream HTTP status so logical failure is visible even when this
/// hop's transport succeeded.
#[derive(Debug, Deserialize)]
struct ConvertEnvelope {
    status_code: u16,
    #[serde(default)]
    outputs: HashMap<String, String>,
}

/// Converter backed by the server-side conversion proxy.
pub struct HttpConverter {
    client: Client,
    base_url: String,
    session_token: Option<String>,
}

impl HttpConverter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            session_token: None,
        }
    }

    /// Build from config, applying the configured request timeout.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.convert_timeout_secs))
            .build()?;
        Ok(Self::with_client(client, config.conversion_base_url.clone()))
    }

    /// Attach a session token, sent as the session cookie on every request.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

#[async_trait]
impl Converter for HttpConverter {
    async fn convert(&self, source: Bytes, target: ExportFormat) -> Result<String> {
        if target.is_pseudo() {
            return Err(anyhow!("{} is not a convertible format", target));
        }

        let url = format!("{}/convert/{}", self.base_url, target);
        debug!("conversion request: {} ({} source bytes)", url, source.len());

        let mut req = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(source);
        if let Some(token) = &self.session_token {
            req = req.header(header::COOKIE, format!("{}={}", SESSION_COOKIE_NAME, token));
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            warn!("conversion to {} failed: HTTP {}", target, status.as_u16());
            return Err(anyhow!("conversion request failed: HTTP {}", status.as_u16()));
        }

        let envelope: ConvertEnvelope = resp
            .json()
            .await
            .map_err(|e| anyhow!("conversion response is not valid JSON: {}", e))?;

        // Both layers signal independently: the proxy can return 200 while
        // the embedded upstream status reports a logical failure.
        if !(200..300).contains(&envelope.status_code) {
            warn!(
                "conversion to {} reported upstream status {}",
                target, envelope.status_code
            );
            return Err(anyhow!(
                "conversion service reported status {}",
                envelope.status_code
            ));
        }

        let payload = envelope
            .outputs
            .get(&qualified_output_key(target))
            .or_else(|| envelope.outputs.get(target.extension()))
            .filter(|p| !p.is_empty())
            .cloned()
            .ok_or_else(|| anyhow!("conversion response has no payload for {}", target))?;

        debug!("conversion to {} succeeded ({} base64 chars)", target, payload.len());
        Ok(payload)
    }
}
