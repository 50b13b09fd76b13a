use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::formats::ExportFormat;

#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert the raw canonical source payload into `target`, returning
    /// the converted payload as base64. One call per cache miss; no retry.
    async fn convert(&self, source: Bytes, target: ExportFormat) -> Result<String>;
}
