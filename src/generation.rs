// Generation records — the output of a prior text-to-CAD generation request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::formats::ExportFormat;

/// Result of a generation request, as persisted and refetched by callers.
///
/// `outputs` maps format-qualified keys (`"source.gltf"`) to base64 payloads.
/// An empty value means the format has not been computed yet. After a
/// successful generation the canonical source format is always present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Original natural-language prompt. Used only to derive file names.
    pub prompt: String,
    /// Format-qualified key → base64 payload.
    #[serde(default)]
    pub outputs: HashMap<String, String>,
    /// Textual source representation, if the generator supplied one.
    /// Offered as the `kcl` pseudo-format; never converted.
    #[serde(default)]
    pub code: Option<String>,
}

/// The qualified key a format's payload is stored under (`"source.stl"`).
pub fn qualified_output_key(format: ExportFormat) -> String {
    format!("source.{}", format.extension())
}

/// Parse the format out of a qualified output key. Keys with an unknown
/// extension (or no extension) are ignored by callers.
pub fn output_key_format(key: &str) -> Option<ExportFormat> {
    let ext = key.rsplit('.').next()?;
    ExportFormat::parse(ext)
}
