// In-memory per-result cache of converted payloads, keyed by format.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use tracing::debug;

use crate::formats::ExportFormat;
use crate::generation::output_key_format;

/// Outcome of a cache lookup for a requested format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Payload already computed — return it unchanged, no side effects.
    Hit(String),
    /// Not computed yet. Carries the canonical source payload the
    /// orchestrator must feed into a conversion call.
    Miss { source_payload: String },
}

/// Per-generation-result mapping from format to base64 payload.
///
/// Slots are written through [`OutputCache::set_output`] only, and each slot
/// is written at most once, by its own successful conversion response. The
/// cache lives as long as the displayed result and is never persisted.
pub struct OutputCache {
    slots: RwLock<HashMap<ExportFormat, String>>,
}

impl OutputCache {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the cache from a generation result's qualified output map.
    /// Empty values and keys with unknown extensions are skipped.
    pub fn from_outputs(outputs: &HashMap<String, String>) -> Self {
        let mut slots = HashMap::new();
        for (key, payload) in outputs {
            if payload.is_empty() {
                continue;
            }
            if let Some(format) = output_key_format(key) {
                slots.insert(format, payload.clone());
            }
        }
        Self {
            slots: RwLock::new(slots),
        }
    }

    /// Stored payload for `format`, if present and non-empty.
    pub fn get(&self, format: ExportFormat) -> Option<String> {
        let slots = self.slots.read();
        slots.get(&format).filter(|p| !p.is_empty()).cloned()
    }

    pub fn contains(&self, format: ExportFormat) -> bool {
        self.get(format).is_some()
    }

    /// Write a converted payload into its slot. The only mutation path.
    pub fn set_output(&self, format: ExportFormat, payload: String) {
        let mut slots = self.slots.write();
        if slots.insert(format, payload).is_some() {
            debug!("cache slot for {} rewritten", format);
        } else {
            debug!("cache slot for {} filled", format);
        }
    }

    /// Decide whether a conversion round trip is needed for `format`.
    ///
    /// Errors if the canonical source slot is missing on a miss — conversion
    /// has no valid input then, which only happens on a malformed result.
    pub fn resolve(&self, format: ExportFormat, source_format: ExportFormat) -> Result<Resolution> {
        if let Some(payload) = self.get(format) {
            return Ok(Resolution::Hit(payload));
        }
        let source_payload = self.get(source_format).ok_or_else(|| {
            anyhow!(
                "canonical source payload ({}) missing, cannot convert to {}",
                source_format,
                format
            )
        })?;
        Ok(Resolution::Miss { source_payload })
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

impl Default for OutputCache {
    fn default() -> Self {
        Self::new()
    }
}
