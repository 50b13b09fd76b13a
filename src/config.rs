use serde::Deserialize;

/// Name of the cookie carrying the session bearer token.
pub const SESSION_COOKIE_NAME: &str = "session_token";

/// Maximum accepted conversion request body (32 MB).
pub const MAX_CONVERT_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Default timeout for a single conversion round trip, in seconds.
pub const DEFAULT_CONVERT_TIMEOUT_SECS: u64 = 120;

/// Top-level configuration for the export engine.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the conversion service the proxy forwards to.
    pub conversion_base_url: String,
    /// Bearer token used when a request carries no session cookie.
    /// Only set in non-production environments.
    #[serde(default)]
    pub fallback_token: Option<String>,
    /// Timeout for one conversion round trip, in seconds.
    #[serde(default = "default_convert_timeout")]
    pub convert_timeout_secs: u64,
}

fn default_convert_timeout() -> u64 {
    DEFAULT_CONVERT_TIMEOUT_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conversion_base_url: String::new(),
            fallback_token: None,
            convert_timeout_secs: DEFAULT_CONVERT_TIMEOUT_SECS,
        }
    }
}
