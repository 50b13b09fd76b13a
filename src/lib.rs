// CAD export engine — per-result format cache, the conversion orchestrator
// state machine, and the server-side conversion proxy it talks to.

pub mod config;
pub mod convert;
pub mod export;
pub mod formats;
pub mod generation;
pub mod server;

use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

static INIT_TRACING: Once = Once::new();

/// Initialize process-wide tracing. Safe to call more than once.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("cad export engine tracing initialized");
    });
}
