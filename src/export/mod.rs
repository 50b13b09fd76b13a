// Export orchestration — per-result format cache and the download state machine.

pub mod cache;
pub mod download;
pub mod session;
pub mod stats;
