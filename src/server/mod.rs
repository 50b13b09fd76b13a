// Server-side proxy — the conversion endpoint consumed by the orchestrator.

pub mod handler;
