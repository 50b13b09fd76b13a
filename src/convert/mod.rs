// Conversion backends — pluggable transports for turning the canonical
// source payload into other CAD formats.

pub mod http_converter;
pub mod traits;
