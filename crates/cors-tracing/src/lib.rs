//! Tracing setup for cors-proxy: fmt logging with optional OTLP export,
//! plus span builders for the request pipeline.

pub mod config;
pub mod otlp;
pub mod spans;

pub use config::{OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
