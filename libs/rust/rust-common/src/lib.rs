//! Shared library for cross-cutting concerns of the configuration loaders.
//!
//! This crate provides:
//! - Retry policies with fixed delay or exponential backoff
//! - HTTP client configuration and building
//! - Tracing subscriber initialisation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod http;
pub mod retry;
pub mod tracing_config;

pub use http::{HttpConfig, build_http_client};
pub use retry::{RetryConfig, RetryError, RetryPolicy};
pub use tracing_config::{TracingConfig, init_tracing, try_init_tracing};
