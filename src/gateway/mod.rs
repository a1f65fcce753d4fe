//! HTTP gateway to the protocol and external services, and effect interpreter.
//!
//! This module executes protocol and service effects against two JSON-over-HTTP
//! sidecars. It implements the interpreter traits defined in the effects
//! module.
//!
//! Key features:
//! - Exponential backoff retry for transient failures
//! - Distinguishes transient, permanent and insufficient-funds errors
//! - Optional bearer token on every request

mod client;
mod error;
mod interpreter;
mod retry;

pub use client::{GatewayError, HttpGateway};
pub use error::{ErrorKind, ServiceError};
pub use retry::{RetryConfig, RetryPolicy, RetryResult, retry_with_backoff};
