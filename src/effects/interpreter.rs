//! Effect interpreter traits.
//!
//! The engine never talks to the network directly. It builds effects and
//! hands them to an interpreter:
//! - [`HttpGateway`](crate::gateway::HttpGateway) executes them against the
//!   protocol and services sidecars
//! - test interpreters record them and return scripted responses
//!
//! Retry policy belongs to the interpreter. The engine sees at most one
//! result per effect and treats any error as final for the current run.

use std::future::Future;

use super::protocol::{ProtocolEffect, ProtocolResponse};
use super::services::{ServiceEffect, ServiceResponse};

/// Interprets protocol effects.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct AcceptEverything;
///
/// impl ProtocolInterpreter for AcceptEverything {
///     type Error = ServiceError;
///
///     async fn interpret(&self, effect: ProtocolEffect) -> Result<ProtocolResponse, Self::Error> {
///         match effect {
///             ProtocolEffect::LookupJob { .. } => Ok(ProtocolResponse::Job(Some(JobPhase::Paid))),
///             _ => Ok(ProtocolResponse::Ok),
///         }
///     }
/// }
/// ```
pub trait ProtocolInterpreter {
    /// The error type returned by this interpreter.
    type Error;

    /// Execute a protocol effect and return its response.
    fn interpret(
        &self,
        effect: ProtocolEffect,
    ) -> impl Future<Output = Result<ProtocolResponse, Self::Error>> + Send;
}

/// Interprets service effects.
pub trait ServiceInterpreter {
    /// The error type returned by this interpreter.
    type Error;

    /// Execute a service effect and return its response.
    fn interpret(
        &self,
        effect: ServiceEffect,
    ) -> impl Future<Output = Result<ServiceResponse, Self::Error>> + Send;
}
