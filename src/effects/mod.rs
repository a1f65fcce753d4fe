//! Effects-as-data for the protocol and the external services.
//!
//! This module defines effect types that describe outbound calls without
//! executing them. This enables:
//! - An engine that only decides, and hands the doing to an interpreter
//! - Testability via mock interpreters
//! - Logging of every intended call by name and job

pub mod interpreter;
pub mod protocol;
pub mod services;

pub use interpreter::{ProtocolInterpreter, ServiceInterpreter};
pub use protocol::{PaymentTerms, ProtocolEffect, ProtocolResponse};
pub use services::{CatalogEntry, ServiceEffect, ServiceResponse};
