//! Mint Relay - a payment-gated job engine that turns protocol work requests
//! into exactly one on-chain mint per item, published to catalog categories.
//!
//! This library provides the job lifecycle engine, its durable state, and the
//! HTTP surface the binary serves.

pub mod config;
pub mod effects;
pub mod engine;
pub mod gate;
pub mod gateway;
pub mod parser;
pub mod persistence;
pub mod server;
pub mod types;

#[cfg(test)]
pub mod test_utils;
