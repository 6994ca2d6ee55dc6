//! Atlas coordination fabric.
//!
//! The cross-service contracts every game-world service shares:
//! - `tenant`: tenant identity and the ambient tenant scope
//! - `envelope`: message envelope, keying, topic names and error codes
//! - `bus`: event bus abstraction with per-key ordered delivery
//! - `registry`: tenant-keyed registries (memory, Redis) with expiry sweeps
//! - `saga`: saga orchestrator with compensation
//! - `transport`: scheduled route and instance transport scheduling
//! - `rates`: per-character rate aggregation

pub mod bus;
pub mod config;
pub mod envelope;
pub mod jsonapi;
pub mod rates;
pub mod registry;
pub mod saga;
pub mod tenant;
pub mod transport;
pub mod utils;
