//! Embedded client SDK for the abx experimentation platform.
//!
//! A host application constructs one [`AbClient`] per process. The client
//! bootstraps its in-memory cache from the newest snapshot (falling back
//! to a local cache file), tails the delta topic in the background to stay
//! current, and answers [`AbClient::decide`] from memory only; no I/O
//! happens on the decision path.
//!
//! # Key Types
//!
//! - [`AbClient`] - The SDK facade
//! - [`SdkConfig`] - Construction-time configuration
//! - [`ExperimentCache`] - Layer-indexed experiment cache
//! - [`SdkMetrics`] - Prometheus metrics the client maintains

pub mod bootstrap;
pub mod cache;
pub mod client;
pub mod config;
pub mod decision;
pub mod error;
pub mod metrics;
pub mod tailer;
pub mod telemetry;

pub use cache::{DeltaOutcome, ExperimentCache};
pub use client::AbClient;
pub use config::SdkConfig;
pub use error::{Error, Result};
pub use metrics::SdkMetrics;
