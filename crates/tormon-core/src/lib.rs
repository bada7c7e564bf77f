//! tormon-core: Core library for tormon
//!
//! Samples a Tor relay through its control port on fixed schedules and
//! republishes normalized metrics to InfluxDB.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ─┬─ bandwidth (5s) ─┐
//!            ├─ stats (60s)     ├─→ QueryRouter → AuthGate → ControlClient (Tor)
//!            ├─ slowstats (1h)  │        ↓
//!            └─ conf (24h)     ─┘    normalize
//!                    ↓
//!               Publisher → MetricsSink (InfluxDB)
//! ```
//!
//! # Modules
//!
//! - `normalize`: Raw GETINFO text into typed field values
//! - `retry`: Bounded retry with linear backoff
//! - `auth`: AuthGate, authentication before every query
//! - `control`: Tor control-port client
//! - `router`: QueryRouter, authenticate + query + normalize
//! - `event`: Measurement events and line-protocol encoding
//! - `sink`: Metrics sink interface and the InfluxDB implementation
//! - `publish`: Publisher, event construction and delivery
//! - `job`: Job definitions
//! - `scheduler`: One task per job, relative rescheduling
//! - `config`: Daemon configuration
//! - `logging`: Structured logging setup
//! - `error`: Error types and remediation hints
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod job;
pub mod logging;
pub mod normalize;
pub mod publish;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod sink;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
