//! `halbridge` Core Library
//!
//! Synchronous building blocks shared by the daemon:
//! - MegaHAL control protocol framing and command sanitizing
//! - Line buffering and request/response correlation
//! - Checkpoint scheduling
//! - Text normalization and admission heuristics for overheard chat
//! - Configuration resolution and common error types

pub mod admission;
pub mod checkpoint;
pub mod config;
pub mod correlator;
pub mod db;
pub mod error;
pub mod greeting;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod names;
pub mod protocol;
pub mod text;
pub mod tracing_init;

pub use admission::{Admission, AdmissionHeuristics, SkipReason};
pub use checkpoint::CheckpointScheduler;
pub use config::Config;
pub use correlator::{CorrelationOrder, CorrelatorStats, Dispatch, ResponseCorrelator};
pub use error::{Error, Result};
pub use names::NameCache;
pub use protocol::{ControlCommand, sanitize};
