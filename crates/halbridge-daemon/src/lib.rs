//! halbridge Daemon Library
//!
//! Core functionality for the halbridge daemon:
//! - MegaHAL subprocess supervision
//! - Chat event model and NDJSON adapter
//! - The bridge event loop tying them together
//! - `SQLite` key-value storage for the nickname cache

pub mod bridge;
pub mod chat;
pub mod storage;
pub mod subprocess;
