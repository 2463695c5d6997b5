//! Command Handler Module
//!
//! This module implements the command processing layer for EmberKV.
//! It receives built commands plus their data blocks, executes them against
//! the storage engine, and returns the response to write back.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Parser         │  (protocol module)
//! └────────┬────────┘
//!          │ (Command, payload)
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Command Mapping
//!
//! - `set` → `put`, `add` → `put_if_absent`, `replace` → `set`
//! - `get` → `get` per key, `delete` → `delete`, `flush_all` → `clear`

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandHandler, ExecuteError};
