//! # EmberKV - An In-Memory Key-Value Cache Server
//!
//! EmberKV is a single-process key-value cache spoken to over the memcached
//! text protocol. It is built from three pieces: a bounded LRU cache, a
//! cooperative routine scheduler, and a non-blocking readiness reactor that
//! drives a per-connection state machine.
//!
//! ## Features
//!
//! - **Bounded LRU cache**: the total size of keys and values never exceeds
//!   the configured capacity; the least recently used entries are evicted
//! - **Non-blocking I/O**: one `mio` reactor per worker thread, no blocking
//!   call other than the poll itself
//! - **Two drive modes**: connections are stepped inline by the reactor, or
//!   each connection runs as a routine on a cooperative scheduler
//! - **FIFO endpoint**: a pair of named pipes can be served as one more
//!   connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              EmberKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Reactor    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (mio Poll)  │    │ state mach. │    │  Handler    │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │         │                  │                  │                         │
//! │         ▼                  ▼                  ▼                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────────┐ │
//! │  │ Scheduler   │    │   Text      │    │        StorageEngine         │ │
//! │  │ (coroutine  │    │   Parser    │    │  HashMap + recency list      │ │
//! │  │   mode)     │    │             │    │  behind one Mutex            │ │
//! │  └─────────────┘    └─────────────┘    └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use emberkv::config::ServerConfig;
//! use emberkv::server::{DriveMode, Server};
//! use emberkv::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let config = ServerConfig {
//!     workers: 4,
//!     mode: DriveMode::Coroutine,
//!     ..ServerConfig::default()
//! };
//! let storage = Arc::new(StorageEngine::with_capacity(config.capacity));
//!
//! let handle = Server::bind(config, storage).unwrap().start().unwrap();
//! // ... serve until told to stop
//! handle.stop();
//! handle.join().unwrap();
//! ```
//!
//! ## Supported Commands
//!
//! - `set|add|replace <key> <flags> <exptime> <bytes> [noreply]` + data block
//! - `get|gets <key> [<key> ...]`
//! - `delete <key> [noreply]`
//! - `flush_all [noreply]`
//! - `stats`
//! - `version`
//!
//! ## Module Overview
//!
//! - [`arena`]: Generation-checked slab used by every linked structure
//! - [`storage`]: Bounded LRU cache engine
//! - [`protocol`]: Text protocol parser and types
//! - [`commands`]: Executes commands against the cache
//! - [`connection`]: Per-connection state machine and transports
//! - [`coroutine`]: Cooperative routine scheduler
//! - [`server`]: Reactors, drive modes, FIFO endpoint, worker threads
//! - [`config`]: Command-line configuration
//!
//! ## Design Highlights
//!
//! ### One Lock
//!
//! Every cache operation runs under a single mutex, so a reader never sees
//! a half-applied update and eviction always removes the map entry and the
//! recency node together.
//!
//! ### Handles, Not Pointers
//!
//! The recency list, the scheduler ring and the connection tables live in
//! `slab` tables whose entries carry a generation. A stale handle (for
//! example a routine id kept after the routine finished) is detected rather
//! than followed.

pub mod arena;
pub mod commands;
pub mod config;
pub mod connection;
pub mod coroutine;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionStats};
pub use coroutine::Scheduler;
pub use protocol::{Command, ParseError, Parser, Response};
pub use server::{DriveMode, Server, ServerHandle};
pub use storage::StorageEngine;

/// The default port EmberKV listens on (same as memcached)
pub const DEFAULT_PORT: u16 = 11211;

/// The default host EmberKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
