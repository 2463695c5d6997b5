//! Command Handler Module
//!
//! This module executes built commands against the storage engine and
//! produces the response to send back.
//!
//! ## Supported Commands
//!
//! ### Storage Commands
//! - `set key flags exptime bytes [noreply]` - Insert or overwrite (`put`)
//! - `add key flags exptime bytes [noreply]` - Insert if absent (`put_if_absent`)
//! - `replace key flags exptime bytes [noreply]` - Overwrite if present (`set`)
//!
//! ### Retrieval and Removal
//! - `get key [key ...]` / `gets` - Fetch values
//! - `delete key [noreply]` - Remove a key
//! - `flush_all [noreply]` - Remove every key
//!
//! ### Server Commands
//! - `stats` - Cache and connection counters
//! - `version` - Server version
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  (Command, payload) ───> execute() ───> Option<Response>    │
//! │                              │                              │
//! │                              ▼                              │
//! │                        StorageEngine                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::connection::ConnectionStats;
use crate::protocol::{Command, Response, StoreMode};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors raised while executing an otherwise well-formed command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    /// The item can never fit, even in an empty cache
    #[error("object too large for cache: {size} bytes (capacity: {capacity})")]
    TooLarge { size: usize, capacity: usize },
}

/// Executes commands against the storage engine.
#[derive(Clone)]
pub struct CommandHandler {
    /// The storage engine
    storage: Arc<StorageEngine>,
    /// Connection counters reported by `stats`
    stats: Option<Arc<ConnectionStats>>,
    /// Server start time for the `stats` command
    start_time: Instant,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self {
            storage,
            stats: None,
            start_time: Instant::now(),
        }
    }

    /// Attaches connection statistics so `stats` can report them.
    pub fn with_stats(mut self, stats: Arc<ConnectionStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Executes a command.
    ///
    /// # Arguments
    ///
    /// * `command` - The built command
    /// * `payload` - The data block for storage commands, empty otherwise
    ///
    /// # Returns
    ///
    /// The response to send, or `None` when the client asked for `noreply`.
    pub fn execute(
        &self,
        command: Command,
        payload: Bytes,
    ) -> Result<Option<Response>, ExecuteError> {
        let (response, noreply) = match command {
            Command::Store {
                mode, key, noreply, ..
            } => (self.store(mode, key, payload)?, noreply),
            Command::Get { keys } => (self.get(&keys), false),
            Command::Delete { key, noreply } => {
                let response = if self.storage.delete(&key) {
                    Response::Deleted
                } else {
                    Response::NotFound
                };
                (response, noreply)
            }
            Command::FlushAll { noreply } => {
                self.storage.clear();
                (Response::Ok, noreply)
            }
            Command::Stats => (self.stats(), false),
            Command::Version => (Response::Version(crate::VERSION.to_string()), false),
        };

        Ok((!noreply).then_some(response))
    }

    fn store(&self, mode: StoreMode, key: Bytes, value: Bytes) -> Result<Response, ExecuteError> {
        let size = key.len() + value.len();
        let capacity = self.storage.capacity();
        if size > capacity {
            return Err(ExecuteError::TooLarge { size, capacity });
        }

        let stored = match mode {
            StoreMode::Set => self.storage.put(key, value),
            StoreMode::Add => self.storage.put_if_absent(key, value),
            StoreMode::Replace => self.storage.set(key, value),
        };

        Ok(if stored {
            Response::Stored
        } else {
            Response::NotStored
        })
    }

    fn get(&self, keys: &[Bytes]) -> Response {
        let values = keys
            .iter()
            .filter_map(|key| self.storage.get(key).map(|value| (key.clone(), value)))
            .collect();
        Response::Values(values)
    }

    fn stats(&self) -> Response {
        let cache = self.storage.stats();
        let mut lines = vec![
            ("pid", std::process::id().to_string()),
            ("uptime", self.start_time.elapsed().as_secs().to_string()),
            ("version", crate::VERSION.to_string()),
            ("curr_items", cache.entries.to_string()),
            ("bytes", cache.used_bytes.to_string()),
            ("limit_maxbytes", cache.capacity.to_string()),
            ("get_hits", cache.hits.to_string()),
            ("get_misses", cache.misses.to_string()),
            ("evictions", cache.evictions.to_string()),
        ];

        if let Some(stats) = &self.stats {
            let load = |counter: &std::sync::atomic::AtomicU64| counter.load(Ordering::Relaxed).to_string();
            lines.extend([
                ("curr_connections", load(&stats.active_connections)),
                ("total_connections", load(&stats.connections_accepted)),
                ("cmd_total", load(&stats.commands_processed)),
                ("bytes_read", load(&stats.bytes_read)),
                ("bytes_written", load(&stats.bytes_written)),
            ]);
        }

        Response::Stats(lines)
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}
