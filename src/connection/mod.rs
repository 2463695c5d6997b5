//! Connection Module
//!
//! This module manages individual client connections to EmberKV. A
//! connection owns a non-blocking transport and a small state machine that
//! turns incoming bytes into commands and queued responses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Reactor                              │
//! │                  (server/reactor.rs)                        │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ readiness event
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Connection                              │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  Reading    │───>│  Building   │───>│  Writing    │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │         ▲                                     │             │
//! │         └─────────────────────────────────────┘             │
//! │                                                             │
//! │  Transport: TCP stream or FIFO pair                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Non-blocking**: every step stops at `WouldBlock`
//! - **Buffer Management**: `BytesMut` inbound buffer, queue of `Bytes` frames outbound
//! - **Pipelining**: Supports multiple commands in a single read
//! - **Statistics**: Tracks connection and command metrics

pub mod handler;
pub mod transport;

// Re-export commonly used types
pub use handler::{Connection, ConnectionError, ConnectionStats, Progress, State};
pub use transport::Transport;
