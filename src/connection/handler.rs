//! Connection State Machine
//!
//! This module drives a single client connection. A connection never blocks:
//! each call to [`Connection::advance`] makes as much progress as the
//! transport allows and then reports whether it is waiting for readiness or
//! has been closed by the peer.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            │                                              │
//!            ▼                                              │
//!   ┌─────────────────┐  header + payload   ┌────────────┐  │
//!   │     Reading     │────────────────────>│  Building  │  │
//!   │ parse / read    │                     │  execute   │  │
//!   └───────┬─────────┘                     └─────┬──────┘  │
//!           │ parse error                         │         │
//!           │ (CLIENT_ERROR)                      ▼         │
//!           │                             ┌──────────────┐  │
//!           └────────────────────────────>│   Writing    │──┘
//!                                         │ drain queue  │ queue empty
//!                                         └──────────────┘
//! ```
//!
//! `WouldBlock` in Reading or Writing ends the step with [`Progress::Blocked`];
//! the reactor calls `advance` again on the next readiness event.
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut`. Consumed bytes are split off the
//! front, so a header or payload may arrive across any number of reads and
//! several pipelined commands may arrive in one. Responses are queued as
//! frozen `Bytes` frames with a cursor into the frame at the head of the
//! queue.

use super::transport::Transport;
use crate::commands::CommandHandler;
use crate::protocol::{Command, ParseError, ParseResult, Parser, Response, CRLF};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Bytes requested from the transport per read
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Initial inbound buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Where a connection is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for a complete header and payload
    Reading,
    /// A complete command is buffered and ready to execute
    Building,
    /// Responses are queued for the client
    Writing,
}

/// Outcome of one call to [`Connection::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The transport would block; call again on the next readiness event
    Blocked,
    /// The peer closed its side
    Closed,
}

enum Fill {
    Data,
    Blocked,
    Eof,
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The transport accepted zero bytes of a non-empty write
    #[error("transport accepted no bytes")]
    WriteZero,
}

/// A client connection and its protocol state.
///
/// Generic over the stream so the state machine can run over any
/// non-blocking `Read + Write`; the reactor uses [`Transport`].
pub struct Connection<S = Transport> {
    /// The byte stream for this connection
    stream: S,

    /// Peer label (for logging)
    peer: String,

    state: State,

    /// Bytes received but not yet consumed
    inbound: BytesMut,

    /// Header parser; keeps partial header lines between reads
    parser: Parser,

    /// Built command waiting for its payload
    pending: Option<(Command, usize)>,

    /// Bytes of a rejected data block still to be dropped
    discard: usize,

    /// Serialized responses waiting to be written
    outbound: VecDeque<Bytes>,

    /// Bytes of the head frame already written
    written: usize,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S: Read + Write> Connection<S> {
    /// Creates a connection in the Reading state.
    ///
    /// # Arguments
    ///
    /// * `stream` - A non-blocking byte stream
    /// * `peer` - Label for the remote side
    /// * `stats` - Shared connection statistics
    pub fn new(stream: S, peer: impl Into<String>, stats: Arc<ConnectionStats>) -> Self {
        stats.connection_opened();
        let peer = peer.into();
        debug!(client = %peer, "Client connected");

        Self {
            stream,
            peer,
            state: State::Reading,
            inbound: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: Parser::new(),
            pending: None,
            discard: 0,
            outbound: VecDeque::new(),
            written: 0,
            stats,
        }
    }

    /// Runs the state machine until the stream blocks or closes.
    ///
    /// Protocol and execution failures are answered on the connection and
    /// never end it; only transport failures are returned as errors.
    pub fn advance(&mut self, handler: &CommandHandler) -> Result<Progress, ConnectionError> {
        loop {
            match self.state {
                State::Reading => match self.fill_frame()? {
                    Some(progress) => return Ok(progress),
                    None => continue,
                },
                State::Building => self.build(handler),
                State::Writing => {
                    if !self.flush()? {
                        return Ok(Progress::Blocked);
                    }
                    self.state = State::Reading;
                }
            }
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether any response bytes are still queued.
    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Reads until a full command is buffered.
    ///
    /// Returns `None` once the state has moved on, or the progress to report
    /// when the stream blocks or closes first.
    fn fill_frame(&mut self) -> Result<Option<Progress>, ConnectionError> {
        loop {
            match self.try_frame() {
                Ok(true) => {
                    self.state = State::Building;
                    return Ok(None);
                }
                Ok(false) => {}
                Err(e) => {
                    self.protocol_error(e);
                    return Ok(None);
                }
            }

            match self.read_chunk()? {
                Fill::Data => {}
                Fill::Blocked => return Ok(Some(Progress::Blocked)),
                Fill::Eof => {
                    if !self.inbound.is_empty() || self.pending.is_some() || self.discard > 0 {
                        debug!(client = %self.peer, "Client closed mid-command");
                    }
                    return Ok(Some(Progress::Closed));
                }
            }
        }
    }

    /// Parses a header if none is pending and reports whether the pending
    /// command is complete.
    fn try_frame(&mut self) -> ParseResult<bool> {
        if !self.skip_discarded() {
            return Ok(false);
        }

        if self.pending.is_none() {
            if self.inbound.is_empty() {
                return Ok(false);
            }

            let (consumed, ready) = self.parser.parse(&self.inbound)?;
            self.inbound.advance(consumed);
            if !ready {
                trace!(client = %self.peer, "Incomplete header, need more data");
                return Ok(false);
            }

            let built = self.parser.build();
            self.parser.reset();
            let (command, payload_len) = built?;
            trace!(
                client = %self.peer,
                command = command.name(),
                payload = payload_len,
                "Parsed header"
            );
            self.pending = Some((command, payload_len));
        }

        Ok(match &self.pending {
            Some((command, len)) if command.has_payload() => {
                self.inbound.len() >= len + CRLF.len()
            }
            _ => true,
        })
    }

    fn read_chunk(&mut self) -> Result<Fill, ConnectionError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(Fill::Eof),
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    self.stats.bytes_read(n);
                    trace!(client = %self.peer, bytes = n, "Read data");
                    return Ok(Fill::Data);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Fill::Blocked),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn build(&mut self, handler: &CommandHandler) {
        let Some((command, payload_len)) = self.pending.take() else {
            self.state = State::Reading;
            return;
        };

        let payload = if command.has_payload() {
            let payload = self.inbound.split_to(payload_len).freeze();
            if !self.inbound.starts_with(CRLF) {
                self.protocol_error(ParseError::BadDataChunk);
                return;
            }
            self.inbound.advance(CRLF.len());
            payload
        } else {
            Bytes::new()
        };

        let name = command.name();
        match handler.execute(command, payload) {
            Ok(Some(response)) => self.enqueue(&response),
            Ok(None) => {}
            Err(e) => {
                warn!(client = %self.peer, command = name, error = %e, "Command failed");
                self.enqueue(&Response::server_error(e.to_string()));
            }
        }
        self.stats.command_processed();
        trace!(client = %self.peer, command = name, "Executed command");

        self.state = State::Writing;
    }

    /// Answers a protocol error and drops the input that caused it.
    ///
    /// An oversized data block is swallowed byte for byte as it arrives, so
    /// commands pipelined after it survive. Any other error drops everything
    /// buffered so far.
    fn protocol_error(&mut self, error: ParseError) {
        warn!(client = %self.peer, error = %error, "Protocol error");
        self.enqueue(&Response::client_error(error.to_string()));
        match error {
            ParseError::PayloadTooLarge { size, .. } => {
                self.discard = size + CRLF.len();
                self.skip_discarded();
            }
            _ => self.inbound.clear(),
        }
        self.parser.reset();
        self.pending = None;
        self.state = State::Writing;
    }

    /// Drops owed bytes from the buffer. Returns `true` once none are owed.
    fn skip_discarded(&mut self) -> bool {
        if self.discard > 0 {
            let n = self.discard.min(self.inbound.len());
            self.inbound.advance(n);
            self.discard -= n;
            trace!(
                client = %self.peer,
                bytes = n,
                remaining = self.discard,
                "Discarded input"
            );
        }
        self.discard == 0
    }

    fn enqueue(&mut self, response: &Response) {
        self.outbound.push_back(response.serialize());
    }

    /// Writes queued frames. Returns `false` if the stream would block first.
    fn flush(&mut self) -> Result<bool, ConnectionError> {
        while let Some(frame) = self.outbound.front() {
            let frame_len = frame.len();
            match self.stream.write(&frame[self.written..]) {
                Ok(0) => return Err(ConnectionError::WriteZero),
                Ok(n) => {
                    self.written += n;
                    self.stats.bytes_written(n);
                    trace!(client = %self.peer, bytes = n, "Sent response bytes");
                    if self.written == frame_len {
                        self.outbound.pop_front();
                        self.written = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.stats.connection_closed();
        debug!(client = %self.peer, "Client disconnected");
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("buffered", &self.inbound.len())
            .field("queued", &self.outbound.len())
            .finish()
    }
}
