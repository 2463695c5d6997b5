//! Readiness Reactor
//!
//! One reactor runs per worker thread. It blocks in `mio::Poll`, accepts new
//! clients from its clone of the listening socket and hands readiness events
//! to a `Driver`, which owns the connections.
//!
//! ## Event Loop
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────┐
//!   │ running?  ── no ──> close connections, drop poll, exit │
//!   │    │ yes                                               │
//!   │    ▼                                                   │
//!   │ poll.poll(events)            (EINTR is retried)        │
//!   │    │                                                   │
//!   │    ├─ LISTENER ─> accept until WouldBlock ─> open      │
//!   │    ├─ WAKER ────> (loop re-checks running)             │
//!   │    └─ conn ─────> driver.ready(token, hangup)          │
//!   │    ▼                                                   │
//!   │ driver.after_events()                                  │
//!   └────────────────────────────────────────────────────────┘
//! ```
//!
//! Stopping clears the running flag and wakes the poll through a
//! `mio::Waker`, so a reactor parked in `poll` exits promptly.

use super::driver::{CoroutineDriver, DirectDriver, Driver};
use super::fifo::Fifo;
use super::DriveMode;
use crate::commands::CommandHandler;
use crate::connection::{Connection, ConnectionStats, Transport};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

/// Readiness events fetched per poll
const EVENTS_CAPACITY: usize = 1024;

/// Errors that stop a reactor.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("failed to create poll: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to create waker: {0}")]
    Waker(#[source] io::Error),

    #[error("poll wait failed: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to register: {0}")]
    Register(#[source] io::Error),
}

/// Stops a reactor from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake reactor");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A single-threaded event loop serving one share of the clients.
#[derive(Debug)]
pub struct Reactor {
    id: usize,
    poll: Poll,
    listener: TcpListener,
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    mode: DriveMode,
    /// Pipe transport waiting to be opened as a connection
    pipe: Option<Transport>,
    /// Unlinks the pipe paths when the reactor is dropped
    fifo: Option<Fifo>,
}

impl Reactor {
    /// Creates a reactor and registers the listener with its poll.
    ///
    /// # Arguments
    ///
    /// * `id` - Worker number, used in logs
    /// * `listener` - Non-blocking listening socket (may be shared with other reactors)
    /// * `handler` - Command handler shared by this reactor's connections
    /// * `stats` - Shared connection statistics
    /// * `mode` - How connections are stepped
    pub fn new(
        id: usize,
        mut listener: TcpListener,
        handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        mode: DriveMode,
    ) -> Result<Self, ReactorError> {
        let poll = Poll::new().map_err(ReactorError::Poll)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ReactorError::Waker)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ReactorError::Register)?;

        Ok(Self {
            id,
            poll,
            listener,
            running: Arc::new(AtomicBool::new(true)),
            waker: Arc::new(waker),
            handler,
            stats,
            mode,
            pipe: None,
            fifo: None,
        })
    }

    /// Serves a FIFO pair as one more connection on this reactor.
    pub fn attach_fifo(&mut self, fifo: Fifo, transport: Transport) {
        self.fifo = Some(fifo);
        self.pipe = Some(transport);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: Arc::clone(&self.running),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Runs the event loop until stopped.
    ///
    /// Every connection is closed before this returns.
    pub fn run(mut self) -> Result<(), ReactorError> {
        info!(worker = self.id, mode = ?self.mode, "Reactor started");

        let result = match self.mode {
            DriveMode::Direct => {
                let mut driver = DirectDriver::new(self.handler.clone());
                self.event_loop(&mut driver)
            }
            DriveMode::Coroutine => {
                let registry = self
                    .poll
                    .registry()
                    .try_clone()
                    .map_err(ReactorError::Register)?;
                let mut driver = CoroutineDriver::new(self.handler.clone(), registry);
                self.event_loop(&mut driver)
            }
        };

        match &result {
            Ok(()) => info!(worker = self.id, "Reactor stopped"),
            Err(e) => warn!(worker = self.id, error = %e, "Reactor failed"),
        }
        result
    }

    fn event_loop<D: Driver>(&mut self, driver: &mut D) -> Result<(), ReactorError> {
        if let Some(pipe) = self.pipe.take() {
            let conn = Connection::new(pipe, "fifo", Arc::clone(&self.stats));
            driver
                .open(conn, self.poll.registry())
                .map_err(ReactorError::Register)?;
            driver.after_events(self.poll.registry());
        }

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let result = loop {
            if !self.running.load(Ordering::Acquire) {
                break Ok(());
            }

            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                break Err(ReactorError::Wait(e));
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(driver),
                    WAKER => trace!(worker = self.id, "Reactor woken"),
                    token => {
                        let hangup =
                            event.is_error() || (event.is_read_closed() && event.is_write_closed());
                        driver.ready(token, hangup, self.poll.registry());
                    }
                }
            }

            driver.after_events(self.poll.registry());
        };

        debug!(
            worker = self.id,
            connections = driver.connection_count(),
            "Closing connections"
        );
        driver.shutdown(self.poll.registry());
        result
    }

    /// Accepts until the listener would block.
    fn accept<D: Driver>(&self, driver: &mut D) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let conn = Connection::new(
                        Transport::Tcp(stream),
                        addr.to_string(),
                        Arc::clone(&self.stats),
                    );
                    if let Err(e) = driver.open(conn, self.poll.registry()) {
                        warn!(client = %addr, error = %e, "Failed to register connection");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Accept failed");
                    break;
                }
            }
        }
    }
}
