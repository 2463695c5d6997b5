//! Server Module
//!
//! Binds the listening socket and runs one reactor per worker thread. All
//! reactors share the cache and the connection statistics; nothing else
//! crosses threads.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │  std TcpListener     │
//!                    │  (bound once)        │
//!                    └──────────┬───────────┘
//!                 try_clone()   │   try_clone()
//!          ┌────────────────────┼────────────────────┐
//!          ▼                    ▼                    ▼
//!   ┌─────────────┐      ┌─────────────┐      ┌─────────────┐
//!   │ Reactor 0   │      │ Reactor 1   │      │ Reactor N   │
//!   │ (+ FIFO)    │      │             │      │             │
//!   └──────┬──────┘      └──────┬──────┘      └──────┬──────┘
//!          └────────────────────┼────────────────────┘
//!                               ▼
//!                  Arc<StorageEngine> (one lock)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use emberkv::config::ServerConfig;
//! use emberkv::server::Server;
//! use emberkv::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let config = ServerConfig::default();
//! let storage = Arc::new(StorageEngine::with_capacity(config.capacity));
//! let handle = Server::bind(config, storage).unwrap().start().unwrap();
//!
//! println!("listening on {}", handle.local_addr());
//! handle.stop();
//! handle.join().unwrap();
//! ```

mod driver;
pub mod fifo;
pub mod reactor;

pub use fifo::{Fifo, FifoError};
pub use reactor::{Reactor, ReactorError, ShutdownHandle};

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::ConnectionStats;
use crate::storage::StorageEngine;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{info, warn};

/// How a reactor steps its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMode {
    /// The event loop steps each ready connection itself
    #[default]
    Direct,
    /// Each connection runs as a routine on a cooperative scheduler
    Coroutine,
}

impl FromStr for DriveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(DriveMode::Direct),
            "coroutine" => Ok(DriveMode::Coroutine),
            other => Err(format!("unknown drive mode '{}'", other)),
        }
    }
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveMode::Direct => write!(f, "direct"),
            DriveMode::Coroutine => write!(f, "coroutine"),
        }
    }
}

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("listener setup failed: {0}")]
    Listener(#[source] std::io::Error),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Reactor(#[from] ReactorError),

    #[error(transparent)]
    Fifo(#[from] FifoError),

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

/// A bound but not yet running server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    listener: std::net::TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
}

impl Server {
    /// Binds the listening socket.
    pub fn bind(config: ServerConfig, storage: Arc<StorageEngine>) -> Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = std::net::TcpListener::bind(&addr)
            .map_err(|source| ServerError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(ServerError::Listener)?;

        Ok(Self {
            config,
            listener,
            storage,
            stats: Arc::new(ConnectionStats::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Listener)
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Spawns the reactor threads.
    ///
    /// If any worker fails to start, the ones already running are stopped
    /// before the error is returned.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let local_addr = self.local_addr()?;
        let handler =
            CommandHandler::new(Arc::clone(&self.storage)).with_stats(Arc::clone(&self.stats));

        let mut handle = ServerHandle {
            local_addr,
            stats: Arc::clone(&self.stats),
            shutdowns: Vec::new(),
            workers: Vec::new(),
        };

        for id in 0..self.config.workers.max(1) {
            if let Err(e) = self.spawn_worker(id, &handler, &mut handle) {
                handle.stop();
                if let Err(join_err) = handle.join() {
                    warn!(error = %join_err, "Worker failed during aborted start");
                }
                return Err(e);
            }
        }

        info!(
            addr = %local_addr,
            workers = handle.workers.len(),
            mode = %self.config.mode,
            "Server started"
        );
        Ok(handle)
    }

    fn spawn_worker(
        &self,
        id: usize,
        handler: &CommandHandler,
        handle: &mut ServerHandle,
    ) -> Result<(), ServerError> {
        let std_listener = self.listener.try_clone().map_err(ServerError::Listener)?;
        let listener = mio::net::TcpListener::from_std(std_listener);
        let mut reactor = Reactor::new(
            id,
            listener,
            handler.clone(),
            Arc::clone(&self.stats),
            self.config.mode,
        )?;

        if id == 0 {
            if let Some(paths) = &self.config.fifo {
                let (fifo, transport) = Fifo::create(&paths.read, &paths.write)?;
                reactor.attach_fifo(fifo, transport);
            }
        }

        let shutdown = reactor.shutdown_handle();
        let worker = thread::Builder::new()
            .name(format!("emberkv-reactor-{}", id))
            .spawn(move || reactor.run())
            .map_err(ServerError::Spawn)?;

        handle.shutdowns.push(shutdown);
        handle.workers.push(worker);
        Ok(())
    }
}

/// Controls a running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    stats: Arc<ConnectionStats>,
    shutdowns: Vec<ShutdownHandle>,
    workers: Vec<JoinHandle<Result<(), ReactorError>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Asks every reactor to stop. Returns immediately.
    pub fn stop(&self) {
        for shutdown in &self.shutdowns {
            shutdown.stop();
        }
    }

    /// Waits for every reactor to exit.
    ///
    /// Returns the first reactor error, if any.
    pub fn join(self) -> Result<(), ServerError> {
        let mut first_error = None;

        for (id, worker) in self.workers.into_iter().enumerate() {
            let outcome = match worker.join() {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => ServerError::Reactor(e),
                Err(_) => ServerError::WorkerPanicked(id),
            };
            warn!(worker = id, error = %outcome, "Worker exited with error");
            first_error.get_or_insert(outcome);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FifoPaths;
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::{timeout, Duration};

    fn create_test_server(mode: DriveMode, workers: usize) -> (SocketAddr, ServerHandle) {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers,
            mode,
            ..ServerConfig::default()
        };
        let storage = Arc::new(StorageEngine::with_capacity(config.capacity));
        let handle = Server::bind(config, storage).unwrap().start().unwrap();
        (handle.local_addr(), handle)
    }

    async fn shutdown(handle: ServerHandle) {
        handle.stop();
        tokio::task::spawn_blocking(move || handle.join())
            .await
            .unwrap()
            .unwrap();
    }

    /// Reads until `expected_len` bytes arrived or two seconds pass.
    async fn read_response(client: &mut TcpStream, expected_len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; expected_len.max(64)];
        let mut total = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);

        while total < expected_len && tokio::time::Instant::now() < deadline {
            if total == buf.len() {
                buf.resize(buf.len() * 2, 0);
            }
            match timeout(Duration::from_millis(200), client.read(&mut buf[total..])).await {
                Ok(Ok(n)) if n > 0 => total += n,
                Ok(_) => break,
                Err(_) => continue,
            }
        }

        buf.truncate(total);
        buf
    }

    async fn request(client: &mut TcpStream, input: &[u8], expected: &[u8]) {
        client.write_all(input).await.unwrap();
        let response = read_response(client, expected.len()).await;
        assert_eq!(
            String::from_utf8_lossy(&response),
            String::from_utf8_lossy(expected)
        );
    }

    async fn exercise(addr: SocketAddr) {
        let mut client = TcpStream::connect(addr).await.unwrap();

        request(&mut client, b"set name 0 0 4\r\nAriz\r\n", b"STORED\r\n").await;
        request(&mut client, b"get name\r\n", b"VALUE name 0 4\r\nAriz\r\nEND\r\n").await;
        request(&mut client, b"add name 0 0 1\r\nx\r\n", b"NOT_STORED\r\n").await;
        request(&mut client, b"delete name\r\n", b"DELETED\r\n").await;
        request(&mut client, b"get name\r\n", b"END\r\n").await;
        request(
            &mut client,
            b"nonsense\r\n",
            b"CLIENT_ERROR unknown command: nonsense\r\n",
        )
        .await;

        // Pipelined, with the payload split across writes
        client.write_all(b"set a 0 0 5\r\nhel").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"lo\r\nget a\r\nversion\r\n").await.unwrap();
        let expected = format!(
            "STORED\r\nVALUE a 0 5\r\nhello\r\nEND\r\nVERSION {}\r\n",
            crate::VERSION
        );
        let response = read_response(&mut client, expected.len()).await;
        assert_eq!(String::from_utf8_lossy(&response), expected);
    }

    #[tokio::test]
    async fn test_direct_mode() {
        let (addr, handle) = create_test_server(DriveMode::Direct, 1);
        exercise(addr).await;
        shutdown(handle).await;
    }

    #[tokio::test]
    async fn test_coroutine_mode() {
        let (addr, handle) = create_test_server(DriveMode::Coroutine, 1);
        exercise(addr).await;
        shutdown(handle).await;
    }

    #[tokio::test]
    async fn test_many_clients_across_workers() {
        let (addr, handle) = create_test_server(DriveMode::Coroutine, 3);

        let mut tasks = Vec::new();
        for i in 0..16 {
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                let key = format!("key{}", i);
                let set = format!("set {} 0 0 1\r\n{}\r\n", key, i % 10);
                request(&mut client, set.as_bytes(), b"STORED\r\n").await;
                let get = format!("get {}\r\n", key);
                let expected = format!("VALUE {} 0 1\r\n{}\r\nEND\r\n", key, i % 10);
                request(&mut client, get.as_bytes(), expected.as_bytes()).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        shutdown(handle).await;
    }

    #[tokio::test]
    async fn test_large_value_roundtrip() {
        for mode in [DriveMode::Direct, DriveMode::Coroutine] {
            let (addr, handle) = create_test_server(mode, 1);
            let mut client = TcpStream::connect(addr).await.unwrap();

            let value = vec![b'z'; 2 * 1024 * 1024];
            let mut set = format!("set big 0 0 {}\r\n", value.len()).into_bytes();
            set.extend_from_slice(&value);
            set.extend_from_slice(b"\r\n");
            request(&mut client, &set, b"STORED\r\n").await;

            client.write_all(b"get big\r\n").await.unwrap();
            let header = format!("VALUE big 0 {}\r\n", value.len());
            let expected_len = header.len() + value.len() + b"\r\nEND\r\n".len();
            let response = read_response(&mut client, expected_len).await;
            assert_eq!(response.len(), expected_len);
            assert!(response.starts_with(header.as_bytes()));
            assert!(response.ends_with(b"\r\nEND\r\n"));

            shutdown(handle).await;
        }
    }

    #[tokio::test]
    async fn test_stats_command_reports_connections() {
        let (addr, handle) = create_test_server(DriveMode::Direct, 1);
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"stats\r\n").await.unwrap();
        let mut response = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !response.ends_with(b"END\r\n") && tokio::time::Instant::now() < deadline {
            let mut chunk = [0u8; 1024];
            match timeout(Duration::from_millis(200), client.read(&mut chunk)).await {
                Ok(Ok(n)) if n > 0 => response.extend_from_slice(&chunk[..n]),
                Ok(_) => break,
                Err(_) => continue,
            }
        }

        let text = String::from_utf8_lossy(&response);
        assert!(text.contains("STAT curr_connections 1\r\n"));
        assert!(text.contains("STAT curr_items 0\r\n"));

        shutdown(handle).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        for mode in [DriveMode::Direct, DriveMode::Coroutine] {
            let (addr, handle) = create_test_server(mode, 2);
            let stats = Arc::clone(handle.stats());

            let mut client = TcpStream::connect(addr).await.unwrap();
            request(&mut client, b"version\r\n", format!("VERSION {}\r\n", crate::VERSION).as_bytes())
                .await;
            assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

            shutdown(handle).await;
            assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

            // The server side is gone: reads see EOF or a reset
            let mut buf = [0u8; 16];
            let read = timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .unwrap();
            assert!(matches!(read, Ok(0) | Err(_)));
        }
    }

    #[tokio::test]
    async fn test_fifo_requires_valid_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            fifo: Some(FifoPaths {
                read: file,
                write: dir.path().join("out"),
            }),
            ..ServerConfig::default()
        };
        let storage = Arc::new(StorageEngine::with_capacity(1024));
        let result = Server::bind(config, storage).unwrap().start();

        assert!(matches!(result, Err(ServerError::Fifo(FifoError::NotAFifo(_)))));
    }

    #[test]
    fn test_drive_mode_from_str() {
        assert_eq!("direct".parse::<DriveMode>(), Ok(DriveMode::Direct));
        assert_eq!("Coroutine".parse::<DriveMode>(), Ok(DriveMode::Coroutine));
        assert!("threads".parse::<DriveMode>().is_err());
        assert_eq!(DriveMode::Coroutine.to_string(), "coroutine");
    }
}
