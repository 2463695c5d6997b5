//! Byte transports a connection can run over.
//!
//! A connection is either an accepted TCP stream or a pair of named pipes
//! (one read end, one write end). Both are non-blocking and both register
//! with the reactor's poll under a single token.

use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;

/// A non-blocking byte stream registered with the reactor.
#[derive(Debug)]
pub enum Transport {
    /// An accepted TCP connection
    Tcp(TcpStream),
    /// A FIFO pair: requests arrive on `rx`, responses leave on `tx`
    Pipe { rx: File, tx: File },
}

impl Transport {
    pub fn pipe(rx: File, tx: File) -> Self {
        Transport::Pipe { rx, tx }
    }

    /// Registers for read and write readiness under `token`.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => {
                registry.register(stream, token, Interest::READABLE | Interest::WRITABLE)
            }
            Transport::Pipe { rx, tx } => {
                registry.register(&mut SourceFd(&rx.as_raw_fd()), token, Interest::READABLE)?;
                registry.register(&mut SourceFd(&tx.as_raw_fd()), token, Interest::WRITABLE)
            }
        }
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => registry.deregister(stream),
            Transport::Pipe { rx, tx } => {
                registry.deregister(&mut SourceFd(&rx.as_raw_fd()))?;
                registry.deregister(&mut SourceFd(&tx.as_raw_fd()))
            }
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.read(buf),
            Transport::Pipe { rx, .. } => rx.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.write(buf),
            Transport::Pipe { tx, .. } => tx.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.flush(),
            Transport::Pipe { tx, .. } => tx.flush(),
        }
    }
}
