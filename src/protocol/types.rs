//! Protocol Data Types
//!
//! This module defines the commands a client can send and the responses the
//! server sends back. The wire format is the memcached text protocol.
//!
//! ## Protocol Format
//!
//! Every command is one header line. Storage commands are followed by a data
//! block of exactly `<bytes>` bytes and a CRLF:
//!
//! ```text
//! set <key> <flags> <exptime> <bytes> [noreply]\r\n
//! <data block>\r\n
//! ```
//!
//! ## Examples
//!
//! Store: `set name 0 0 4\r\nAriz\r\n` → `STORED\r\n`
//! Fetch: `get name\r\n` → `VALUE name 0 4\r\nAriz\r\nEND\r\n`
//! Remove: `delete name\r\n` → `DELETED\r\n`
//! Failure: `bogus\r\n` → `CLIENT_ERROR unknown command: bogus\r\n`

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used by the protocol
pub const CRLF: &[u8] = b"\r\n";

/// How a storage command treats an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// `set`: insert or overwrite
    Set,
    /// `add`: only if the key is absent
    Add,
    /// `replace`: only if the key is present
    Replace,
}

impl StoreMode {
    pub fn name(self) -> &'static str {
        match self {
            StoreMode::Set => "set",
            StoreMode::Add => "add",
            StoreMode::Replace => "replace",
        }
    }
}

/// A fully parsed command header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `set|add|replace <key> <flags> <exptime> <bytes> [noreply]`
    Store {
        mode: StoreMode,
        key: Bytes,
        flags: u32,
        exptime: i64,
        noreply: bool,
    },
    /// `get|gets <key>+`
    Get { keys: Vec<Bytes> },
    /// `delete <key> [noreply]`
    Delete { key: Bytes, noreply: bool },
    /// `flush_all [noreply]`
    FlushAll { noreply: bool },
    /// `stats`
    Stats,
    /// `version`
    Version,
}

impl Command {
    /// Whether a data block follows the header.
    pub fn has_payload(&self) -> bool {
        matches!(self, Command::Store { .. })
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Store { mode, .. } => mode.name(),
            Command::Get { .. } => "get",
            Command::Delete { .. } => "delete",
            Command::FlushAll { .. } => "flush_all",
            Command::Stats => "stats",
            Command::Version => "version",
        }
    }
}

/// A response to be written back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Stored,
    NotStored,
    Deleted,
    NotFound,
    Ok,
    /// Hits of a `get`, in request order, terminated by `END`
    Values(Vec<(Bytes, Bytes)>),
    /// `STAT <name> <value>` lines terminated by `END`
    Stats(Vec<(&'static str, String)>),
    Version(String),
    /// Malformed input: `CLIENT_ERROR <message>`
    ClientError(String),
    /// The command could not be executed: `SERVER_ERROR <message>`
    ServerError(String),
}

impl Response {
    pub fn client_error(message: impl Into<String>) -> Self {
        Response::ClientError(message.into())
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Response::ServerError(message.into())
    }

    /// Serializes the response to its wire form.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len_hint());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Appends the wire form to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Response::Stored => line(buf, b"STORED"),
            Response::NotStored => line(buf, b"NOT_STORED"),
            Response::Deleted => line(buf, b"DELETED"),
            Response::NotFound => line(buf, b"NOT_FOUND"),
            Response::Ok => line(buf, b"OK"),
            Response::Values(values) => {
                for (key, value) in values {
                    buf.put_slice(b"VALUE ");
                    buf.put_slice(key);
                    buf.put_slice(format!(" 0 {}", value.len()).as_bytes());
                    buf.put_slice(CRLF);
                    buf.put_slice(value);
                    buf.put_slice(CRLF);
                }
                line(buf, b"END");
            }
            Response::Stats(stats) => {
                for (name, value) in stats {
                    line(buf, format!("STAT {} {}", name, value).as_bytes());
                }
                line(buf, b"END");
            }
            Response::Version(version) => line(buf, format!("VERSION {}", version).as_bytes()),
            Response::ClientError(msg) => line(buf, format!("CLIENT_ERROR {}", msg).as_bytes()),
            Response::ServerError(msg) => line(buf, format!("SERVER_ERROR {}", msg).as_bytes()),
        }
    }

    fn serialized_len_hint(&self) -> usize {
        match self {
            Response::Values(values) => values
                .iter()
                .map(|(k, v)| k.len() + v.len() + 32)
                .sum::<usize>()
                + 5,
            _ => 32,
        }
    }
}

#[inline]
fn line(buf: &mut BytesMut, content: &[u8]) {
    buf.put_slice(content);
    buf.put_slice(CRLF);
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.serialize();
        write!(f, "{}", String::from_utf8_lossy(&bytes).trim_end())
    }
}
