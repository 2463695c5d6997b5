//! Text Protocol Implementation
//!
//! This module implements the memcached-style text protocol spoken by EmberKV.
//!
//! ## Overview
//!
//! Each command is a single header line. Storage commands declare the length
//! of a binary data block that follows the header, itself terminated by CRLF.
//! Every response ends with CRLF.
//!
//! ## Modules
//!
//! - `types`: Defines `Command`, `Response` and their serialization
//! - `parser`: Incremental header parser and command builder
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{parse_command, Command, Response};
//!
//! // Parsing incoming data
//! let data = b"delete name\r\n";
//! let (command, payload_len, consumed) = parse_command(data).unwrap().unwrap();
//! assert!(matches!(command, Command::Delete { .. }));
//! assert_eq!((payload_len, consumed), (0, data.len()));
//!
//! // Creating responses
//! let bytes = Response::Deleted.serialize();
//! assert_eq!(&bytes[..], b"DELETED\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_command, ParseError, ParseResult, Parser};
pub use types::{Command, Response, StoreMode, CRLF};
