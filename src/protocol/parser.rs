//! Incremental Command Parser
//!
//! This module implements the header parser and command builder for the
//! memcached text protocol.
//!
//! ## How the Parser Works
//!
//! The parser is fed whatever bytes the connection has buffered and reports
//! how many of them it consumed:
//!
//! - `Ok((consumed, true))` - A complete header line has been seen
//! - `Ok((consumed, false))` - The line is still incomplete; the bytes were
//!   absorbed into the parser and the caller should read more
//! - `Err(ParseError)` - The input can never form a valid header
//!
//! Once a header is ready, [`Parser::build`] turns it into a [`Command`] and
//! reports the length of the data block that follows it. [`Parser::reset`]
//! prepares the parser for the next command.
//!
//! This design allows the caller to:
//! 1. Append incoming network data to a buffer
//! 2. Call `parse()` and advance the buffer by `consumed`
//! 3. When ready, call `build()` and wait for the data block
//! 4. Execute the command, then `reset()`

use crate::protocol::types::{Command, StoreMode};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur while parsing a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The header line had no tokens
    #[error("empty command line")]
    EmptyLine,

    /// The header line grew past the limit without a terminator
    #[error("line too long: more than {max} bytes")]
    LineTooLong { max: usize },

    /// The first token is not a known command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Wrong number of arguments for the command
    #[error("wrong number of arguments for '{0}'")]
    WrongArity(&'static str),

    /// A numeric field did not parse
    #[error("invalid {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },

    /// Key longer than the protocol allows or containing control characters
    #[error("invalid key")]
    InvalidKey,

    /// The declared data block exceeds the per-item limit
    #[error("object too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The data block was not followed by CRLF
    #[error("bad data chunk")]
    BadDataChunk,

    /// `build()` was called before a header was complete
    #[error("no complete command header")]
    NotReady,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size of a header line, terminator excluded
pub const MAX_LINE_SIZE: usize = 2048;

/// Maximum key length (same as memcached)
pub const MAX_KEY_SIZE: usize = 250;

/// Maximum size of a single data block (64 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// An incremental header parser.
///
/// # Example
///
/// ```
/// use emberkv::protocol::{Command, Parser};
///
/// let mut parser = Parser::new();
/// let input = b"get name\r\n";
///
/// let (consumed, ready) = parser.parse(input).unwrap();
/// assert_eq!((consumed, ready), (input.len(), true));
///
/// let (command, payload_len) = parser.build().unwrap();
/// assert!(matches!(command, Command::Get { .. }));
/// assert_eq!(payload_len, 0);
/// ```
#[derive(Debug, Default)]
pub struct Parser {
    /// Header bytes seen so far, terminator excluded
    line: BytesMut,
    /// Whether `line` holds a complete header
    ready: bool,
    /// An oversized line was rejected before its `\n` arrived; drop input
    /// up to and including it
    skip_line: bool,
}

impl Parser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self {
            line: BytesMut::with_capacity(64),
            ready: false,
            skip_line: false,
        }
    }

    /// Absorbs bytes from `buf` until a header line is complete.
    ///
    /// Bytes after the terminating `\n` are left for the caller. A line that
    /// outgrows [`MAX_LINE_SIZE`] is reported once; the rest of it is
    /// consumed silently by later calls.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<(usize, bool)> {
        if self.ready {
            return Ok((0, true));
        }

        let mut skipped = 0;
        if self.skip_line {
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.skip_line = false;
                    skipped = pos + 1;
                }
                None => return Ok((buf.len(), false)),
            }
        }
        let buf = &buf[skipped..];

        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.line.extend_from_slice(&buf[..pos]);
                if self.line.last() == Some(&b'\r') {
                    self.line.truncate(self.line.len() - 1);
                }
                self.check_length()?;
                self.ready = true;
                Ok((skipped + pos + 1, true))
            }
            None => {
                self.line.extend_from_slice(buf);
                // A trailing '\r' may still be the first half of a terminator
                let pending_cr = usize::from(self.line.last() == Some(&b'\r'));
                if self.line.len() - pending_cr > MAX_LINE_SIZE {
                    self.line.clear();
                    self.skip_line = true;
                    return Err(ParseError::LineTooLong {
                        max: MAX_LINE_SIZE,
                    });
                }
                Ok((skipped + buf.len(), false))
            }
        }
    }

    /// Whether the tail of a rejected oversized line is still being dropped.
    pub fn is_skipping_line(&self) -> bool {
        self.skip_line
    }

    /// Whether a complete header is waiting to be built.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Builds the command from the complete header.
    ///
    /// Returns the command and the length of the data block that follows
    /// (zero for commands without one).
    pub fn build(&self) -> ParseResult<(Command, usize)> {
        if !self.ready {
            return Err(ParseError::NotReady);
        }

        let line = Bytes::copy_from_slice(&self.line);
        let mut tokens = line
            .split(|&b| b == b' ' || b == b'\t')
            .filter(|t| !t.is_empty())
            .map(|t| line.slice_ref(t));

        let name = tokens.next().ok_or(ParseError::EmptyLine)?;
        let args: Vec<Bytes> = tokens.collect();

        match name.as_ref() {
            b"set" => build_store(StoreMode::Set, &args),
            b"add" => build_store(StoreMode::Add, &args),
            b"replace" => build_store(StoreMode::Replace, &args),
            b"get" | b"gets" => {
                if args.is_empty() {
                    return Err(ParseError::WrongArity("get"));
                }
                for key in &args {
                    validate_key(key)?;
                }
                Ok((Command::Get { keys: args }, 0))
            }
            b"delete" => {
                let (key, noreply) = match args.as_slice() {
                    [key] => (key, false),
                    [key, flag] if flag.as_ref() == b"noreply" => (key, true),
                    _ => return Err(ParseError::WrongArity("delete")),
                };
                validate_key(key)?;
                Ok((
                    Command::Delete {
                        key: key.clone(),
                        noreply,
                    },
                    0,
                ))
            }
            b"flush_all" => match args.as_slice() {
                [] => Ok((Command::FlushAll { noreply: false }, 0)),
                [flag] if flag.as_ref() == b"noreply" => Ok((Command::FlushAll { noreply: true }, 0)),
                _ => Err(ParseError::WrongArity("flush_all")),
            },
            b"stats" if args.is_empty() => Ok((Command::Stats, 0)),
            b"stats" => Err(ParseError::WrongArity("stats")),
            b"version" if args.is_empty() => Ok((Command::Version, 0)),
            b"version" => Err(ParseError::WrongArity("version")),
            other => Err(ParseError::UnknownCommand(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    /// Forgets the current header so the next one can be parsed.
    ///
    /// The tail of a rejected oversized line is still dropped afterwards.
    pub fn reset(&mut self) {
        self.line.clear();
        self.ready = false;
    }

    fn check_length(&self) -> ParseResult<()> {
        if self.line.len() > MAX_LINE_SIZE {
            return Err(ParseError::LineTooLong {
                max: MAX_LINE_SIZE,
            });
        }
        Ok(())
    }
}

fn build_store(mode: StoreMode, args: &[Bytes]) -> ParseResult<(Command, usize)> {
    let noreply = match args.len() {
        4 => false,
        5 if args[4].as_ref() == b"noreply" => true,
        _ => return Err(ParseError::WrongArity(mode.name())),
    };

    let key = &args[0];
    validate_key(key)?;
    let flags: u32 = parse_number("flags", &args[1])?;
    let exptime: i64 = parse_number("exptime", &args[2])?;
    let size: usize = parse_number("bytes", &args[3])?;

    if size > MAX_PAYLOAD_SIZE {
        return Err(ParseError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    Ok((
        Command::Store {
            mode,
            key: key.clone(),
            flags,
            exptime,
            noreply,
        },
        size,
    ))
}

fn parse_number<T: std::str::FromStr>(field: &'static str, token: &[u8]) -> ParseResult<T> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::InvalidNumber {
            field,
            value: String::from_utf8_lossy(token).into_owned(),
        })
}

fn validate_key(key: &[u8]) -> ParseResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_SIZE || key.iter().any(|b| b.is_ascii_control()) {
        return Err(ParseError::InvalidKey);
    }
    Ok(())
}

/// Helper function to parse and build a single header from bytes.
///
/// Returns `Ok(None)` when the header is incomplete.
pub fn parse_command(buf: &[u8]) -> ParseResult<Option<(Command, usize, usize)>> {
    let mut parser = Parser::new();
    let (consumed, ready) = parser.parse(buf)?;
    if !ready {
        return Ok(None);
    }
    let (command, payload_len) = parser.build()?;
    Ok(Some((command, payload_len, consumed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_single_key() {
        let (command, payload, consumed) = parse_command(b"get name\r\n").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Get {
                keys: vec![Bytes::from("name")]
            }
        );
        assert_eq!(payload, 0);
        assert_eq!(consumed, 10);
    }

    #[test]
    fn test_parse_get_multiple_keys_and_gets_alias() {
        let (command, _, _) = parse_command(b"gets a  b\tc\r\n").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Get {
                keys: vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]
            }
        );
    }

    #[test]
    fn test_parse_set_header() {
        let (command, payload, consumed) = parse_command(b"set user:101 5 0 4\r\nAriz\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            command,
            Command::Store {
                mode: StoreMode::Set,
                key: Bytes::from("user:101"),
                flags: 5,
                exptime: 0,
                noreply: false,
            }
        );
        assert_eq!(payload, 4);
        // The data block is left for the caller
        assert_eq!(consumed, 20);
    }

    #[test]
    fn test_parse_noreply_variants() {
        let (command, _, _) = parse_command(b"add k 0 0 1 noreply\r\n").unwrap().unwrap();
        assert!(matches!(command, Command::Store { mode: StoreMode::Add, noreply: true, .. }));

        let (command, _, _) = parse_command(b"delete k noreply\r\n").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Delete {
                key: Bytes::from("k"),
                noreply: true
            }
        );
    }

    #[test]
    fn test_parse_bare_newline_terminator() {
        let (command, _, consumed) = parse_command(b"version\n").unwrap().unwrap();
        assert_eq!(command, Command::Version);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_incomplete_header_is_absorbed() {
        let mut parser = Parser::new();

        assert_eq!(parser.parse(b"repl").unwrap(), (4, false));
        assert_eq!(parser.parse(b"ace k 0 0 2\r").unwrap(), (12, false));
        assert_eq!(parser.parse(b"\nhi\r\n").unwrap(), (1, true));
        assert!(parser.is_ready());

        let (command, payload) = parser.build().unwrap();
        assert!(matches!(command, Command::Store { mode: StoreMode::Replace, .. }));
        assert_eq!(payload, 2);

        // Ready parsers consume nothing until reset
        assert_eq!(parser.parse(b"get x\r\n").unwrap(), (0, true));
        parser.reset();
        assert_eq!(parser.parse(b"get x\r\n").unwrap(), (7, true));
    }

    #[test]
    fn test_build_before_ready() {
        let parser = Parser::new();
        assert_eq!(parser.build(), Err(ParseError::NotReady));
    }

    #[test]
    fn test_unknown_command() {
        let result = parse_command(b"bogus arg\r\n");
        assert_eq!(result, Err(ParseError::UnknownCommand("bogus".to_string())));
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(parse_command(b"\r\n"), Err(ParseError::EmptyLine));
        assert_eq!(parse_command(b"   \r\n"), Err(ParseError::EmptyLine));
    }

    #[test]
    fn test_wrong_arity() {
        assert_eq!(parse_command(b"set k 0 0\r\n"), Err(ParseError::WrongArity("set")));
        assert_eq!(parse_command(b"get\r\n"), Err(ParseError::WrongArity("get")));
        assert_eq!(parse_command(b"delete a b\r\n"), Err(ParseError::WrongArity("delete")));
        assert_eq!(parse_command(b"set k 0 0 1 later\r\n"), Err(ParseError::WrongArity("set")));
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(matches!(
            parse_command(b"set k x 0 1\r\n"),
            Err(ParseError::InvalidNumber { field: "flags", .. })
        ));
        assert!(matches!(
            parse_command(b"set k 0 0 -1\r\n"),
            Err(ParseError::InvalidNumber { field: "bytes", .. })
        ));
    }

    #[test]
    fn test_key_validation() {
        let long_key = format!("get {}\r\n", "k".repeat(MAX_KEY_SIZE + 1));
        assert_eq!(parse_command(long_key.as_bytes()), Err(ParseError::InvalidKey));

        let max_key = format!("get {}\r\n", "k".repeat(MAX_KEY_SIZE));
        assert!(parse_command(max_key.as_bytes()).unwrap().is_some());

        assert_eq!(parse_command(b"get a\x01b\r\n"), Err(ParseError::InvalidKey));
    }

    #[test]
    fn test_payload_limit() {
        let header = format!("set k 0 0 {}\r\n", MAX_PAYLOAD_SIZE + 1);
        assert!(matches!(
            parse_command(header.as_bytes()),
            Err(ParseError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_line_too_long_without_terminator() {
        let mut parser = Parser::new();
        let chunk = vec![b'a'; MAX_LINE_SIZE];
        assert_eq!(parser.parse(&chunk).unwrap(), (MAX_LINE_SIZE, false));
        assert_eq!(
            parser.parse(b"aa"),
            Err(ParseError::LineTooLong { max: MAX_LINE_SIZE })
        );
    }

    #[test]
    fn test_rest_of_oversized_line_is_skipped() {
        let mut parser = Parser::new();
        let mut head = b"get ".to_vec();
        head.extend(std::iter::repeat(b'a').take(3000));
        assert!(matches!(
            parser.parse(&head),
            Err(ParseError::LineTooLong { .. })
        ));
        assert!(parser.is_skipping_line());

        // Still inside the rejected line
        assert_eq!(parser.parse(b"aaaa").unwrap(), (4, false));

        // The tail is dropped and the next header parses normally
        let input = b"bbbb\r\nversion\r\n";
        assert_eq!(parser.parse(input).unwrap(), (input.len(), true));
        assert!(!parser.is_skipping_line());
        assert_eq!(parser.build().unwrap(), (Command::Version, 0));
    }

    #[test]
    fn test_reset_keeps_skipping_oversized_line() {
        let mut parser = Parser::new();
        let chunk = vec![b'x'; MAX_LINE_SIZE + 1];
        assert!(parser.parse(&chunk).is_err());

        parser.reset();
        assert_eq!(parser.parse(b"yy\n").unwrap(), (3, false));
        assert!(!parser.is_skipping_line());
    }

    #[test]
    fn test_line_at_limit_with_split_terminator() {
        let mut parser = Parser::new();
        let mut chunk = vec![b'a'; MAX_LINE_SIZE];
        chunk.push(b'\r');
        assert_eq!(parser.parse(&chunk).unwrap(), (MAX_LINE_SIZE + 1, false));
        assert_eq!(parser.parse(b"\n").unwrap(), (1, true));
    }
}
