//! Server configuration and command-line parsing.

use crate::server::DriveMode;
use crate::storage::DEFAULT_CAPACITY;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing the command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),

    #[error("--fifo-read and --fifo-write must be given together")]
    IncompleteFifo,
}

/// Paths of the FIFO pair served next to TCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoPaths {
    /// Pipe the server reads requests from
    pub read: PathBuf,
    /// Pipe the server writes responses to
    pub write: PathBuf,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Number of reactor threads
    pub workers: usize,
    /// Cache capacity in bytes
    pub capacity: usize,
    /// How reactors step their connections
    pub mode: DriveMode,
    pub fifo: Option<FifoPaths>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            workers: 1,
            capacity: DEFAULT_CAPACITY,
            mode: DriveMode::Direct,
            fifo: None,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What the command line asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Invocation {
    Run(ServerConfig),
    Help,
    Version,
}

/// Parses command-line arguments (without the program name).
pub fn parse_args<I>(args: I) -> Result<Invocation, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut config = ServerConfig::default();
    let mut fifo_read = None;
    let mut fifo_write = None;
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or_else(|| ConfigError::MissingValue(flag.clone()));

        match flag.as_str() {
            "--host" | "-h" => config.host = value()?,
            "--port" | "-p" => config.port = parse_value(&flag, &value()?)?,
            "--workers" | "-w" => {
                config.workers = parse_value(&flag, &value()?)?;
                if config.workers == 0 {
                    return Err(invalid(&flag, "0"));
                }
            }
            "--capacity" | "-c" => {
                let raw = value()?;
                config.capacity = parse_size(&raw).ok_or_else(|| invalid(&flag, &raw))?;
            }
            "--mode" | "-m" => {
                let raw = value()?;
                config.mode = raw.parse().map_err(|_| invalid(&flag, &raw))?;
            }
            "--fifo-read" => fifo_read = Some(PathBuf::from(value()?)),
            "--fifo-write" => fifo_write = Some(PathBuf::from(value()?)),
            "--help" => return Ok(Invocation::Help),
            "--version" | "-v" => return Ok(Invocation::Version),
            _ => return Err(ConfigError::UnknownArgument(flag.clone())),
        }
    }

    config.fifo = match (fifo_read, fifo_write) {
        (Some(read), Some(write)) => Some(FifoPaths { read, write }),
        (None, None) => None,
        _ => return Err(ConfigError::IncompleteFifo),
    };

    Ok(Invocation::Run(config))
}

fn parse_value<T: std::str::FromStr>(flag: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| invalid(flag, raw))
}

fn invalid(flag: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
    }
}

/// Parses a byte count with an optional `k`, `m` or `g` suffix (powers of 1024).
pub fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last()?.to_ascii_lowercase() {
        'k' => (&raw[..raw.len() - 1], 1usize << 10),
        'm' => (&raw[..raw.len() - 1], 1 << 20),
        'g' => (&raw[..raw.len() - 1], 1 << 30),
        _ => (raw, 1),
    };
    let size = digits.parse::<usize>().ok()?.checked_mul(multiplier)?;
    (size > 0).then_some(size)
}

pub fn help_text() -> String {
    format!(
        r#"
EmberKV - In-Memory Key-Value Cache Server

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>          Host to bind to (default: {host})
    -p, --port <PORT>          Port to listen on (default: {port})
    -w, --workers <N>          Reactor threads (default: 1)
    -c, --capacity <SIZE>      Cache capacity, k/m/g suffixes allowed (default: 64m)
    -m, --mode <MODE>          direct | coroutine (default: direct)
        --fifo-read <PATH>     Serve requests from this named pipe
        --fifo-write <PATH>    Write responses to this named pipe
    -v, --version              Print version information
        --help                 Print this help message

EXAMPLES:
    emberkv                              # Start on {host}:{port}
    emberkv --workers 4 --capacity 1g    # Four reactors, 1 GiB cache
    emberkv --mode coroutine             # One routine per connection

CONNECTING:
    Any memcached text-protocol client works:
    $ printf 'set name 0 0 4\r\nAriz\r\nget name\r\n' | nc {host} {port}
    STORED
    VALUE name 0 4
    Ariz
    END
"#,
        host = crate::DEFAULT_HOST,
        port = crate::DEFAULT_PORT,
    )
}
