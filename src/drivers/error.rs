use std::path::PathBuf;
use thiserror::Error;

/// Why a device line was dropped. Never surfaced past the decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,
    #[error("line is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("line is not a JSON object")]
    NotAnObject,
    #[error("unrecognized record type {0:?}")]
    UnknownType(String),
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("session log {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session log {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no serial port selected")]
    NoPortSelected,
    #[error("could not open {port}: {reason}")]
    Connection { port: String, reason: String },
    #[error("a session is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Log(#[from] LogError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
