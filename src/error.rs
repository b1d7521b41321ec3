/// Error taxonomy for configuration, parsing, storage and decoder supervision
use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems, always naming the offending section or option
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot load configuration {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Syntax(#[from] ini::ParseError),

    #[error("missing [{0}] section")]
    MissingStorage(&'static str),

    #[error("[{section}] missing '{field}' option")]
    MissingField { section: String, field: &'static str },

    #[error("[{section}] invalid step value '{value}'")]
    InvalidStep { section: String, value: String },

    #[error("[{section}] invalid protocol value '{value}'")]
    InvalidProtocol { section: String, value: String },

    #[error("{section}:{measurement} invalid offset value")]
    InvalidOffset {
        section: String,
        measurement: &'static str,
    },

    #[error("[{section}] unsupported measurement '{key}'")]
    UnsupportedMeasurement { section: String, key: String },

    #[error("section [{0}] is defined more than once")]
    DuplicateSection(String),

    #[error("device {key} claimed by both [{first}] and [{second}]")]
    DuplicateDevice {
        key: String,
        first: String,
        second: String,
    },

    #[error("column name '{0}' is not a valid data source name (1-19 chars of [A-Za-z0-9_])")]
    InvalidColumn(String),

    #[error("no sensor channels configured")]
    NoChannels,
}

/// A telemetry line that could not be decoded
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed record: {message}")]
    Malformed { raw: String, message: String },
}

impl ParseError {
    /// The offending text as received from the decoder
    pub fn raw(&self) -> &str {
        match self {
            ParseError::Malformed { raw, .. } => raw,
        }
    }
}

/// Failures of the time-series store; never fatal to ingestion
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} {operation} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        operation: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Conditions that stop the decoder supervisor for good
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no SDR device available: {0}")]
    HardwareAbsent(String),

    #[error("cannot start decoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decoder i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error, mapped to the process exit code in `main`
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("cannot initialize logging: {0}")]
    Logging(String),
}

