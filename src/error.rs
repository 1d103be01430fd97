//! Error types for the dispatch core.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the port registry and the transport backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("MIDI output port '{0}' not found")]
    PortNotFound(String),

    #[error("no hardware MIDI output port found (only virtual or loopback ports available)")]
    NoHardwarePort,

    #[error("MIDI output port '{0}' is closed")]
    PortClosed(String),

    #[error("failed to write to MIDI port '{port}': {reason}")]
    SendError { port: String, reason: String },

    #[error("MIDI backend error: {0}")]
    Backend(String),
}

impl From<midir::InitError> for PortError {
    fn from(e: midir::InitError) -> Self {
        PortError::Backend(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiOutput>> for PortError {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        PortError::Backend(e.to_string())
    }
}

/// Failures raised by the volume model
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeError {
    #[error("no volume source has been selected")]
    NoSelection,
}

/// Failures loading a key mapping file
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("failed to read key mappings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid key mappings in {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },
}

/// Failures validating the application configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{field} = {value} is out of range ({min}-{max})")]
    InvalidRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}

/// Error taxonomy carried by a failed dispatch
///
/// Flat and `Copy` so a result can be handed to the feedback controller
/// and logged without holding on to transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PortNotFound,
    NoHardwarePort,
    PortClosed,
    SendError,
    InvalidRange,
    UnknownCommand,
    ConfigInvalid,
    NoSelection,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::PortNotFound => "port not found",
            ErrorKind::NoHardwarePort => "no hardware port",
            ErrorKind::PortClosed => "port closed",
            ErrorKind::SendError => "send failed",
            ErrorKind::InvalidRange => "value out of range",
            ErrorKind::UnknownCommand => "unknown command",
            ErrorKind::ConfigInvalid => "invalid mapping",
            ErrorKind::NoSelection => "no volume selected",
        };
        f.write_str(s)
    }
}

impl From<&PortError> for ErrorKind {
    fn from(e: &PortError) -> Self {
        match e {
            PortError::PortNotFound(_) => ErrorKind::PortNotFound,
            PortError::NoHardwarePort => ErrorKind::NoHardwarePort,
            PortError::PortClosed(_) => ErrorKind::PortClosed,
            PortError::SendError { .. } | PortError::Backend(_) => ErrorKind::SendError,
        }
    }
}

impl From<VolumeError> for ErrorKind {
    fn from(e: VolumeError) -> Self {
        match e {
            VolumeError::NoSelection => ErrorKind::NoSelection,
        }
    }
}
