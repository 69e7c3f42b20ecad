use std::path::PathBuf;

use aya::{
    EbpfError,
    maps::MapError,
    pin::PinError,
    programs::{ProgramError, links::LinkError},
};
use thiserror::Error;

pub type Result<T, E = SteerError> = std::result::Result<T, E>;

/// Main error type for loader and control-plane operations
#[derive(Debug, Error)]
pub enum SteerError {
    #[error("failed to load ebpf object: {0}")]
    Load(#[from] EbpfError),

    #[error("ebpf program error: {0}")]
    Program(#[from] ProgramError),

    #[error("ebpf link error: {0}")]
    Link(#[from] LinkError),

    #[error("socket map error: {0}")]
    Map(#[from] MapError),

    #[error("failed to pin {path}: {source}")]
    Pin {
        path: PathBuf,
        #[source]
        source: PinError,
    },

    #[error("queue {queue} is outside the socket map capacity of {capacity}")]
    CapacityExceeded { queue: u32, capacity: u32 },

    #[error("socket map is not pinned at {}", .0.display())]
    MapUnavailable(PathBuf),

    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl SteerError {
    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn pin(path: impl Into<PathBuf>, source: PinError) -> Self {
        Self::Pin {
            path: path.into(),
            source,
        }
    }
}
