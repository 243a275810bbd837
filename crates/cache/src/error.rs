//! Error taxonomy shared by every layer of the image controller.

use std::io;

use crate::entry::EntryId;

/// Errors surfaced by the controller, the scheduler and the texture adapter.
///
/// `Decode` and `ResourceExhausted` are transient: they are recorded on the
/// entry and the load is retried on the next tick that finds it visible.
/// `Configuration` and `InvalidHandle` are returned synchronously to the
/// caller that triggered them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("failed to decode {source_desc}: {reason}")]
    Decode { source_desc: String, reason: String },
    #[error("texture registry exhausted: {0}")]
    ResourceExhausted(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("invalid entry handle {0}")]
    InvalidHandle(EntryId),
    #[error("failed to spawn {name} thread: {reason}")]
    Spawn { name: String, reason: String },
}

impl ImageError {
    /// Whether the failure clears up on its own once the entry is retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::ResourceExhausted(_))
    }
}

/// Failure reported by a host texture registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("{0}")]
    Exhausted(String),
    #[error("invalid texture dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Errors that can occur while loading or saving a [`ControllerConfig`].
///
/// [`ControllerConfig`]: crate::ControllerConfig
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
