//! Error types shared by the selector compiler, registry, and engine

use thiserror::Error;

use crate::device::DeviceId;

/// Result alias used across chord-core
pub type Result<T> = std::result::Result<T, ChordError>;

/// Errors raised by the selection core
///
/// None of these abort the host: fluent selection operations report them
/// through the engine diagnostics and keep going.
#[derive(Error, Debug)]
pub enum ChordError {
    #[error("Invalid selector {selector:?} at {position}: {reason}")]
    InvalidSelector {
        selector: String,
        position: usize,
        reason: String,
    },
    #[error("No device available to run \"{action}\"")]
    NoDeviceAvailable { action: String },
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),
    #[error("Redundant device {0}; registration ignored")]
    DuplicateDeviceId(DeviceId),
    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),
    #[error("Failed to read device spec: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse device spec: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse device spec: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Flat classification of [`ChordError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidSelector,
    NoDeviceAvailable,
    UnknownCapability,
    DuplicateDeviceId,
    UnknownDeviceType,
    UnknownDevice,
    Spec,
}

impl ChordError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSelector { .. } => ErrorKind::InvalidSelector,
            Self::NoDeviceAvailable { .. } => ErrorKind::NoDeviceAvailable,
            Self::UnknownCapability(_) => ErrorKind::UnknownCapability,
            Self::DuplicateDeviceId(_) => ErrorKind::DuplicateDeviceId,
            Self::UnknownDeviceType(_) => ErrorKind::UnknownDeviceType,
            Self::UnknownDevice(_) => ErrorKind::UnknownDevice,
            Self::Io(_) | Self::Json(_) | Self::Toml(_) => ErrorKind::Spec,
        }
    }

    pub(crate) fn invalid_selector(
        selector: &str,
        position: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            position,
            reason: reason.into(),
        }
    }

    pub(crate) fn no_device(action: &str) -> Self {
        Self::NoDeviceAvailable {
            action: action.to_string(),
        }
    }
}
