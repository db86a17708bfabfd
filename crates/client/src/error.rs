//! Client error taxonomy
//!
//! Every operation fails with exactly one [`Error`]. All of them are terminal
//! for the operation that raised them; cleanup has already run by the time the
//! caller sees the error.

use protocol::{DeviceSpeed, OpStatus, ProtocolError};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot reach {host}: {source}")]
    NetworkUnreachable {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("Network error: {0}")]
    Network(#[source] io::Error),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Malformed message: expected {expected} bytes, got {actual}")]
    MalformedMessage { expected: usize, actual: usize },

    #[error("Device {0} not found on host")]
    DeviceNotFound(String),

    #[error("Device {0} is busy (already imported)")]
    DeviceBusy(String),

    #[error("Host rejected the request: {0}")]
    RemoteRejected(OpStatus),

    #[error("Descriptor of {size} bytes exceeds the {max} byte limit")]
    DescriptorTooLarge { size: usize, max: usize },

    #[error("Descriptor fetch failed: {0}")]
    DescriptorFetchFailed(String),

    #[error("VHCI driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("No free VHCI port for a {0:?} speed device")]
    NoFreeSlot(DeviceSpeed),

    #[error("VHCI rejected attach on port {port}: {reason}")]
    AttachRejected { port: u16, reason: String },

    #[error("Port {0} is not in use")]
    SlotNotFound(u16),

    #[error("Invalid serial: {0}")]
    InvalidSerial(String),

    #[error("Cannot start forwarding: {0}")]
    SpawnFailed(#[from] SpawnFailure),
}

/// Why the forwarding worker could not take over
#[derive(Debug, Error)]
pub enum SpawnFailure {
    #[error("forwarding program is not installed")]
    NotInstalled,

    #[error("{0}")]
    Other(#[source] io::Error),
}

impl Error {
    /// Process exit code for the CLI
    ///
    /// 2: host or driver unreachable, 3: operation failed, 4: forwarding unavailable.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NetworkUnreachable { .. } | Self::DriverUnavailable(_) => 2,
            Self::SpawnFailed(_) => 4,
            _ => 3,
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Malformed { expected, actual } => {
                Self::MalformedMessage { expected, actual }
            }
            ProtocolError::InvalidBusId { busid, reason } => {
                Self::ProtocolViolation(format!("invalid bus id '{}': {}", busid, reason))
            }
            ProtocolError::Io(e) => Self::Network(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
