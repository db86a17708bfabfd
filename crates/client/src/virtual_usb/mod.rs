//! Virtual host controller (VHCI)
//!
//! An imported device is plugged into a port of the virtual host controller.
//! The controller is reached through a handle obtained from a [`VhciOpener`];
//! dropping the handle closes it. Ports are reserved with
//! [`Vhci::acquire_port`] before any descriptor traffic and the reservation is
//! committed only by a successful [`Vhci::attach`].
//!
//! Backends:
//! - [`linux::SysfsVhci`]: the `vhci_hcd` kernel driver through sysfs
//! - `mock::MockVhci`: in-memory port table, with the `test-utils` feature

pub mod linux;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod payload;
pub mod ports;

pub use linux::{SysfsOpener, SysfsVhci};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockOpener, MockVhci};
pub use payload::{AttachPayload, AttachPayloadBuilder, MAX_SERIAL_LEN};
pub use ports::{ImportedDevice, detach_port, list_imported};

use crate::error::Result;
use protocol::DeviceSpeed;
use std::fmt;
use std::os::fd::{AsFd, BorrowedFd};

/// State of a controller port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Free
    Null,
    /// Reserved but no device yet
    NotAssigned,
    /// Device attached
    Used,
    /// Device attached but the link failed
    Error,
    Unknown(u32),
}

impl PortState {
    /// Decode a `vhci_hcd` port status code
    pub fn from_code(code: u32) -> Self {
        match code {
            4 => Self::Null,
            5 => Self::NotAssigned,
            6 => Self::Used,
            7 => Self::Error,
            other => Self::Unknown(other),
        }
    }

    /// Whether the port carries an imported device
    pub fn is_occupied(self) -> bool {
        !matches!(self, Self::Null | Self::NotAssigned)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Port Available"),
            Self::NotAssigned => write!(f, "Port Initializing"),
            Self::Used => write!(f, "Port in Use"),
            Self::Error => write!(f, "Port Error"),
            Self::Unknown(code) => write!(f, "Unknown State {}", code),
        }
    }
}

/// Root hub a port belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubSpeed {
    /// USB 2.0 hub: low, full, high and wireless devices
    High,
    /// USB 3.x hub: super and super-plus devices
    Super,
}

impl HubSpeed {
    pub fn for_device(speed: DeviceSpeed) -> Self {
        if speed.is_super() {
            Self::Super
        } else {
            Self::High
        }
    }
}

/// One row of the controller's port table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub port: u16,
    pub hub: HubSpeed,
    pub state: PortState,
    pub speed: DeviceSpeed,
    pub devid: u32,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Open handle to a virtual host controller
///
/// The handle's descriptor is what a forwarding worker inherits.
pub trait Vhci: AsFd + Send {
    /// Reserve a free port suited to `speed`
    ///
    /// Fails with [`crate::Error::NoFreeSlot`].
    fn acquire_port(&mut self, speed: DeviceSpeed) -> Result<u16>;

    /// Drop a reservation that was not committed by [`Vhci::attach`]
    fn release_port(&mut self, port: u16);

    /// Plug the device described by `payload` into its port, relaying over `link`
    ///
    /// Fails with [`crate::Error::AttachRejected`]; the reservation is left for
    /// the caller to release.
    fn attach(&mut self, payload: AttachPayload, link: BorrowedFd<'_>) -> Result<()>;

    /// Unplug the device on `port`
    ///
    /// Fails with [`crate::Error::SlotNotFound`] when the port is unknown or idle.
    fn detach(&mut self, port: u16) -> Result<()>;

    /// Read the whole port table
    fn ports(&mut self) -> Result<Vec<PortStatus>>;
}

/// Opens controller handles; fails with [`crate::Error::DriverUnavailable`]
pub trait VhciOpener: Send + Sync {
    type Vhci: Vhci;

    fn open(&self) -> Result<Self::Vhci>;
}
