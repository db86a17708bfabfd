//! USB/IP client
//!
//! Imports USB devices exported by remote USB/IP hosts onto the local
//! virtual host controller, detaches them again, and lists both the locally
//! imported devices and the devices a host exports.
//!
//! The operations are blocking and independent of each other:
//!
//! - [`ImportSession::attach`]: import a device, returning its local port
//! - [`detach_port`]: release a local port
//! - [`list_imported`]: devices on local ports
//! - [`list_exported`]: devices a host exports
//!
//! Collaborators are traits so that each operation can run against real
//! hosts and the kernel driver, or against in-memory fakes.

pub mod config;
pub mod error;
pub mod forward;
pub mod network;
pub mod virtual_usb;

pub use config::ClientConfig;
pub use error::{Error, Result, SpawnFailure};
pub use forward::{
    ConfiguredForwarder, Forwarder, HandoffError, KernelForwarder, ProcessForwarder,
};
pub use network::{
    Connector, ExportedDevice, ImportSession, Link, Stage, TcpConnector, list_exported,
};
pub use virtual_usb::{
    ImportedDevice, PortState, SysfsOpener, Vhci, VhciOpener, detach_port, list_imported,
};

#[cfg(any(test, feature = "test-utils"))]
pub use virtual_usb::MockOpener;
