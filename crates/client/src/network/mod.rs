//! Network subsystem
//!
//! Talks the USB/IP operation protocol with remote hosts: importing a device,
//! fetching its descriptors over the imported link, and listing exported
//! devices.

pub mod descriptor;
pub mod devlist;
pub mod session;
pub mod transport;

pub use descriptor::{DEFAULT_MAX_DESCRIPTOR_SIZE, DescriptorFetcher, check_device_descriptor};
pub use devlist::{ExportedDevice, list_exported};
pub use session::{ImportSession, Stage};
pub use transport::{Connector, Link, TcpConnector};

use crate::error::{Error, Result};
use protocol::{OpHeader, OpStatus, version};

/// Validate a reply header against the expected reply code
///
/// This is the only place where op status words are turned into errors.
/// `subject` names what the request was about (bus id or host).
pub fn check_reply(header: &OpHeader, expected_code: u16, subject: &str) -> Result<()> {
    if !version::is_supported(header.version) {
        return Err(Error::ProtocolViolation(format!(
            "unsupported protocol version {:#06x}",
            header.version
        )));
    }

    if header.code != expected_code {
        return Err(Error::ProtocolViolation(format!(
            "expected reply code {:#06x}, got {:#06x}",
            expected_code, header.code
        )));
    }

    match header.op_status() {
        OpStatus::Ok => Ok(()),
        OpStatus::NoDevice => Err(Error::DeviceNotFound(subject.to_string())),
        OpStatus::DeviceBusy => Err(Error::DeviceBusy(subject.to_string())),
        status => Err(Error::RemoteRejected(status)),
    }
}
