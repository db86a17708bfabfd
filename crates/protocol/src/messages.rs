//! Operation messages (import and device list)
//!
//! Every operation starts with an [`OpHeader`] carrying the protocol version,
//! the command or reply code and a status word. Import requests are followed
//! by the bus id, import replies by the device record, and device-list
//! replies by a device count and the device records with their interfaces.

use crate::codec::{Wire, decode_str, encode_str};
use crate::types::{BUS_ID_SIZE, BusId, UsbDevice};
use crate::version::USBIP_VERSION;
use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// Command code: retrieve the list of exported devices
pub const OP_REQ_DEVLIST: u16 = 0x8005;
/// Reply code: list of exported devices
pub const OP_REP_DEVLIST: u16 = 0x0005;
/// Command code: import a remote device
pub const OP_REQ_IMPORT: u16 = 0x8003;
/// Reply code: import result
pub const OP_REP_IMPORT: u16 = 0x0003;

/// Status word of an operation reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Ok,
    /// Device not available
    NotAvailable,
    /// Device already imported by someone else
    DeviceBusy,
    /// Device in error state
    DeviceError,
    /// No such device
    NoDevice,
    /// Unexpected error on the host
    Error,
    Unknown(u32),
}

impl OpStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::NotAvailable,
            2 => Self::DeviceBusy,
            3 => Self::DeviceError,
            4 => Self::NoDevice,
            5 => Self::Error,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::NotAvailable => 1,
            Self::DeviceBusy => 2,
            Self::DeviceError => 3,
            Self::NoDevice => 4,
            Self::Error => 5,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "request completed successfully"),
            Self::NotAvailable => write!(f, "device not available"),
            Self::DeviceBusy => write!(f, "device busy (exported)"),
            Self::DeviceError => write!(f, "device in error state"),
            Self::NoDevice => write!(f, "device not found"),
            Self::Error => write!(f, "unexpected response"),
            Self::Unknown(code) => write!(f, "unknown status {}", code),
        }
    }
}

/// Common operation header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    pub version: u16,
    pub code: u16,
    pub status: u32,
}

impl OpHeader {
    /// Request header with the current version and a zero status
    pub fn request(code: u16) -> Self {
        Self {
            version: USBIP_VERSION,
            code,
            status: 0,
        }
    }

    /// Reply header with the current version
    pub fn reply(code: u16, status: OpStatus) -> Self {
        Self {
            version: USBIP_VERSION,
            code,
            status: status.code(),
        }
    }

    pub fn op_status(&self) -> OpStatus {
        OpStatus::from_code(self.status)
    }
}

impl Wire for OpHeader {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u16(&mut buf[0..2], self.version);
        BigEndian::write_u16(&mut buf[2..4], self.code);
        BigEndian::write_u32(&mut buf[4..8], self.status);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            version: BigEndian::read_u16(&buf[0..2]),
            code: BigEndian::read_u16(&buf[2..4]),
            status: BigEndian::read_u32(&buf[4..8]),
        }
    }
}

/// Import request body: the bus id (32 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpImportRequest {
    pub busid: String,
}

impl OpImportRequest {
    pub fn new(busid: &BusId) -> Self {
        Self {
            busid: busid.as_str().to_string(),
        }
    }
}

impl Wire for OpImportRequest {
    const SIZE: usize = BUS_ID_SIZE;

    fn encode(&self, buf: &mut [u8]) {
        encode_str(buf, &self.busid);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            busid: decode_str(buf),
        }
    }
}

/// Import reply body: the imported device (312 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpImportReply {
    pub device: UsbDevice,
}

impl Wire for OpImportReply {
    const SIZE: usize = UsbDevice::SIZE;

    fn encode(&self, buf: &mut [u8]) {
        self.device.encode(buf);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            device: UsbDevice::decode(buf),
        }
    }
}

/// Device-list reply body: number of exported devices (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpDevlistReply {
    pub ndev: u32,
}

impl Wire for OpDevlistReply {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u32(buf, self.ndev);
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            ndev: BigEndian::read_u32(buf),
        }
    }
}
