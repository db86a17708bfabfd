//! USB device records and identifiers
//!
//! This module defines the device and interface records exchanged during
//! import and device listing, plus the bus id and speed types they carry.

use crate::codec::{Wire, decode_str, encode_str};
use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use std::str::FromStr;

/// Width of the bus id field on the wire
pub const BUS_ID_SIZE: usize = 32;

/// Width of the sysfs path field on the wire
pub const PATH_SIZE: usize = 256;

/// Maximum number of interfaces kept per exported device
pub const MAX_INTERFACES: usize = 10;

/// Bus id naming a device on its host (e.g. "1-1")
///
/// Always fits the fixed-width wire field with its NUL terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusId(String);

impl BusId {
    /// Validate a bus id
    pub fn new(busid: impl Into<String>) -> Result<Self> {
        let busid = busid.into();
        let reason = if busid.is_empty() {
            Some("empty")
        } else if busid.len() >= BUS_ID_SIZE {
            Some("longer than 31 bytes")
        } else if busid.bytes().any(|b| b == 0) {
            Some("contains a NUL byte")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ProtocolError::InvalidBusId { busid, reason }),
            None => Ok(Self(busid)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BusId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BusId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// USB device speed as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpeed {
    Unknown,
    /// 1.5 Mbps (USB 1.0)
    Low,
    /// 12 Mbps (USB 1.1)
    Full,
    /// 480 Mbps (USB 2.0)
    High,
    /// Wireless USB
    Wireless,
    /// 5 Gbps (USB 3.0)
    Super,
    /// 10+ Gbps (USB 3.1)
    SuperPlus,
}

impl DeviceSpeed {
    /// Decode a kernel `usb_device_speed` code
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Low,
            2 => Self::Full,
            3 => Self::High,
            4 => Self::Wireless,
            5 => Self::Super,
            6 => Self::SuperPlus,
            _ => Self::Unknown,
        }
    }

    /// Kernel `usb_device_speed` code
    pub fn code(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Low => 1,
            Self::Full => 2,
            Self::High => 3,
            Self::Wireless => 4,
            Self::Super => 5,
            Self::SuperPlus => 6,
        }
    }

    /// Whether the device needs a SuperSpeed root hub port
    pub fn is_super(self) -> bool {
        matches!(self, Self::Super | Self::SuperPlus)
    }
}

/// Exported device record (`usbip_usb_device`, 312 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsbDevice {
    /// Sysfs path of the device on its host
    pub path: String,
    pub busid: String,
    pub busnum: u32,
    pub devnum: u32,
    /// Raw speed code, see [`DeviceSpeed::from_code`]
    pub speed: u32,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub num_interfaces: u8,
}

impl UsbDevice {
    /// Device id keying URB traffic: `busnum << 16 | devnum`
    pub fn devid(&self) -> u32 {
        self.busnum << 16 | self.devnum
    }

    pub fn device_speed(&self) -> DeviceSpeed {
        DeviceSpeed::from_code(self.speed)
    }
}

impl Wire for UsbDevice {
    const SIZE: usize = 312;

    fn encode(&self, buf: &mut [u8]) {
        encode_str(&mut buf[0..256], &self.path);
        encode_str(&mut buf[256..288], &self.busid);
        BigEndian::write_u32(&mut buf[288..292], self.busnum);
        BigEndian::write_u32(&mut buf[292..296], self.devnum);
        BigEndian::write_u32(&mut buf[296..300], self.speed);
        BigEndian::write_u16(&mut buf[300..302], self.id_vendor);
        BigEndian::write_u16(&mut buf[302..304], self.id_product);
        BigEndian::write_u16(&mut buf[304..306], self.bcd_device);
        buf[306] = self.device_class;
        buf[307] = self.device_subclass;
        buf[308] = self.device_protocol;
        buf[309] = self.configuration_value;
        buf[310] = self.num_configurations;
        buf[311] = self.num_interfaces;
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            path: decode_str(&buf[0..256]),
            busid: decode_str(&buf[256..288]),
            busnum: BigEndian::read_u32(&buf[288..292]),
            devnum: BigEndian::read_u32(&buf[292..296]),
            speed: BigEndian::read_u32(&buf[296..300]),
            id_vendor: BigEndian::read_u16(&buf[300..302]),
            id_product: BigEndian::read_u16(&buf[302..304]),
            bcd_device: BigEndian::read_u16(&buf[304..306]),
            device_class: buf[306],
            device_subclass: buf[307],
            device_protocol: buf[308],
            configuration_value: buf[309],
            num_configurations: buf[310],
            num_interfaces: buf[311],
        }
    }
}

/// Interface record (`usbip_usb_interface`, 4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsbInterface {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl Wire for UsbInterface {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.class;
        buf[1] = self.subclass;
        buf[2] = self.protocol;
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            class: buf[0],
            subclass: buf[1],
            protocol: buf[2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busid_validation() {
        assert!(BusId::new("1-1").is_ok());
        assert!(BusId::new("1-1.4.2").is_ok());
        assert!(BusId::new("").is_err());
        assert!(BusId::new("a".repeat(31)).is_ok());
        assert!(BusId::new("a".repeat(32)).is_err());
        assert!(BusId::new("1-\01").is_err());
    }

    #[test]
    fn test_devid() {
        let device = UsbDevice {
            busnum: 3,
            devnum: 7,
            ..Default::default()
        };
        assert_eq!(device.devid(), 0x0003_0007);
    }

    #[test]
    fn test_speed_codes() {
        assert_eq!(DeviceSpeed::from_code(3), DeviceSpeed::High);
        assert_eq!(DeviceSpeed::from_code(5), DeviceSpeed::Super);
        assert_eq!(DeviceSpeed::from_code(42), DeviceSpeed::Unknown);
        assert_eq!(DeviceSpeed::SuperPlus.code(), 6);
        assert!(DeviceSpeed::Super.is_super());
        assert!(!DeviceSpeed::Wireless.is_super());
    }

    #[test]
    fn test_device_layout() {
        let device = UsbDevice {
            path: "/sys/devices/pci0000:00/0000:00:14.0/usb1/1-1".to_string(),
            busid: "1-1".to_string(),
            busnum: 1,
            devnum: 2,
            speed: 3,
            id_vendor: 0x046d,
            id_product: 0xc52b,
            bcd_device: 0x1201,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            configuration_value: 1,
            num_configurations: 1,
            num_interfaces: 3,
        };

        let bytes = device.to_bytes();
        assert_eq!(bytes.len(), UsbDevice::SIZE);
        assert_eq!(&bytes[256..260], b"1-1\0");
        assert_eq!(&bytes[288..292], &[0, 0, 0, 1]);
        assert_eq!(&bytes[300..304], &[0x04, 0x6d, 0xc5, 0x2b]);
        assert_eq!(bytes[311], 3);

        assert_eq!(UsbDevice::from_bytes(&bytes).unwrap(), device);
    }

    #[test]
    fn test_interface_padding_ignored() {
        let iface = UsbInterface::from_bytes(&[0x03, 0x01, 0x02, 0xff]).unwrap();
        assert_eq!(
            iface,
            UsbInterface {
                class: 3,
                subclass: 1,
                protocol: 2
            }
        );
        assert_eq!(iface.to_bytes(), vec![0x03, 0x01, 0x02, 0x00]);
    }
}
