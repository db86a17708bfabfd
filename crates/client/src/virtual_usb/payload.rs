//! Attach payload
//!
//! Everything the controller needs to plug in an imported device: a fixed
//! header (payload size, devid, port, speed, serial) followed by the device
//! descriptor and the configuration descriptor. The header is little endian.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use protocol::DeviceSpeed;

/// Longest serial accepted; the field keeps room for a NUL terminator
pub const MAX_SERIAL_LEN: usize = 127;

const SERIAL_FIELD_SIZE: usize = MAX_SERIAL_LEN + 1;

/// size u32, devid u32, port u16, speed u16, serial [128]
pub const ATTACH_HEADER_SIZE: usize = 4 + 4 + 2 + 2 + SERIAL_FIELD_SIZE;

/// Largest payload a controller accepts by default
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = ATTACH_HEADER_SIZE + 18 + u16::MAX as usize;

/// Validated attach payload, consumed by [`super::Vhci::attach`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachPayload {
    port: u16,
    devid: u32,
    speed: DeviceSpeed,
    serial: String,
    device_descriptor: Vec<u8>,
    config_descriptor: Vec<u8>,
}

impl AttachPayload {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn devid(&self) -> u32 {
        self.devid
    }

    pub fn speed(&self) -> DeviceSpeed {
        self.speed
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn device_descriptor(&self) -> &[u8] {
        &self.device_descriptor
    }

    pub fn config_descriptor(&self) -> &[u8] {
        &self.config_descriptor
    }

    /// Total encoded size
    pub fn encoded_len(&self) -> usize {
        ATTACH_HEADER_SIZE + self.device_descriptor.len() + self.config_descriptor.len()
    }

    /// Encode header and descriptors into one buffer
    pub fn encode(&self) -> Vec<u8> {
        let len = self.encoded_len();
        let mut header = [0u8; ATTACH_HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], len as u32);
        LittleEndian::write_u32(&mut header[4..8], self.devid);
        LittleEndian::write_u16(&mut header[8..10], self.port);
        LittleEndian::write_u16(&mut header[10..12], self.speed.code() as u16);
        header[12..12 + self.serial.len()].copy_from_slice(self.serial.as_bytes());

        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&header);

        buf.extend_from_slice(&self.device_descriptor);
        buf.extend_from_slice(&self.config_descriptor);
        buf
    }
}

/// Builds an [`AttachPayload`], checking sizes before anything is allocated
#[derive(Debug, Clone)]
pub struct AttachPayloadBuilder {
    port: u16,
    devid: u32,
    speed: DeviceSpeed,
    serial: Option<String>,
    max_len: usize,
}

impl AttachPayloadBuilder {
    pub fn new(port: u16, devid: u32, speed: DeviceSpeed) -> Self {
        Self {
            port,
            devid,
            speed,
            serial: None,
            max_len: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    pub fn serial(mut self, serial: Option<&str>) -> Self {
        self.serial = serial.map(str::to_string);
        self
    }

    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Take ownership of the descriptors and produce the payload
    pub fn build(self, device_descriptor: Vec<u8>, config_descriptor: Vec<u8>) -> Result<AttachPayload> {
        let serial = self.serial.unwrap_or_default();
        validate_serial(&serial)?;

        let len = ATTACH_HEADER_SIZE + device_descriptor.len() + config_descriptor.len();
        if len > self.max_len {
            return Err(Error::DescriptorTooLarge {
                size: len,
                max: self.max_len,
            });
        }

        Ok(AttachPayload {
            port: self.port,
            devid: self.devid,
            speed: self.speed,
            serial,
            device_descriptor,
            config_descriptor,
        })
    }
}

/// Check a serial before any network work is done
pub fn validate_serial(serial: &str) -> Result<()> {
    if serial.len() > MAX_SERIAL_LEN {
        return Err(Error::InvalidSerial(format!(
            "{} bytes exceeds the {} byte limit",
            serial.len(),
            MAX_SERIAL_LEN
        )));
    }
    if serial.bytes().any(|b| b == 0) {
        return Err(Error::InvalidSerial("contains a NUL byte".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{mock_config_descriptor, mock_device_descriptor};

    #[test]
    fn test_encoded_layout() {
        let payload = AttachPayloadBuilder::new(3, 0x0001_0002, DeviceSpeed::High)
            .serial(Some("ABC123"))
            .build(mock_device_descriptor(0x0781, 0x5567), mock_config_descriptor(1))
            .unwrap();

        let bytes = payload.encode();
        assert_eq!(bytes.len(), ATTACH_HEADER_SIZE + 18 + 18);
        assert_eq!(payload.encoded_len(), bytes.len());
        assert_eq!(&bytes[0..4], &(bytes.len() as u32).to_le_bytes());
        assert_eq!(&bytes[4..8], &[0x02, 0x00, 0x01, 0x00]);
        assert_eq!(&bytes[8..10], &[3, 0]);
        assert_eq!(&bytes[10..12], &[3, 0]);
        assert_eq!(&bytes[12..18], b"ABC123");
        assert!(bytes[18..ATTACH_HEADER_SIZE].iter().all(|&b| b == 0));
        assert_eq!(bytes[ATTACH_HEADER_SIZE], 18);
        assert_eq!(bytes[ATTACH_HEADER_SIZE + 18], 9);
    }

    #[test]
    fn test_too_large_is_rejected() {
        let result = AttachPayloadBuilder::new(0, 1, DeviceSpeed::Full)
            .max_len(ATTACH_HEADER_SIZE + 30)
            .build(mock_device_descriptor(1, 2), mock_config_descriptor(1));

        assert!(matches!(
            result,
            Err(Error::DescriptorTooLarge { size, max }) if size == ATTACH_HEADER_SIZE + 36 && max == ATTACH_HEADER_SIZE + 30
        ));
    }

    #[test]
    fn test_serial_limits() {
        assert!(validate_serial(&"x".repeat(127)).is_ok());
        assert!(matches!(
            validate_serial(&"x".repeat(128)),
            Err(Error::InvalidSerial(_))
        ));
        assert!(validate_serial("a\0b").is_err());

        let payload = AttachPayloadBuilder::new(0, 1, DeviceSpeed::Full)
            .serial(Some(&"s".repeat(127)))
            .build(mock_device_descriptor(1, 2), mock_config_descriptor(0))
            .unwrap();
        let bytes = payload.encode();
        assert_eq!(bytes[12 + 126], b's');
        assert_eq!(bytes[12 + 127], 0);
    }
}
