//! URB headers used for descriptor requests
//!
//! Once a device is imported the link speaks the URB protocol. Before the
//! link is handed to the forwarding worker the client uses it to issue
//! GET_DESCRIPTOR control transfers on endpoint 0. The protocol is
//! documented in the Linux kernel: drivers/usb/usbip/usbip_common.h
//!
//! Both headers are 48 bytes: a 20-byte basic header (command, seqnum,
//! devid, direction, ep) followed by a 28-byte command-specific part.

use crate::codec::Wire;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Command code: submit an URB
pub const USBIP_CMD_SUBMIT: u32 = 0x0001;
/// Reply code: URB completed
pub const USBIP_RET_SUBMIT: u32 = 0x0003;

/// Host-to-device direction
pub const USBIP_DIR_OUT: u32 = 0;
/// Device-to-host direction
pub const USBIP_DIR_IN: u32 = 1;

/// Standard request: GET_DESCRIPTOR
pub const USB_REQ_GET_DESCRIPTOR: u8 = 0x06;
/// Descriptor type: device
pub const USB_DT_DEVICE: u8 = 0x01;
/// Descriptor type: configuration
pub const USB_DT_CONFIG: u8 = 0x02;

/// Size of a device descriptor
pub const DEVICE_DESCRIPTOR_SIZE: usize = 18;
/// Size of the fixed part of a configuration descriptor
pub const CONFIG_DESCRIPTOR_HEADER_SIZE: usize = 9;

/// Control transfer setup packet (8 bytes, little-endian fields)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Standard device-to-host GET_DESCRIPTOR request
    pub fn get_descriptor(descriptor_type: u8, descriptor_index: u8, length: u16) -> Self {
        Self {
            request_type: 0x80,
            request: USB_REQ_GET_DESCRIPTOR,
            value: u16::from(descriptor_type) << 8 | u16::from(descriptor_index),
            index: 0,
            length,
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0] = self.request_type;
        buf[1] = self.request;
        LittleEndian::write_u16(&mut buf[2..4], self.value);
        LittleEndian::write_u16(&mut buf[4..6], self.index);
        LittleEndian::write_u16(&mut buf[6..8], self.length);
        buf
    }

    pub fn from_bytes(buf: [u8; 8]) -> Self {
        Self {
            request_type: buf[0],
            request: buf[1],
            value: LittleEndian::read_u16(&buf[2..4]),
            index: LittleEndian::read_u16(&buf[4..6]),
            length: LittleEndian::read_u16(&buf[6..8]),
        }
    }
}

/// USBIP_CMD_SUBMIT header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSubmit {
    pub command: u32,
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub ep: u32,
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub interval: u32,
    pub setup: [u8; 8],
}

impl CmdSubmit {
    /// GET_DESCRIPTOR on endpoint 0 for `length` bytes
    pub fn get_descriptor(seqnum: u32, devid: u32, descriptor_type: u8, length: u16) -> Self {
        Self {
            command: USBIP_CMD_SUBMIT,
            seqnum,
            devid,
            direction: USBIP_DIR_IN,
            ep: 0,
            transfer_flags: 0,
            transfer_buffer_length: u32::from(length),
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup: SetupPacket::get_descriptor(descriptor_type, 0, length).to_bytes(),
        }
    }

    pub fn setup_packet(&self) -> SetupPacket {
        SetupPacket::from_bytes(self.setup)
    }
}

impl Wire for CmdSubmit {
    const SIZE: usize = 48;

    fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u32(&mut buf[0..4], self.command);
        BigEndian::write_u32(&mut buf[4..8], self.seqnum);
        BigEndian::write_u32(&mut buf[8..12], self.devid);
        BigEndian::write_u32(&mut buf[12..16], self.direction);
        BigEndian::write_u32(&mut buf[16..20], self.ep);
        BigEndian::write_u32(&mut buf[20..24], self.transfer_flags);
        BigEndian::write_u32(&mut buf[24..28], self.transfer_buffer_length);
        BigEndian::write_u32(&mut buf[28..32], self.start_frame);
        BigEndian::write_u32(&mut buf[32..36], self.number_of_packets);
        BigEndian::write_u32(&mut buf[36..40], self.interval);
        buf[40..48].copy_from_slice(&self.setup);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut setup = [0u8; 8];
        setup.copy_from_slice(&buf[40..48]);
        Self {
            command: BigEndian::read_u32(&buf[0..4]),
            seqnum: BigEndian::read_u32(&buf[4..8]),
            devid: BigEndian::read_u32(&buf[8..12]),
            direction: BigEndian::read_u32(&buf[12..16]),
            ep: BigEndian::read_u32(&buf[16..20]),
            transfer_flags: BigEndian::read_u32(&buf[20..24]),
            transfer_buffer_length: BigEndian::read_u32(&buf[24..28]),
            start_frame: BigEndian::read_u32(&buf[28..32]),
            number_of_packets: BigEndian::read_u32(&buf[32..36]),
            interval: BigEndian::read_u32(&buf[36..40]),
            setup,
        }
    }
}

/// USBIP_RET_SUBMIT header, followed by `actual_length` bytes for IN transfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetSubmit {
    pub command: u32,
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub ep: u32,
    /// 0 on success, negative errno otherwise
    pub status: i32,
    pub actual_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub error_count: u32,
}

impl RetSubmit {
    /// Successful completion of `cmd` carrying `actual_length` bytes
    pub fn success(cmd: &CmdSubmit, actual_length: u32) -> Self {
        Self {
            command: USBIP_RET_SUBMIT,
            seqnum: cmd.seqnum,
            devid: cmd.devid,
            direction: cmd.direction,
            ep: cmd.ep,
            status: 0,
            actual_length,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
        }
    }

    /// Failed completion of `cmd`
    pub fn error(cmd: &CmdSubmit, status: i32) -> Self {
        Self {
            status,
            ..Self::success(cmd, 0)
        }
    }
}

impl Wire for RetSubmit {
    const SIZE: usize = 48;

    fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u32(&mut buf[0..4], self.command);
        BigEndian::write_u32(&mut buf[4..8], self.seqnum);
        BigEndian::write_u32(&mut buf[8..12], self.devid);
        BigEndian::write_u32(&mut buf[12..16], self.direction);
        BigEndian::write_u32(&mut buf[16..20], self.ep);
        BigEndian::write_i32(&mut buf[20..24], self.status);
        BigEndian::write_u32(&mut buf[24..28], self.actual_length);
        BigEndian::write_u32(&mut buf[28..32], self.start_frame);
        BigEndian::write_u32(&mut buf[32..36], self.number_of_packets);
        BigEndian::write_u32(&mut buf[36..40], self.error_count);
        // 8 bytes of padding
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            command: BigEndian::read_u32(&buf[0..4]),
            seqnum: BigEndian::read_u32(&buf[4..8]),
            devid: BigEndian::read_u32(&buf[8..12]),
            direction: BigEndian::read_u32(&buf[12..16]),
            ep: BigEndian::read_u32(&buf[16..20]),
            status: BigEndian::read_i32(&buf[20..24]),
            actual_length: BigEndian::read_u32(&buf[24..28]),
            start_frame: BigEndian::read_u32(&buf[28..32]),
            number_of_packets: BigEndian::read_u32(&buf[32..36]),
            error_count: BigEndian::read_u32(&buf[36..40]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_descriptor_setup_layout() {
        let setup = SetupPacket::get_descriptor(USB_DT_CONFIG, 0, 9).to_bytes();
        assert_eq!(setup, [0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0x09, 0x00]);
    }

    #[test]
    fn test_cmd_submit_layout() {
        let cmd = CmdSubmit::get_descriptor(7, 0x0001_0002, USB_DT_DEVICE, 18);
        let bytes = cmd.to_bytes();

        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 7]);
        assert_eq!(&bytes[8..12], &[0, 1, 0, 2]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 1]);
        assert_eq!(&bytes[24..28], &[0, 0, 0, 18]);
        assert_eq!(&bytes[40..48], &[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);

        let decoded = CmdSubmit::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.setup_packet().length, 18);
        assert_eq!(decoded.setup_packet().value, 0x0100);
    }

    #[test]
    fn test_ret_submit_negative_status() {
        let cmd = CmdSubmit::get_descriptor(1, 1, USB_DT_DEVICE, 18);
        let ret = RetSubmit::error(&cmd, -32);
        let bytes = ret.to_bytes();
        assert_eq!(&bytes[20..24], &[0xff, 0xff, 0xff, 0xe0]);
        assert!(bytes[40..].iter().all(|&b| b == 0));

        let decoded = RetSubmit::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.status, -32);
        assert_eq!(decoded.seqnum, 1);
        assert_eq!(decoded.actual_length, 0);
    }
}
