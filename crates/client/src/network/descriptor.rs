//! Descriptor fetcher
//!
//! Issues GET_DESCRIPTOR control transfers over an imported link before it is
//! handed to the forwarding worker. The configuration descriptor has a
//! variable length, so it is fetched in two steps: a probe that reads the
//! 9-byte header for `wTotalLength`, then a fetch of exactly that many bytes
//! preceded by a second probe that must agree with the first.

use crate::error::{Error, Result};
use protocol::{
    CONFIG_DESCRIPTOR_HEADER_SIZE, CmdSubmit, DEVICE_DESCRIPTOR_SIZE, RetSubmit, USB_DT_CONFIG,
    USB_DT_DEVICE, USBIP_RET_SUBMIT, UsbDevice, Wire,
};
use std::io::{Read, Write};
use tracing::debug;

/// Default upper bound for a configuration descriptor
pub const DEFAULT_MAX_DESCRIPTOR_SIZE: usize = 16 * 1024;

/// Fetches descriptors of one imported device
///
/// Borrows the session's link; sequence numbers are local to the fetcher.
pub struct DescriptorFetcher<'a, L> {
    link: &'a mut L,
    devid: u32,
    seqnum: u32,
    max_size: usize,
}

impl<'a, L: Read + Write> DescriptorFetcher<'a, L> {
    pub fn new(link: &'a mut L, devid: u32, max_size: usize) -> Self {
        Self {
            link,
            devid,
            seqnum: 0,
            max_size,
        }
    }

    /// Fetch the 18-byte device descriptor
    pub fn device_descriptor(&mut self) -> Result<Vec<u8>> {
        self.request(USB_DT_DEVICE, DEVICE_DESCRIPTOR_SIZE)
    }

    /// Read `wTotalLength` from the configuration descriptor header
    pub fn probe_config_size(&mut self) -> Result<usize> {
        let header = self.request(USB_DT_CONFIG, CONFIG_DESCRIPTOR_HEADER_SIZE)?;
        if header[1] != USB_DT_CONFIG {
            return Err(Error::ProtocolViolation(format!(
                "expected a configuration descriptor, got type {:#04x}",
                header[1]
            )));
        }
        let size = usize::from(u16::from_le_bytes([header[2], header[3]]));
        debug!("Configuration descriptor probe: wTotalLength={}", size);

        if size > self.max_size {
            return Err(Error::DescriptorTooLarge {
                size,
                max: self.max_size,
            });
        }
        if size < CONFIG_DESCRIPTOR_HEADER_SIZE {
            return Err(Error::ProtocolViolation(format!(
                "configuration descriptor wTotalLength {} is shorter than its header",
                size
            )));
        }

        Ok(size)
    }

    /// Fetch the full configuration descriptor of a previously probed `size`
    pub fn fetch_config(&mut self, size: usize) -> Result<Vec<u8>> {
        let reprobed = self.probe_config_size()?;
        if reprobed != size {
            return Err(Error::ProtocolViolation(format!(
                "configuration descriptor size changed from {} to {} bytes",
                size, reprobed
            )));
        }

        let desc = self.request(USB_DT_CONFIG, size)?;
        let total = usize::from(u16::from_le_bytes([desc[2], desc[3]]));
        if total != size {
            return Err(Error::ProtocolViolation(format!(
                "fetched configuration descriptor reports {} bytes, expected {}",
                total, size
            )));
        }

        Ok(desc)
    }

    /// Probe and fetch the configuration descriptor
    pub fn config_descriptor(&mut self) -> Result<Vec<u8>> {
        let size = self.probe_config_size()?;
        self.fetch_config(size)
    }

    fn request(&mut self, descriptor_type: u8, len: usize) -> Result<Vec<u8>> {
        // max_size is validated to fit a u16 wLength
        let length = u16::try_from(len).map_err(|_| Error::DescriptorTooLarge {
            size: len,
            max: usize::from(u16::MAX),
        })?;

        self.seqnum = self.seqnum.wrapping_add(1);
        let cmd = CmdSubmit::get_descriptor(self.seqnum, self.devid, descriptor_type, length);
        debug!(
            "GET_DESCRIPTOR type={} len={} seqnum={} devid={:#010x}",
            descriptor_type, len, cmd.seqnum, self.devid
        );

        self.link
            .write_all(&cmd.to_bytes())
            .map_err(|e| fetch_failed("send", e))?;

        let mut buf = [0u8; RetSubmit::SIZE];
        self.link
            .read_exact(&mut buf)
            .map_err(|e| fetch_failed("receive", e))?;
        let ret = RetSubmit::decode(&buf);

        if ret.command != USBIP_RET_SUBMIT {
            return Err(Error::DescriptorFetchFailed(format!(
                "unexpected reply command {:#x}",
                ret.command
            )));
        }
        if ret.seqnum != cmd.seqnum {
            return Err(Error::DescriptorFetchFailed(format!(
                "reply seqnum {} does not match request {}",
                ret.seqnum, cmd.seqnum
            )));
        }
        if ret.status != 0 {
            return Err(Error::DescriptorFetchFailed(format!(
                "transfer failed with status {}",
                ret.status
            )));
        }
        if ret.actual_length as usize != len {
            return Err(Error::DescriptorFetchFailed(format!(
                "short transfer: {} of {} bytes",
                ret.actual_length, len
            )));
        }

        let mut data = vec![0u8; len];
        self.link
            .read_exact(&mut data)
            .map_err(|e| fetch_failed("receive", e))?;
        Ok(data)
    }
}

/// Check a fetched device descriptor against the device named in the import reply
pub fn check_device_descriptor(desc: &[u8], device: &UsbDevice) -> Result<()> {
    let &[length, descriptor_type, ..] = desc else {
        return Err(Error::ProtocolViolation("empty device descriptor".into()));
    };
    if desc.len() != DEVICE_DESCRIPTOR_SIZE
        || usize::from(length) != DEVICE_DESCRIPTOR_SIZE
        || descriptor_type != USB_DT_DEVICE
    {
        return Err(Error::ProtocolViolation(format!(
            "malformed device descriptor: {} bytes, bLength {}, bDescriptorType {:#04x}",
            desc.len(),
            length,
            descriptor_type
        )));
    }

    let vendor_id = u16::from_le_bytes([desc[8], desc[9]]);
    let product_id = u16::from_le_bytes([desc[10], desc[11]]);
    if (vendor_id, product_id) != (device.id_vendor, device.id_product) {
        return Err(Error::ProtocolViolation(format!(
            "host exported {:04x}:{:04x} but the device descriptor reports {:04x}:{:04x}",
            device.id_vendor, device.id_product, vendor_id, product_id
        )));
    }

    Ok(())
}

fn fetch_failed(what: &str, e: std::io::Error) -> Error {
    Error::DescriptorFetchFailed(format!("{} failed: {}", what, e))
}
