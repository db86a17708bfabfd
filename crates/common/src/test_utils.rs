//! Test utilities for usbip-client
//!
//! Provides mock device records, descriptor builders and [`FakeHost`], a
//! scripted USB/IP host that serves one connection over a Unix socket pair.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{FakeHost, mock_usb_device};
//! use protocol::{OP_REQ_DEVLIST, OpHeader, Wire};
//! use std::io::Write;
//!
//! let host = FakeHost::new().with_device(mock_usb_device("1-1", 0x0781, 0x5567), vec![]);
//! let (mut link, handle) = host.spawn().unwrap();
//! link.write_all(&OpHeader::request(OP_REQ_DEVLIST).to_bytes()).unwrap();
//! drop(link);
//! let log = handle.join().unwrap();
//! assert_eq!(log.ops, vec![OP_REQ_DEVLIST]);
//! ```

use protocol::{
    CmdSubmit, OP_REP_DEVLIST, OP_REP_IMPORT, OP_REQ_DEVLIST, OP_REQ_IMPORT, OpDevlistReply,
    OpHeader, OpImportReply, OpImportRequest, OpStatus, RetSubmit, USB_DT_CONFIG, USB_DT_DEVICE,
    UsbDevice, UsbInterface, Wire, read_message, write_message,
};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Read timeout applied to the host side so a stuck test fails instead of hanging
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock exported device record
pub fn mock_usb_device(busid: &str, vendor_id: u16, product_id: u16) -> UsbDevice {
    UsbDevice {
        path: format!("/sys/devices/pci0000:00/0000:00:14.0/usb1/{}", busid),
        busid: busid.to_string(),
        busnum: 1,
        devnum: 2,
        speed: 3,
        id_vendor: vendor_id,
        id_product: product_id,
        bcd_device: 0x0100,
        device_class: 0,
        device_subclass: 0,
        device_protocol: 0,
        configuration_value: 1,
        num_configurations: 1,
        num_interfaces: 1,
    }
}

/// Create a mock interface record
pub fn mock_interface(class: u8, subclass: u8, protocol: u8) -> UsbInterface {
    UsbInterface {
        class,
        subclass,
        protocol,
    }
}

/// 18-byte device descriptor for `vendor_id:product_id`
pub fn mock_device_descriptor(vendor_id: u16, product_id: u16) -> Vec<u8> {
    let mut desc = vec![18, USB_DT_DEVICE, 0x00, 0x02, 0, 0, 0, 64];
    desc.extend_from_slice(&vendor_id.to_le_bytes());
    desc.extend_from_slice(&product_id.to_le_bytes());
    desc.extend_from_slice(&0x0100u16.to_le_bytes());
    desc.extend_from_slice(&[1, 2, 3, 1]);
    desc
}

/// Configuration descriptor with `num_interfaces` endpoint-less interfaces
///
/// `wTotalLength` matches the returned length.
pub fn mock_config_descriptor(num_interfaces: u8) -> Vec<u8> {
    let total = 9 + 9 * u16::from(num_interfaces);
    let mut desc = vec![9, USB_DT_CONFIG];
    desc.extend_from_slice(&total.to_le_bytes());
    desc.extend_from_slice(&[num_interfaces, 1, 0, 0x80, 50]);
    for n in 0..num_interfaces {
        desc.extend_from_slice(&[9, 0x04, n, 0, 0, 0xff, 0, 0, 0]);
    }
    desc
}

/// Descriptor request observed by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRequest {
    pub seqnum: u32,
    pub devid: u32,
    /// `wValue`: descriptor type in the high byte
    pub value: u16,
    /// `wLength`
    pub length: u16,
}

impl DescriptorRequest {
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }
}

/// What the host saw during one connection
#[derive(Debug, Clone, Default)]
pub struct HostLog {
    /// Operation codes received
    pub ops: Vec<u16>,
    /// Bus ids named in import requests
    pub busids: Vec<String>,
    pub descriptor_requests: Vec<DescriptorRequest>,
}

struct ExportedEntry {
    device: UsbDevice,
    interfaces: Vec<UsbInterface>,
}

/// Scripted USB/IP host
///
/// Answers device-list and import requests from its table of exported
/// devices. After a successful import it serves GET_DESCRIPTOR requests
/// until the client closes the link.
pub struct FakeHost {
    devices: Vec<ExportedEntry>,
    import_status: OpStatus,
    reply_version: Option<u16>,
    echo_busid: Option<String>,
    hang_up: bool,
    device_descriptor: Vec<u8>,
    config_descriptor: Vec<u8>,
    config_total_lengths: VecDeque<u16>,
    urb_status: i32,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            import_status: OpStatus::Ok,
            reply_version: None,
            echo_busid: None,
            hang_up: false,
            device_descriptor: mock_device_descriptor(0x0781, 0x5567),
            config_descriptor: mock_config_descriptor(1),
            config_total_lengths: VecDeque::new(),
            urb_status: 0,
        }
    }

    /// Export a device; interface records are sent as given in device lists
    pub fn with_device(mut self, device: UsbDevice, interfaces: Vec<UsbInterface>) -> Self {
        self.devices.push(ExportedEntry { device, interfaces });
        self
    }

    /// Status word of every import reply
    pub fn with_import_status(mut self, status: OpStatus) -> Self {
        self.import_status = status;
        self
    }

    /// Version field of every reply header
    pub fn with_reply_version(mut self, version: u16) -> Self {
        self.reply_version = Some(version);
        self
    }

    /// Bus id reported in import replies instead of the requested one
    pub fn with_echo_busid(mut self, busid: &str) -> Self {
        self.echo_busid = Some(busid.to_string());
        self
    }

    /// Close the connection right after reading the request
    pub fn hang_up(mut self) -> Self {
        self.hang_up = true;
        self
    }

    pub fn with_device_descriptor(mut self, desc: Vec<u8>) -> Self {
        self.device_descriptor = desc;
        self
    }

    pub fn with_config_descriptor(mut self, desc: Vec<u8>) -> Self {
        self.config_descriptor = desc;
        self
    }

    /// Rewrite `wTotalLength` of successive configuration replies
    ///
    /// Each configuration request consumes one value; once exhausted the
    /// descriptor is served unchanged.
    pub fn with_config_total_lengths(mut self, lengths: &[u16]) -> Self {
        self.config_total_lengths = lengths.iter().copied().collect();
        self
    }

    /// Complete every URB with this status (negative errno)
    pub fn with_urb_status(mut self, status: i32) -> Self {
        self.urb_status = status;
        self
    }

    /// Serve one connection on a background thread
    ///
    /// Returns the client end of the link and a handle yielding the log once
    /// the client end is closed.
    pub fn spawn(self) -> io::Result<(UnixStream, JoinHandle<HostLog>)> {
        let (client, server) = UnixStream::pair()?;
        server.set_read_timeout(Some(DEFAULT_TEST_TIMEOUT))?;

        let handle = thread::spawn(move || {
            let mut log = HostLog::default();
            if let Err(e) = self.serve(server, &mut log) {
                debug!("Fake host stopped: {}", e);
            }
            log
        });

        Ok((client, handle))
    }

    fn serve(mut self, mut stream: UnixStream, log: &mut HostLog) -> protocol::Result<()> {
        let header: OpHeader = read_message(&mut stream)?;
        log.ops.push(header.code);

        match header.code {
            OP_REQ_DEVLIST => {
                if self.hang_up {
                    return Ok(());
                }
                self.send_devlist(&mut stream)
            }
            OP_REQ_IMPORT => {
                let request: OpImportRequest = read_message(&mut stream)?;
                log.busids.push(request.busid.clone());
                if self.hang_up {
                    return Ok(());
                }
                if self.send_import_reply(&mut stream, &request.busid)? {
                    self.serve_urbs(&mut stream, log)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn reply_header(&self, code: u16, status: OpStatus) -> OpHeader {
        let mut header = OpHeader::reply(code, status);
        if let Some(version) = self.reply_version {
            header.version = version;
        }
        header
    }

    fn send_devlist(&self, stream: &mut UnixStream) -> protocol::Result<()> {
        let mut buf = Vec::new();
        write_message(&mut buf, &self.reply_header(OP_REP_DEVLIST, OpStatus::Ok))?;
        write_message(
            &mut buf,
            &OpDevlistReply {
                ndev: self.devices.len() as u32,
            },
        )?;
        for entry in &self.devices {
            write_message(&mut buf, &entry.device)?;
            for iface in &entry.interfaces {
                write_message(&mut buf, iface)?;
            }
        }
        stream.write_all(&buf)?;
        Ok(())
    }

    /// Returns whether the import succeeded
    fn send_import_reply(&self, stream: &mut UnixStream, busid: &str) -> protocol::Result<bool> {
        let entry = self.devices.iter().find(|e| e.device.busid == busid);
        let status = match entry {
            Some(_) => self.import_status,
            None => OpStatus::NoDevice,
        };

        let header = self.reply_header(OP_REP_IMPORT, status);
        let Some(entry) = entry.filter(|_| status == OpStatus::Ok) else {
            write_message(stream, &header)?;
            return Ok(false);
        };

        let mut device = entry.device.clone();
        if let Some(echo) = &self.echo_busid {
            device.busid = echo.clone();
        }

        let mut buf = header.to_bytes();
        buf.extend(OpImportReply { device }.to_bytes());
        stream.write_all(&buf)?;
        Ok(true)
    }

    fn serve_urbs(&mut self, stream: &mut UnixStream, log: &mut HostLog) -> protocol::Result<()> {
        loop {
            let cmd: CmdSubmit = match read_message(stream) {
                Ok(cmd) => cmd,
                Err(protocol::ProtocolError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let setup = cmd.setup_packet();
            log.descriptor_requests.push(DescriptorRequest {
                seqnum: cmd.seqnum,
                devid: cmd.devid,
                value: setup.value,
                length: setup.length,
            });

            if self.urb_status != 0 {
                write_message(stream, &RetSubmit::error(&cmd, self.urb_status))?;
                continue;
            }

            let mut data = match (setup.value >> 8) as u8 {
                USB_DT_DEVICE => self.device_descriptor.clone(),
                USB_DT_CONFIG => {
                    let mut desc = self.config_descriptor.clone();
                    if let Some(total) = self.config_total_lengths.pop_front() {
                        if desc.len() >= 4 {
                            desc[2..4].copy_from_slice(&total.to_le_bytes());
                        }
                    }
                    desc
                }
                _ => Vec::new(),
            };
            data.truncate(usize::from(setup.length));

            let mut buf = RetSubmit::success(&cmd, data.len() as u32).to_bytes();
            buf.extend_from_slice(&data);
            stream.write_all(&buf)?;
        }
    }
}
