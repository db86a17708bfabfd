//! Import session
//!
//! Drives one attach from connection to hand-off:
//!
//! ```text
//! Connecting -> RequestSent -> ReplyValidated -> SlotAcquired
//!     -> DescriptorsFetched -> Attached -> ForwardingHandedOff
//! ```
//!
//! Any failure moves the session to `Failed`. A port reserved in
//! `SlotAcquired` is released on every failure that follows, and the
//! controller handle and link are closed on every path except a successful
//! hand-off, which moves them to the forwarding worker.

use super::check_reply;
use super::descriptor::{DEFAULT_MAX_DESCRIPTOR_SIZE, DescriptorFetcher, check_device_descriptor};
use super::transport::Connector;
use crate::error::{Error, Result};
use crate::forward::{Forwarder, HandoffError};
use crate::virtual_usb::payload::validate_serial;
use crate::virtual_usb::{AttachPayload, AttachPayloadBuilder, Vhci, VhciOpener};
use protocol::{
    BusId, OP_REP_IMPORT, OP_REQ_IMPORT, OpHeader, OpImportReply, OpImportRequest, UsbDevice,
    Wire, read_message,
};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use tracing::{debug, info, warn};

/// Progress of an import session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Connecting,
    RequestSent,
    ReplyValidated,
    SlotAcquired,
    DescriptorsFetched,
    Attached,
    ForwardingHandedOff,
    Failed,
}

/// One import of a remote device
pub struct ImportSession<'a, C, O, F> {
    connector: &'a C,
    opener: &'a O,
    forwarder: &'a F,
    max_descriptor_size: usize,
    stage: Stage,
}

impl<'a, C, O, F> ImportSession<'a, C, O, F>
where
    C: Connector,
    O: VhciOpener,
    F: Forwarder<O::Vhci, C::Link>,
{
    pub fn new(connector: &'a C, opener: &'a O, forwarder: &'a F) -> Self {
        Self {
            connector,
            opener,
            forwarder,
            max_descriptor_size: DEFAULT_MAX_DESCRIPTOR_SIZE,
            stage: Stage::Idle,
        }
    }

    pub fn with_max_descriptor_size(mut self, max: usize) -> Self {
        self.max_descriptor_size = max;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Import `busid` from `host` and return the local port it landed on
    pub fn attach(&mut self, host: &str, busid: &BusId, serial: Option<&str>) -> Result<u16> {
        let result = self.run(host, busid, serial);
        if let Err(e) = &result {
            warn!(
                "Import of {} from {} failed during {:?}: {}",
                busid, host, self.stage, e
            );
            self.stage = Stage::Failed;
        }
        result
    }

    fn advance(&mut self, stage: Stage) {
        debug!("Import session: {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    fn run(&mut self, host: &str, busid: &BusId, serial: Option<&str>) -> Result<u16> {
        if let Some(serial) = serial {
            validate_serial(serial)?;
        }

        self.advance(Stage::Connecting);
        let mut link = self.connector.connect(host)?;

        let mut request = OpHeader::request(OP_REQ_IMPORT).to_bytes();
        request.extend(OpImportRequest::new(busid).to_bytes());
        link.write_all(&request).map_err(Error::Network)?;
        self.advance(Stage::RequestSent);

        let header: OpHeader = read_message(&mut link)?;
        check_reply(&header, OP_REP_IMPORT, busid.as_str())?;
        let reply: OpImportReply = read_message(&mut link)?;
        let device = reply.device;
        if device.busid != busid.as_str() {
            return Err(Error::ProtocolViolation(format!(
                "requested bus id {} but host replied with {}",
                busid, device.busid
            )));
        }
        self.advance(Stage::ReplyValidated);

        let devid = device.devid();
        let speed = device.device_speed();
        info!(
            "Host {} exported {} ({:04x}:{:04x}) devid={:#010x} speed={:?}",
            host, busid, device.id_vendor, device.id_product, devid, speed
        );

        let mut vhci = self.opener.open()?;
        let port = vhci.acquire_port(speed)?;
        self.advance(Stage::SlotAcquired);

        let payload = match self.build_payload(&mut link, port, &device, serial) {
            Ok(payload) => payload,
            Err(e) => {
                vhci.release_port(port);
                return Err(e);
            }
        };
        self.advance(Stage::DescriptorsFetched);

        if let Err(e) = vhci.attach(payload, link.as_fd()) {
            vhci.release_port(port);
            return Err(e);
        }
        self.advance(Stage::Attached);

        if let Err(HandoffError {
            failure,
            controller,
            link,
        }) = self.forwarder.hand_off(vhci, link)
        {
            drop(controller);
            drop(link);
            return Err(failure.into());
        }
        self.advance(Stage::ForwardingHandedOff);

        info!("Imported {} from {} on port {}", busid, host, port);
        Ok(port)
    }

    fn build_payload<L: Read + Write>(
        &self,
        link: &mut L,
        port: u16,
        device: &UsbDevice,
        serial: Option<&str>,
    ) -> Result<AttachPayload> {
        let devid = device.devid();
        let mut fetcher = DescriptorFetcher::new(link, devid, self.max_descriptor_size);
        let device_descriptor = fetcher.device_descriptor()?;
        check_device_descriptor(&device_descriptor, device)?;
        let config_descriptor = fetcher.config_descriptor()?;

        AttachPayloadBuilder::new(port, devid, device.device_speed())
            .serial(serial)
            .build(device_descriptor, config_descriptor)
    }
}
