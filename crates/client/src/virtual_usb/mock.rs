//! In-memory virtual host controller for tests
//!
//! All handles opened from one [`MockOpener`] share a port table, so a test
//! can inspect what an operation left behind after the handle is gone.

use super::payload::{ATTACH_HEADER_SIZE, AttachPayload};
use super::{HubSpeed, PortState, PortStatus, Vhci, VhciOpener};
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use protocol::{DEVICE_DESCRIPTOR_SIZE, DeviceSpeed};
use std::collections::BTreeSet;
use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared controller state
#[derive(Debug, Default)]
pub struct MockState {
    pub ports: Vec<PortStatus>,
    pub reserved: BTreeSet<u16>,
    /// Payloads of successful attaches, in order
    pub attached: Vec<AttachPayload>,
    pub opened: usize,
    pub closed: usize,
    pub fail_attach: bool,
    pub unavailable: bool,
}

impl MockState {
    fn port_mut(&mut self, port: u16) -> Option<&mut PortStatus> {
        self.ports.iter_mut().find(|p| p.port == port)
    }
}

/// Opens [`MockVhci`] handles over a shared port table
#[derive(Debug, Clone)]
pub struct MockOpener {
    state: Arc<Mutex<MockState>>,
}

impl MockOpener {
    /// Controller with `hs` USB 2.0 ports followed by `ss` USB 3.x ports, all free
    pub fn new(hs: u16, ss: u16) -> Self {
        let ports = (0..hs + ss)
            .map(|port| PortStatus {
                port,
                hub: if port < hs { HubSpeed::High } else { HubSpeed::Super },
                state: PortState::Null,
                speed: DeviceSpeed::Unknown,
                devid: 0,
                vendor_id: 0,
                product_id: 0,
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(MockState {
                ports,
                ..Default::default()
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ports neither used nor reserved
    pub fn free_ports(&self) -> usize {
        let state = self.state();
        state
            .ports
            .iter()
            .filter(|p| p.state == PortState::Null && !state.reserved.contains(&p.port))
            .count()
    }

    /// Handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        let state = self.state();
        state.opened - state.closed
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.state().fail_attach = fail;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Put a port into `state` as if a device had been imported earlier
    pub fn set_port(&self, port: u16, state: PortState, vendor_id: u16, product_id: u16) {
        let mut guard = self.state();
        if let Some(status) = guard.port_mut(port) {
            status.state = state;
            status.vendor_id = vendor_id;
            status.product_id = product_id;
        }
    }
}

impl VhciOpener for MockOpener {
    type Vhci = MockVhci;

    fn open(&self) -> Result<MockVhci> {
        if self.state().unavailable {
            return Err(Error::DriverUnavailable("mock controller disabled".into()));
        }

        let handle = File::open("/dev/null")
            .map_err(|e| Error::DriverUnavailable(format!("cannot open /dev/null: {}", e)))?;
        self.state().opened += 1;

        Ok(MockVhci {
            state: Arc::clone(&self.state),
            handle,
        })
    }
}

/// Handle to the mock controller; dropping it counts as a close
#[derive(Debug)]
pub struct MockVhci {
    state: Arc<Mutex<MockState>>,
    handle: File,
}

impl MockVhci {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MockVhci {
    fn drop(&mut self) {
        self.state().closed += 1;
    }
}

impl AsFd for MockVhci {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.handle.as_fd()
    }
}

impl Vhci for MockVhci {
    fn acquire_port(&mut self, speed: DeviceSpeed) -> Result<u16> {
        let hub = HubSpeed::for_device(speed);
        let mut state = self.state();

        let port = state
            .ports
            .iter()
            .find(|p| p.hub == hub && p.state == PortState::Null && !state.reserved.contains(&p.port))
            .map(|p| p.port)
            .ok_or(Error::NoFreeSlot(speed))?;

        state.reserved.insert(port);
        Ok(port)
    }

    fn release_port(&mut self, port: u16) {
        self.state().reserved.remove(&port);
    }

    fn attach(&mut self, payload: AttachPayload, _link: BorrowedFd<'_>) -> Result<()> {
        let port = payload.port();
        let record = payload.encode();
        let mut state = self.state();

        if state.fail_attach {
            return Err(Error::AttachRejected {
                port,
                reason: "rejected by controller".into(),
            });
        }
        let Some((devid, vendor_id, product_id)) = read_record(&record) else {
            return Err(Error::AttachRejected {
                port,
                reason: "malformed attach record".into(),
            });
        };
        if !state.reserved.remove(&port) {
            return Err(Error::AttachRejected {
                port,
                reason: "port was not reserved".into(),
            });
        }

        if let Some(status) = state.port_mut(port) {
            status.state = PortState::Used;
            status.speed = payload.speed();
            status.devid = devid;
            status.vendor_id = vendor_id;
            status.product_id = product_id;
        }
        state.attached.push(payload);
        Ok(())
    }

    fn detach(&mut self, port: u16) -> Result<()> {
        let mut state = self.state();
        match state.port_mut(port) {
            Some(status) if status.state.is_occupied() => {
                status.state = PortState::Null;
                status.devid = 0;
                Ok(())
            }
            _ => Err(Error::SlotNotFound(port)),
        }
    }

    fn ports(&mut self) -> Result<Vec<PortStatus>> {
        Ok(self.state().ports.clone())
    }
}

/// Devid and vendor/product ids of an encoded attach record
///
/// The size field must cover the record exactly and the device descriptor
/// must follow the header.
fn read_record(record: &[u8]) -> Option<(u32, u16, u16)> {
    let size = LittleEndian::read_u32(record.get(0..4)?) as usize;
    if size != record.len() {
        return None;
    }
    let devid = LittleEndian::read_u32(record.get(4..8)?);
    let desc = record.get(ATTACH_HEADER_SIZE..ATTACH_HEADER_SIZE + DEVICE_DESCRIPTOR_SIZE)?;
    Some((
        devid,
        LittleEndian::read_u16(&desc[8..10]),
        LittleEndian::read_u16(&desc[10..12]),
    ))
}
