//! Linux virtual host controller using vhci_hcd
//!
//! The vhci_hcd kernel module (part of the USB/IP subsystem) exposes its
//! controller through sysfs:
//!
//! - `/sys/devices/platform/vhci_hcd.X/attach` - attach a device
//! - `/sys/devices/platform/vhci_hcd.X/detach` - detach a device
//! - `/sys/devices/platform/vhci_hcd.X/status[.N]` - port table
//!
//! ## Status format
//!
//! ```text
//! hub port sta spd dev      sockfd local_busid
//! hs  0000 006 003 00010002 000003 3-1
//! ss  0008 004 000 00000000 000000 0-0
//! ```
//!
//! ## Attach format
//!
//! Write to `attach`: `<port> <sockfd> <devid> <speed>`. The kernel takes its
//! own reference to the socket, so the client may close its copy afterwards.
//!
//! # Limitations
//!
//! - Requires the vhci_hcd kernel module (`modprobe vhci-hcd`)
//! - Writing `attach`/`detach` requires root or matching udev rules

use super::payload::AttachPayload;
use super::{HubSpeed, PortState, PortStatus, Vhci, VhciOpener};
use crate::error::{Error, Result};
use protocol::DeviceSpeed;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Opens [`SysfsVhci`] handles below a sysfs root
#[derive(Debug, Clone)]
pub struct SysfsOpener {
    sysfs_root: PathBuf,
}

impl SysfsOpener {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
        }
    }
}

impl Default for SysfsOpener {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl VhciOpener for SysfsOpener {
    type Vhci = SysfsVhci;

    fn open(&self) -> Result<SysfsVhci> {
        SysfsVhci::open(&self.sysfs_root)
    }
}

/// Handle to a vhci_hcd controller
///
/// Holds the controller's sysfs directory open. Ports handed out by
/// [`Vhci::acquire_port`] are remembered until attached or released so that a
/// second reservation through the same handle picks a different port.
#[derive(Debug)]
pub struct SysfsVhci {
    sysfs_root: PathBuf,
    vhci_path: PathBuf,
    dir: File,
    reserved: BTreeSet<u16>,
}

impl SysfsVhci {
    /// Locate and open the controller
    pub fn open(sysfs_root: &Path) -> Result<Self> {
        let vhci_path = Self::find_vhci_device(sysfs_root)?;
        let dir = File::open(&vhci_path).map_err(|e| {
            Error::DriverUnavailable(format!("cannot open {}: {}", vhci_path.display(), e))
        })?;

        debug!("Opened vhci_hcd at {}", vhci_path.display());

        Ok(Self {
            sysfs_root: sysfs_root.to_path_buf(),
            vhci_path,
            dir,
            reserved: BTreeSet::new(),
        })
    }

    pub fn vhci_path(&self) -> &Path {
        &self.vhci_path
    }

    /// Find the vhci_hcd device path
    fn find_vhci_device(sysfs_root: &Path) -> Result<PathBuf> {
        let platform = sysfs_root.join("devices/platform");

        for i in 0..4 {
            let path = platform.join(format!("vhci_hcd.{}", i));
            if path.is_dir() {
                return Ok(path);
            }
        }

        // Older kernels register a single controller without a suffix
        let path = platform.join("vhci_hcd");
        if path.is_dir() {
            return Ok(path);
        }

        Err(Error::DriverUnavailable(format!(
            "vhci_hcd not found under {}, load the kernel module: sudo modprobe vhci-hcd",
            platform.display()
        )))
    }

    /// `status`, `status.1`, ... one per controller instance
    fn status_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.vhci_path.join("status")];
        for i in 1.. {
            let path = self.vhci_path.join(format!("status.{}", i));
            if !path.exists() {
                break;
            }
            files.push(path);
        }
        files
    }

    fn read_status(&self) -> Result<Vec<PortStatus>> {
        let mut ports = Vec::new();

        for path in self.status_files() {
            let text = fs::read_to_string(&path).map_err(|e| {
                Error::DriverUnavailable(format!("cannot read {}: {}", path.display(), e))
            })?;

            for line in text.lines().skip(1) {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_status_line(line) {
                    Some((mut status, local_busid)) => {
                        if status.state.is_occupied() {
                            self.fill_ids(&mut status, &local_busid);
                        }
                        ports.push(status);
                    }
                    None => warn!("Skipping unparseable vhci status row: {:?}", line),
                }
            }
        }

        Ok(ports)
    }

    /// Vendor and product of an imported device from its local bus id
    fn fill_ids(&self, status: &mut PortStatus, local_busid: &str) {
        let dev = self.sysfs_root.join("bus/usb/devices").join(local_busid);
        match (read_hex_id(&dev.join("idVendor")), read_hex_id(&dev.join("idProduct"))) {
            (Ok(vendor), Ok(product)) => {
                status.vendor_id = vendor;
                status.product_id = product;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("No ids for port {} ({}): {}", status.port, local_busid, e);
            }
        }
    }

    fn write_sysfs(&self, name: &str, text: &str) -> io::Result<()> {
        let path = self.vhci_path.join(name);
        debug!("Writing to {}: {}", path.display(), text.trim());

        let mut file = OpenOptions::new().write(true).open(&path)?;
        file.write_all(text.as_bytes())?;
        file.flush()
    }
}

impl AsFd for SysfsVhci {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.dir.as_fd()
    }
}

impl Vhci for SysfsVhci {
    fn acquire_port(&mut self, speed: DeviceSpeed) -> Result<u16> {
        let hub = HubSpeed::for_device(speed);
        let ports = self.read_status()?;

        let port = ports
            .iter()
            .find(|p| p.hub == hub && p.state == PortState::Null && !self.reserved.contains(&p.port))
            .map(|p| p.port)
            .ok_or(Error::NoFreeSlot(speed))?;

        self.reserved.insert(port);
        debug!("Reserved {:?} hub port {} for {:?} speed device", hub, port, speed);
        Ok(port)
    }

    fn release_port(&mut self, port: u16) {
        if self.reserved.remove(&port) {
            debug!("Released port {}", port);
        }
    }

    fn attach(&mut self, payload: AttachPayload, link: BorrowedFd<'_>) -> Result<()> {
        let port = payload.port();
        let text = format!(
            "{} {} {} {}\n",
            port,
            link.as_raw_fd(),
            payload.devid(),
            payload.speed().code()
        );

        self.write_sysfs("attach", &text)
            .map_err(|e| Error::AttachRejected {
                port,
                reason: e.to_string(),
            })?;

        self.reserved.remove(&port);
        info!("Attached devid {:#010x} on port {}", payload.devid(), port);
        Ok(())
    }

    fn detach(&mut self, port: u16) -> Result<()> {
        let occupied = self
            .read_status()?
            .iter()
            .any(|p| p.port == port && p.state.is_occupied());
        if !occupied {
            return Err(Error::SlotNotFound(port));
        }

        self.write_sysfs("detach", &format!("{}\n", port))
            .map_err(|e| Error::DriverUnavailable(format!("cannot detach port {}: {}", port, e)))?;

        info!("Detached port {}", port);
        Ok(())
    }

    fn ports(&mut self) -> Result<Vec<PortStatus>> {
        self.read_status()
    }
}

/// Parse `hub port sta spd dev sockfd local_busid`
fn parse_status_line(line: &str) -> Option<(PortStatus, String)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [hub, port, sta, spd, dev, _sockfd, local_busid] = fields.as_slice() else {
        return None;
    };

    let hub = match *hub {
        "hs" => HubSpeed::High,
        "ss" => HubSpeed::Super,
        _ => return None,
    };

    let status = PortStatus {
        port: port.parse().ok()?,
        hub,
        state: PortState::from_code(sta.parse().ok()?),
        speed: DeviceSpeed::from_code(spd.parse().ok()?),
        devid: u32::from_str_radix(dev, 16).ok()?,
        vendor_id: 0,
        product_id: 0,
    };

    Some((status, local_busid.to_string()))
}

fn read_hex_id(path: &Path) -> io::Result<u16> {
    let text = fs::read_to_string(path)?;
    u16::from_str_radix(text.trim(), 16).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
