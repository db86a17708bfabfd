//! Local port operations: detach and the imported-device listing

use super::{PortState, Vhci, VhciOpener};
use crate::error::Result;
use common::NameLookup;
use protocol::DeviceSpeed;
use tracing::{debug, info};

/// A device currently imported on a local port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedDevice {
    pub port: u16,
    pub state: PortState,
    pub speed: DeviceSpeed,
    pub devid: u32,
    /// `"{vendor} : {product} ({vid}:{pid})"`
    pub product_name: String,
}

/// Release `port`, unplugging its device
///
/// The controller handle is closed on every path.
pub fn detach_port<O: VhciOpener>(opener: &O, port: u16) -> Result<()> {
    let mut vhci = opener.open()?;
    vhci.detach(port)?;
    info!("Port {} detached", port);
    Ok(())
}

/// List ports that carry an imported device
pub fn list_imported<O: VhciOpener>(opener: &O, names: &dyn NameLookup) -> Result<Vec<ImportedDevice>> {
    let mut vhci = opener.open()?;

    let devices: Vec<ImportedDevice> = vhci
        .ports()?
        .into_iter()
        .filter(|p| p.state.is_occupied())
        .map(|p| ImportedDevice {
            port: p.port,
            state: p.state,
            speed: p.speed,
            devid: p.devid,
            product_name: names.product(p.vendor_id, p.product_id),
        })
        .collect();

    debug!("{} imported device(s)", devices.len());
    Ok(devices)
}
