//! Remote device listing

use super::check_reply;
use super::transport::Connector;
use crate::error::{Error, Result};
use common::NameLookup;
use protocol::{
    MAX_INTERFACES, OP_REP_DEVLIST, OP_REQ_DEVLIST, OpDevlistReply, OpHeader, UsbDevice,
    UsbInterface, Wire, read_message,
};
use std::io::Write;
use tracing::{debug, info};

/// A device exported by a remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedDevice {
    pub busid: String,
    /// Sysfs path of the device on the host
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: String,
    /// Device-level class name
    pub class_name: String,
    /// Interface class names, at most [`MAX_INTERFACES`]
    pub interfaces: Vec<String>,
}

/// List the devices `host` exports
///
/// Either the whole list is returned or nothing: any receive failure discards
/// what was collected so far.
pub fn list_exported<C: Connector>(
    connector: &C,
    host: &str,
    names: &dyn NameLookup,
) -> Result<Vec<ExportedDevice>> {
    let mut link = connector.connect(host)?;

    link.write_all(&OpHeader::request(OP_REQ_DEVLIST).to_bytes())
        .map_err(Error::Network)?;

    let header: OpHeader = read_message(&mut link)?;
    check_reply(&header, OP_REP_DEVLIST, host)?;
    let reply: OpDevlistReply = read_message(&mut link)?;

    if reply.ndev == 0 {
        info!("No exportable devices on {}", host);
        return Ok(Vec::new());
    }
    debug!("{} exports {} device(s)", host, reply.ndev);

    // ndev comes from the wire; don't size allocations by it
    let mut devices = Vec::new();
    for _ in 0..reply.ndev {
        let device: UsbDevice = read_message(&mut link)?;

        let declared = usize::from(device.num_interfaces);
        let mut interfaces = Vec::with_capacity(declared.min(MAX_INTERFACES));
        // The host sends every declared record; ones past the cap are read
        // and dropped so the next device record starts where expected
        for i in 0..declared {
            let iface: UsbInterface = read_message(&mut link)?;
            if i < MAX_INTERFACES {
                interfaces.push(names.class(iface.class, iface.subclass, iface.protocol));
            }
        }
        if declared > MAX_INTERFACES {
            debug!(
                "{} declares {} interfaces, keeping the first {}",
                device.busid, declared, MAX_INTERFACES
            );
        }

        devices.push(ExportedDevice {
            product_name: names.product(device.id_vendor, device.id_product),
            class_name: names.class(
                device.device_class,
                device.device_subclass,
                device.device_protocol,
            ),
            busid: device.busid,
            path: device.path,
            vendor_id: device.id_vendor,
            product_id: device.id_product,
            interfaces,
        });
    }

    Ok(devices)
}
