//! USB/IP wire protocol
//!
//! This crate defines the fixed-size structures a USB/IP client exchanges
//! with a remote host: the operation header, import request/reply, the
//! device-list reply with its device and interface records, and the URB
//! headers used to fetch descriptors. All multi-byte integers travel in
//! network byte order; every structure has a fixed size and decoding a
//! buffer of any other size fails.
//!
//! # Example
//!
//! ```
//! use protocol::{BusId, OpHeader, OpImportRequest, Wire, OP_REQ_IMPORT};
//!
//! let busid: BusId = "1-1".parse().unwrap();
//!
//! let mut request = OpHeader::request(OP_REQ_IMPORT).to_bytes();
//! request.extend(OpImportRequest::new(&busid).to_bytes());
//! assert_eq!(request.len(), OpHeader::SIZE + OpImportRequest::SIZE);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod urb;
pub mod version;

pub use codec::{Wire, read_message, write_message};
pub use error::{ProtocolError, Result};
pub use messages::{
    OP_REP_DEVLIST, OP_REP_IMPORT, OP_REQ_DEVLIST, OP_REQ_IMPORT, OpDevlistReply, OpHeader,
    OpImportReply, OpImportRequest, OpStatus,
};
pub use types::{
    BUS_ID_SIZE, BusId, DeviceSpeed, MAX_INTERFACES, PATH_SIZE, UsbDevice, UsbInterface,
};
pub use urb::{
    CONFIG_DESCRIPTOR_HEADER_SIZE, CmdSubmit, DEVICE_DESCRIPTOR_SIZE, RetSubmit, SetupPacket,
    USB_DT_CONFIG, USB_DT_DEVICE, USBIP_CMD_SUBMIT, USBIP_DIR_IN, USBIP_RET_SUBMIT,
};
pub use version::{USBIP_PORT, USBIP_VERSION};
