//! Common utilities for usbip-client
//!
//! This crate provides functionality shared by the client library and its
//! tests: error handling, logging setup, the USB id name database, and a
//! scripted USB/IP host for exercising the wire protocol.

pub mod error;
pub mod logging;
pub mod names;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use names::{NameLookup, UsbIds};
