//! USB/IP protocol version

/// The only protocol version spoken on the wire (1.1.1)
pub const USBIP_VERSION: u16 = 0x0111;

/// Well-known TCP port of a USB/IP host
pub const USBIP_PORT: u16 = 3240;

/// Check a version field received from a peer
pub fn is_supported(version: u16) -> bool {
    version == USBIP_VERSION
}
