//! USB id name database
//!
//! Resolves vendor, product and class codes to human-readable names using the
//! `usb.ids` file shipped by most distributions. Lookups are total: unknown
//! ids resolve to a placeholder, and a missing database behaves like an empty
//! one.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Usual locations of the `usb.ids` database
pub const DEFAULT_USB_IDS_PATHS: &[&str] = &[
    "/usr/share/hwdata/usb.ids",
    "/usr/share/misc/usb.ids",
    "/usr/share/usb.ids",
    "/var/lib/usbutils/usb.ids",
];

/// Name lookup service used when presenting devices
pub trait NameLookup: Send + Sync {
    /// Vendor name, or a placeholder
    fn vendor(&self, vendor_id: u16) -> String;

    /// `"{vendor} : {product} ({vid}:{pid})"`
    fn product(&self, vendor_id: u16, product_id: u16) -> String;

    /// `"{class} / {subclass} / {protocol} ({c}/{s}/{p})"`
    fn class(&self, class: u8, subclass: u8, protocol: u8) -> String;
}

/// Parsed `usb.ids` tables
#[derive(Debug, Clone, Default)]
pub struct UsbIds {
    vendors: HashMap<u16, String>,
    products: HashMap<(u16, u16), String>,
    classes: HashMap<u8, String>,
    subclasses: HashMap<(u8, u8), String>,
    protocols: HashMap<(u8, u8, u8), String>,
}

#[derive(Clone, Copy)]
enum Section {
    None,
    Vendor(u16),
    Class(u8),
    Subclass(u8, u8),
}

impl UsbIds {
    /// Empty database; every lookup yields a placeholder
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the text of a `usb.ids` file
    ///
    /// Only the vendor/product tables and the `C` (class) section are kept;
    /// the remaining sections are skipped.
    pub fn parse(text: &str) -> Self {
        let mut ids = Self::default();
        let mut section = Section::None;

        for line in text.lines() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("\t\t") {
                if let Section::Subclass(class, subclass) = section {
                    if let Some((protocol, name)) = parse_entry(rest, 2) {
                        ids.protocols
                            .insert((class, subclass, protocol as u8), name.to_string());
                    }
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix('\t') {
                match section {
                    Section::Vendor(vendor) => {
                        if let Some((product, name)) = parse_entry(rest, 4) {
                            ids.products
                                .insert((vendor, product as u16), name.to_string());
                        }
                    }
                    Section::Class(class) | Section::Subclass(class, _) => {
                        if let Some((subclass, name)) = parse_entry(rest, 2) {
                            let subclass = subclass as u8;
                            ids.subclasses.insert((class, subclass), name.to_string());
                            section = Section::Subclass(class, subclass);
                        }
                    }
                    Section::None => {}
                }
                continue;
            }

            section = if let Some(rest) = line.strip_prefix("C ") {
                match parse_entry(rest, 2) {
                    Some((class, name)) => {
                        ids.classes.insert(class as u8, name.to_string());
                        Section::Class(class as u8)
                    }
                    None => Section::None,
                }
            } else if let Some((vendor, name)) = parse_entry(line, 4) {
                ids.vendors.insert(vendor as u16, name.to_string());
                Section::Vendor(vendor as u16)
            } else {
                Section::None
            };
        }

        ids
    }

    /// Load and parse a `usb.ids` file
    pub fn load(path: &Path) -> io::Result<Self> {
        // Older databases are Latin-1 in places
        let bytes = fs::read(path)?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// Load the first readable database among `candidates`, or an empty one
    pub fn load_first<P: AsRef<Path>>(candidates: &[P]) -> Self {
        for path in candidates {
            let path = path.as_ref();
            match Self::load(path) {
                Ok(ids) => {
                    debug!(
                        "Loaded usb.ids from {} ({} vendors)",
                        path.display(),
                        ids.vendors.len()
                    );
                    return ids;
                }
                Err(e) => debug!("usb.ids not usable at {}: {}", path.display(), e),
            }
        }

        debug!("No usb.ids database found, names will be placeholders");
        Self::empty()
    }

    pub fn vendor_name(&self, vendor_id: u16) -> Option<&str> {
        self.vendors.get(&vendor_id).map(String::as_str)
    }

    pub fn product_name(&self, vendor_id: u16, product_id: u16) -> Option<&str> {
        self.products
            .get(&(vendor_id, product_id))
            .map(String::as_str)
    }
}

impl NameLookup for UsbIds {
    fn vendor(&self, vendor_id: u16) -> String {
        self.vendor_name(vendor_id)
            .unwrap_or("unknown vendor")
            .to_string()
    }

    fn product(&self, vendor_id: u16, product_id: u16) -> String {
        format!(
            "{} : {} ({:04x}:{:04x})",
            self.vendor_name(vendor_id).unwrap_or("unknown vendor"),
            self.product_name(vendor_id, product_id)
                .unwrap_or("unknown product"),
            vendor_id,
            product_id
        )
    }

    fn class(&self, class: u8, subclass: u8, protocol: u8) -> String {
        if class == 0 && subclass == 0 && protocol == 0 {
            return "(Defined at Interface level) (00/00/00)".to_string();
        }

        format!(
            "{} / {} / {} ({:02x}/{:02x}/{:02x})",
            self.classes
                .get(&class)
                .map_or("unknown class", String::as_str),
            self.subclasses
                .get(&(class, subclass))
                .map_or("unknown subclass", String::as_str),
            self.protocols
                .get(&(class, subclass, protocol))
                .map_or("unknown protocol", String::as_str),
            class,
            subclass,
            protocol
        )
    }
}

/// Split `"{hex id}  {name}"` where the id has exactly `width` hex digits
fn parse_entry(line: &str, width: usize) -> Option<(u32, &str)> {
    let id = line.get(..width)?;
    let rest = line.get(width..)?;
    if !id.bytes().all(|b| b.is_ascii_hexdigit()) || !rest.starts_with([' ', '\t']) {
        return None;
    }

    let name = rest.trim();
    if name.is_empty() {
        return None;
    }

    u32::from_str_radix(id, 16).ok().map(|id| (id, name))
}
