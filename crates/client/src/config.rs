//! Client configuration management

use crate::forward::{
    ConfiguredForwarder, DEFAULT_FORWARDER_PROGRAM, KernelForwarder, ProcessForwarder,
};
use crate::network::{DEFAULT_MAX_DESCRIPTOR_SIZE, TcpConnector};
use anyhow::{Context, Result, anyhow};
use common::UsbIds;
use common::names::DEFAULT_USB_IDS_PATHS;
use protocol::USBIP_PORT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How an attached device's traffic is relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForwarderMode {
    /// The vhci_hcd kernel driver relays traffic on its own
    #[default]
    Kernel,
    /// A separate worker program inherits the controller handle and link
    Process,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub client: ClientSettings,
    pub network: NetworkSettings,
    pub vhci: VhciSettings,
    pub forwarder: ForwarderSettings,
    pub names: NamesSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub log_level: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// TCP port of USB/IP hosts
    pub port: u16,
    pub connect_timeout_secs: Option<u64>,
    /// Read/write timeout on established links
    pub io_timeout_secs: Option<u64>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            port: USBIP_PORT,
            connect_timeout_secs: None,
            io_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VhciSettings {
    pub sysfs_root: PathBuf,
    /// Upper bound for a configuration descriptor, in bytes
    pub max_descriptor_size: usize,
}

impl Default for VhciSettings {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            max_descriptor_size: DEFAULT_MAX_DESCRIPTOR_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderSettings {
    pub mode: ForwarderMode,
    /// Worker program for `process` mode, looked up in PATH
    pub program: String,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            mode: ForwarderMode::Kernel,
            program: DEFAULT_FORWARDER_PROGRAM.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NamesSettings {
    /// usb.ids database; the usual system locations are tried when unset
    pub usb_ids: Option<PathBuf>,
}

impl ClientConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbip-client/client.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        tracing::debug!(
            "Config: port={}, sysfs_root={}, forwarder={:?}",
            config.network.port,
            config.vhci.sysfs_root.display(),
            config.forwarder.mode
        );
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // Print to stderr since logging might not be initialized yet
                eprintln!("Config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbip-client").join("client.toml")
        } else {
            PathBuf::from(".config/usbip-client/client.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.client.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.client.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.network.port == 0 {
            return Err(anyhow!("Invalid network port 0"));
        }

        let max = self.vhci.max_descriptor_size;
        if !(9..=usize::from(u16::MAX)).contains(&max) {
            return Err(anyhow!(
                "Invalid max_descriptor_size {}, must be between 9 and 65535",
                max
            ));
        }

        if self.forwarder.mode == ForwarderMode::Process && self.forwarder.program.trim().is_empty() {
            return Err(anyhow!("Forwarder mode 'process' needs a program"));
        }

        Ok(())
    }

    /// TCP connector honoring the network settings
    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.network.port)
            .with_connect_timeout(self.network.connect_timeout_secs.map(Duration::from_secs))
            .with_io_timeout(self.network.io_timeout_secs.map(Duration::from_secs))
    }

    pub fn forwarder(&self) -> ConfiguredForwarder {
        match self.forwarder.mode {
            ForwarderMode::Kernel => ConfiguredForwarder::Kernel(KernelForwarder),
            ForwarderMode::Process => {
                ConfiguredForwarder::Process(ProcessForwarder::new(&self.forwarder.program))
            }
        }
    }

    /// Name database from the configured path, or the system one
    pub fn usb_ids(&self) -> UsbIds {
        match &self.names.usb_ids {
            Some(path) => UsbIds::load_first(&[expand_path(&path.to_string_lossy())]),
            None => UsbIds::load_first(DEFAULT_USB_IDS_PATHS),
        }
    }
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}
