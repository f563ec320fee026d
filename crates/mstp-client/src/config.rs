//! Session configuration
//!
//! Link parameters, the local device identity and engine timing. The option
//! names accepted here match the keys of the `[mstp]` / `[device]` sections
//! used by existing deployments.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::link::LinkParams;
use crate::types::{Mac, ObjectIdentifier, ObjectType, Segmentation, MAX_INSTANCE};

/// Complete session configuration (`[mstp]`, `[device]`, `[timing]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, alias = "MSTP", alias = "BACpypes")]
    pub mstp: LinkConfig,
    #[serde(default, alias = "Device")]
    pub device: LocalDeviceConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// MS/TP link parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Local MAC on the MS/TP segment
    #[serde(default, alias = "_address", alias = "mstp_address")]
    pub address: Option<u32>,
    /// Serial interface (e.g., "/dev/ttyS1")
    #[serde(default, alias = "_interface", alias = "port", alias = "serial_port")]
    pub interface: Option<String>,
    #[serde(default = "default_baudrate", alias = "_baudrate", alias = "baud")]
    pub baudrate: u32,
    #[serde(default = "default_max_masters", alias = "_max_masters", alias = "maxmasters")]
    pub max_masters: u32,
    #[serde(
        default = "default_max_info_frames",
        alias = "_maxinfo",
        alias = "maxinfo",
        alias = "maxinfoframes"
    )]
    pub max_info_frames: u32,
}

fn default_baudrate() -> u32 {
    38400
}

fn default_max_masters() -> u32 {
    127
}

fn default_max_info_frames() -> u32 {
    1
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: None,
            interface: None,
            baudrate: default_baudrate(),
            max_masters: default_max_masters(),
            max_info_frames: default_max_info_frames(),
        }
    }
}

/// Identity of the local BACnet device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDeviceConfig {
    #[serde(rename = "objectName", alias = "object_name", default = "default_object_name")]
    pub object_name: String,
    #[serde(rename = "objectIdentifier", alias = "device_id", default = "default_device_instance")]
    pub object_identifier: u32,
    #[serde(rename = "maxApduLengthAccepted", alias = "max_apdu", default = "default_max_apdu")]
    pub max_apdu_length_accepted: u32,
    #[serde(rename = "segmentationSupported", alias = "segmentation", default = "default_segmentation")]
    pub segmentation_supported: String,
    #[serde(rename = "vendorIdentifier", alias = "vendor_id", default = "default_vendor_id")]
    pub vendor_identifier: u32,
}

fn default_object_name() -> String {
    "MSTP-Client".to_string()
}

fn default_device_instance() -> u32 {
    599
}

fn default_max_apdu() -> u32 {
    1024
}

fn default_segmentation() -> String {
    "no segmentation".to_string()
}

fn default_vendor_id() -> u32 {
    15
}

impl Default for LocalDeviceConfig {
    fn default() -> Self {
        Self {
            object_name: default_object_name(),
            object_identifier: default_device_instance(),
            max_apdu_length_accepted: default_max_apdu(),
            segmentation_supported: default_segmentation(),
            vendor_identifier: default_vendor_id(),
        }
    }
}

/// Engine timing knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Deadline for a confirmed transaction before it is failed with a timeout
    #[serde(default = "default_apdu_timeout_ms")]
    pub apdu_timeout_ms: u64,
    /// Capacity of each discovery call's announcement queue
    #[serde(default = "default_discovery_queue_capacity")]
    pub discovery_queue_capacity: usize,
    /// How long the engine waits on the link per loop iteration
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_apdu_timeout_ms() -> u64 {
    10_000
}

fn default_discovery_queue_capacity() -> usize {
    256
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            apdu_timeout_ms: default_apdu_timeout_ms(),
            discovery_queue_capacity: default_discovery_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TimingConfig {
    pub fn apdu_timeout(&self) -> Duration {
        Duration::from_millis(self.apdu_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Validated identity of the local device, as announced in I-Am
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDevice {
    pub object_identifier: ObjectIdentifier,
    pub object_name: String,
    pub max_apdu_length_accepted: u32,
    pub segmentation: Segmentation,
    pub vendor_identifier: u32,
}

impl SessionConfig {
    /// Configuration for a local station on the given interface, defaults elsewhere
    pub fn new(address: Mac, interface: impl Into<String>) -> Self {
        Self {
            mstp: LinkConfig {
                address: Some(u32::from(address)),
                interface: Some(interface.into()),
                ..LinkConfig::default()
            },
            ..Self::default()
        }
    }

    /// Parse a TOML document with `[mstp]`, `[device]` and optional `[timing]` tables
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Create config from environment variables
    ///
    /// Reads:
    /// - `MSTP_ADDRESS`: Local MAC
    /// - `MSTP_INTERFACE`: Serial interface
    /// - `MSTP_BAUDRATE`, `MSTP_MAX_MASTERS`, `MSTP_MAX_INFO_FRAMES`: Link tuning
    /// - `MSTP_DEVICE_NAME`, `MSTP_DEVICE_ID`: Local device identity
    pub fn from_env() -> Result<Self, ConfigError> {
        fn number<T: std::str::FromStr>(var: &str, field: &'static str) -> Result<Option<T>, ConfigError> {
            match std::env::var(var) {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue {
                        field,
                        reason: format!("{} is not a number: {:?}", var, raw),
                    }),
                Err(_) => Ok(None),
            }
        }

        let mut config = Self::default();
        config.mstp.address = number("MSTP_ADDRESS", "address")?;
        config.mstp.interface = std::env::var("MSTP_INTERFACE").ok();
        if let Some(baudrate) = number("MSTP_BAUDRATE", "baudrate")? {
            config.mstp.baudrate = baudrate;
        }
        if let Some(max_masters) = number("MSTP_MAX_MASTERS", "max_masters")? {
            config.mstp.max_masters = max_masters;
        }
        if let Some(max_info_frames) = number("MSTP_MAX_INFO_FRAMES", "max_info_frames")? {
            config.mstp.max_info_frames = max_info_frames;
        }
        if let Ok(name) = std::env::var("MSTP_DEVICE_NAME") {
            config.device.object_name = name;
        }
        if let Some(instance) = number("MSTP_DEVICE_ID", "objectIdentifier")? {
            config.device.object_identifier = instance;
        }
        Ok(config)
    }

    /// Check the configuration without starting anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve().map(|_| ())
    }

    /// Validate and split into link parameters and local identity
    pub(crate) fn resolve(&self) -> Result<(LinkParams, LocalDevice), ConfigError> {
        let address = self.mstp.address.ok_or(ConfigError::MissingAddress)?;
        let interface = self
            .mstp
            .interface
            .clone()
            .filter(|i| !i.trim().is_empty())
            .ok_or(ConfigError::MissingInterface)?;

        let mac = Mac::try_from(address)
            .ok()
            .filter(|mac| *mac < crate::types::BROADCAST_MAC)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "address",
                reason: format!("MS/TP MAC must be 0..=254, got {}", address),
            })?;
        if self.mstp.max_masters > 127 {
            return Err(ConfigError::InvalidValue {
                field: "max_masters",
                reason: format!("must be at most 127, got {}", self.mstp.max_masters),
            });
        }
        if self.mstp.max_info_frames == 0 || self.mstp.max_info_frames > 255 {
            return Err(ConfigError::InvalidValue {
                field: "max_info_frames",
                reason: format!("must be 1..=255, got {}", self.mstp.max_info_frames),
            });
        }
        if self.mstp.baudrate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "baudrate",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.device.object_identifier > MAX_INSTANCE {
            return Err(ConfigError::InvalidValue {
                field: "objectIdentifier",
                reason: format!("instance {} exceeds {}", self.device.object_identifier, MAX_INSTANCE),
            });
        }
        if self.timing.apdu_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "apdu_timeout_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        let segmentation = Segmentation::from_name(&self.device.segmentation_supported).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "segmentationSupported",
                reason: format!("unknown segmentation {:?}", self.device.segmentation_supported),
            }
        })?;

        let params = LinkParams {
            mac,
            interface,
            baudrate: self.mstp.baudrate,
            max_masters: self.mstp.max_masters as u8,
            max_info_frames: self.mstp.max_info_frames as u8,
        };
        let device = LocalDevice {
            object_identifier: ObjectIdentifier::new(ObjectType::DEVICE, self.device.object_identifier),
            object_name: self.device.object_name.clone(),
            max_apdu_length_accepted: self.device.max_apdu_length_accepted,
            segmentation,
            vendor_identifier: self.device.vendor_identifier,
        };
        Ok((params, device))
    }
}
