//! Persistent configuration for ocrtap.
//!
//! Stores user settings in `~/.ocrtap/config.json`: where WDA is, which OCR
//! engine to use, and the automation timings. Every field has a default, so
//! an empty or partial file is fine.
//!
//! # Example
//!
//! ```no_run
//! use ocrtap_core::config::OcrtapConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = OcrtapConfig::load();
//! println!("WDA at {}", config.wda_url);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::automator::AutomatorSettings;
use crate::driver::DriverConfig;
use crate::ocr::OcrSettings;
use crate::wda_client::DEFAULT_WDA_URL;

const CONFIG_FILENAME: &str = "config.json";

/// Port WDA listens on inside the device.
pub const DEFAULT_WDA_PORT: u16 = 8100;

/// `~/.ocrtap`, or `./.ocrtap` when there is no home directory.
pub fn ocrtap_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ocrtap")
}

/// `~/.ocrtap/config.json`.
pub fn config_path() -> PathBuf {
    ocrtap_dir().join(CONFIG_FILENAME)
}

/// Where `--log-file` writes by default.
pub fn logs_dir() -> PathBuf {
    ocrtap_dir().join("logs")
}

fn default_port() -> u16 {
    DEFAULT_WDA_PORT
}

/// A USB device whose WDA port should be forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Device UDID. Without one the first attached device is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udid: Option<String>,
    #[serde(default = "default_port")]
    pub local_port: u16,
    #[serde(default = "default_port")]
    pub device_port: u16,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            udid: None,
            local_port: DEFAULT_WDA_PORT,
            device_port: DEFAULT_WDA_PORT,
        }
    }
}

/// Persistent ocrtap configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrtapConfig {
    /// WDA base URL, used unless a device is configured.
    pub wda_url: String,
    pub request_timeout_secs: u64,
    /// App that new sessions are opened against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    /// Forward WDA from a USB device instead of using `wda_url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSettings>,
    pub ocr: OcrSettings,
    pub automation: AutomatorSettings,
    /// Screenshot pixels per WDA point; detected when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinate_scale: Option<f64>,
    pub screenshot_dir: PathBuf,
}

impl Default for OcrtapConfig {
    fn default() -> Self {
        Self {
            wda_url: DEFAULT_WDA_URL.to_string(),
            request_timeout_secs: 30,
            bundle_id: None,
            device: None,
            ocr: OcrSettings::default(),
            automation: AutomatorSettings::default(),
            coordinate_scale: None,
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}

impl OcrtapConfig {
    /// Load config from `~/.ocrtap/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.ocrtap/config.json`, creating the directory.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&config_path())
    }

    /// Writes pretty JSON to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// How to reach WDA.
    ///
    /// A device with a UDID wins over `wda_url`. Returns `None` when a
    /// device section is present without a UDID; the caller has to pick one
    /// from the attached devices.
    pub fn driver_config(&self) -> Option<DriverConfig> {
        match &self.device {
            Some(device) => device.udid.as_ref().map(|udid| DriverConfig::Device {
                udid: udid.clone(),
                local_port: device.local_port,
                device_port: device.device_port,
            }),
            None => Some(DriverConfig::Wda {
                url: self.wda_url.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OcrEngineKind;

    #[test]
    fn default_config_points_at_localhost() {
        let config = OcrtapConfig::default();
        assert_eq!(config.wda_url, "http://localhost:8100");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.screenshot_dir, PathBuf::from("screenshots"));
        assert_eq!(
            config.driver_config(),
            Some(DriverConfig::Wda {
                url: "http://localhost:8100".into()
            })
        );
    }

    #[test]
    fn deserialize_empty_json() {
        let loaded: OcrtapConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, OcrtapConfig::default());
    }

    #[test]
    fn partial_nested_sections() {
        let loaded: OcrtapConfig = serde_json::from_str(
            r#"{
                "device": { "udid": "00008110-ABC" },
                "ocr": { "engine": "paddle" },
                "automation": { "action_delay_ms": 100 }
            }"#,
        )
        .unwrap();
        assert_eq!(loaded.ocr.engine, OcrEngineKind::Paddle);
        assert_eq!(loaded.ocr.language, "eng");
        assert_eq!(loaded.automation.action_delay_ms, 100);
        assert_eq!(loaded.automation.default_timeout_ms, 10_000);
        assert_eq!(
            loaded.driver_config(),
            Some(DriverConfig::Device {
                udid: "00008110-ABC".into(),
                local_port: 8100,
                device_port: 8100,
            })
        );
    }

    #[test]
    fn device_without_udid_needs_lookup() {
        let config = OcrtapConfig {
            device: Some(DeviceSettings::default()),
            ..OcrtapConfig::default()
        };
        assert!(config.driver_config().is_none());
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = OcrtapConfig {
            bundle_id: Some("com.example.app".into()),
            coordinate_scale: Some(3.0),
            ..OcrtapConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(OcrtapConfig::load_from(&path), config);
    }

    #[test]
    fn unparsable_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(OcrtapConfig::load_from(&path), OcrtapConfig::default());
        assert_eq!(
            OcrtapConfig::load_from(&dir.path().join("missing.json")),
            OcrtapConfig::default()
        );
    }

    #[test]
    fn paths_under_ocrtap_dir() {
        assert!(logs_dir().starts_with(ocrtap_dir()));
        assert!(config_path().ends_with(".ocrtap/config.json"));
    }
}
