//! Typed, validated configuration (spec §3/§6): zones, clients, system
//! tunables. Loading mechanics mirror the teacher's layered
//! defaults → file → environment approach.

use crate::error::SnapDogError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub sink: String,
    #[serde(default)]
    pub default_stream: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    pub mac: String,
    pub default_zone: u32,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_progress_interval")]
    pub progress_update_interval_ms: u64,
    #[serde(default = "default_snapcast_host")]
    pub snapcast_host: String,
    #[serde(default = "default_snapcast_port")]
    pub snapcast_port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Empty disables the MQTT sink (spec SPEC_FULL §E: publish-only bridge).
    #[serde(default)]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_username: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
}

fn default_progress_interval() -> u64 {
    500
}
fn default_snapcast_host() -> String {
    "localhost".to_string()
}
fn default_snapcast_port() -> u16 {
    1705
}
fn default_request_timeout() -> u64 {
    5_000
}
fn default_http_port() -> u16 {
    8080
}
fn default_mqtt_port() -> u16 {
    1883
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            progress_update_interval_ms: default_progress_interval(),
            snapcast_host: default_snapcast_host(),
            snapcast_port: default_snapcast_port(),
            request_timeout_ms: default_request_timeout(),
            http_port: default_http_port(),
            mqtt_host: String::new(),
            mqtt_port: default_mqtt_port(),
            mqtt_username: None,
            mqtt_password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub system: SystemConfig,
}

impl Config {
    /// Validates MAC format, sink shape, and index ranges. Run once after
    /// deserialisation; loading itself is a collaborator concern but the
    /// typed model and its invariants are core.
    pub fn validate(&self) -> Result<(), SnapDogError> {
        if self.zones.is_empty() {
            return Err(SnapDogError::InvalidArgument(
                "at least one zone must be configured".into(),
            ));
        }
        for zone in &self.zones {
            if zone.sink.trim().is_empty() {
                return Err(SnapDogError::InvalidArgument(format!(
                    "zone '{}' has an empty sink path",
                    zone.name
                )));
            }
        }
        for client in &self.clients {
            if !is_canonical_mac(&client.mac) {
                return Err(SnapDogError::InvalidArgument(format!(
                    "client '{}' has a malformed MAC '{}'",
                    client.name, client.mac
                )));
            }
            let zone_count = self.zones.len() as u32;
            if client.default_zone == 0 || client.default_zone > zone_count {
                return Err(SnapDogError::InvalidArgument(format!(
                    "client '{}' default_zone {} is out of range 1..={}",
                    client.name, client.default_zone, zone_count
                )));
            }
        }
        Ok(())
    }

    pub fn zone_count(&self) -> u32 {
        self.zones.len() as u32
    }

    pub fn client_count(&self) -> u32 {
        self.clients.len() as u32
    }
}

/// Canonical lowercase hex, colon-separated MAC, e.g. `aa:bb:cc:dd:ee:01`.
fn is_canonical_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()))
}

/// Stream-id convention (spec §6): sink basename with leading "zone"
/// prefix maps to capitalised `"Zone<n>"`; other basenames pass through.
pub fn stream_id_from_sink(sink: &str) -> String {
    let basename = std::path::Path::new(sink)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(sink);
    if let Some(rest) = basename.strip_prefix("zone") {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return format!("Zone{rest}");
        }
    }
    basename.to_string()
}

/// Config directory: `SNAPDOG_CONFIG_DIR` env override, else platform default.
pub fn get_config_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("SNAPDOG_CONFIG_DIR") {
        return std::path::PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join("Library/Application Support/snapdog");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return std::path::PathBuf::from(xdg).join("snapdog");
        }
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join(".config/snapdog");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return std::path::PathBuf::from(appdata).join("snapdog");
        }
    }

    std::path::PathBuf::from(".")
}

pub fn load_config() -> anyhow::Result<Config> {
    let config_dir = get_config_dir();

    let built = ::config::Config::builder()
        .set_default("system.progress_update_interval_ms", 500i64)?
        .set_default("system.snapcast_host", "localhost")?
        .set_default("system.snapcast_port", 1705i64)?
        .set_default("system.request_timeout_ms", 5000i64)?
        .set_default("system.http_port", 8080i64)?
        .set_default("system.mqtt_host", "")?
        .set_default("system.mqtt_port", 1883i64)?
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy())
                .required(false),
        )
        .add_source(
            ::config::Environment::with_prefix("SNAPDOG")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = built.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_derivation_matches_scenario_6() {
        assert_eq!(stream_id_from_sink("/snapsinks/zone7"), "Zone7");
        assert_eq!(stream_id_from_sink("/snapsinks/kitchen"), "kitchen");
    }

    #[test]
    fn rejects_malformed_mac() {
        let cfg = Config {
            zones: vec![ZoneConfig {
                name: "Zone1".into(),
                sink: "/snapsinks/zone1".into(),
                default_stream: None,
            }],
            clients: vec![ClientConfig {
                name: "bad".into(),
                mac: "not-a-mac".into(),
                default_zone: 1,
                icon: None,
            }],
            system: SystemConfig::default(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_default_zone_out_of_range() {
        let cfg = Config {
            zones: vec![ZoneConfig {
                name: "Zone1".into(),
                sink: "/snapsinks/zone1".into(),
                default_stream: None,
            }],
            clients: vec![ClientConfig {
                name: "c".into(),
                mac: "aa:bb:cc:dd:ee:01".into(),
                default_zone: 2,
                icon: None,
            }],
            system: SystemConfig::default(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_valid_config() {
        let cfg = Config {
            zones: vec![ZoneConfig {
                name: "Zone1".into(),
                sink: "/snapsinks/zone1".into(),
                default_stream: None,
            }],
            clients: vec![ClientConfig {
                name: "c".into(),
                mac: "aa:bb:cc:dd:ee:01".into(),
                default_zone: 1,
                icon: None,
            }],
            system: SystemConfig::default(),
        };
        assert!(cfg.validate().is_ok());
    }
}
