use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};

pub const DEFAULT_SOURCE_URL: &str =
    "https://raw.githubusercontent.com/SchroderHill/point_data_RFM/main/points_geojson.geojson";

/// Snapshots older than this (since the last successful fetch) are refetched.
pub const DEFAULT_COOLDOWN_MS: i64 = 300_000;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub view: ViewConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
    pub cooldown_ms: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/session"),
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
    /// Click radius, in degrees, within which a map click selects a point.
    pub hit_tolerance_deg: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: PathBuf::from("public"),
            hit_tolerance_deg: 0.05,
        }
    }
}

/// Regional view the map returns to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(default)]
pub struct ViewConfig {
    pub center: [f64; 2],
    pub zoom: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            center: [173.942053519644503, -41.399980118741027],
            zoom: 4.0,
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.source.url, DEFAULT_SOURCE_URL);
        assert_eq!(config.storage.cooldown_ms, 300_000);
        assert_eq!(config.view.zoom, 4.0);
    }

    #[test]
    fn sections_override_defaults() {
        let config = AppConfig::from_toml(
            r#"
[source]
url = "http://localhost:8000/points.geojson"

[storage]
dir = "/tmp/slipwatch"
cooldown_ms = 60000

[server]
port = 8088
"#,
        )
        .unwrap();

        assert_eq!(config.source.url, "http://localhost:8000/points.geojson");
        assert_eq!(config.source.timeout_secs, 10);
        assert_eq!(config.storage.dir, PathBuf::from("/tmp/slipwatch"));
        assert_eq!(config.storage.cooldown_ms, 60_000);
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.static_dir, PathBuf::from("public"));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(AppConfig::from_toml("[server\nport = 1").is_err());
    }
}
