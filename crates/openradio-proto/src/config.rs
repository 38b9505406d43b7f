use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub catalogue: CatalogueConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding the favorites, locals and latest-station files.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Idle time before the service stops itself.
    #[serde(default = "default_auto_stop_secs")]
    pub auto_stop_secs: u64,
    /// Volume multiplier applied while another source holds audio focus.
    #[serde(default = "default_duck_volume")]
    pub duck_volume: f32,
    #[serde(default = "default_master_volume")]
    pub master_volume: u8,
    /// Resume when the same bluetooth device reconnects after a disconnect.
    #[serde(default = "default_bluetooth_auto_play")]
    pub bluetooth_auto_play: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueConfig {
    #[serde(default = "default_catalogue_url")]
    pub base_url: String,
    #[serde(default = "default_items_per_page")]
    pub items_per_page: u32,
    /// Number of recently added stations listed for car clients.
    #[serde(default = "default_car_recent_limit")]
    pub car_recent_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Timeout for fetching a playlist behind an unplayable stream URL.
    #[serde(default = "default_playlist_timeout")]
    pub playlist_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocationConfig {
    /// ISO 3166 code of the listener's country.  Empty when unknown.
    #[serde(default)]
    pub country_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            auto_stop_secs: default_auto_stop_secs(),
            duck_volume: default_duck_volume(),
            master_volume: default_master_volume(),
            bluetooth_auto_play: default_bluetooth_auto_play(),
            workers: default_workers(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_socket_port(),
        }
    }
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalogue_url(),
            items_per_page: default_items_per_page(),
            car_recent_limit: default_car_recent_limit(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            playlist_timeout_secs: default_playlist_timeout(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    platform::data_dir()
}

fn default_auto_stop_secs() -> u64 {
    30
}

fn default_duck_volume() -> f32 {
    0.2
}

fn default_master_volume() -> u8 {
    100
}

fn default_bluetooth_auto_play() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_socket_port() -> u16 {
    platform::SERVICE_TCP_PORT
}

fn default_catalogue_url() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_items_per_page() -> u32 {
    30
}

fn default_car_recent_limit() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_playlist_timeout() -> u64 {
    3
}

fn default_backup_dir() -> PathBuf {
    platform::data_dir().join("backup")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.socket.port, platform::SERVICE_TCP_PORT);
        assert_eq!(config.service.auto_stop_secs, 30);
        assert!((config.service.duck_volume - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.catalogue.car_recent_limit, 10);
        assert!(config.location.country_code.is_empty());
        assert!(config.backup.dir.ends_with("openradio/backup"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [service]
            master_volume = 40

            [location]
            country_code = "UA"
            "#,
        )
        .unwrap();
        assert_eq!(config.service.master_volume, 40);
        assert_eq!(config.service.workers, 4);
        assert_eq!(config.location.country_code, "UA");
        assert_eq!(config.catalogue.items_per_page, 30);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.http.port, config.http.port);
        assert_eq!(back.service.state_dir, config.service.state_dir);
    }
}
