use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "sym_ble".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// UUIDs of the services and characteristics a device must expose.
/// Parsed once at startup into the capability catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogSettings {
    #[serde(default = "default_time_service_uuid")]
    pub time_service_uuid: String,
    #[serde(default = "default_current_time_uuid")]
    pub current_time_uuid: String,
    #[serde(default = "default_sym_service_uuid")]
    pub sym_service_uuid: String,
    #[serde(default = "default_integer_uuid")]
    pub integer_uuid: String,
    #[serde(default = "default_temperature_uuid")]
    pub temperature_uuid: String,
    #[serde(default = "default_button_click_uuid")]
    pub button_click_uuid: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            time_service_uuid: default_time_service_uuid(),
            current_time_uuid: default_current_time_uuid(),
            sym_service_uuid: default_sym_service_uuid(),
            integer_uuid: default_integer_uuid(),
            temperature_uuid: default_temperature_uuid(),
            button_click_uuid: default_button_click_uuid(),
        }
    }
}

fn default_time_service_uuid() -> String {
    protocol::TIME_SERVICE_UUID.to_string()
}
fn default_current_time_uuid() -> String {
    protocol::CURRENT_TIME_CHAR_UUID.to_string()
}
fn default_sym_service_uuid() -> String {
    protocol::SYM_SERVICE_UUID.to_string()
}
fn default_integer_uuid() -> String {
    protocol::INTEGER_CHAR_UUID.to_string()
}
fn default_temperature_uuid() -> String {
    protocol::TEMPERATURE_CHAR_UUID.to_string()
}
fn default_button_click_uuid() -> String {
    protocol::BUTTON_CLICK_CHAR_UUID.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Connection Settings
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,

    // Advanced BLE Settings
    #[serde(default)]
    pub catalog: CatalogSettings,

    /// Last device the user connected to
    #[serde(default)]
    pub last_device: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            connect_retries: default_connect_retries(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            catalog: CatalogSettings::default(),
            last_device: None,
        }
    }
}

fn default_connect_retries() -> u32 {
    1
}
fn default_connect_retry_delay_ms() -> u64 {
    100
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from an explicit file, falling back to defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("SymBle");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_device(&mut self, device: &str) -> anyhow::Result<()> {
        if self.settings.last_device.as_deref() != Some(device) {
            self.settings.last_device = Some(device.to_string());
            self.save()?;
        }
        Ok(())
    }
}
