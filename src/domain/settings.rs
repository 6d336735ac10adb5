use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
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
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
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
    "droid_toolbox".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Engine configuration. Every field has a serde default so a partial (or
/// empty) settings file always produces a working engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    // GATT contract; override only for firmware experiments
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub ble_command_char_uuid: String,
    #[serde(default = "default_notify_uuid")]
    pub ble_notify_char_uuid: String,

    // Connection behavior
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_write_ack_timeout_ms")]
    pub write_ack_timeout_ms: u64,
    #[serde(default = "default_logon_repeats")]
    pub logon_repeats: u32,
    #[serde(default = "default_command_delay_ms")]
    pub command_delay_ms: u64,

    // Beacon behavior
    #[serde(default = "default_beacon_floor_secs")]
    pub beacon_interval_floor_secs: u64,

    // Catalog overlay (versioned community data), applied over the built-ins
    #[serde(default)]
    pub catalog_overlay_path: Option<PathBuf>,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ble_service_uuid: default_service_uuid(),
            ble_command_char_uuid: default_command_uuid(),
            ble_notify_char_uuid: default_notify_uuid(),
            connect_timeout_ms: default_connect_timeout_ms(),
            write_ack_timeout_ms: default_write_ack_timeout_ms(),
            logon_repeats: default_logon_repeats(),
            command_delay_ms: default_command_delay_ms(),
            beacon_interval_floor_secs: default_beacon_floor_secs(),
            catalog_overlay_path: None,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_service_uuid() -> String {
    crate::infrastructure::bluetooth::protocol::SERVICE_UUID.to_string()
}
fn default_command_uuid() -> String {
    crate::infrastructure::bluetooth::protocol::COMMAND_CHAR_UUID.to_string()
}
fn default_notify_uuid() -> String {
    crate::infrastructure::bluetooth::protocol::NOTIFY_CHAR_UUID.to_string()
}
fn default_connect_timeout_ms() -> u64 {
    15_000
}
fn default_write_ack_timeout_ms() -> u64 {
    2_000
}
fn default_logon_repeats() -> u32 {
    crate::infrastructure::bluetooth::protocol::LOGON_REPEATS
}
fn default_command_delay_ms() -> u64 {
    crate::infrastructure::bluetooth::protocol::COMMAND_DELAY_MS
}
fn default_beacon_floor_secs() -> u64 {
    crate::infrastructure::bluetooth::protocol::BEACON_INTERVAL_FLOOR_SECS
}

pub struct SettingsService {
    settings: EngineSettings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("DroidToolbox");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<EngineSettings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut EngineSettings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let settings: EngineSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.logon_repeats, 3);
        assert_eq!(settings.beacon_interval_floor_secs, 60);
        assert_eq!(
            settings.ble_service_uuid,
            "09b600a0-3e42-41fc-b474-e9c0c8f0c801"
        );
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let settings: EngineSettings =
            serde_json::from_str(r#"{ "connect_timeout_ms": 5000 }"#).unwrap();
        assert_eq!(settings.connect_timeout_ms, 5000);
        assert_eq!(settings.write_ack_timeout_ms, 2000);
    }

    #[test]
    fn settings_roundtrip() {
        let mut settings = EngineSettings::default();
        settings.command_delay_ms = 250;
        let json = serde_json::to_string(&settings).unwrap();
        let back: EngineSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.command_delay_ms, 250);
    }
}
