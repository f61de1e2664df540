//! Settings for the LED wall server
//!
//! Settings live in a JSON document addressed by dotted key paths
//! (`"matrix.width"`). `LedWallSettings` is the typed view the pipeline is
//! built from; it is read once at startup and again on every reload.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::artnet::ARTNET_PORT;
use crate::artnet::transport::DEFAULT_RECEIVE_QUEUE;
use crate::effects::{FaultPolicy, SelectorConfig, TransitionPolicy, DEFAULT_EFFECT};
use crate::error::{ConfigError, SettingsError};
use crate::layout::LayoutConfig;
use crate::mapping::{AutoPatch, ChannelMapping};

/// Environment variable overriding the settings file location
pub const SETTINGS_ENV: &str = "LEDWALL_SETTINGS";

const SETTINGS_DIR: &str = "LedWall";
const SETTINGS_FILE: &str = "settings.json";

/// Hierarchical settings document
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    root: Value,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore {
    /// Empty in-memory document
    pub fn new() -> Self {
        Self {
            path: None,
            root: Value::Object(Map::new()),
        }
    }

    /// Wrap an existing document
    pub fn from_value(root: Value) -> Result<Self, SettingsError> {
        if !root.is_object() {
            return Err(SettingsError::NotAnObject(String::new()));
        }
        Ok(Self { path: None, root })
    }

    /// Default settings file path: `<config dir>/LedWall/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push(SETTINGS_DIR);
            path.push(SETTINGS_FILE);
            path
        })
    }

    /// Settings path from the command line, then the environment, then the default
    pub fn resolve_path(cli_arg: Option<PathBuf>) -> Option<PathBuf> {
        cli_arg
            .or_else(|| std::env::var_os(SETTINGS_ENV).map(PathBuf::from))
            .or_else(Self::default_path)
    }

    /// Load from a file, or an empty document if the file doesn't exist
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Settings file not found, using defaults");
            return Ok(Self {
                path: Some(path.to_path_buf()),
                root: Value::Object(Map::new()),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let root: Value = serde_json::from_str(&content)?;
        if !root.is_object() {
            return Err(SettingsError::NotAnObject(String::new()));
        }
        tracing::info!(path = %path.display(), "Loaded settings");
        Ok(Self {
            path: Some(path.to_path_buf()),
            root,
        })
    }

    /// Save to the file this store was loaded from
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = self.path.as_deref().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(path)
    }

    /// Save to a file, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(&self.root)?;
        std::fs::write(path, content).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Raw value at a dotted key path
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        if key.is_empty() {
            return None;
        }
        key.split('.')
            .try_fold(&self.root, |node, part| node.as_object()?.get(part))
    }

    /// Typed value at a dotted key path; `None` if missing or the wrong type
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Set a value at a dotted key path, creating intermediate objects
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), SettingsError> {
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(SettingsError::EmptyKey);
        }
        let value = serde_json::to_value(value)?;
        let parts: Vec<&str> = key.split('.').collect();
        let (last, parents) = parts.split_last().ok_or(SettingsError::EmptyKey)?;

        let mut node = &mut self.root;
        let mut walked = String::new();
        for part in parents {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(part);
            let object = node
                .as_object_mut()
                .ok_or_else(|| SettingsError::NotAnObject(walked.clone()))?;
            node = object
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        let object = node
            .as_object_mut()
            .ok_or_else(|| SettingsError::NotAnObject(walked.clone()))?;
        object.insert(last.to_string(), value);
        Ok(())
    }

    /// Typed view of the whole document, frame rate clamped
    pub fn settings(&self) -> Result<LedWallSettings, SettingsError> {
        let mut settings: LedWallSettings = serde_json::from_value(self.root.clone())?;
        settings.clamp_frame_rate();
        Ok(settings)
    }
}

/// Matrix dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSettings {
    #[serde(default = "default_width")]
    pub width: usize,
    #[serde(default = "default_height")]
    pub height: usize,
}

fn default_width() -> usize {
    30
}

fn default_height() -> usize {
    58
}

impl Default for MatrixSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

/// Art-Net socket settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_artnet_port")]
    pub listen_port: u16,
    #[serde(default = "default_target_address")]
    pub target_address: String,
    #[serde(default = "default_artnet_port")]
    pub target_port: u16,
    #[serde(default = "default_true")]
    pub broadcast: bool,
    #[serde(default = "default_receive_queue")]
    pub receive_queue: usize,
    /// Sequence regression tolerated before a packet is flagged stale
    #[serde(default = "default_sequence_tolerance")]
    pub sequence_tolerance: u8,
    /// Longest the pipeline waits for incoming packets per tick
    #[serde(default = "default_receive_wait_ms")]
    pub receive_wait_ms: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_target_address() -> String {
    "255.255.255.255".to_string()
}

fn default_artnet_port() -> u16 {
    ARTNET_PORT
}

fn default_true() -> bool {
    true
}

fn default_receive_queue() -> usize {
    DEFAULT_RECEIVE_QUEUE
}

fn default_sequence_tolerance() -> u8 {
    8
}

fn default_receive_wait_ms() -> u64 {
    2
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            listen_port: default_artnet_port(),
            target_address: default_target_address(),
            target_port: default_artnet_port(),
            broadcast: true,
            receive_queue: default_receive_queue(),
            sequence_tolerance: default_sequence_tolerance(),
            receive_wait_ms: default_receive_wait_ms(),
        }
    }
}

impl NetworkSettings {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("network.bind_address", &self.bind_address, self.listen_port)
    }

    pub fn target_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("network.target_address", &self.target_address, self.target_port)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }
}

fn parse_addr(key: &str, host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    host.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .map_err(|e| ConfigError::InvalidSetting {
            key: key.to_string(),
            reason: format!("'{}': {}", host, e),
        })
}

/// Effect runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSettings {
    #[serde(default = "default_effect")]
    pub default_effect: String,
    /// Consecutive faults before an effect freezes
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: u32,
    /// Compute budget per tick; defaults to the frame period
    #[serde(default)]
    pub compute_budget_ms: Option<f64>,
    /// Extra time the pipeline waits for a late compute result
    #[serde(default = "default_grace_ms")]
    pub grace_ms: f64,
    #[serde(default)]
    pub transition: TransitionPolicy,
}

fn default_effect() -> String {
    DEFAULT_EFFECT.to_string()
}

fn default_fault_threshold() -> u32 {
    3
}

fn default_grace_ms() -> f64 {
    5.0
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            default_effect: default_effect(),
            fault_threshold: default_fault_threshold(),
            compute_budget_ms: None,
            grace_ms: default_grace_ms(),
            transition: TransitionPolicy::default(),
        }
    }
}

/// HTTP/WebSocket API settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    8080
}

impl ApiSettings {
    /// All interfaces on the configured port
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

/// Typed configuration every pipeline component is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedWallSettings {
    #[serde(default)]
    pub matrix: MatrixSettings,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub effects: EffectSettings,
    /// Explicit mappings; an effect with none falls back to `auto_patch`
    #[serde(default)]
    pub mappings: Vec<ChannelMapping>,
    #[serde(default = "default_auto_patch")]
    pub auto_patch: Option<AutoPatch>,
    #[serde(default)]
    pub selector: Option<SelectorConfig>,
    #[serde(default)]
    pub api: ApiSettings,
}

fn default_frame_rate() -> u32 {
    30
}

fn default_auto_patch() -> Option<AutoPatch> {
    Some(AutoPatch::default())
}

impl Default for LedWallSettings {
    fn default() -> Self {
        Self {
            matrix: MatrixSettings::default(),
            frame_rate: default_frame_rate(),
            network: NetworkSettings::default(),
            layout: LayoutConfig::default(),
            effects: EffectSettings::default(),
            mappings: Vec::new(),
            auto_patch: default_auto_patch(),
            selector: None,
            api: ApiSettings::default(),
        }
    }
}

impl LedWallSettings {
    /// Clamp the frame rate to a valid range (1-240)
    ///
    /// Zero is left alone so `validate` can reject it.
    pub fn clamp_frame_rate(&mut self) {
        if self.frame_rate > 240 {
            self.frame_rate = 240;
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.matrix.width, self.matrix.height)
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }

    /// Compute budget per tick
    pub fn compute_budget(&self) -> Duration {
        match self.effects.compute_budget_ms {
            Some(ms) if ms > 0.0 => Duration::from_secs_f64(ms / 1000.0),
            _ => self.frame_period(),
        }
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs_f64(self.effects.grace_ms.max(0.0) / 1000.0)
    }

    pub fn fault_policy(&self) -> FaultPolicy {
        FaultPolicy {
            threshold: self.effects.fault_threshold.max(1),
            budget: Some(self.compute_budget()),
        }
    }

    /// Check values that don't depend on other components
    ///
    /// Layout, mapping and selector checks happen when those components are
    /// built, since they need the effect registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matrix.width == 0 || self.matrix.height == 0 {
            return Err(ConfigError::EmptyMatrix {
                width: self.matrix.width,
                height: self.matrix.height,
            });
        }
        if self.frame_rate == 0 || self.frame_rate > 240 {
            return Err(ConfigError::InvalidFrameRate(self.frame_rate));
        }
        if self.network.receive_queue == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "network.receive_queue".into(),
                reason: "must be at least 1".into(),
            });
        }
        if let Some(ms) = self.effects.compute_budget_ms {
            if !ms.is_finite() || ms <= 0.0 {
                return Err(ConfigError::InvalidSetting {
                    key: "effects.compute_budget_ms".into(),
                    reason: format!("{} is not a positive duration", ms),
                });
            }
        }
        if !self.effects.grace_ms.is_finite() || self.effects.grace_ms < 0.0 {
            return Err(ConfigError::InvalidSetting {
                key: "effects.grace_ms".into(),
                reason: format!("{} is negative", self.effects.grace_ms),
            });
        }
        if self.effects.default_effect.is_empty() {
            return Err(ConfigError::UnknownEffect(String::new()));
        }
        self.network.bind_addr()?;
        self.network.target_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Packing;
    use crate::mapping::DecodeRule;
    use serde_json::json;

    #[test]
    fn test_default_settings() {
        let settings = LedWallSettings::default();
        assert_eq!(settings.shape(), (30, 58));
        assert_eq!(settings.frame_rate, 30);
        assert_eq!(settings.network.listen_port, 6454);
        assert_eq!(settings.api.port, 8080);
        assert_eq!(settings.api.bind_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(settings.effects.default_effect, "single_color");
        assert_eq!(settings.auto_patch, Some(AutoPatch::default()));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let store = SettingsStore::new();
        assert_eq!(store.settings().unwrap(), LedWallSettings::default());
    }

    #[test]
    fn test_frame_rate_clamping() {
        let mut settings = LedWallSettings::default();
        settings.frame_rate = 500;
        settings.clamp_frame_rate();
        assert_eq!(settings.frame_rate, 240);

        settings.frame_rate = 0;
        settings.clamp_frame_rate();
        assert_eq!(settings.validate(), Err(ConfigError::InvalidFrameRate(0)));
    }

    #[test]
    fn test_dotted_get_set() {
        let mut store = SettingsStore::new();
        store.set("matrix.width", 35).unwrap();
        store.set("layout.serpentine", true).unwrap();

        assert_eq!(store.get::<usize>("matrix.width"), Some(35));
        assert_eq!(store.get::<bool>("layout.serpentine"), Some(true));
        assert_eq!(store.get::<usize>("matrix.height"), None);
        assert_eq!(store.get::<String>("matrix.width"), None);

        let settings = store.settings().unwrap();
        assert_eq!(settings.shape(), (35, 58));
        assert!(settings.layout.serpentine);
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut store = SettingsStore::new();
        store.set("frame_rate", 40).unwrap();
        assert!(matches!(
            store.set("frame_rate.max", 1),
            Err(SettingsError::NotAnObject(key)) if key == "frame_rate"
        ));
        assert!(matches!(store.set("", 1), Err(SettingsError::EmptyKey)));
        assert!(matches!(store.set("a..b", 1), Err(SettingsError::EmptyKey)));
    }

    #[test]
    fn test_parse_full_document() {
        let store = SettingsStore::from_value(json!({
            "matrix": { "width": 8, "height": 8 },
            "frame_rate": 44,
            "network": { "target_address": "10.0.0.20", "broadcast": false },
            "layout": { "serpentine": true, "packing": "run_per_universe", "color_order": "grbw" },
            "effects": { "default_effect": "gradient", "transition": { "kind": "crossfade", "ticks": 10 } },
            "mappings": [
                { "effect": "single_color", "input": "master", "universe": 1, "start": 1, "rule": "fraction" }
            ],
            "selector": { "universe": 2, "channel": 1, "effects": ["single_color", "gradient"] }
        }))
        .unwrap();

        let settings = store.settings().unwrap();
        assert_eq!(settings.shape(), (8, 8));
        assert_eq!(settings.frame_rate, 44);
        assert!(!settings.network.broadcast);
        assert_eq!(
            settings.network.target_addr().unwrap(),
            "10.0.0.20:6454".parse().unwrap()
        );
        assert_eq!(settings.layout.packing, Packing::RunPerUniverse);
        assert_eq!(settings.effects.transition, TransitionPolicy::Crossfade { ticks: 10 });
        assert_eq!(settings.mappings.len(), 1);
        assert_eq!(settings.mappings[0].rule, DecodeRule::Fraction);
        assert_eq!(settings.selector.as_ref().map(|s| s.effects.len()), Some(2));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = LedWallSettings::default();
        settings.matrix.width = 0;
        assert!(matches!(settings.validate(), Err(ConfigError::EmptyMatrix { .. })));

        let mut settings = LedWallSettings::default();
        settings.network.bind_address = "not-an-ip".into();
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidSetting { .. })));

        let mut settings = LedWallSettings::default();
        settings.effects.compute_budget_ms = Some(0.0);
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidSetting { .. })));
    }

    #[test]
    fn test_compute_budget_defaults_to_frame_period() {
        let mut settings = LedWallSettings::default();
        settings.frame_rate = 50;
        assert_eq!(settings.compute_budget(), Duration::from_millis(20));
        settings.effects.compute_budget_ms = Some(5.0);
        assert_eq!(settings.compute_budget(), Duration::from_millis(5));
        assert_eq!(settings.fault_policy().budget, Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("ledwall-settings-{}", std::process::id()));
        let path = dir.join("nested").join("settings.json");

        let mut store = SettingsStore::new();
        store.set("matrix.height", 12).unwrap();
        store.save_to(&path).unwrap();

        let loaded = SettingsStore::load(&path).unwrap();
        assert_eq!(loaded.get::<usize>("matrix.height"), Some(12));
        assert_eq!(loaded.path(), Some(path.as_path()));

        // Saving writes back to the file it came from
        let mut loaded = loaded;
        loaded.set("frame_rate", 25).unwrap();
        loaded.save().unwrap();
        let reloaded = SettingsStore::load(&path).unwrap();
        assert_eq!(reloaded.settings().unwrap().frame_rate, 25);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let path = std::env::temp_dir().join("ledwall-does-not-exist").join("settings.json");
        let store = SettingsStore::load(&path).unwrap();
        assert_eq!(store.root(), &json!({}));
    }
}
