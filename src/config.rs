use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core_types::{DEFAULT_TRACKING, TrackingNumber};
use crate::error::QarsError;
use crate::protocol::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub notify: NotifyConfig,
    pub impact: ImpactConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "qars.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            enable_tracing: true,
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            notify: NotifyConfig::default(),
            impact: ImpactConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7277,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Artifact names, all relative to `data_dir` unless absolute
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub tracking_file: String,
    pub active_file: String,
    pub pending_file: String,
    pub transfer_file: String,
    pub instruction_file: String,
    pub users_file: String,
    pub activity_log: String,
    pub default_tracking: TrackingNumber,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            tracking_file: "transaction.id".to_string(),
            active_file: "qars.active".to_string(),
            pending_file: "qars.pending".to_string(),
            transfer_file: "qars.transfer".to_string(),
            instruction_file: "qa_rel".to_string(),
            users_file: ".userxref".to_string(),
            activity_log: "qars.log".to_string(),
            default_tracking: DEFAULT_TRACKING,
        }
    }
}

impl StorageConfig {
    pub fn path(&self, name: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(name)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    /// Write notifications to the diagnostic log only
    Log,
    /// Deliver through the local `mailx`
    Mailx,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub mode: NotifyMode,
    pub qa_recipients: Vec<String>,
    pub dba_recipients: Vec<String>,
    pub super_admin: String,
    pub from_address: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            mode: NotifyMode::Log,
            qa_recipients: Vec::new(),
            dba_recipients: Vec::new(),
            super_admin: String::new(),
            from_address: "donotreply".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ImpactConfig {
    pub script_dir: String,
    pub command: String,
    pub temp_dir: String,
    pub timeout_secs: u64,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            script_dir: "/g1/test/qa/mf/".to_string(),
            command: "check-impact".to_string(),
            temp_dir: "/tmp/".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ImpactConfig {
    pub fn script(&self) -> PathBuf {
        PathBuf::from(&self.script_dir).join(&self.command)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml` and apply environment overrides
    pub fn load(env: &str) -> Result<Self, QarsError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .map_err(|e| QarsError::Config(format!("Failed to read {}: {}", config_path, e)))?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, QarsError> {
        serde_yaml::from_str(content)
            .map_err(|e| QarsError::Config(format!("Failed to parse config yaml: {}", e)))
    }

    /// Apply the deployment's environment variables on top of the YAML.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), QarsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = &mut self.storage;
        for (key, slot) in [
            ("TRACK", &mut storage.tracking_file),
            ("ACTIVE", &mut storage.active_file),
            ("PENDING", &mut storage.pending_file),
            ("MFFILE", &mut storage.instruction_file),
            ("USERSFILE", &mut storage.users_file),
            ("QARS_DATA_DIR", &mut storage.data_dir),
        ] {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        }
        if let Some(value) = lookup("QAEMAIL") {
            self.notify.qa_recipients = split_recipients(&value);
        }
        if let Some(value) = lookup("DBEMAIL") {
            self.notify.dba_recipients = split_recipients(&value);
        }
        if let Some(value) = lookup("SUPERADMIN") {
            self.notify.super_admin = value;
        }
        if let Some(value) = lookup("MFDIR") {
            self.impact.script_dir = value;
        }
        if let Some(value) = lookup("CKIMPACT") {
            self.impact.command = value;
        }
        if let Some(value) = lookup("TEMPDIR") {
            self.impact.temp_dir = value;
        }
        if let Some(value) = lookup("QARS_PORT") {
            self.server.port = value
                .trim()
                .parse()
                .map_err(|_| QarsError::Config(format!("Invalid QARS_PORT: {}", value)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), QarsError> {
        if self.server.max_frame_bytes == 0 {
            return Err(QarsError::Config("server.max_frame_bytes must be positive".into()));
        }
        if self.storage.data_dir.is_empty() {
            return Err(QarsError::Config("storage.data_dir must be set".into()));
        }
        if self.impact.timeout_secs == 0 {
            return Err(QarsError::Config("impact.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

fn split_recipients(value: &str) -> Vec<String> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
