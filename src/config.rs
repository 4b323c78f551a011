use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ComfyError, Result};
use crate::resolve::{validate_host, validate_port};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8188;

/// Connection and polling configuration for [`ComfyClient`](crate::ComfyClient).
///
/// Use [`ClientConfig::builder()`] for ergonomic construction, or
/// [`ClientConfig::default()`] for a local server on port 8188 polled once a
/// second for up to three minutes.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,

    /// Pause between `/history` queries.
    pub poll_interval: Duration,

    /// Total time to wait for a job's outputs.
    pub timeout: Duration,

    /// Deadline for any single HTTP exchange.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            poll_interval: Duration::from_millis(1000),
            timeout: Duration::from_millis(180_000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the pause between history polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the overall wait budget per job.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the deadline for each individual HTTP exchange.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Build the final [`ClientConfig`].
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Persisted panel settings.
///
/// Stored as a small JSON file; the port is kept as text because that is how
/// users type it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub host: String,
    pub port: String,
    /// Path of the API-format workflow JSON.
    pub workflow: String,
    /// Custom output folder; empty means "project or temp folder".
    pub output_folder: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            workflow: String::new(),
            output_folder: String::new(),
        }
    }
}

impl Settings {
    /// Read settings from `path`. A missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Settings>(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load settings, using defaults");
                Self::default()
            }
        }
    }

    /// Write settings to `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| ComfyError::io(format!("Failed to save settings to {}", path.display()), e))?;
        tracing::info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Validate host and port and produce a client config with default timings.
    pub fn client_config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig::builder()
            .with_host(validate_host(&self.host)?)
            .with_port(validate_port(&self.port)?)
            .build())
    }

    /// Workflow path, or a config error when none is set.
    pub fn workflow_path(&self) -> Result<PathBuf> {
        let trimmed = self.workflow.trim();
        if trimmed.is_empty() {
            return Err(ComfyError::Config(
                "Please choose a workflow JSON first.".into(),
            ));
        }
        Ok(PathBuf::from(trimmed))
    }

    /// Custom output folder, if one is set.
    pub fn output_folder(&self) -> Option<PathBuf> {
        let trimmed = self.output_folder.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8188);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.timeout, Duration::from_secs(180));
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::builder()
            .with_host("localhost")
            .with_port(9000)
            .with_poll_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_millis(500))
            .with_request_timeout(Duration::from_millis(200))
            .build();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 9000);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.request_timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_settings_roundtrip_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert_eq!(Settings::load(&path), Settings::default());

        let settings = Settings {
            host: "localhost".into(),
            port: "8189".into(),
            workflow: "/wf/i2i_api.json".into(),
            output_folder: String::new(),
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path), settings);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"outputFolder\""));
    }

    #[test]
    fn test_settings_partial_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        std::fs::write(&path, r#"{"host": "localhost"}"#).unwrap();
        let partial = Settings::load(&path);
        assert_eq!(partial.host, "localhost");
        assert_eq!(partial.port, "8188");

        std::fs::write(&path, "{oops").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_settings_client_config_validates() {
        let mut settings = Settings::default();
        let config = settings.client_config().unwrap();
        assert_eq!(config.port, 8188);

        settings.port = "99999".into();
        assert!(matches!(settings.client_config(), Err(ComfyError::Config(_))));

        settings.port = "8188".into();
        settings.host = "my-server".into();
        assert!(settings.client_config().is_err());
    }

    #[test]
    fn test_settings_paths() {
        let mut settings = Settings::default();
        assert!(settings.workflow_path().is_err());
        assert_eq!(settings.output_folder(), None);

        settings.workflow = " /wf/a.json ".into();
        settings.output_folder = "/renders".into();
        assert_eq!(settings.workflow_path().unwrap(), PathBuf::from("/wf/a.json"));
        assert_eq!(settings.output_folder(), Some(PathBuf::from("/renders")));
    }
}
