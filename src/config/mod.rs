use std::fs;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::fs::write_private_file;

/// A user-defined column whose value is captured per entry by running
/// `column_command` in the recording shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomColumnDefinition {
    pub column_name: String,
    pub column_command: String,
}

/// Process-wide client configuration.
///
/// Loaded once per process with [`ClientConfig::load`] and threaded through
/// every operation that needs it; every mutation is followed by
/// [`ClientConfig::save`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Symmetric key material shared by all of a user's devices.
    pub user_secret: String,
    /// UUID v4 identifying this installation.
    pub device_id: String,
    /// Record new commands. On unless explicitly turned off.
    pub is_enabled: bool,
    /// Never contact the relay.
    pub is_offline: bool,
    pub have_completed_initial_import: bool,
    /// Order search results by start time instead of end time.
    pub beta_mode: bool,
    pub filter_duplicate_commands: bool,
    pub displayed_columns: Vec<String>,
    pub timestamp_format: String,
    pub custom_columns: Vec<CustomColumnDefinition>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_secret: String::new(),
            device_id: String::new(),
            is_enabled: true,
            is_offline: false,
            have_completed_initial_import: false,
            beta_mode: false,
            filter_duplicate_commands: false,
            displayed_columns: ["Hostname", "CWD", "Timestamp", "Runtime", "Exit Code", "Command"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            timestamp_format: "%b %d %Y %H:%M:%S %Z".to_string(),
            custom_columns: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Load the config stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, or malformed. A
    /// missing file means the device has not been set up yet.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "read config at {} (run `histsync init` first)",
                path.display()
            )
        })?;
        toml::from_str(&content).with_context(|| format!("parse config at {}", path.display()))
    }

    /// Persist the config to `path` with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("serialize config")?;
        write_private_file(path, &content)
            .with_context(|| format!("write config to {}", path.display()))
    }

    /// Names of the custom columns configured on this device.
    pub fn custom_column_names(&self) -> impl Iterator<Item = &str> {
        self.custom_columns.iter().map(|c| c.column_name.as_str())
    }
}
