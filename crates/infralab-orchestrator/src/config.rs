//! Configuration types for the infralab orchestrator.
//!
//! Configuration comes from an optional `infralab.json` file, then from
//! environment overrides. Every field has a default, so running without any
//! configuration is the common case.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "infralab.json";

/// Environment variable overriding [`Config::tool_path`].
pub const ENV_TOOL: &str = "INFRALAB_TOOL";

/// Environment variable overriding [`Config::progress_file`].
pub const ENV_PROGRESS_FILE: &str = "INFRALAB_PROGRESS_FILE";

/// Environment variable overriding [`Config::workspace_dir`].
pub const ENV_WORKSPACE: &str = "INFRALAB_WORKSPACE";

/// Default external tool binary, resolved through `PATH`.
fn default_tool_path() -> String {
    "terraform".to_string()
}

/// Default root directory for exercise working directories.
fn default_workspace_dir() -> String {
    "labs".to_string()
}

/// Main configuration for infralab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Program name or path of the external provisioning tool.
    #[serde(default = "default_tool_path")]
    pub tool_path: String,

    /// Location of the progress file. `None` selects the per-user
    /// application-data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_file: Option<String>,

    /// Root directory holding one working directory per exercise.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,

    /// Path to a catalog JSON file replacing the built-in catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,

    /// Timeout for a single tool invocation, in seconds. `None` waits
    /// indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            progress_file: None,
            workspace_dir: default_workspace_dir(),
            catalog: None,
            command_timeout_secs: None,
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `infralab.json` in the current directory. If not found,
    /// returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            LabError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration. Unknown
    /// keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ConfigParseError` if the file exists but contains
    /// invalid JSON, and `LabError::ConfigValidationError` if a value is
    /// out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(LabError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| LabError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// Empty values are ignored so that `INFRALAB_TOOL=` does not erase the
    /// configured tool.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(tool) = lookup(ENV_TOOL) {
            self.tool_path = tool;
        }
        if let Some(progress) = lookup(ENV_PROGRESS_FILE) {
            self.progress_file = Some(progress);
        }
        if let Some(workspace) = lookup(ENV_WORKSPACE) {
            self.workspace_dir = workspace;
        }
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `LabError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if self.tool_path.trim().is_empty() {
            return Err(LabError::config_validation(
                "toolPath must not be empty",
                "Set toolPath in infralab.json or INFRALAB_TOOL to the provisioning tool binary",
            ));
        }

        if self.workspace_dir.trim().is_empty() {
            return Err(LabError::config_validation(
                "workspaceDir must not be empty",
                "Set workspaceDir in infralab.json (use '.' for the current directory)",
            ));
        }

        if self
            .progress_file
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(LabError::config_validation(
                "progressFile must not be empty",
                "Remove progressFile from infralab.json to use the default location",
            ));
        }

        if self.catalog.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(LabError::config_validation(
                "catalog must not be empty",
                "Remove catalog from infralab.json to use the built-in exercises",
            ));
        }

        if self.command_timeout_secs == Some(0) {
            return Err(LabError::config_validation(
                "commandTimeoutSecs must be greater than 0",
                "Set commandTimeoutSecs to at least 1, or remove it to wait indefinitely",
            ));
        }

        Ok(())
    }

    /// Resolved location of the progress file.
    ///
    /// Defaults to `<data dir>/infralab/progress.json`, falling back to
    /// `.infralab/progress.json` when the platform has no data directory.
    #[must_use]
    pub fn progress_path(&self) -> PathBuf {
        self.progress_file.as_ref().map_or_else(
            || {
                dirs::data_dir().map_or_else(
                    || PathBuf::from(".infralab").join("progress.json"),
                    |dir| dir.join("infralab").join("progress.json"),
                )
            },
            PathBuf::from,
        )
    }

    /// Root directory for exercise working directories.
    #[must_use]
    pub fn workspace_path(&self) -> PathBuf {
        PathBuf::from(&self.workspace_dir)
    }

    /// Per-invocation tool timeout.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.tool_path, "terraform");
        assert_eq!(config.workspace_dir, "labs");
        assert!(config.progress_file.is_none());
        assert!(config.catalog.is_none());
        assert!(config.command_timeout().is_none());
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "toolPath": "/opt/terraform/bin/terraform",
            "progressFile": "/tmp/progress.json",
            "commandTimeoutSecs": 120
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.tool_path, "/opt/terraform/bin/terraform");
        assert_eq!(config.progress_path(), PathBuf::from("/tmp/progress.json"));
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.workspace_dir, "labs");
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"toolPath": "tofu", "theme": "dark", "retries": 3}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.tool_path, "tofu");
    }

    #[test]
    fn test_default_progress_path_is_under_infralab() {
        let path = Config::default().progress_path();
        assert_eq!(path.file_name(), Some("progress.json".as_ref()));
        let parent = path.parent().and_then(Path::file_name).unwrap();
        assert!(parent.to_string_lossy().contains("infralab"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_TOOL, "tofu"),
            (ENV_PROGRESS_FILE, "/srv/progress.json"),
            (ENV_WORKSPACE, ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.tool_path, "tofu");
        assert_eq!(config.progress_file.as_deref(), Some("/srv/progress.json"));
        // Empty override leaves the default untouched
        assert_eq!(config.workspace_dir, "labs");
    }

    #[test]
    fn test_load_from_file_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("infralab.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"workspaceDir": "course"}"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.workspace_dir, "course");
        assert_eq!(config.tool_path, "terraform");
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("infralab.json");
        std::fs::write(&config_path, "{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, LabError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );
    }

    #[test]
    fn test_load_from_dir_no_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let config = Config {
            command_timeout_secs: Some(0),
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, LabError::ConfigValidationError { message, suggestion }
                if message.contains("commandTimeoutSecs") && suggestion.contains("commandTimeoutSecs")),
            "Expected ConfigValidationError about commandTimeoutSecs, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_empty_paths() {
        let empty_tool = Config {
            tool_path: "  ".to_string(),
            ..Default::default()
        };
        assert!(empty_tool.validate().is_err());

        let empty_workspace = Config {
            workspace_dir: String::new(),
            ..Default::default()
        };
        assert!(empty_workspace.validate().is_err());

        let empty_progress = Config {
            progress_file: Some(String::new()),
            ..Default::default()
        };
        assert!(empty_progress.validate().is_err());
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("infralab.json");
        std::fs::write(&config_path, r#"{"commandTimeoutSecs": 0}"#).unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, LabError::ConfigValidationError { .. }),
            "Expected ConfigValidationError, got: {err:?}"
        );
    }
}
