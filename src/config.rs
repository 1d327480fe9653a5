//! Configuration loading via `ortho-config`.
//!
//! [`StackConfig`] is the explicit configuration context handed to the
//! provisioning entry point. Values merge defaults, `homelab.toml`,
//! `HOMELAB_*` environment variables and CLI flags, and required fields are
//! validated eagerly with errors naming both the variable and the TOML key.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::user_data::{CloudConfig, CommandEntry};

/// Default location of the draw state file.
pub const DEFAULT_STATE_FILE: &str = ".homelab/draws.toml";

/// Account-wide settings shared by every instance in the stack.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOMELAB",
    discovery(
        app_name = "homelab",
        env_var = "HOMELAB_CONFIG_PATH",
        config_file_name = "homelab.toml",
        dotfile_name = ".homelab.toml",
        project_file_name = "homelab.toml"
    )
)]
pub struct StackConfig {
    /// Cloud account identifier the stack is deployed into.
    #[serde(deserialize_with = "string_or_number")]
    pub account_id: String,
    /// Region, for example `us-east-1`.
    #[ortho_config(default = "us-east-1".to_owned())]
    pub region: String,
    /// Instance class used when a spec does not name one.
    #[ortho_config(default = "t4g.nano".to_owned())]
    pub default_instance_type: String,
    /// File persisting memoized random draws between runs.
    #[ortho_config(default = DEFAULT_STATE_FILE.to_owned())]
    pub state_file: String,
    /// Packages installed on every instance.
    #[serde(default)]
    pub base_packages: Vec<String>,
    /// Commands run on every instance before instance specific ones.
    #[serde(default)]
    pub base_runcmd: Vec<String>,
}

/// Account IDs are all digits, so environment and TOML sources may hand
/// them over as integers.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Text(text) => text,
        StringOrNumber::Unsigned(number) => number.to_string(),
        StringOrNumber::Signed(number) => number.to_string(),
    })
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl StackConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to homelab.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("homelab")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads and validates configuration in one step.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load_validated() -> Result<Self, ConfigError> {
        let config = Self::load_without_cli_args()?;
        config.validate()?;
        Ok(config)
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.account_id,
            &FieldMetadata::new("account ID", "HOMELAB_ACCOUNT_ID", "account_id"),
        )?;
        Self::require_field(
            &self.region,
            &FieldMetadata::new("region", "HOMELAB_REGION", "region"),
        )?;
        Self::require_field(
            &self.default_instance_type,
            &FieldMetadata::new(
                "default instance type",
                "HOMELAB_DEFAULT_INSTANCE_TYPE",
                "default_instance_type",
            ),
        )?;
        Self::require_field(
            &self.state_file,
            &FieldMetadata::new("draw state file", "HOMELAB_STATE_FILE", "state_file"),
        )?;
        Ok(())
    }

    /// Location of the draw state file.
    #[must_use]
    pub fn state_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(crate::cloud_init::expand_tilde(self.state_file.trim()))
    }

    /// Base bootstrap document shared by every instance.
    #[must_use]
    pub fn base_document(&self) -> CloudConfig {
        CloudConfig {
            packages: self.base_packages.clone(),
            runcmd: self
                .base_runcmd
                .iter()
                .map(|command| CommandEntry::from(command.as_str()))
                .collect(),
            ..CloudConfig::default()
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
