//! Cloud-init bootstrap documents.
//!
//! [`CloudConfig`] types the keys provisioning manipulates (`packages`,
//! `yum_repos`, `write_files`, `bootcmd`, `runcmd`, `users`, `ssh_keys` and
//! the host key generation controls) and keeps every other provider key in
//! an explicit extension bag so unknown keys pass through untouched. Key
//! names are part of the contract with cloud-init and must not be renamed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod host_keys;
mod merge;

pub use host_keys::{
    FORWARDED_ALGORITHMS, HostKeyPair, KeyAlgorithm, SshHostKeyBundle, WITHHELD_ALGORITHMS,
    merge_host_keys,
};
pub use merge::{FieldPolicy, ListOrder, MERGE_POLICY, merge, policy_for};

/// Marker line cloud-init requires at the top of a cloud-config document.
pub const CLOUD_CONFIG_MARKER: &str = "#cloud-config";

/// Errors raised while reading or rendering a bootstrap document.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum UserDataError {
    /// Raised when a document cannot be serialised.
    #[error("failed to render cloud-config: {0}")]
    Render(String),
    /// Raised when an override document cannot be parsed.
    #[error("failed to parse cloud-config: {0}")]
    Parse(String),
}

/// A `runcmd`/`bootcmd` entry: either a shell string or an argument vector.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandEntry {
    /// Run through `sh -c`.
    Shell(String),
    /// Executed directly.
    Argv(Vec<String>),
}

impl From<&str> for CommandEntry {
    fn from(value: &str) -> Self {
        Self::Shell(value.to_owned())
    }
}

impl From<String> for CommandEntry {
    fn from(value: String) -> Self {
        Self::Shell(value)
    }
}

/// A `write_files` entry.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct WriteFile {
    /// Absolute destination path.
    pub path: String,
    /// File content.
    #[serde(default)]
    pub content: String,
    /// `user:group` owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Octal permission string, for example `'0600'`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    /// Content encoding, for example `b64`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Append instead of overwriting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,
    /// Write after users and packages are set up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer: Option<bool>,
}

/// A `yum_repos` entry.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct YumRepo {
    /// Human readable repository name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Repository base URL.
    pub baseurl: String,
    /// Whether the repository is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Whether package signatures are checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpgcheck: Option<bool>,
    /// Signing key URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpgkey: Option<String>,
    /// Other repository options, passed through.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Cloud-config document with typed known keys and a passthrough bag.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CloudConfig {
    /// Packages to install.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    /// Repository definitions keyed by repository id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub yum_repos: BTreeMap<String, YumRepo>,
    /// Files written on first boot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_files: Vec<WriteFile>,
    /// Commands run early on every boot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bootcmd: Vec<CommandEntry>,
    /// Commands run once, late in first boot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runcmd: Vec<CommandEntry>,
    /// User definitions (`default` or a mapping).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<serde_yaml::Value>,
    /// Host key material, for example `ed25519_private`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ssh_keys: BTreeMap<String, String>,
    /// Host key types cloud-init generates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_genkeytypes: Option<Vec<String>>,
    /// Whether cloud-init deletes image-baked host keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_deletekeys: Option<bool>,
    /// Provider specific keys passed through verbatim.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

impl CloudConfig {
    /// Parses a cloud-config YAML document. A leading marker line is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`UserDataError::Parse`] when the YAML is malformed or a known
    /// key has the wrong shape.
    pub fn parse(source: &str) -> Result<Self, UserDataError> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(source).map_err(|err| UserDataError::Parse(err.to_string()))
    }

    /// Renders the document as `#cloud-config` followed by YAML.
    ///
    /// # Errors
    ///
    /// Returns [`UserDataError::Render`] when serialisation fails.
    pub fn render(&self) -> Result<String, UserDataError> {
        let body =
            serde_yaml::to_string(self).map_err(|err| UserDataError::Render(err.to_string()))?;
        Ok(format!("{CLOUD_CONFIG_MARKER}\n{body}"))
    }

    /// Sets a passthrough key.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<serde_yaml::Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Appends a `bootcmd` entry.
    #[must_use]
    pub fn with_bootcmd(mut self, command: impl Into<CommandEntry>) -> Self {
        self.bootcmd.push(command.into());
        self
    }
}

/// Returns a new document whose `runcmd` is `commands` followed by the
/// document's own commands. The input document is left untouched.
#[must_use]
pub fn prepend_commands<I, C>(doc: &CloudConfig, commands: I) -> CloudConfig
where
    I: IntoIterator<Item = C>,
    C: Into<CommandEntry>,
{
    let mut runcmd: Vec<CommandEntry> = commands.into_iter().map(Into::into).collect();
    runcmd.extend(doc.runcmd.iter().cloned());
    CloudConfig {
        runcmd,
        ..doc.clone()
    }
}

/// Returns a new document whose `runcmd` is the document's own commands
/// followed by `commands`. The input document is left untouched.
#[must_use]
pub fn append_commands<I, C>(doc: &CloudConfig, commands: I) -> CloudConfig
where
    I: IntoIterator<Item = C>,
    C: Into<CommandEntry>,
{
    let mut runcmd = doc.runcmd.clone();
    runcmd.extend(commands.into_iter().map(Into::into));
    CloudConfig {
        runcmd,
        ..doc.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn base() -> CloudConfig {
        CloudConfig {
            packages: vec![String::from("jq")],
            runcmd: vec![CommandEntry::from("systemctl enable --now amazon-ssm-agent")],
            ..CloudConfig::default()
        }
    }

    #[rstest]
    fn prepend_then_append_orders_commands(base: CloudConfig) {
        let prepended = prepend_commands(&base, ["echo a", "echo b"]);
        let composed = append_commands(&prepended, ["echo c"]);

        assert_eq!(
            composed.runcmd,
            vec![
                CommandEntry::from("echo a"),
                CommandEntry::from("echo b"),
                CommandEntry::from("systemctl enable --now amazon-ssm-agent"),
                CommandEntry::from("echo c"),
            ]
        );
        assert_eq!(base.runcmd.len(), 1, "caller document must not change");
    }

    #[rstest]
    fn commands_on_an_empty_runcmd() {
        let composed = append_commands(&CloudConfig::default(), ["echo only"]);
        assert_eq!(composed.runcmd, vec![CommandEntry::from("echo only")]);
    }

    #[rstest]
    fn render_starts_with_marker_and_omits_empty_keys(base: CloudConfig) {
        let rendered = base.render().unwrap_or_else(|err| panic!("render: {err}"));

        assert!(rendered.starts_with("#cloud-config\n"), "{rendered}");
        assert!(rendered.contains("packages:"), "{rendered}");
        assert!(!rendered.contains("write_files"), "{rendered}");
        assert!(!rendered.contains("ssh_keys"), "{rendered}");
    }

    #[rstest]
    fn unknown_keys_survive_a_parse_render_cycle() {
        let source = concat!(
            "#cloud-config\n",
            "repo_upgrade: all\n",
            "runcmd:\n",
            "  - [systemctl, restart, sshd]\n",
            "  - echo done\n",
        );
        let doc = CloudConfig::parse(source).unwrap_or_else(|err| panic!("parse: {err}"));

        assert_eq!(
            doc.extensions.get("repo_upgrade"),
            Some(&serde_yaml::Value::from("all"))
        );
        assert_eq!(
            doc.runcmd.first(),
            Some(&CommandEntry::Argv(vec![
                String::from("systemctl"),
                String::from("restart"),
                String::from("sshd"),
            ]))
        );

        let rendered = doc.render().unwrap_or_else(|err| panic!("render: {err}"));
        assert!(rendered.contains("repo_upgrade: all"), "{rendered}");
    }

    #[rstest]
    fn wrongly_shaped_known_key_is_rejected() {
        let err = CloudConfig::parse("packages: jq\n").expect_err("packages must be a list");
        assert!(matches!(err, UserDataError::Parse(_)));
    }
}
