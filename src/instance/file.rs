//! TOML form of an instance request.
//!
//! ```toml
//! name = "gw"
//! subnet_ids = ["subnet-1"]
//! vpc_id = "vpc-1"
//! security_groups = ["sg-1"]
//! image_id = "ami-0123456789abcdef0"
//! user_data_file = "gw.cloud-config.yaml"
//!
//! [dns]
//! zone = "Z1"
//! hostname = "gw"
//!
//! [network]
//! use_elastic_ip = true
//!
//! [subnets.subnet-1]
//! cidr_block = "10.0.1.0/24"
//! ipv6_cidr_block = "2600:1f18:abcd:1201::/64"
//! ```
//!
//! The `[subnets]` table records the address ranges of existing subnets so a
//! dry-run plan can resolve them without calling the provider.

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::toml;
use serde::Deserialize;
use thiserror::Error;

use super::{InstanceSpec, InstanceSpecBuilder};
use crate::cloud_init::{CloudInitError, read_to_string_ambient, resolve_user_data_override};
use crate::dns::DnsBinding;
use crate::error::ValidationError;
use crate::network::NetworkOptions;
use crate::user_data::SshHostKeyBundle;

/// Errors raised while loading an instance spec file.
#[derive(Debug, Error)]
pub enum SpecFileError {
    /// Raised when the file cannot be read.
    #[error("failed to read instance spec {path}: {message}")]
    Read {
        /// Spec file path.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the file is not valid TOML for a spec.
    #[error("failed to parse instance spec {path}: {message}")]
    Parse {
        /// Spec file path.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when the user-data override cannot be resolved.
    #[error(transparent)]
    UserData(#[from] CloudInitError),
    /// Raised when the resulting request is invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Address ranges of an existing subnet.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SubnetFacts {
    /// IPv4 CIDR block.
    pub cidr_block: String,
    /// IPv6 CIDR block, for dual-stack subnets.
    #[serde(default)]
    pub ipv6_cidr_block: Option<String>,
}

/// Deserialised instance spec file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InstanceSpecFile {
    /// Logical name.
    #[serde(default)]
    pub name: String,
    /// Candidate subnets, first authoritative.
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    /// VPC identifier.
    #[serde(default)]
    pub vpc_id: String,
    /// Security groups.
    #[serde(default)]
    pub security_groups: BTreeSet<String>,
    /// Instance class; falls back to the configured default.
    #[serde(default)]
    pub instance_type: Option<String>,
    /// Machine image identifier.
    #[serde(default)]
    pub image_id: String,
    /// DNS binding.
    #[serde(default)]
    pub dns: Option<DnsBinding>,
    /// Network flags.
    #[serde(default)]
    pub network: NetworkOptions,
    /// Inline cloud-config override.
    #[serde(default)]
    pub user_data: Option<String>,
    /// Cloud-config override file, relative to the spec file.
    #[serde(default)]
    pub user_data_file: Option<String>,
    /// Host keys.
    #[serde(default)]
    pub host_keys: Option<SshHostKeyBundle>,
    /// Swap volume size in GiB.
    #[serde(default)]
    pub swap_size_gb: Option<u32>,
    /// Notification topic for status-check alarms.
    #[serde(default)]
    pub notification_topic: Option<String>,
    /// Known ranges of existing subnets.
    #[serde(default)]
    pub subnets: BTreeMap<String, SubnetFacts>,
    #[serde(skip)]
    base_dir: Utf8PathBuf,
}

impl InstanceSpecFile {
    /// Reads and parses a spec file.
    ///
    /// # Errors
    ///
    /// Returns [`SpecFileError::Read`] or [`SpecFileError::Parse`] when the
    /// file cannot be loaded.
    pub fn load(path: &Utf8Path) -> Result<Self, SpecFileError> {
        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."))
            .to_path_buf();
        let contents = read_to_string_ambient(path.as_str(), Utf8Path::new(".")).map_err(|message| {
            SpecFileError::Read {
                path: path.to_path_buf(),
                message,
            }
        })?;
        let mut parsed = Self::parse(&contents).map_err(|message| SpecFileError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        parsed.base_dir = base_dir;
        Ok(parsed)
    }

    /// Parses spec TOML. Relative override files resolve against the
    /// current directory.
    ///
    /// # Errors
    ///
    /// Returns the parser message when the TOML is malformed.
    pub fn parse(contents: &str) -> Result<Self, String> {
        let mut parsed: Self = toml::from_str(contents).map_err(|err| err.to_string())?;
        parsed.base_dir = Utf8PathBuf::from(".");
        Ok(parsed)
    }

    /// Converts the file into a validated [`InstanceSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`SpecFileError`] when the user-data override cannot be
    /// resolved or the request is invalid.
    pub fn into_spec(self, default_instance_type: &str) -> Result<InstanceSpec, SpecFileError> {
        let user_data = resolve_user_data_override(
            self.user_data.as_deref(),
            self.user_data_file.as_deref(),
            &self.base_dir,
        )?;
        let builder = self
            .security_groups
            .into_iter()
            .fold(InstanceSpecBuilder::new(), InstanceSpecBuilder::security_group);
        let spec = builder
            .name(self.name)
            .subnet_ids(self.subnet_ids)
            .vpc_id(self.vpc_id)
            .instance_type(
                self.instance_type
                    .unwrap_or_else(|| default_instance_type.to_owned()),
            )
            .image_id(self.image_id)
            .dns(self.dns)
            .network(self.network)
            .user_data(user_data)
            .host_keys(self.host_keys)
            .swap_size_gb(self.swap_size_gb)
            .notification_topic(self.notification_topic)
            .build()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    const SPEC: &str = r#"
name = "gw"
subnet_ids = ["subnet-1"]
vpc_id = "vpc-1"
security_groups = ["sg-1"]
image_id = "ami-123"
swap_size_gb = 2

[dns]
zone = "Z1"
hostname = "gw"

[network]
use_elastic_ip = true
fixed_private_ip = true

[host_keys.ed25519]
private = "ED-PRIVATE"
public = "ssh-ed25519 AAAA gw"

[subnets.subnet-1]
cidr_block = "10.0.1.0/24"
"#;

    #[rstest]
    fn parses_a_complete_spec() {
        let file = InstanceSpecFile::parse(SPEC).unwrap_or_else(|err| panic!("parse: {err}"));
        assert!(file.network.use_elastic_ip);
        assert_eq!(
            file.subnets.get("subnet-1").map(|facts| facts.cidr_block.as_str()),
            Some("10.0.1.0/24")
        );

        let spec = file
            .into_spec("t4g.nano")
            .unwrap_or_else(|err| panic!("spec: {err}"));
        assert_eq!(spec.instance_type, "t4g.nano");
        assert_eq!(spec.swap_size_gb, Some(2));
        assert!(spec.host_keys.is_some());
    }

    #[rstest]
    fn unknown_keys_are_rejected() {
        let err = InstanceSpecFile::parse("name = \"gw\"\nsurprise = true\n")
            .expect_err("unknown key");
        assert!(err.contains("surprise"), "{err}");
    }

    #[rstest]
    fn override_files_resolve_next_to_the_spec() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 path: {}", path.display()));
        fs::write(dir.join("gw.yaml"), "packages: [wireguard-tools]\n")
            .unwrap_or_else(|err| panic!("write override: {err}"));
        fs::write(
            dir.join("gw.toml"),
            format!("user_data_file = \"gw.yaml\"\n{SPEC}"),
        )
        .unwrap_or_else(|err| panic!("write spec: {err}"));

        let spec = InstanceSpecFile::load(&dir.join("gw.toml"))
            .and_then(|file| file.into_spec("t4g.nano"))
            .unwrap_or_else(|err| panic!("load: {err}"));

        let packages = spec.user_data.map(|doc| doc.packages).unwrap_or_default();
        assert_eq!(packages, ["wireguard-tools"]);
    }

    #[rstest]
    fn invalid_requests_surface_validation_errors() {
        let err = InstanceSpecFile::parse("name = \"gw\"\n")
            .unwrap_or_else(|err| panic!("parse: {err}"))
            .into_spec("t4g.nano")
            .expect_err("no subnets");
        assert!(matches!(err, SpecFileError::Validation(ValidationError::NoSubnets)));
    }
}
