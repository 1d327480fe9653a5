//! Instance requests.
//!
//! An [`InstanceSpec`] is the immutable description of one instance. It is
//! normally produced by [`InstanceSpecBuilder`], which trims string inputs
//! and validates the whole request eagerly, or loaded from a TOML spec file
//! through [`InstanceSpecFile`].

use std::collections::BTreeSet;

use crate::dns::DnsBinding;
use crate::error::ValidationError;
use crate::network::{NetworkOptions, NetworkTopology};
use crate::user_data::{CloudConfig, SshHostKeyBundle};

mod file;

pub use file::{InstanceSpecFile, SpecFileError, SubnetFacts};

/// Parameters describing one instance to provision.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceSpec {
    /// Logical name; every declared resource is named after it.
    pub name: String,
    /// Candidate subnets. The first one is authoritative.
    pub subnet_ids: Vec<String>,
    /// VPC the subnets belong to.
    pub vpc_id: String,
    /// Security groups attached to the instance or its interface.
    pub security_groups: BTreeSet<String>,
    /// Instance class, for example `t4g.small`.
    pub instance_type: String,
    /// Machine image identifier.
    pub image_id: String,
    /// Forward DNS binding.
    pub dns: Option<DnsBinding>,
    /// Network attachment flags.
    pub network: NetworkOptions,
    /// Caller cloud-config merged onto the base document.
    pub user_data: Option<CloudConfig>,
    /// Host keys pinned into the bootstrap document.
    pub host_keys: Option<SshHostKeyBundle>,
    /// Size of a dedicated swap volume in GiB.
    pub swap_size_gb: Option<u32>,
    /// Notification topic receiving status-check alarms.
    pub notification_topic: Option<String>,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::new()
    }

    /// Authoritative subnet, the first listed.
    #[must_use]
    pub fn primary_subnet(&self) -> Option<&str> {
        self.subnet_ids.first().map(String::as_str)
    }

    /// Validates the request, naming the first offending field.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a required field is empty, no subnet
    /// is given, the network flags contradict each other, a host key pair is
    /// incomplete, or a zero swap size is requested.
    pub fn validate(&self) -> Result<(), ValidationError> {
        NetworkTopology::check(&self.network)?;

        require("name", &self.name)?;
        if self.subnet_ids.is_empty() {
            return Err(ValidationError::NoSubnets);
        }
        if self.subnet_ids.iter().any(|id| id.is_empty()) {
            return Err(ValidationError::EmptyField(String::from("subnet_ids")));
        }
        require("vpc_id", &self.vpc_id)?;
        if self.security_groups.iter().any(|group| group.is_empty()) {
            return Err(ValidationError::EmptyField(String::from("security_groups")));
        }
        require("instance_type", &self.instance_type)?;
        require("image_id", &self.image_id)?;
        if let Some(dns) = &self.dns {
            require("dns.zone", &dns.zone)?;
        }
        if let Some(keys) = &self.host_keys {
            keys.validate()?;
        }
        if self.swap_size_gb == Some(0) {
            return Err(ValidationError::InvalidSwapSize);
        }
        if let Some(topic) = &self.notification_topic {
            require("notification_topic", topic)?;
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::EmptyField(field.to_owned()));
    }
    Ok(())
}

fn trimmed(value: &str) -> String {
    value.trim().to_owned()
}

/// Builder for [`InstanceSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceSpecBuilder {
    spec: InstanceSpec,
}

impl InstanceSpecBuilder {
    /// Creates an empty builder; required fields must be set before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the logical name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.spec.name = value.into();
        self
    }

    /// Appends a subnet. The first subnet added is authoritative.
    #[must_use]
    pub fn subnet_id(mut self, value: impl Into<String>) -> Self {
        self.spec.subnet_ids.push(value.into());
        self
    }

    /// Replaces the subnet list.
    #[must_use]
    pub fn subnet_ids<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.subnet_ids = values.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the VPC identifier.
    #[must_use]
    pub fn vpc_id(mut self, value: impl Into<String>) -> Self {
        self.spec.vpc_id = value.into();
        self
    }

    /// Adds a security group.
    #[must_use]
    pub fn security_group(mut self, value: impl Into<String>) -> Self {
        self.spec.security_groups.insert(value.into());
        self
    }

    /// Sets the instance class.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.spec.instance_type = value.into();
        self
    }

    /// Sets the machine image.
    #[must_use]
    pub fn image_id(mut self, value: impl Into<String>) -> Self {
        self.spec.image_id = value.into();
        self
    }

    /// Publishes the instance in DNS.
    #[must_use]
    pub fn dns(mut self, value: Option<DnsBinding>) -> Self {
        self.spec.dns = value;
        self
    }

    /// Sets the network attachment flags.
    #[must_use]
    pub const fn network(mut self, value: NetworkOptions) -> Self {
        self.spec.network = value;
        self
    }

    /// Sets the caller cloud-config override.
    #[must_use]
    pub fn user_data(mut self, value: Option<CloudConfig>) -> Self {
        self.spec.user_data = value;
        self
    }

    /// Sets the host key bundle.
    #[must_use]
    pub fn host_keys(mut self, value: Option<SshHostKeyBundle>) -> Self {
        self.spec.host_keys = value;
        self
    }

    /// Requests a swap volume of the given size in GiB.
    #[must_use]
    pub const fn swap_size_gb(mut self, value: Option<u32>) -> Self {
        self.spec.swap_size_gb = value;
        self
    }

    /// Sets the notification topic for status-check alarms.
    #[must_use]
    pub fn notification_topic(mut self, value: Option<String>) -> Self {
        self.spec.notification_topic = value;
        self
    }

    /// Builds and validates the [`InstanceSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the request is incomplete or
    /// contradictory.
    pub fn build(self) -> Result<InstanceSpec, ValidationError> {
        let raw = self.spec;
        let spec = InstanceSpec {
            name: trimmed(&raw.name),
            subnet_ids: raw.subnet_ids.iter().map(|id| trimmed(id)).collect(),
            vpc_id: trimmed(&raw.vpc_id),
            security_groups: raw
                .security_groups
                .iter()
                .map(|group| trimmed(group))
                .collect(),
            instance_type: trimmed(&raw.instance_type),
            image_id: trimmed(&raw.image_id),
            dns: raw.dns.map(|binding| DnsBinding {
                zone: trimmed(&binding.zone),
                hostname: binding.hostname.map(|name| trimmed(&name)),
            }),
            network: raw.network,
            user_data: raw.user_data,
            host_keys: raw.host_keys,
            swap_size_gb: raw.swap_size_gb,
            notification_topic: raw.notification_topic.map(|topic| trimmed(&topic)),
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_data::HostKeyPair;
    use rstest::{fixture, rstest};

    #[fixture]
    fn builder() -> InstanceSpecBuilder {
        InstanceSpec::builder()
            .name(" gw ")
            .subnet_id("subnet-1")
            .subnet_id("subnet-2")
            .vpc_id("vpc-1")
            .security_group("sg-1")
            .instance_type("t4g.nano")
            .image_id("ami-123")
    }

    #[rstest]
    fn build_trims_and_keeps_subnet_order(builder: InstanceSpecBuilder) {
        let spec = builder.build().unwrap_or_else(|err| panic!("build: {err}"));
        assert_eq!(spec.name, "gw");
        assert_eq!(spec.primary_subnet(), Some("subnet-1"));
    }

    #[rstest]
    #[case::name(InstanceSpecBuilder::name, "name")]
    #[case::vpc(InstanceSpecBuilder::vpc_id, "vpc_id")]
    #[case::instance_type(InstanceSpecBuilder::instance_type, "instance_type")]
    #[case::image(InstanceSpecBuilder::image_id, "image_id")]
    fn blank_required_fields_are_named(
        builder: InstanceSpecBuilder,
        #[case] setter: fn(InstanceSpecBuilder, &'static str) -> InstanceSpecBuilder,
        #[case] field: &str,
    ) {
        let err = setter(builder, "  ").build().expect_err("blank field");
        assert_eq!(err, ValidationError::EmptyField(field.to_owned()));
    }

    #[rstest]
    fn subnets_are_required(builder: InstanceSpecBuilder) {
        let err = builder
            .subnet_ids(Vec::<String>::new())
            .build()
            .expect_err("no subnets");
        assert_eq!(err, ValidationError::NoSubnets);
    }

    #[rstest]
    fn source_dest_check_without_interface_fails_first(builder: InstanceSpecBuilder) {
        let err = builder
            .name("")
            .network(NetworkOptions {
                source_dest_check: Some(true),
                ..NetworkOptions::default()
            })
            .build()
            .expect_err("contradictory flags");
        assert_eq!(err, ValidationError::SourceDestCheckRequiresInterface);
    }

    #[rstest]
    fn zero_swap_is_rejected(builder: InstanceSpecBuilder) {
        let err = builder.swap_size_gb(Some(0)).build().expect_err("zero swap");
        assert_eq!(err, ValidationError::InvalidSwapSize);
    }

    #[rstest]
    fn incomplete_host_keys_are_rejected(builder: InstanceSpecBuilder) {
        let keys = SshHostKeyBundle {
            ecdsa: HostKeyPair {
                private: Some(String::from("EC-PRIVATE")),
                public: None,
            },
            ..SshHostKeyBundle::default()
        };
        let err = builder.host_keys(Some(keys)).build().expect_err("incomplete");
        assert!(err.to_string().contains("ecdsa"), "{err}");
    }
}
