//! Network attachment topology.
//!
//! An instance either uses the default interface the platform creates with
//! it, or a detached interface declared first and referenced by the
//! instance, so its addresses survive instance replacement. A static public
//! address is allocated separately and associated after both it and the
//! instance exist.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::Output;
use crate::error::ValidationError;

/// Caller flags describing how an instance attaches to the network.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "each flag is an independent user-facing network toggle"
)]
pub struct NetworkOptions {
    /// Derive and pin the private IPv4 address.
    pub fixed_private_ip: bool,
    /// Derive and pin the IPv6 address.
    pub fixed_ipv6: bool,
    /// Allocate a static public address.
    pub use_elastic_ip: bool,
    /// Attach through a standalone interface.
    pub use_detached_interface: bool,
    /// Source/destination check override; only valid on a detached interface.
    pub source_dest_check: Option<bool>,
    /// Ask the platform for an ephemeral public address.
    pub associate_public_ip: bool,
    /// Prefer the private address over a platform public one downstream.
    pub prefer_private_address: bool,
}

/// Network topology chosen for one instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NetworkTopology {
    /// Whether a standalone interface is declared ahead of the instance.
    pub detached_interface: bool,
    /// Whether a static public address is allocated and associated.
    pub elastic_ip: bool,
    /// Source/destination check carried by the detached interface.
    pub source_dest_check: Option<bool>,
    /// Whether the platform assigns an ephemeral public address.
    pub associate_public_ip: bool,
}

impl NetworkTopology {
    /// Checks that the flags describe a topology the platform can express.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::SourceDestCheckRequiresInterface`] when a
    /// source/destination check override is set without a detached
    /// interface, whatever its value.
    pub const fn check(options: &NetworkOptions) -> Result<(), ValidationError> {
        if options.source_dest_check.is_some() && !options.use_detached_interface {
            return Err(ValidationError::SourceDestCheckRequiresInterface);
        }
        Ok(())
    }

    /// Chooses the topology for `options`.
    ///
    /// # Errors
    ///
    /// Returns the error of [`Self::check`].
    pub fn choose(options: &NetworkOptions) -> Result<Self, ValidationError> {
        Self::check(options)?;

        let associate_public_ip = if options.use_detached_interface && options.associate_public_ip {
            warn!(
                "network.associate_public_ip ignored: ephemeral public addresses are only \
                 assigned to the default interface"
            );
            false
        } else {
            options.associate_public_ip
        };

        Ok(Self {
            detached_interface: options.use_detached_interface,
            elastic_ip: options.use_elastic_ip,
            source_dest_check: options.source_dest_check,
            associate_public_ip,
        })
    }

    /// Short label of the attachment layout. A change of label means the
    /// instance must be replaced.
    #[must_use]
    pub const fn attachment(&self) -> &'static str {
        if self.detached_interface {
            "detached-interface"
        } else {
            "default-interface"
        }
    }
}

/// Where the primary address of an instance comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    /// Static public address.
    ElasticIp,
    /// Ephemeral public address assigned by the platform.
    PlatformPublic,
    /// Private address.
    Private,
}

/// Address downstream consumers such as DNS should use.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrimaryAddress {
    /// Origin of the address.
    pub source: AddressSource,
    /// The address itself.
    pub address: Output,
}

impl PrimaryAddress {
    /// Whether the address survives instance replacement.
    #[must_use]
    pub const fn is_pinned(&self, fixed_private_ip: bool) -> bool {
        match self.source {
            AddressSource::ElasticIp => true,
            AddressSource::PlatformPublic => false,
            AddressSource::Private => fixed_private_ip,
        }
    }
}

/// Selects the primary address: the elastic address when allocated, else
/// the platform public address when one exists and private preference is
/// off, else the private address.
#[must_use]
pub fn primary_address(
    elastic_ip: Option<&Output>,
    platform_public: Option<&Output>,
    private: &Output,
    prefer_private: bool,
) -> PrimaryAddress {
    if let Some(address) = elastic_ip {
        return PrimaryAddress {
            source: AddressSource::ElasticIp,
            address: address.clone(),
        };
    }

    let public = platform_public
        .filter(|_| !prefer_private)
        .filter(|output| output.as_known().is_none_or(|known| !known.trim().is_empty()));
    public.map_or_else(
        || PrimaryAddress {
            source: AddressSource::Private,
            address: private.clone(),
        },
        |address| PrimaryAddress {
            source: AddressSource::PlatformPublic,
            address: address.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ResourceRef, kinds};
    use rstest::rstest;

    #[rstest]
    #[case(Some(true))]
    #[case(Some(false))]
    fn source_dest_check_needs_a_detached_interface(#[case] check: Option<bool>) {
        let options = NetworkOptions {
            source_dest_check: check,
            use_elastic_ip: true,
            ..NetworkOptions::default()
        };
        let err = NetworkTopology::choose(&options).expect_err("should be rejected");
        assert_eq!(err, ValidationError::SourceDestCheckRequiresInterface);
    }

    #[rstest]
    fn detached_interface_carries_the_check() {
        let options = NetworkOptions {
            source_dest_check: Some(false),
            use_detached_interface: true,
            ..NetworkOptions::default()
        };
        let topology = NetworkTopology::choose(&options).unwrap_or_else(|err| panic!("{err}"));
        assert!(topology.detached_interface);
        assert_eq!(topology.source_dest_check, Some(false));
        assert_eq!(topology.attachment(), "detached-interface");
    }

    #[rstest]
    fn detached_interface_drops_the_ephemeral_public_address() {
        let options = NetworkOptions {
            use_detached_interface: true,
            associate_public_ip: true,
            ..NetworkOptions::default()
        };
        let topology = NetworkTopology::choose(&options).unwrap_or_else(|err| panic!("{err}"));
        assert!(!topology.associate_public_ip);
    }

    fn instance_output(key: &str) -> Output {
        Output::reference(ResourceRef::new(kinds::INSTANCE, "gw").output(key))
    }

    #[rstest]
    #[case(true, true, false, AddressSource::ElasticIp)]
    #[case(true, true, true, AddressSource::ElasticIp)]
    #[case(false, true, false, AddressSource::PlatformPublic)]
    #[case(false, true, true, AddressSource::Private)]
    #[case(false, false, false, AddressSource::Private)]
    fn primary_address_precedence(
        #[case] elastic: bool,
        #[case] public: bool,
        #[case] prefer_private: bool,
        #[case] expected: AddressSource,
    ) {
        let eip = Output::reference(ResourceRef::new(kinds::ELASTIC_IP, "gw-eip").output("public_ip"));
        let platform = instance_output("public_ip");
        let private = Output::known("10.0.1.20");

        let primary = primary_address(
            elastic.then_some(&eip),
            public.then_some(&platform),
            &private,
            prefer_private,
        );

        assert_eq!(primary.source, expected);
    }

    #[rstest]
    fn empty_platform_address_falls_back_to_private() {
        let private = Output::known("10.0.1.20");
        let primary = primary_address(None, Some(&Output::known("")), &private, false);
        assert_eq!(primary.address, private);
        assert!(primary.is_pinned(true));
        assert!(!primary.is_pinned(false));
    }
}
