//! Instance provisioning.
//!
//! [`InstanceProvisioner`] turns an [`InstanceSpec`] into resource
//! declarations: it validates the request, reads the authoritative subnet,
//! derives fixed addresses, composes the bootstrap document, then declares
//! the interface, instance, static address, swap volume, alarm and DNS
//! records. Ordering is carried by output references and explicit edges;
//! nothing here waits on the cloud provider.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::address::{AddressAssignment, SubnetInfo, allocate};
use crate::dns::{DnsRequest, RecordTarget, bind, hostname_for};
use crate::engine::{Engine, Output, Property, ResourceDecl, ResourceRef, kinds};
use crate::error::ValidationError;
use crate::instance::InstanceSpec;
use crate::network::{AddressSource, NetworkTopology, PrimaryAddress, primary_address};
use crate::random::RandomSource;
use crate::user_data::{
    CloudConfig, ListOrder, append_commands, merge, merge_host_keys, prepend_commands,
};

mod commands;
mod error;

pub use commands::SWAP_DEVICE;
pub use error::ProvisionError;

use commands::{hostname_commands, swap_commands};

/// Subnet output carrying the IPv4 block.
pub const SUBNET_IPV4_KEY: &str = "cidr_block";
/// Subnet output carrying the IPv6 block; empty for IPv4-only subnets.
pub const SUBNET_IPV6_KEY: &str = "ipv6_cidr_block";

const STATUS_CHECK_PERIOD_SECS: u32 = 60;
const STATUS_CHECK_EVALUATION_PERIODS: u32 = 2;

/// Outputs of one provisioned instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ResolvedInstance {
    /// Primary address used by downstream consumers.
    pub ip: Output,
    /// Origin of [`Self::ip`].
    pub ip_source: AddressSource,
    /// Public IPv4, static or platform assigned.
    pub public_ip: Option<Output>,
    /// Private IPv4.
    pub private_ip: Output,
    /// IPv6 address, for dual-stack subnets.
    pub ipv6: Option<Output>,
    /// Instance identifier.
    pub instance_id: Output,
    /// Identifier of the interface carrying the addresses.
    pub interface_id: Output,
    /// Fully qualified hostname, when DNS was requested.
    pub hostname: Option<Output>,
}

/// Declares instances through an [`Engine`].
#[derive(Debug)]
pub struct InstanceProvisioner<'a, E: ?Sized, R: ?Sized> {
    engine: &'a E,
    random: &'a R,
    base: CloudConfig,
    order: ListOrder,
}

struct Network {
    topology: NetworkTopology,
    subnet: SubnetInfo,
    addresses: AddressAssignment,
}

struct Attached {
    instance: ResourceRef,
    interface: Option<ResourceRef>,
    /// Static address and its association.
    elastic_ip: Option<(ResourceRef, ResourceRef)>,
}

struct ResolvedAddresses {
    primary: PrimaryAddress,
    public_ip: Option<Output>,
    private_ip: Output,
    ipv6: Option<Output>,
}

impl<'a, E, R> InstanceProvisioner<'a, E, R>
where
    E: Engine + ?Sized,
    R: RandomSource + ?Sized,
{
    /// Creates a provisioner sharing `base` across every instance.
    #[must_use]
    pub const fn new(engine: &'a E, random: &'a R, base: CloudConfig) -> Self {
        Self {
            engine,
            random,
            base,
            order: ListOrder::BaseFirst,
        }
    }

    /// Chooses whether base or override list entries come first.
    #[must_use]
    pub const fn with_list_order(mut self, order: ListOrder) -> Self {
        self.order = order;
        self
    }

    /// Base bootstrap document.
    #[must_use]
    pub const fn base(&self) -> &CloudConfig {
        &self.base
    }

    /// Describes `spec` to the engine and returns its outputs.
    ///
    /// Validation happens before anything is declared, so an invalid request
    /// leaves the engine untouched. Engine errors are returned unchanged and
    /// never retried. Address and hostname draws are stored before the first
    /// declaration, so they outlive a pass that fails in the engine and are
    /// replayed by the next one.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the request is invalid, a stable value
    /// cannot be drawn, the bootstrap document cannot be rendered, or the
    /// engine fails.
    pub async fn provision(
        &self,
        spec: &InstanceSpec,
    ) -> Result<ResolvedInstance, ProvisionError<E::Error>> {
        spec.validate()?;
        let topology = NetworkTopology::choose(&spec.network)?;
        info!(instance = %spec.name, attachment = topology.attachment(), "provisioning instance");

        let subnet = self.subnet(spec).await?;
        let addresses = allocate(
            &subnet,
            spec.network.fixed_private_ip,
            spec.network.fixed_ipv6,
            self.random,
            &spec.name,
        )?;
        debug!(instance = %spec.name, ?addresses, "derived fixed addresses");

        let hostname = spec
            .dns
            .as_ref()
            .map(|binding| hostname_for(binding, self.random, &spec.name))
            .transpose()?;
        let user_data = self.compose_user_data(spec, hostname.as_deref())?;

        let network = Network {
            topology,
            subnet,
            addresses,
        };
        let interface = self.declare_interface(spec, &network).await?;
        let instance = self
            .declare_instance(spec, &network, interface.as_ref(), user_data)
            .await?;
        let elastic_ip = self
            .declare_elastic_ip(spec, &network, &instance, interface.as_ref())
            .await?;
        self.declare_swap(spec, &instance).await?;
        self.declare_status_alarm(spec, &instance).await?;

        let attached = Attached {
            instance,
            interface,
            elastic_ip,
        };
        let addresses_out = self.resolve_addresses(spec, &network, &attached).await?;
        let fqdn = match hostname {
            Some(name) => self.bind_dns(spec, &name, &addresses_out, &attached).await?,
            None => None,
        };

        let interface_id = match &attached.interface {
            Some(eni) => self.read(eni, "id").await?,
            None => {
                self.read(&attached.instance, "primary_network_interface_id")
                    .await?
            }
        };
        let resolved = ResolvedInstance {
            ip: addresses_out.primary.address,
            ip_source: addresses_out.primary.source,
            public_ip: addresses_out.public_ip,
            private_ip: addresses_out.private_ip,
            ipv6: addresses_out.ipv6,
            instance_id: self.read(&attached.instance, "id").await?,
            interface_id,
            hostname: fqdn,
        };
        info!(instance = %spec.name, ip = %resolved.ip, "instance described");
        Ok(resolved)
    }

    async fn resolve_addresses(
        &self,
        spec: &InstanceSpec,
        network: &Network,
        attached: &Attached,
    ) -> Result<ResolvedAddresses, ProvisionError<E::Error>> {
        let holder = attached.interface.as_ref().unwrap_or(&attached.instance);
        let private_ip = match network.addresses.private_ipv4 {
            Some(fixed) => Output::known(fixed.to_string()),
            None => self.read(holder, "private_ip").await?,
        };
        let ipv6 = match (network.addresses.ipv6, network.subnet.ipv6_cidr) {
            (Some(fixed), _) => Some(Output::known(fixed.to_string())),
            (None, Some(_)) => Some(self.read(holder, "ipv6_address").await?),
            (None, None) => None,
        };
        let platform_public = if network.topology.associate_public_ip {
            Some(self.read(&attached.instance, "public_ip").await?)
        } else {
            None
        };
        let elastic_public = match &attached.elastic_ip {
            Some((eip, link)) => Some(self.read(eip, "public_ip").await?.after(link)),
            None => None,
        };
        let primary = primary_address(
            elastic_public.as_ref(),
            platform_public.as_ref(),
            &private_ip,
            spec.network.prefer_private_address,
        );
        Ok(ResolvedAddresses {
            primary,
            public_ip: elastic_public.or(platform_public),
            private_ip,
            ipv6,
        })
    }

    async fn bind_dns(
        &self,
        spec: &InstanceSpec,
        hostname: &str,
        addresses: &ResolvedAddresses,
        attached: &Attached,
    ) -> Result<Option<Output>, ProvisionError<E::Error>> {
        let Some(binding) = &spec.dns else {
            return Ok(None);
        };
        let request = DnsRequest {
            instance: &spec.name,
            zone: &binding.zone,
            hostname,
            ipv4: RecordTarget {
                address: &addresses.primary.address,
                pinned: addresses.primary.is_pinned(spec.network.fixed_private_ip),
            },
            ipv6: addresses.ipv6.as_ref().map(|address| RecordTarget {
                address,
                pinned: spec.network.fixed_ipv6,
            }),
        };
        let records = bind(self.engine, &request)
            .await
            .map_err(ProvisionError::Engine)?;
        if let Some((_, link)) = &attached.elastic_ip {
            self.depend(&records.a_record, link).await?;
        }
        Ok(Some(records.hostname))
    }

    async fn subnet(&self, spec: &InstanceSpec) -> Result<SubnetInfo, ProvisionError<E::Error>> {
        let id = spec.primary_subnet().ok_or(ValidationError::NoSubnets)?;
        let subnet = ResourceRef::new(kinds::SUBNET, id);
        let ipv4 = self.read_known(&subnet, SUBNET_IPV4_KEY).await?;
        let ipv6 = self.read_known(&subnet, SUBNET_IPV6_KEY).await?;
        Ok(SubnetInfo::parse(id, &ipv4, Some(ipv6.as_str()))?)
    }

    fn compose_user_data(
        &self,
        spec: &InstanceSpec,
        hostname: Option<&str>,
    ) -> Result<String, ProvisionError<E::Error>> {
        let mut doc = spec
            .user_data
            .as_ref()
            .map_or_else(|| self.base.clone(), |overrides| merge(&self.base, overrides, self.order));
        if let Some(keys) = &spec.host_keys {
            doc = merge_host_keys(&doc, keys)?;
        }
        if let Some(name) = hostname {
            doc = prepend_commands(&doc, hostname_commands(name));
        }
        if spec.swap_size_gb.is_some() {
            doc = append_commands(&doc, swap_commands(SWAP_DEVICE));
        }
        Ok(doc.render()?)
    }

    async fn declare_interface(
        &self,
        spec: &InstanceSpec,
        network: &Network,
    ) -> Result<Option<ResourceRef>, ProvisionError<E::Error>> {
        if !network.topology.detached_interface {
            return Ok(None);
        }
        let base = ResourceDecl::new(kinds::NETWORK_INTERFACE, format!("{}-eni", spec.name))
            .property("subnet_id", network.subnet.id.as_str())
            .property("security_groups", security_groups(spec))
            .property("description", format!("{} primary interface", spec.name))
            .optional_property("source_dest_check", network.topology.source_dest_check);
        let decl = address_properties(base, network, "private_ips", true);
        Ok(Some(self.declare(decl).await?))
    }

    async fn declare_instance(
        &self,
        spec: &InstanceSpec,
        network: &Network,
        interface: Option<&ResourceRef>,
        user_data: String,
    ) -> Result<ResourceRef, ProvisionError<E::Error>> {
        let common = ResourceDecl::new(kinds::INSTANCE, spec.name.as_str())
            .property("ami", spec.image_id.as_str())
            .property("instance_type", spec.instance_type.as_str())
            .property("user_data", user_data)
            .property("network_attachment", network.topology.attachment())
            .property("tags", BTreeMap::from([(String::from("Name"), Property::from(spec.name.as_str()))]))
            .replace_on_changes("ami")
            .replace_on_changes("network_attachment");

        let decl = match interface {
            Some(eni) => common
                .property("network_interface_id", eni.output("id"))
                .replace_on_changes("network_interface_id"),
            None => address_properties(
                common
                    .property("subnet_id", network.subnet.id.as_str())
                    .property("vpc_security_group_ids", security_groups(spec))
                    .property(
                        "associate_public_ip_address",
                        network.topology.associate_public_ip,
                    )
                    .replace_on_changes("subnet_id"),
                network,
                "private_ip",
                false,
            ),
        };
        self.declare(decl).await
    }

    async fn declare_elastic_ip(
        &self,
        spec: &InstanceSpec,
        network: &Network,
        instance: &ResourceRef,
        interface: Option<&ResourceRef>,
    ) -> Result<Option<(ResourceRef, ResourceRef)>, ProvisionError<E::Error>> {
        if !network.topology.elastic_ip {
            return Ok(None);
        }
        let eip = self
            .declare(
                ResourceDecl::new(kinds::ELASTIC_IP, format!("{}-eip", spec.name))
                    .property("domain", "vpc"),
            )
            .await?;
        let allocation = ResourceDecl::new(
            kinds::ELASTIC_IP_ASSOCIATION,
            format!("{}-eip-association", spec.name),
        )
        .property("allocation_id", eip.output("allocation_id"));
        let decl = match interface {
            Some(eni) => allocation
                .property("network_interface_id", eni.output("id"))
                .depends_on(instance),
            None => allocation.property("instance_id", instance.output("id")),
        };
        let association = self.declare(decl).await?;
        Ok(Some((eip, association)))
    }

    async fn declare_swap(
        &self,
        spec: &InstanceSpec,
        instance: &ResourceRef,
    ) -> Result<(), ProvisionError<E::Error>> {
        let Some(size) = spec.swap_size_gb else {
            return Ok(());
        };
        let volume = self
            .declare(
                ResourceDecl::new(kinds::VOLUME, format!("{}-swap", spec.name))
                    .property("size", size)
                    .property("type", "gp3")
                    .property("encrypted", true)
                    .property("availability_zone", instance.output("availability_zone")),
            )
            .await?;
        self.declare(
            ResourceDecl::new(
                kinds::VOLUME_ATTACHMENT,
                format!("{}-swap-attachment", spec.name),
            )
            .property("device_name", SWAP_DEVICE)
            .property("volume_id", volume.output("id"))
            .property("instance_id", instance.output("id")),
        )
        .await?;
        Ok(())
    }

    async fn declare_status_alarm(
        &self,
        spec: &InstanceSpec,
        instance: &ResourceRef,
    ) -> Result<(), ProvisionError<E::Error>> {
        let Some(topic) = &spec.notification_topic else {
            return Ok(());
        };
        let dimensions = BTreeMap::from([(
            String::from("InstanceId"),
            Property::from(instance.output("id")),
        )]);
        self.declare(
            ResourceDecl::new(kinds::METRIC_ALARM, format!("{}-status-check", spec.name))
                .property("namespace", "AWS/EC2")
                .property("metric_name", "StatusCheckFailed")
                .property("statistic", "Maximum")
                .property("comparison_operator", "GreaterThanOrEqualToThreshold")
                .property("threshold", 1_u32)
                .property("period", STATUS_CHECK_PERIOD_SECS)
                .property("evaluation_periods", STATUS_CHECK_EVALUATION_PERIODS)
                .property("dimensions", dimensions)
                .property("alarm_actions", vec![topic.as_str()])
                .property("ok_actions", vec![topic.as_str()]),
        )
        .await?;
        Ok(())
    }

    async fn declare(&self, decl: ResourceDecl) -> Result<ResourceRef, ProvisionError<E::Error>> {
        self.engine
            .declare_resource(decl)
            .await
            .map_err(ProvisionError::Engine)
    }

    async fn depend(
        &self,
        dependent: &ResourceRef,
        dependency: &ResourceRef,
    ) -> Result<(), ProvisionError<E::Error>> {
        self.engine
            .declare_dependency(dependent, dependency)
            .await
            .map_err(ProvisionError::Engine)
    }

    async fn read(
        &self,
        resource: &ResourceRef,
        key: &str,
    ) -> Result<Output, ProvisionError<E::Error>> {
        self.engine
            .read_output(resource, key)
            .await
            .map_err(ProvisionError::Engine)
    }

    async fn read_known(
        &self,
        resource: &ResourceRef,
        key: &str,
    ) -> Result<String, ProvisionError<E::Error>> {
        let output = self.read(resource, key).await?;
        output
            .as_known()
            .map(str::to_owned)
            .ok_or_else(|| ProvisionError::UnresolvedSubnet {
                subnet: resource.name().to_owned(),
                key: key.to_owned(),
            })
    }
}

fn security_groups(spec: &InstanceSpec) -> Vec<String> {
    spec.security_groups.iter().cloned().collect()
}

/// Adds the fixed addresses, or asks for one platform IPv6 address on a
/// dual-stack subnet.
fn address_properties(
    decl: ResourceDecl,
    network: &Network,
    ipv4_key: &str,
    ipv4_as_list: bool,
) -> ResourceDecl {
    let with_ipv4 = match network.addresses.private_ipv4 {
        Some(ip) if ipv4_as_list => decl.property(ipv4_key, vec![ip.to_string()]),
        Some(ip) => decl.property(ipv4_key, ip.to_string()),
        None => decl,
    };
    match (network.addresses.ipv6, network.subnet.ipv6_cidr) {
        (Some(ip), _) => with_ipv4.property("ipv6_addresses", vec![ip.to_string()]),
        (None, Some(_)) => with_ipv4.property("ipv6_address_count", 1_u32),
        (None, None) => with_ipv4,
    }
}
