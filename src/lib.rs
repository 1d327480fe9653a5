//! Declarative provisioning of home-lab gateway instances.
//!
//! The crate describes one cloud instance, with its network interface,
//! static address, bootstrap document and DNS records, as a graph of
//! resource declarations handed to a deployment [`engine::Engine`]. Fixed
//! addresses and generated hostnames come from memoized random draws so a
//! repeated run describes the same resources. [`engine::PlanEngine`] records
//! the graph as a dry-run plan.

pub mod address;
pub mod cloud_init;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
pub mod instance;
pub mod logging;
pub mod network;
pub mod provision;
pub mod random;
#[cfg(test)]
pub mod test_helpers;
pub mod user_data;

pub use address::{AddressAssignment, AllocationError, SubnetInfo, allocate};
pub use config::{ConfigError, StackConfig};
pub use dns::{DnsBinding, DnsRecords, DnsRequest};
pub use engine::{Engine, Output, PlanEngine, PlanError, ResourceDecl, ResourceRef};
pub use error::ValidationError;
pub use instance::{InstanceSpec, InstanceSpecBuilder, InstanceSpecFile};
pub use network::{NetworkOptions, NetworkTopology};
pub use provision::{InstanceProvisioner, ProvisionError, ResolvedInstance};
pub use random::{FileDrawStore, MemoizedRandom, MemoryDrawStore, RandomSource};
pub use user_data::{CloudConfig, ListOrder, SshHostKeyBundle};
