//! Validation errors shared by every provisioning step.
//!
//! A [`ValidationError`] is always fatal: it means the caller supplied
//! malformed or contradictory input and must fix it before retrying.

use thiserror::Error;

use crate::user_data::KeyAlgorithm;

/// Malformed or contradictory provisioning input.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// Raised when a required string field is empty after trimming.
    #[error("missing or empty field: {0}")]
    EmptyField(String),
    /// Raised when an instance is requested without any subnet.
    #[error("subnet_ids must name at least one subnet")]
    NoSubnets,
    /// Raised when a source/destination check override is requested on the
    /// instance's default interface.
    #[error(
        "network.source_dest_check requires network.use_detached_interface: the platform only \
         accepts the override on a standalone interface"
    )]
    SourceDestCheckRequiresInterface,
    /// Raised when a CIDR or address string cannot be parsed.
    #[error("{field} is not a valid network: `{value}`")]
    InvalidNetwork {
        /// Field carrying the value.
        field: String,
        /// Offending value.
        value: String,
    },
    /// Raised when a fixed IPv4 address is requested in a subnet narrower
    /// than a /24.
    #[error("subnet {subnet} ipv4 prefix /{prefix} is longer than /24; fixed ipv4 derivation replaces the last octet")]
    Ipv4PrefixTooLong {
        /// Subnet identifier.
        subnet: String,
        /// Allocated prefix length.
        prefix: u8,
    },
    /// Raised when a fixed IPv6 address is requested in a subnet whose
    /// prefix leaves fewer than 64 interface bits.
    #[error("subnet {subnet} ipv6 prefix /{prefix} exceeds /64; fixed ipv6 derivation needs a prefix length <= 64")]
    Ipv6PrefixTooLong {
        /// Subnet identifier.
        subnet: String,
        /// Allocated prefix length.
        prefix: u8,
    },
    /// Raised when a fixed IPv6 address is requested but the subnet has no
    /// IPv6 allocation.
    #[error("network.fixed_ipv6 requested but subnet {subnet} has no ipv6 cidr block")]
    MissingIpv6Cidr {
        /// Subnet identifier.
        subnet: String,
    },
    /// Raised when only one half of an SSH host key pair is supplied.
    #[error("ssh host key for {algorithm} is incomplete: private and public keys must both be set")]
    IncompleteHostKey {
        /// Algorithm whose pair is incomplete.
        algorithm: KeyAlgorithm,
    },
    /// Raised when a swap volume is requested with a zero size.
    #[error("swap_size_gb must be greater than zero")]
    InvalidSwapSize,
}
