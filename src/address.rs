//! Fixed private address derivation.
//!
//! Addresses are spliced into the authoritative subnet's CIDR using memoized
//! draws, so an instance keeps the same private IPv4 and IPv6 across
//! replacement. There is no collision detection against addresses already
//! in use in the subnet.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::ops::RangeInclusive;

use ipnetwork::{Ipv4Network, Ipv6Network};
use thiserror::Error;

use crate::error::ValidationError;
use crate::random::{DrawKey, RandomError, RandomSource, StringSpec};

/// Range of the drawn last IPv4 octet.
pub const IPV4_HOST_RANGE: RangeInclusive<u32> = 10..=250;
/// Longest IPv4 prefix whose last octet can be replaced safely.
pub const MAX_IPV4_PREFIX: u8 = 24;
/// Longest IPv6 prefix that leaves a full 64-bit interface identifier.
pub const MAX_IPV6_PREFIX: u8 = 64;

const IPV6_DRAWN_SEGMENTS: usize = 4;
const IPV6_SEGMENT_CHARS: usize = 4;

/// Errors raised while deriving fixed addresses.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Raised when the subnet cannot host the requested address.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Raised when a draw cannot be produced or replayed.
    #[error(transparent)]
    Random(#[from] RandomError),
}

/// Address ranges of the subnet an instance is placed in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubnetInfo {
    /// Provider subnet identifier.
    pub id: String,
    /// IPv4 CIDR block.
    pub ipv4_cidr: Ipv4Network,
    /// IPv6 CIDR block, when the subnet is dual-stack.
    pub ipv6_cidr: Option<Ipv6Network>,
}

impl SubnetInfo {
    /// Parses subnet CIDR strings as reported by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidNetwork`] when either block fails to
    /// parse.
    pub fn parse(
        id: impl Into<String>,
        ipv4_cidr: &str,
        ipv6_cidr: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let ipv4 = ipv4_cidr
            .trim()
            .parse::<Ipv4Network>()
            .map_err(|_| ValidationError::InvalidNetwork {
                field: String::from("cidr_block"),
                value: ipv4_cidr.to_owned(),
            })?;
        let ipv6 = ipv6_cidr
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                raw.parse::<Ipv6Network>()
                    .map_err(|_| ValidationError::InvalidNetwork {
                        field: String::from("ipv6_cidr_block"),
                        value: raw.to_owned(),
                    })
            })
            .transpose()?;
        Ok(Self {
            id: id.into(),
            ipv4_cidr: ipv4,
            ipv6_cidr: ipv6,
        })
    }

    fn keyed(&self, name: String) -> DrawKey {
        DrawKey::new(name).keeper("subnet", &self.id)
    }
}

/// Fixed addresses derived for one instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AddressAssignment {
    /// Fixed private IPv4 address.
    pub private_ipv4: Option<Ipv4Addr>,
    /// Fixed IPv6 address.
    pub ipv6: Option<Ipv6Addr>,
}

/// Derives a fixed private IPv4 by replacing the last octet of the subnet's
/// network address with a draw from [`IPV4_HOST_RANGE`].
///
/// # Errors
///
/// Returns [`AllocationError::Validation`] when the subnet is narrower than a
/// /24, or [`AllocationError::Random`] when the draw fails.
pub fn derive_ipv4<R>(
    subnet: &SubnetInfo,
    random: &R,
    instance: &str,
) -> Result<Ipv4Addr, AllocationError>
where
    R: RandomSource + ?Sized,
{
    let prefix = subnet.ipv4_cidr.prefix();
    if prefix > MAX_IPV4_PREFIX {
        return Err(ValidationError::Ipv4PrefixTooLong {
            subnet: subnet.id.clone(),
            prefix,
        }
        .into());
    }

    let key = subnet
        .keyed(format!("{instance}-private-ipv4"))
        .keeper("cidr", subnet.ipv4_cidr.to_string());
    let drawn = random.integer(&key, IPV4_HOST_RANGE)?;
    let host = u8::try_from(drawn).map_err(|_| RandomError::OutOfRange {
        key: key.name().to_owned(),
        value: drawn.to_string(),
    })?;

    let [a, b, c, _] = subnet.ipv4_cidr.network().octets();
    Ok(Ipv4Addr::new(a, b, c, host))
}

/// Derives a fixed IPv6 address from the subnet's first four hextets and four
/// drawn hexadecimal segments.
///
/// The prefix check happens before any draw, so an oversized prefix leaves
/// the draw store untouched.
///
/// # Errors
///
/// Returns [`AllocationError::Validation`] when the subnet has no IPv6 block
/// or its prefix exceeds [`MAX_IPV6_PREFIX`], or
/// [`AllocationError::Random`] when a draw fails.
pub fn derive_ipv6<R>(
    subnet: &SubnetInfo,
    random: &R,
    instance: &str,
) -> Result<Ipv6Addr, AllocationError>
where
    R: RandomSource + ?Sized,
{
    let network = subnet
        .ipv6_cidr
        .ok_or_else(|| ValidationError::MissingIpv6Cidr {
            subnet: subnet.id.clone(),
        })?;
    let prefix = network.prefix();
    if prefix > MAX_IPV6_PREFIX {
        return Err(ValidationError::Ipv6PrefixTooLong {
            subnet: subnet.id.clone(),
            prefix,
        }
        .into());
    }

    let spec = StringSpec::hex_with_digit(IPV6_SEGMENT_CHARS);
    let mut drawn = [0_u16; IPV6_DRAWN_SEGMENTS];
    for (index, slot) in drawn.iter_mut().enumerate() {
        let key = subnet
            .keyed(format!("{instance}-ipv6-segment-{index}"))
            .keeper("cidr", network.to_string());
        let segment = random.string(&key, &spec)?;
        *slot = u16::from_str_radix(&segment, 16).map_err(|_| RandomError::OutOfRange {
            key: key.name().to_owned(),
            value: segment.clone(),
        })?;
    }

    let [s0, s1, s2, s3, ..] = network.network().segments();
    let [h0, h1, h2, h3] = drawn;
    Ok(Ipv6Addr::new(s0, s1, s2, s3, h0, h1, h2, h3))
}

/// Derives whichever fixed addresses are requested.
///
/// # Errors
///
/// Propagates the errors of [`derive_ipv4`] and [`derive_ipv6`].
pub fn allocate<R>(
    subnet: &SubnetInfo,
    fixed_ipv4: bool,
    fixed_ipv6: bool,
    random: &R,
    instance: &str,
) -> Result<AddressAssignment, AllocationError>
where
    R: RandomSource + ?Sized,
{
    // Both checks run before any draw so a bad ipv6 block never leaves a
    // half-stored assignment behind.
    if fixed_ipv6 {
        check_ipv6_block(subnet)?;
    }
    let private_ipv4 = fixed_ipv4
        .then(|| derive_ipv4(subnet, random, instance))
        .transpose()?;
    let ipv6 = fixed_ipv6
        .then(|| derive_ipv6(subnet, random, instance))
        .transpose()?;
    Ok(AddressAssignment { private_ipv4, ipv6 })
}

fn check_ipv6_block(subnet: &SubnetInfo) -> Result<(), ValidationError> {
    let Some(network) = subnet.ipv6_cidr else {
        return Err(ValidationError::MissingIpv6Cidr {
            subnet: subnet.id.clone(),
        });
    };
    if network.prefix() > MAX_IPV6_PREFIX {
        return Err(ValidationError::Ipv6PrefixTooLong {
            subnet: subnet.id.clone(),
            prefix: network.prefix(),
        });
    }
    Ok(())
}
