//! Forward DNS records for a provisioned instance.

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, Output, Property, ResourceDecl, ResourceRef, kinds};
use crate::random::{DrawKey, RandomError, RandomSource, StringSpec};

/// TTL of records pointing at addresses that survive replacement.
pub const PINNED_TTL: u32 = 3600;
/// TTL of records pointing at addresses that may change.
pub const CHURN_TTL: u32 = 300;
/// Length of generated hostnames.
pub const GENERATED_HOSTNAME_LENGTH: usize = 8;

/// Zone and optional hostname an instance is published under.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DnsBinding {
    /// Hosted zone identifier.
    pub zone: String,
    /// Record name; generated when absent.
    #[serde(default)]
    pub hostname: Option<String>,
}

/// Returns the binding's hostname, or a memoized random lowercase label.
///
/// # Errors
///
/// Returns [`RandomError`] when a generated name cannot be drawn or stored.
pub fn hostname_for<R>(binding: &DnsBinding, random: &R, instance: &str) -> Result<String, RandomError>
where
    R: RandomSource + ?Sized,
{
    if let Some(hostname) = binding
        .hostname
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        return Ok(hostname.to_owned());
    }
    let key = DrawKey::new(format!("{instance}-hostname")).keeper("zone", &binding.zone);
    random.string(&key, &StringSpec::lowercase(GENERATED_HOSTNAME_LENGTH))
}

/// TTL for a record whose address is or is not pinned.
#[must_use]
pub const fn record_ttl(pinned: bool) -> u32 {
    if pinned { PINNED_TTL } else { CHURN_TTL }
}

/// Address a record points at.
#[derive(Clone, Debug)]
pub struct RecordTarget<'a> {
    /// Address value.
    pub address: &'a Output,
    /// Whether the address survives instance replacement.
    pub pinned: bool,
}

/// Records to publish for one instance.
#[derive(Clone, Debug)]
pub struct DnsRequest<'a> {
    /// Logical instance name, used to name the records.
    pub instance: &'a str,
    /// Hosted zone identifier.
    pub zone: &'a str,
    /// Record name.
    pub hostname: &'a str,
    /// Target of the A record.
    pub ipv4: RecordTarget<'a>,
    /// Target of the AAAA record, when the instance has IPv6.
    pub ipv6: Option<RecordTarget<'a>>,
}

/// Records declared by [`bind`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DnsRecords {
    /// A record.
    pub a_record: ResourceRef,
    /// AAAA record, when declared.
    pub aaaa_record: Option<ResourceRef>,
    /// Fully qualified name; resolves once every record exists.
    pub hostname: Output,
}

fn record(request: &DnsRequest<'_>, record_type: &str, target: &RecordTarget<'_>) -> ResourceDecl {
    ResourceDecl::new(
        kinds::DNS_RECORD,
        format!("{}-{}", request.instance, record_type.to_ascii_lowercase()),
    )
    .property("zone_id", request.zone)
    .property("name", request.hostname)
    .property("type", record_type)
    .property("ttl", record_ttl(target.pinned))
    .property("records", vec![Property::from(target.address)])
}

/// Declares the A record and, when an IPv6 target exists, the AAAA record.
///
/// The returned hostname waits on every declared record.
///
/// # Errors
///
/// Propagates engine errors unchanged.
pub async fn bind<E>(engine: &E, request: &DnsRequest<'_>) -> Result<DnsRecords, E::Error>
where
    E: Engine + ?Sized,
{
    let a_record = engine
        .declare_resource(record(request, "A", &request.ipv4))
        .await?;
    let mut hostname = engine.read_output(&a_record, "fqdn").await?;

    let mut aaaa_record = None;
    if let Some(target) = &request.ipv6 {
        let aaaa = engine
            .declare_resource(record(request, "AAAA", target))
            .await?;
        hostname = hostname.after(&aaaa);
        aaaa_record = Some(aaaa);
    }

    Ok(DnsRecords {
        a_record,
        aaaa_record,
        hostname,
    })
}
