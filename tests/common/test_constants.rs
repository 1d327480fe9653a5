//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Subnet every test instance lands in.
pub const SUBNET_ID: &str = "subnet-1";

/// IPv4 block of [`SUBNET_ID`].
pub const SUBNET_IPV4: &str = "10.0.1.0/24";

/// IPv6 block of [`SUBNET_ID`].
pub const SUBNET_IPV6: &str = "2600:1f18:abcd:1201::/64";

/// Hosted zone used by DNS scenarios.
pub const ZONE_ID: &str = "Z1";

/// Instance class used when a spec does not name one.
pub const DEFAULT_INSTANCE_TYPE: &str = "t4g.nano";
