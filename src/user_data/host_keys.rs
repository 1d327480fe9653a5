//! SSH host key injection.
//!
//! Pinning host keys lets a replaced instance present the same identity to
//! clients. Only ECDSA and Ed25519 keys are forwarded into the document; RSA
//! and DSA material is accepted as input but withheld.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::CloudConfig;
use crate::error::ValidationError;

/// Host key algorithms understood by cloud-init.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// RSA.
    Rsa,
    /// DSA.
    Dsa,
    /// ECDSA.
    Ecdsa,
    /// Ed25519.
    Ed25519,
}

impl KeyAlgorithm {
    /// Every algorithm, in validation order.
    pub const ALL: [Self; 4] = [Self::Rsa, Self::Dsa, Self::Ecdsa, Self::Ed25519];

    /// cloud-init's name for the algorithm.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Dsa => "dsa",
            Self::Ecdsa => "ecdsa",
            Self::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithms whose keys are written into the document.
pub const FORWARDED_ALGORITHMS: &[KeyAlgorithm] = &[KeyAlgorithm::Ecdsa, KeyAlgorithm::Ed25519];

/// Algorithms accepted as input but never written into the document.
pub const WITHHELD_ALGORITHMS: &[KeyAlgorithm] = &[KeyAlgorithm::Rsa, KeyAlgorithm::Dsa];

/// cloud-init's generation list when a document does not set one.
const DEFAULT_GENKEYTYPES: [&str; 3] = ["rsa", "ecdsa", "ed25519"];

/// Private and public halves of one host key.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct HostKeyPair {
    /// Private key in OpenSSH PEM form.
    #[serde(default)]
    pub private: Option<String>,
    /// Public key line.
    #[serde(default)]
    pub public: Option<String>,
}

impl HostKeyPair {
    /// Builds a complete pair.
    #[must_use]
    pub fn new(private: impl Into<String>, public: impl Into<String>) -> Self {
        Self {
            private: Some(private.into()),
            public: Some(public.into()),
        }
    }

    fn present(value: Option<&String>) -> Option<&str> {
        value.map(String::as_str).filter(|raw| !raw.trim().is_empty())
    }

    /// Returns both halves when complete, `None` when both are absent.
    fn complete(&self, algorithm: KeyAlgorithm) -> Result<Option<(&str, &str)>, ValidationError> {
        match (
            Self::present(self.private.as_ref()),
            Self::present(self.public.as_ref()),
        ) {
            (Some(private), Some(public)) => Ok(Some((private, public))),
            (None, None) => Ok(None),
            _ => Err(ValidationError::IncompleteHostKey { algorithm }),
        }
    }
}

/// Host keys for one instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct SshHostKeyBundle {
    /// RSA pair, withheld from the document.
    #[serde(default)]
    pub rsa: HostKeyPair,
    /// DSA pair, withheld from the document.
    #[serde(default)]
    pub dsa: HostKeyPair,
    /// ECDSA pair.
    #[serde(default)]
    pub ecdsa: HostKeyPair,
    /// Ed25519 pair.
    #[serde(default)]
    pub ed25519: HostKeyPair,
}

impl SshHostKeyBundle {
    /// Pair for one algorithm.
    #[must_use]
    pub const fn pair(&self, algorithm: KeyAlgorithm) -> &HostKeyPair {
        match algorithm {
            KeyAlgorithm::Rsa => &self.rsa,
            KeyAlgorithm::Dsa => &self.dsa,
            KeyAlgorithm::Ecdsa => &self.ecdsa,
            KeyAlgorithm::Ed25519 => &self.ed25519,
        }
    }

    /// Checks that every algorithm has both halves or neither.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::IncompleteHostKey`] naming the first
    /// incomplete algorithm.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for algorithm in KeyAlgorithm::ALL {
            self.pair(algorithm).complete(algorithm)?;
        }
        Ok(())
    }
}

/// Returns a copy of `doc` carrying the bundle's forwarded host keys.
///
/// Each forwarded algorithm's keys land under `ssh_keys` as
/// `<alg>_private`/`<alg>_public`, the algorithm is dropped from
/// `ssh_genkeytypes` so cloud-init does not regenerate it, and
/// `ssh_deletekeys` is turned off. Applying the same bundle twice yields the
/// same document. Withheld material triggers a warning and is ignored.
///
/// # Errors
///
/// Returns [`ValidationError::IncompleteHostKey`] when any pair is
/// incomplete; no keys are applied in that case.
pub fn merge_host_keys(
    doc: &CloudConfig,
    bundle: &SshHostKeyBundle,
) -> Result<CloudConfig, ValidationError> {
    bundle.validate()?;

    for algorithm in WITHHELD_ALGORITHMS {
        if bundle.pair(*algorithm).complete(*algorithm)?.is_some() {
            warn!(
                algorithm = %algorithm,
                "ssh host key accepted but withheld from user-data by policy"
            );
        }
    }

    let mut merged = doc.clone();
    let mut applied = Vec::new();
    for algorithm in FORWARDED_ALGORITHMS {
        let Some((private, public)) = bundle.pair(*algorithm).complete(*algorithm)? else {
            continue;
        };
        merged
            .ssh_keys
            .insert(format!("{algorithm}_private"), private.to_owned());
        merged
            .ssh_keys
            .insert(format!("{algorithm}_public"), public.to_owned());
        applied.push(algorithm.as_str());
    }

    if applied.is_empty() {
        return Ok(merged);
    }

    let generated = merged
        .ssh_genkeytypes
        .take()
        .unwrap_or_else(|| DEFAULT_GENKEYTYPES.iter().map(|kind| (*kind).to_owned()).collect());
    merged.ssh_genkeytypes = Some(
        generated
            .into_iter()
            .filter(|kind| !applied.iter().any(|done| *done == kind.as_str()))
            .collect(),
    );
    merged.ssh_deletekeys = Some(false);
    Ok(merged)
}
