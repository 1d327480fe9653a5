//! Randomness that stays stable across re-evaluation.
//!
//! Fixed addresses and generated hostnames are drawn once and then replayed
//! from a [`DrawStore`] on every later provisioning pass, so re-evaluating an
//! unchanged graph never re-rolls a value (and never triggers a spurious
//! replacement). A draw is keyed by a stable resource identity; its
//! *keepers* are the inputs whose change invalidates the stored value.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

mod store;

pub use store::{DrawStore, DrawStoreError, FileDrawStore, MemoryDrawStore};

const DIGITS: &[u8] = b"0123456789";
const HEX_DIGITS: &[u8] = b"0123456789abcdef";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Errors raised while producing a random value.
#[derive(Debug, Error)]
pub enum RandomError {
    /// Raised when the draw store cannot be read or written.
    #[error(transparent)]
    Store(#[from] DrawStoreError),
    /// Raised when the random source lock was poisoned.
    #[error("random generator lock poisoned")]
    Poisoned,
    /// Raised when a replayed or drawn value does not fit its consumer.
    #[error("draw {key} produced out-of-range value {value}")]
    OutOfRange {
        /// Draw identity.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Stable identity of one draw plus the inputs it was drawn for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DrawKey {
    name: String,
    keepers: BTreeMap<String, String>,
}

impl DrawKey {
    /// Creates a key with no keepers.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keepers: BTreeMap::new(),
        }
    }

    /// Adds an input whose change forces a fresh draw.
    #[must_use]
    pub fn keeper(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keepers.insert(key.into(), value.into());
        self
    }

    /// Draw identity.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Shape of a random string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StringSpec {
    length: usize,
    alphabet: &'static [u8],
    min_digits: usize,
}

impl StringSpec {
    /// Lowercase ASCII letters only.
    #[must_use]
    pub const fn lowercase(length: usize) -> Self {
        Self {
            length,
            alphabet: LOWERCASE,
            min_digits: 0,
        }
    }

    /// Lowercase hexadecimal with at least one decimal digit.
    #[must_use]
    pub const fn hex_with_digit(length: usize) -> Self {
        Self {
            length,
            alphabet: HEX_DIGITS,
            min_digits: 1,
        }
    }

    /// Requested length.
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }

    fn accepts(&self, value: &str) -> bool {
        value.len() == self.length
            && value.bytes().all(|byte| self.alphabet.contains(&byte))
            && value.bytes().filter(u8::is_ascii_digit).count() >= self.min_digits
    }
}

/// A stored draw: the value and the keepers it was drawn for.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StoredDraw {
    /// Drawn value.
    pub value: DrawValue,
    /// Inputs the value was drawn for.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keepers: BTreeMap<String, String>,
}

/// Value of a stored draw.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DrawValue {
    /// Integer draw.
    Integer(u32),
    /// String draw.
    Text(String),
}

/// Source of memoized random values.
pub trait RandomSource {
    /// Returns an integer in `range`, replaying a stored draw when its keepers
    /// still match.
    ///
    /// # Errors
    ///
    /// Returns [`RandomError`] when the draw cannot be stored or replayed.
    fn integer(&self, key: &DrawKey, range: RangeInclusive<u32>) -> Result<u32, RandomError>;

    /// Returns a string shaped by `spec`, replaying a stored draw when its
    /// keepers still match.
    ///
    /// # Errors
    ///
    /// Returns [`RandomError`] when the draw cannot be stored or replayed.
    fn string(&self, key: &DrawKey, spec: &StringSpec) -> Result<String, RandomError>;
}

/// [`RandomSource`] that persists every draw in a [`DrawStore`].
#[derive(Debug)]
pub struct MemoizedRandom<S, R = StdRng> {
    store: S,
    rng: Mutex<R>,
}

impl<S: DrawStore> MemoizedRandom<S, StdRng> {
    /// Creates a source seeded from the operating system.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_rng(store, StdRng::from_entropy())
    }
}

impl<S: DrawStore, R: Rng> MemoizedRandom<S, R> {
    /// Creates a source using the supplied generator.
    #[must_use]
    pub const fn with_rng(store: S, rng: R) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
        }
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    fn replay(&self, key: &DrawKey) -> Result<Option<DrawValue>, RandomError> {
        let Some(stored) = self.store.load(key.name())? else {
            return Ok(None);
        };
        if stored.keepers != key.keepers {
            debug!(draw = key.name(), "keepers changed, drawing again");
            return Ok(None);
        }
        Ok(Some(stored.value))
    }

    fn remember(&self, key: &DrawKey, value: DrawValue) -> Result<(), RandomError> {
        let stored = StoredDraw {
            value,
            keepers: key.keepers.clone(),
        };
        self.store.save(key.name(), &stored)?;
        debug!(draw = key.name(), "stored new draw");
        Ok(())
    }

    fn draw_string(&self, spec: &StringSpec) -> Result<String, RandomError> {
        let mut rng = self.rng.lock().map_err(|_| RandomError::Poisoned)?;
        let mut bytes: Vec<u8> = Vec::with_capacity(spec.length);
        let forced = spec.min_digits.min(spec.length);
        for _ in 0..forced {
            bytes.extend(DIGITS.choose(&mut *rng));
        }
        while bytes.len() < spec.length {
            match spec.alphabet.choose(&mut *rng) {
                Some(byte) => bytes.push(*byte),
                None => break,
            }
        }
        bytes.shuffle(&mut *rng);
        Ok(bytes.into_iter().map(char::from).collect())
    }
}

impl<S: DrawStore, R: Rng> RandomSource for MemoizedRandom<S, R> {
    fn integer(&self, key: &DrawKey, range: RangeInclusive<u32>) -> Result<u32, RandomError> {
        if let Some(DrawValue::Integer(value)) = self.replay(key)?
            && range.contains(&value)
        {
            return Ok(value);
        }

        let value = self
            .rng
            .lock()
            .map_err(|_| RandomError::Poisoned)?
            .gen_range(range);
        self.remember(key, DrawValue::Integer(value))?;
        Ok(value)
    }

    fn string(&self, key: &DrawKey, spec: &StringSpec) -> Result<String, RandomError> {
        if let Some(DrawValue::Text(value)) = self.replay(key)?
            && spec.accepts(&value)
        {
            return Ok(value);
        }

        let value = self.draw_string(spec)?;
        if !spec.accepts(&value) {
            return Err(RandomError::OutOfRange {
                key: key.name().to_owned(),
                value,
            });
        }
        self.remember(key, DrawValue::Text(value.clone()))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn random() -> MemoizedRandom<MemoryDrawStore, StdRng> {
        MemoizedRandom::with_rng(MemoryDrawStore::new(), StdRng::seed_from_u64(7))
    }

    #[rstest]
    fn integer_draws_are_replayed(random: MemoizedRandom<MemoryDrawStore, StdRng>) {
        let key = DrawKey::new("gw-private-ipv4").keeper("subnet", "subnet-1");
        let first = random
            .integer(&key, 10..=250)
            .unwrap_or_else(|err| panic!("draw: {err}"));
        let second = random
            .integer(&key, 10..=250)
            .unwrap_or_else(|err| panic!("draw: {err}"));

        assert_eq!(first, second);
        assert!((10..=250).contains(&first));
    }

    #[rstest]
    fn changed_keepers_force_a_new_draw(random: MemoizedRandom<MemoryDrawStore, StdRng>) {
        let key = DrawKey::new("gw-private-ipv4").keeper("subnet", "subnet-1");
        random
            .integer(&key, 10..=250)
            .unwrap_or_else(|err| panic!("draw: {err}"));

        let moved = DrawKey::new("gw-private-ipv4").keeper("subnet", "subnet-2");
        random
            .integer(&moved, 10..=250)
            .unwrap_or_else(|err| panic!("draw: {err}"));

        let stored = random
            .store()
            .load("gw-private-ipv4")
            .unwrap_or_else(|err| panic!("load: {err}"))
            .unwrap_or_else(|| panic!("draw should be stored"));
        assert_eq!(stored.keepers.get("subnet").map(String::as_str), Some("subnet-2"));
    }

    #[rstest]
    fn hex_strings_always_contain_a_digit(random: MemoizedRandom<MemoryDrawStore, StdRng>) {
        for index in 0..64 {
            let key = DrawKey::new(format!("segment-{index}"));
            let value = random
                .string(&key, &StringSpec::hex_with_digit(4))
                .unwrap_or_else(|err| panic!("draw: {err}"));
            assert_eq!(value.len(), 4);
            assert!(value.bytes().any(|byte| byte.is_ascii_digit()), "{value}");
            assert!(value.bytes().all(|byte| HEX_DIGITS.contains(&byte)), "{value}");
        }
    }

    #[rstest]
    fn stored_value_with_wrong_shape_is_redrawn(random: MemoizedRandom<MemoryDrawStore, StdRng>) {
        let key = DrawKey::new("gw-hostname");
        random
            .store()
            .save(
                "gw-hostname",
                &StoredDraw {
                    value: DrawValue::Text(String::from("NOT-LOWER")),
                    keepers: BTreeMap::new(),
                },
            )
            .unwrap_or_else(|err| panic!("seed: {err}"));

        let value = random
            .string(&key, &StringSpec::lowercase(8))
            .unwrap_or_else(|err| panic!("draw: {err}"));

        assert_eq!(value.len(), 8);
        assert!(value.bytes().all(|byte| byte.is_ascii_lowercase()));
    }
}
