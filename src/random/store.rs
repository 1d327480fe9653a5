//! Persistence for memoized random draws.

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::StoredDraw;

/// Errors raised while reading or writing stored draws.
#[derive(Debug, Error)]
pub enum DrawStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the state file cannot be parsed or rendered.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the state path has no file name component.
    #[error("state file path {0} is missing a filename")]
    MissingFileName(Utf8PathBuf),
    /// Raised when the in-memory store lock was poisoned.
    #[error("draw store lock poisoned")]
    Poisoned,
}

/// Storage for memoized draws, keyed by draw name.
pub trait DrawStore {
    /// Loads a stored draw.
    ///
    /// # Errors
    ///
    /// Returns [`DrawStoreError`] when the store cannot be read.
    fn load(&self, name: &str) -> Result<Option<StoredDraw>, DrawStoreError>;

    /// Stores a draw, replacing any previous value under the same name.
    ///
    /// # Errors
    ///
    /// Returns [`DrawStoreError`] when the store cannot be written.
    fn save(&self, name: &str, draw: &StoredDraw) -> Result<(), DrawStoreError>;
}

/// Draw store that lives for a single process.
#[derive(Debug, Default)]
pub struct MemoryDrawStore {
    draws: Mutex<BTreeMap<String, StoredDraw>>,
}

impl MemoryDrawStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawStore for MemoryDrawStore {
    fn load(&self, name: &str) -> Result<Option<StoredDraw>, DrawStoreError> {
        let draws = self.draws.lock().map_err(|_| DrawStoreError::Poisoned)?;
        Ok(draws.get(name).cloned())
    }

    fn save(&self, name: &str, draw: &StoredDraw) -> Result<(), DrawStoreError> {
        let mut draws = self.draws.lock().map_err(|_| DrawStoreError::Poisoned)?;
        draws.insert(name.to_owned(), draw.clone());
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DrawFile {
    #[serde(default)]
    draws: BTreeMap<String, StoredDraw>,
}

/// Draw store persisted as a TOML state file.
///
/// ```toml
/// [draws.gw-private-ipv4]
/// value = 137
///
/// [draws.gw-private-ipv4.keepers]
/// subnet = "subnet-0abc"
/// ```
#[derive(Clone, Debug)]
pub struct FileDrawStore {
    path: Utf8PathBuf,
}

impl FileDrawStore {
    /// Creates a store backed by `path`. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read(&self) -> Result<DrawFile, DrawStoreError> {
        if !path_exists(&self.path)? {
            return Ok(DrawFile::default());
        }
        let contents = read_state(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(DrawFile::default());
        }
        toml::from_str(&contents).map_err(|err| DrawStoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }
}

impl DrawStore for FileDrawStore {
    fn load(&self, name: &str) -> Result<Option<StoredDraw>, DrawStoreError> {
        Ok(self.read()?.draws.remove(name))
    }

    fn save(&self, name: &str, draw: &StoredDraw) -> Result<(), DrawStoreError> {
        let mut file = self.read()?;
        file.draws.insert(name.to_owned(), draw.clone());
        write_state(&self.path, &file)
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), DrawStoreError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| DrawStoreError::MissingFileName(path.to_path_buf()))?;
    Ok((parent, file_name))
}

fn path_exists(path: &Utf8Path) -> Result<bool, DrawStoreError> {
    let (parent, file_name) = split_path(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name).map_err(|err| DrawStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(DrawStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

fn read_state(path: &Utf8Path) -> Result<String, DrawStoreError> {
    let (parent, file_name) = split_path(path)?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| DrawStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;
    dir.read_to_string(file_name)
        .map_err(|err| DrawStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn write_state(path: &Utf8Path, file: &DrawFile) -> Result<(), DrawStoreError> {
    let (parent, file_name) = split_path(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| {
        DrawStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }
    })?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| DrawStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    let rendered = toml::to_string_pretty(file).map_err(|err| DrawStoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    dir.write(file_name, rendered)
        .map_err(|err| DrawStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::DrawValue;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct StateFixture {
        _tmp: TempDir,
        store: FileDrawStore,
    }

    #[fixture]
    fn state() -> StateFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("state").join("homelab-state.toml"))
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
        StateFixture {
            _tmp: tmp,
            store: FileDrawStore::new(path),
        }
    }

    #[rstest]
    fn missing_file_loads_nothing(state: StateFixture) {
        let loaded = state
            .store
            .load("gw-private-ipv4")
            .unwrap_or_else(|err| panic!("load: {err}"));
        assert_eq!(loaded, None);
    }

    #[rstest]
    fn saved_draws_survive_a_new_store(state: StateFixture) {
        let draw = StoredDraw {
            value: DrawValue::Integer(137),
            keepers: BTreeMap::from([(String::from("subnet"), String::from("subnet-1"))]),
        };
        state
            .store
            .save("gw-private-ipv4", &draw)
            .unwrap_or_else(|err| panic!("save: {err}"));
        state
            .store
            .save(
                "gw-hostname",
                &StoredDraw {
                    value: DrawValue::Text(String::from("qzkfmtra")),
                    keepers: BTreeMap::new(),
                },
            )
            .unwrap_or_else(|err| panic!("save: {err}"));

        let reopened = FileDrawStore::new(state.store.path().to_path_buf());
        let loaded = reopened
            .load("gw-private-ipv4")
            .unwrap_or_else(|err| panic!("load: {err}"));

        assert_eq!(loaded, Some(draw));
    }

    #[rstest]
    fn malformed_state_is_a_parse_error(state: StateFixture) {
        write_state(state.store.path(), &DrawFile::default())
            .unwrap_or_else(|err| panic!("seed: {err}"));
        let (parent, file_name) =
            split_path(state.store.path()).unwrap_or_else(|err| panic!("split: {err}"));
        Dir::open_ambient_dir(parent, ambient_authority())
            .and_then(|dir| dir.write(file_name, "draws = 3"))
            .unwrap_or_else(|err| panic!("overwrite: {err}"));

        let err = state.store.load("anything").expect_err("parse should fail");
        assert!(matches!(err, DrawStoreError::Parse { .. }));
    }
}
