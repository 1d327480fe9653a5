//! Cloud-init override resolution.
//!
//! A caller's user-data override can be provided either inline or via a file
//! path. This module centralises the branching and file loading logic so
//! the CLI and instance spec files resolve overrides the same way, then
//! parses the payload into a [`CloudConfig`].

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::user_data::{CloudConfig, UserDataError};

/// Errors raised while resolving a user-data override.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CloudInitError {
    /// Raised when both inline and file sources are provided.
    #[error("user-data override cannot be provided both inline and via file")]
    BothProvided,
    /// Raised when an inline payload is empty or only whitespace.
    #[error("user-data override must not be empty")]
    InlineEmpty,
    /// Raised when a file path is empty or only whitespace.
    #[error("user-data override file path must not be empty")]
    FilePathEmpty,
    /// Raised when a file resolves to empty or only whitespace.
    #[error("user-data override file must not be empty")]
    FileEmpty,
    /// Raised when reading the file source fails.
    #[error("failed to read user-data override file `{path}`: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the payload is not a valid cloud-config document.
    #[error(transparent)]
    Document(#[from] UserDataError),
}

/// Resolves a user-data override from either an inline value or a file.
///
/// Inline and file sources are mutually exclusive. Relative file paths are
/// resolved against `base_dir`, and a leading `~/` expands to `$HOME`.
///
/// # Errors
///
/// Returns [`CloudInitError`] when the inputs are invalid, the file cannot be
/// read, or the payload does not parse as cloud-config.
pub fn resolve_user_data_override(
    inline: Option<&str>,
    file: Option<&str>,
    base_dir: &Utf8Path,
) -> Result<Option<CloudConfig>, CloudInitError> {
    if inline.is_some() && file.is_some() {
        return Err(CloudInitError::BothProvided);
    }

    if let Some(payload) = inline {
        validate_payload(payload)?;
        return Ok(Some(CloudConfig::parse(payload)?));
    }

    let Some(path) = file else {
        return Ok(None);
    };

    if path.trim().is_empty() {
        return Err(CloudInitError::FilePathEmpty);
    }

    let expanded = expand_tilde(path);
    let content = read_to_string_ambient(&expanded, base_dir).map_err(|message| {
        CloudInitError::FileRead {
            path: expanded.clone(),
            message,
        }
    })?;

    validate_payload(&content).map_err(|err| match err {
        CloudInitError::InlineEmpty => CloudInitError::FileEmpty,
        other => other,
    })?;

    Ok(Some(CloudConfig::parse(&content)?))
}

fn validate_payload(payload: &str) -> Result<(), CloudInitError> {
    if payload.trim().is_empty() {
        return Err(CloudInitError::InlineEmpty);
    }
    Ok(())
}

/// Expands a leading `~/` using `$HOME`.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Reads a UTF-8 file, resolving relative paths against `base_dir`.
///
/// Only the final component is read through the opened directory, so
/// relative paths may climb out of `base_dir` with `..`.
///
/// # Errors
///
/// Returns the underlying error message when the directory or file cannot
/// be opened.
pub(crate) fn read_to_string_ambient(path: &str, base_dir: &Utf8Path) -> Result<String, String> {
    let resolved = base_dir.join(path);
    let parent = resolved
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = resolved
        .file_name()
        .ok_or_else(|| format!("path has no file name: {resolved}"))?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}
