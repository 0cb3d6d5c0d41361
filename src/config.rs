// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the files dotkeeper reads from a keep to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Keep manifest layout.
///
/// Every keep carries a __manifest__ at its top-level named "keep.json". It
/// lists which files of the keep should be symlinked to which target paths.
/// Host overlays found under "hSpecs/<hostname>.json" share the exact same
/// layout.
///
/// # General Layout
///
/// ```json
/// {
///   "links": [
///     { "source": "vim/vimrc", "target": "~/.vimrc" }
///   ]
/// }
/// ```
///
/// Sources are relative to the keep root. Targets may start with a tilde to
/// refer to the home directory.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct KeepManifest {
    /// Ordered listing of links to create.
    pub links: Vec<Link>,
}

impl FromStr for KeepManifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for KeepManifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_json::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Symlink to place on the file system.
///
/// Straight out of a manifest, a link is keep-relative. Once resolved
/// through [`Link::resolve`], both ends are absolute, which is the only form
/// ever written to the state record.
#[derive(Default, Debug, PartialEq, Eq, Hash, Clone, Deserialize, Serialize)]
pub struct Link {
    /// File the symlink points at.
    pub source: PathBuf,

    /// Location of the symlink itself.
    pub target: PathBuf,
}

impl Link {
    /// Construct new link.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Resolve keep-relative link into absolute link.
    ///
    /// Source is joined onto `keep_root`. Target is run through `expand` to
    /// handle the home directory shorthand, and is made absolute against the
    /// current working directory if still relative.
    pub fn resolve<F>(&self, keep_root: impl AsRef<Path>, expand: F) -> Self
    where
        F: FnOnce(&Path) -> PathBuf,
    {
        let target = expand(self.target.as_path());

        // INVARIANT: Recorded targets never depend on the working directory.
        let target = std::path::absolute(&target).unwrap_or(target);

        Self {
            source: keep_root.as_ref().join(&self.source),
            target,
        }
    }
}

impl Display for Link {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} -> {}",
            self.target.display(),
            self.source.display()
        )
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(serde_json::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(serde_json::Error),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}
