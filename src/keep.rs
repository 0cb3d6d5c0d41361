// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep manifest loading.
//!
//! A __keep__ is a named directory in the keep store holding dotfiles along
//! with a manifest that says where each of them should be symlinked. The name
//! of the keep is the name of its directory, so `~/.dotkeep/shell` means
//! the keep store has a keep named "shell".
//!
//! # Keep Layout
//!
//! ```text
//! ~/.dotkeep/<keep>/keep.json              base manifest (required)
//! ~/.dotkeep/<keep>/hSpecs/<hostname>.json host overlay (optional)
//! ```
//!
//! # Host Overlays
//!
//! Machines often need a few extra links, or a different version of a file.
//! A host overlay is a second manifest selected by hostname, whose links are
//! appended after the base manifest links. Nothing is deduplicated. If an
//! overlay names a target already claimed by the base manifest, the symlink
//! created first stays, and the second attempt is reported as a collision.

use crate::{
    config::{ConfigError, KeepManifest, Link},
    path::Layout,
};

use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Name of manifest file at top-level of every keep.
pub const MANIFEST_FILE: &str = "keep.json";

/// Name of directory holding host overlays inside a keep.
pub const HOST_OVERLAY_DIR: &str = "hSpecs";

/// Keep in the keep store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keep {
    name: String,
    root: PathBuf,
}

impl Keep {
    /// Locate keep by name in keep store.
    ///
    /// Only checks that the name is usable as a single directory name, and
    /// strips any trailing slash. Use
    /// [`Keep::exists`] to check if its manifest is actually present.
    ///
    /// # Errors
    ///
    /// - Return [`KeepError::InvalidName`] if name is empty, hidden, or
    ///   spans more than one path component.
    pub fn locate(layout: &Layout, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let mut components = Path::new(&name).components();

        // INVARIANT: Store the bare directory name, e.g., "main/" becomes "main".
        let normal = match (components.next(), components.next()) {
            (Some(Component::Normal(normal)), None) if !name.starts_with('.') => {
                Some(normal.to_string_lossy().into_owned())
            }
            _ => None,
        };
        let Some(normal) = normal else {
            return Err(KeepError::InvalidName { name });
        };

        Ok(Self {
            root: layout.keep_root(&normal),
            name: normal,
        })
    }

    /// Name of keep.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Root directory of keep.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Check if keep manifest exists.
    pub fn exists(&self) -> bool {
        manifest_path(&self.root).is_file()
    }

    /// Compute the resolved link set this keep wants on the current host.
    ///
    /// Loads base manifest, appends host overlay if one exists for the
    /// layout's hostname, and resolves every link into absolute form.
    ///
    /// # Errors
    ///
    /// - Return [`KeepError::ManifestMissing`] if base manifest is absent.
    /// - Return [`KeepError::ManifestRead`] if any manifest cannot be read.
    /// - Return [`KeepError::ManifestParse`] if any manifest is malformed.
    #[instrument(skip(self, layout), fields(keep = %self.name), level = "debug")]
    pub fn desired_links(&self, layout: &Layout) -> Result<Vec<Link>> {
        let base = load_manifest(&self.root)?;
        let overlay = match layout.hostname() {
            Some(hostname) => load_host_overlay(&self.root, hostname)?,
            None => Vec::new(),
        };

        Ok(merge_links(base, overlay)
            .iter()
            .map(|link| link.resolve(&self.root, |target| layout.expand_target(target)))
            .collect())
    }
}

/// Path to base manifest of keep.
pub fn manifest_path(keep_root: impl AsRef<Path>) -> PathBuf {
    keep_root.as_ref().join(MANIFEST_FILE)
}

/// Path to host overlay of keep for a given hostname.
pub fn host_overlay_path(keep_root: impl AsRef<Path>, hostname: impl AsRef<str>) -> PathBuf {
    keep_root
        .as_ref()
        .join(HOST_OVERLAY_DIR)
        .join(format!("{}.json", hostname.as_ref()))
}

/// Load base manifest links of keep.
///
/// # Errors
///
/// - Return [`KeepError::ManifestMissing`] if manifest does not exist.
/// - Return [`KeepError::ManifestRead`] if manifest cannot be read.
/// - Return [`KeepError::ManifestParse`] if manifest is malformed.
pub fn load_manifest(keep_root: impl AsRef<Path>) -> Result<Vec<Link>> {
    let path = manifest_path(keep_root);
    match read_manifest(&path)? {
        Some(manifest) => Ok(manifest.links),
        None => Err(KeepError::ManifestMissing { path }),
    }
}

/// Load host overlay links of keep.
///
/// A host without an overlay simply gets no extra links.
///
/// # Errors
///
/// - Return [`KeepError::ManifestRead`] if overlay exists but cannot be read.
/// - Return [`KeepError::ManifestParse`] if overlay is malformed.
pub fn load_host_overlay(
    keep_root: impl AsRef<Path>,
    hostname: impl AsRef<str>,
) -> Result<Vec<Link>> {
    let path = host_overlay_path(keep_root, hostname.as_ref());
    match read_manifest(&path)? {
        Some(manifest) => {
            info!("apply host overlay for {:?}", hostname.as_ref());
            Ok(manifest.links)
        }
        None => {
            debug!("no host overlay at {:?}", path.display());
            Ok(Vec::new())
        }
    }
}

/// Merge base links with overlay links.
///
/// Plain concatenation. Order is preserved, and duplicates are kept.
pub fn merge_links(base: Vec<Link>, overlay: Vec<Link>) -> Vec<Link> {
    let mut links = base;
    links.extend(overlay);
    links
}

fn read_manifest(path: &Path) -> Result<Option<KeepManifest>> {
    let content = match read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(KeepError::ManifestRead {
                source: err,
                path: path.to_path_buf(),
            })
        }
    };

    content
        .parse()
        .map(Some)
        .map_err(|err| KeepError::ManifestParse {
            source: err,
            path: path.to_path_buf(),
        })
}

/// Keep manifest loading error types.
#[derive(Debug, thiserror::Error)]
pub enum KeepError {
    /// Keep name cannot be used as a keep store entry.
    #[error("invalid keep name {name:?}")]
    InvalidName { name: String },

    /// Base manifest does not exist.
    #[error("no manifest found at {:?}", path.display())]
    ManifestMissing { path: PathBuf },

    /// Manifest exists, but cannot be read.
    #[error("failed to read manifest at {:?}", path.display())]
    ManifestRead {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Manifest content is malformed.
    #[error("failed to parse manifest at {:?}", path.display())]
    ManifestParse {
        #[source]
        source: ConfigError,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = KeepError> = std::result::Result<T, E>;
