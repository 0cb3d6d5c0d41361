// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where the keep store, the state file, and the user's home
//! directory live. Everything is gathered once into a [`Layout`] at process
//! start, and passed by reference to whatever needs it. Nothing in dotkeeper
//! consults the environment for paths after that point.

use std::{
    path::{Path, PathBuf},
    process::Command,
};
use tracing::debug;

/// Name of keep store directory relative to home directory.
pub const KEEP_STORE_DIR: &str = ".dotkeep";

/// Name of state file relative to home directory.
pub const STATE_FILE: &str = ".dotkeeper-state.json";

/// Resolved paths and host information dotkeeper operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    home_dir: PathBuf,
    keep_store_dir: PathBuf,
    state_file: PathBuf,
    hostname: Option<String>,
}

impl Layout {
    /// Construct new layout rooted at given home directory.
    ///
    /// Keep store and state file are placed at their default locations
    /// relative to `home_dir`. Does not check if any of these paths exist.
    pub fn new(home_dir: impl Into<PathBuf>, hostname: Option<String>) -> Self {
        let home_dir = home_dir.into();
        Self {
            keep_store_dir: home_dir.join(KEEP_STORE_DIR),
            state_file: home_dir.join(STATE_FILE),
            home_dir,
            hostname,
        }
    }

    /// Construct layout for current user and machine.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if home directory path cannot be determined.
    pub fn try_default() -> Result<Self> {
        Ok(Self::new(home_dir()?, hostname()))
    }

    /// Absolute path to user's home directory.
    pub fn home_dir(&self) -> &Path {
        self.home_dir.as_path()
    }

    /// Directory holding one subdirectory per keep.
    pub fn keep_store_dir(&self) -> &Path {
        self.keep_store_dir.as_path()
    }

    /// Root directory of a keep in the keep store.
    pub fn keep_root(&self, keep_name: impl AsRef<str>) -> PathBuf {
        self.keep_store_dir.join(keep_name.as_ref())
    }

    /// Path to persisted state record.
    pub fn state_file(&self) -> &Path {
        self.state_file.as_path()
    }

    /// Hostname used to select host overlays, if it could be determined.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Expand leading tilde of a link target to the home directory.
    ///
    /// Only `~` and `~/...` are expanded. Anything else is returned as
    /// written.
    pub fn expand_target(&self, target: impl AsRef<Path>) -> PathBuf {
        let target = target.as_ref();
        if !target.starts_with("~") {
            return target.to_path_buf();
        }

        let raw = target.to_string_lossy();
        let home = self.home_dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde_with_context(&raw, || Some(home)).into_owned())
    }
}

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine hostname of current machine.
///
/// Asks the `hostname` binary. Returns `None` if it cannot be run or prints
/// nothing.
pub fn hostname() -> Option<String> {
    let output = Command::new("hostname")
        .output()
        .ok()
        .filter(|output| output.status.success())?;

    let hostname = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!("detected hostname {hostname:?}");
    if hostname.is_empty() {
        None
    } else {
        Some(hostname)
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
