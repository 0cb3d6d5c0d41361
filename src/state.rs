// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Durable record of what dotkeeper owns.
//!
//! The __state record__ names the active keep and lists every symlink
//! dotkeeper created for it. It is the only thing dotkeeper consults when it
//! needs to clean up after itself, so losing it means losing track of links
//! on disk. For that reason a state file that fails to parse is an error,
//! never an excuse to start over from scratch.
//!
//! # State File Layout
//!
//! ```json
//! {
//!   "keep": "main",
//!   "links": [
//!     { "source": "/home/user/.dotkeep/main/vimrc", "target": "/home/user/.vimrc" }
//!   ]
//! }
//! ```
//!
//! `keep` is `null` while no keep is active.

use crate::config::Link;

use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, rename, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Which keep, if any, is currently active.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub enum ActiveKeep {
    /// No keep is active.
    #[default]
    Inactive,

    /// Named keep is active.
    Active(String),
}

impl ActiveKeep {
    /// Name of active keep.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Inactive => None,
            Self::Active(name) => Some(name.as_str()),
        }
    }

    /// Check if any keep is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

impl From<Option<String>> for ActiveKeep {
    fn from(keep: Option<String>) -> Self {
        match keep {
            Some(name) => Self::Active(name),
            None => Self::Inactive,
        }
    }
}

impl From<ActiveKeep> for Option<String> {
    fn from(keep: ActiveKeep) -> Self {
        match keep {
            ActiveKeep::Inactive => None,
            ActiveKeep::Active(name) => Some(name),
        }
    }
}

impl Display for ActiveKeep {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Inactive => fmt.write_str("<inactive>"),
            Self::Active(name) => fmt.write_str(name),
        }
    }
}

/// Persisted state record.
///
/// # Invariant
///
/// - Every link holds absolute paths.
/// - Every link was confirmed created when it was recorded.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(from = "StateFile", into = "StateFile")]
pub struct StateRecord {
    /// Currently active keep.
    pub active: ActiveKeep,

    /// Symlinks owned by dotkeeper.
    pub links: Vec<Link>,
}

impl StateRecord {
    /// Construct record for an active keep.
    pub fn active(keep: impl Into<String>, links: Vec<Link>) -> Self {
        Self {
            active: ActiveKeep::Active(keep.into()),
            links,
        }
    }

    /// Construct empty record where nothing is active.
    pub fn inactive() -> Self {
        Self::default()
    }
}

// Wire layout of state file.
#[derive(Deserialize, Serialize)]
struct StateFile {
    keep: Option<String>,
    links: Vec<Link>,
}

impl From<StateFile> for StateRecord {
    fn from(file: StateFile) -> Self {
        Self {
            active: file.keep.into(),
            links: file.links,
        }
    }
}

impl From<StateRecord> for StateFile {
    fn from(record: StateRecord) -> Self {
        Self {
            keep: record.active.into(),
            links: record.links,
        }
    }
}

/// Loads and persists the state record.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Construct new state store backed by file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to backing state file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Load state record.
    ///
    /// A missing state file means nothing was ever activated, and yields an
    /// inactive record.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Read`] if state file cannot be read.
    /// - Return [`StateError::Parse`] if state file is malformed.
    pub fn load(&self) -> Result<StateRecord> {
        let content = match read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no state file at {:?}", self.path.display());
                return Ok(StateRecord::inactive());
            }
            Err(err) => {
                return Err(StateError::Read {
                    source: err,
                    path: self.path.clone(),
                })
            }
        };

        serde_json::from_str(&content).map_err(|err| StateError::Parse {
            source: err,
            path: self.path.clone(),
        })
    }

    /// Persist state record.
    ///
    /// Writes to a sibling temporary file first, then renames it over the
    /// state file. A crash at any point leaves either the old or the new
    /// record on disk, never a torn one.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Serialize`] if record cannot be serialized.
    /// - Return [`StateError::Write`] if state file cannot be written.
    pub fn save(&self, record: &StateRecord) -> Result<()> {
        let data = serde_json::to_string_pretty(record).map_err(StateError::Serialize)?;

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(|err| StateError::Write {
                source: err,
                path: self.path.clone(),
            })?;
        }

        let tmp_path = self.tmp_path();
        write(&tmp_path, data.as_bytes()).map_err(|err| StateError::Write {
            source: err,
            path: tmp_path.clone(),
        })?;
        rename(&tmp_path, &self.path).map_err(|err| StateError::Write {
            source: err,
            path: self.path.clone(),
        })?;
        debug!(
            "saved state with {} links to {:?}",
            record.links.len(),
            self.path.display()
        );

        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| OsString::from("state"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// State store error types.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// State file exists, but cannot be read.
    #[error("failed to read state file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file content is malformed.
    #[error("failed to parse state file at {:?}, fix or remove it by hand", path.display())]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// State record cannot be serialized.
    #[error("failed to serialize state record")]
    Serialize(#[source] serde_json::Error),

    /// State file cannot be written.
    #[error("failed to write state file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn store() -> anyhow::Result<StateStore> {
        Ok(StateStore::new(
            std::env::current_dir()?.join(".dotkeeper-state.json"),
        ))
    }

    #[sealed_test]
    fn load_without_state_file_is_inactive() -> anyhow::Result<()> {
        assert_eq!(store()?.load()?, StateRecord::inactive());
        Ok(())
    }

    #[sealed_test]
    fn load_malformed_state_file_fails_loudly() -> anyhow::Result<()> {
        let store = store()?;
        write(store.path(), "{ \"keep\": ")?;

        assert!(matches!(store.load(), Err(StateError::Parse { .. })));

        // INVARIANT: Broken state is never overwritten by loading.
        assert_eq!(read_to_string(store.path())?, "{ \"keep\": ");

        Ok(())
    }

    #[sealed_test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let store = store()?;
        let records = [
            StateRecord::inactive(),
            StateRecord::active("main", vec![Link::new("/k/main/vimrc", "/h/.vimrc")]),
            StateRecord::active(
                "работа keep",
                vec![
                    Link::new("/k/работа keep/my file", "/h/.config/my file"),
                    Link::new("/k/работа keep/🦀.conf", "/h/🦀 dir/🦀.conf"),
                    Link::new("/k/работа keep/a", "/h/a"),
                ],
            ),
        ];

        for record in records {
            store.save(&record)?;
            assert_eq!(store.load()?, record);
        }

        Ok(())
    }

    #[sealed_test]
    fn save_creates_parent_and_leaves_no_temporary_file() -> anyhow::Result<()> {
        let dir = std::env::current_dir()?.join("nested/home");
        let store = StateStore::new(dir.join("state.json"));

        store.save(&StateRecord::inactive())?;

        assert!(store.path().is_file());
        assert!(!dir.join("state.json.tmp").exists());

        Ok(())
    }

    #[sealed_test]
    fn state_file_layout() -> anyhow::Result<()> {
        let store = store()?;
        store.save(&StateRecord::active(
            "main",
            vec![Link::new("/k/vimrc", "/h/.vimrc")],
        ))?;

        let expect = indoc! {r#"
            {
              "keep": "main",
              "links": [
                {
                  "source": "/k/vimrc",
                  "target": "/h/.vimrc"
                }
              ]
            }"#};
        assert_eq!(read_to_string(store.path())?, expect);

        store.save(&StateRecord::inactive())?;
        let expect = indoc! {r#"
            {
              "keep": null,
              "links": []
            }"#};
        assert_eq!(read_to_string(store.path())?, expect);

        Ok(())
    }

    #[sealed_test]
    fn load_accepts_null_keep() -> anyhow::Result<()> {
        let store = store()?;
        write(store.path(), r#"{ "keep": null, "links": [] }"#)?;

        assert_eq!(store.load()?.active, ActiveKeep::Inactive);

        Ok(())
    }
}
