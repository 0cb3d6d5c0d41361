// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Symlink reconciliation.
//!
//! Turn link listings into actual symlinks on the file system, and take them
//! back down again. Both directions are best-effort: a link that cannot be
//! handled is collected as a [`LinkFailure`] and the loop moves on to the
//! next one. Nothing here ever rolls back work that already succeeded.
//!
//! # Teardown
//!
//! Teardown walks the record backwards, undoing links in the reverse order
//! they were created. A link created through an earlier directory symlink is
//! thus removed before that directory symlink goes away.
//!
//! Teardown only ever removes paths that are symlinks right now. Regular
//! files and directories sitting at a recorded target are left alone, since
//! dotkeeper could not have put them there. Teardown always hands back an
//! inactive record, even if some removals failed. Those leftover links are
//! reported, but no longer tracked.
//!
//! # Creation
//!
//! Links are created in listing order. Parent directories of each target
//! are created as needed. A target that already exists is a collision, and
//! the link is reported as failed rather than overwriting whatever is there.
//! Only links confirmed created are returned for recording.

use crate::{config::Link, state::StateRecord};

use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// File system operations needed to reconcile symlinks.
pub trait LinkFs {
    /// Read destination of symlink, failing if path is not a symlink.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Remove symlink itself, not what it points at.
    fn remove_link(&self, path: &Path) -> io::Result<()>;

    /// Create directory and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create symlink at `target` pointing to `source`.
    fn symlink(&self, source: &Path, target: &Path) -> io::Result<()>;
}

/// Link operations on the host file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl LinkFs for HostFs {
    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn remove_link(&self, path: &Path) -> io::Result<()> {
        remove_symlink(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        mkdirp::mkdirp(path).map(|_| ())
    }

    fn symlink(&self, source: &Path, target: &Path) -> io::Result<()> {
        create_symlink(source, target)
    }
}

/// Symlink reconciler.
#[derive(Debug, Default, Clone)]
pub struct Reconciler<F = HostFs>
where
    F: LinkFs,
{
    fs: F,
}

impl<F> Reconciler<F>
where
    F: LinkFs,
{
    /// Construct new reconciler over given file system.
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    /// Remove every symlink owned by a state record.
    ///
    /// Links are removed last created first. Targets that are not symlinks
    /// are skipped. Failed removals are collected, never fatal.
    pub fn teardown(&self, record: StateRecord) -> Teardown {
        let mut teardown = Teardown::default();

        // INVARIANT: Nested links must go before the links they were created through.
        for link in record.links.into_iter().rev() {
            match self.fs.read_link(&link.target) {
                Ok(destination) => {
                    debug!(
                        "{:?} is a symlink to {:?}",
                        link.target.display(),
                        destination.display()
                    );
                }
                Err(err) => {
                    debug!("skip {:?}: not a symlink ({err})", link.target.display());
                    teardown.skipped.push(link);
                    continue;
                }
            }

            match self.fs.remove_link(&link.target) {
                Ok(()) => {
                    info!("removed symlink {:?}", link.target.display());
                    teardown.removed.push(link);
                }
                Err(err) => {
                    let error = ReconcileError::SymlinkRemove {
                        source: err,
                        path: link.target.clone(),
                    };
                    warn!("{error}");
                    teardown.failures.push(LinkFailure { link, error });
                }
            }
        }

        teardown
    }

    /// Create symlinks for desired links in order.
    ///
    /// Links must already be resolved. Failures are collected, and never
    /// show up in the created listing.
    pub fn create(&self, desired: &[Link]) -> Creation {
        let mut creation = Creation::default();

        for link in desired {
            if let Some(parent) = link.target.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                if let Err(err) = self.fs.create_dir_all(parent) {
                    let error = ReconcileError::DirectoryCreate {
                        source: err,
                        path: parent.to_path_buf(),
                    };
                    warn!("{error}");
                    creation.failures.push(LinkFailure {
                        link: link.clone(),
                        error,
                    });
                    continue;
                }
            }

            if let Err(err) = self.fs.symlink(&link.source, &link.target) {
                let error = ReconcileError::SymlinkCreate {
                    source: err,
                    link: link.clone(),
                };
                warn!("{error}");
                creation.failures.push(LinkFailure {
                    link: link.clone(),
                    error,
                });
                continue;
            }

            info!("linked {link}");
            creation.created.push(link.clone());
        }

        creation
    }
}

/// Outcome of tearing down a state record.
#[derive(Debug, Default)]
pub struct Teardown {
    /// Symlinks that were removed.
    pub removed: Vec<Link>,

    /// Recorded targets that were not symlinks, and were left untouched.
    pub skipped: Vec<Link>,

    /// Symlinks that could not be removed.
    pub failures: Vec<LinkFailure>,
}

impl Teardown {
    /// State record left behind by teardown.
    ///
    /// Always inactive and empty, regardless of failures.
    pub fn record(&self) -> StateRecord {
        StateRecord::inactive()
    }

    /// Symlinks that may still be on disk, but are no longer tracked.
    pub fn leftover(&self) -> impl Iterator<Item = &Link> {
        self.failures.iter().map(|failure| &failure.link)
    }
}

/// Outcome of creating desired links.
#[derive(Debug, Default)]
pub struct Creation {
    /// Links confirmed created, in creation order.
    pub created: Vec<Link>,

    /// Links that could not be created.
    pub failures: Vec<LinkFailure>,
}

/// Link that could not be reconciled.
#[derive(Debug, thiserror::Error)]
#[error("{link}: {error}")]
pub struct LinkFailure {
    /// Offending link.
    pub link: Link,

    /// Reason it failed.
    #[source]
    pub error: ReconcileError,
}

/// Symlink reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Parent directory of target cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    DirectoryCreate {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Symlink cannot be created, e.g., target already exists.
    #[error("failed to create symlink {link}")]
    SymlinkCreate {
        #[source]
        source: io::Error,
        link: Link,
    },

    /// Symlink cannot be removed.
    #[error("failed to remove symlink {:?}", path.display())]
    SymlinkRemove {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

#[cfg(unix)]
fn create_symlink(source: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}
#[cfg(windows)]
fn create_symlink(source: &Path, target: &Path) -> io::Result<()> {
    if source.is_dir() {
        std::os::windows::fs::symlink_dir(source, target)
    } else {
        std::os::windows::fs::symlink_file(source, target)
    }
}

#[cfg(unix)]
fn remove_symlink(path: &Path) -> io::Result<()> {
    std::fs::remove_file(path)
}
#[cfg(windows)]
fn remove_symlink(path: &Path) -> io::Result<()> {
    // Directory symlinks on Windows must be removed as directories.
    std::fs::remove_file(path).or_else(|_| std::fs::remove_dir(path))
}
