// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep store management and activation.
//!
//! Dotkeeper groups keeps together into one place called the __keep store__.
//! Only one keep in the store can be active at a time. Activating a keep
//! symlinks its files into place, and records what was created in the state
//! record so it can be cleaned up later.
//!
//! # Activation State Machine
//!
//! ```text
//! Inactive  --activate(k)--> Active(k)
//! Active(j) --activate(k)--> Active(k)   (implicit deactivate first)
//! Active(j) --deactivate---> Inactive
//! Inactive  --deactivate---> Inactive
//! ```
//!
//! Activation always tears down whatever the state record owns before it
//! does anything else, even when reactivating the same keep. Thus activation
//! is idempotent, and a keep that fails to activate leaves the store
//! inactive rather than half-applied.
//!
//! # Concurrency
//!
//! None. Two dotkeeper processes racing on the same state file are not
//! coordinated, and whichever writes last wins.

use crate::{
    config::Link,
    fetch::{keep_name_from_url, FetchError, KeepFetcher},
    keep::{manifest_path, Keep, KeepError},
    path::Layout,
    reconcile::{Creation, HostFs, LinkFailure, LinkFs, Reconciler, Teardown},
    state::{StateError, StateRecord, StateStore},
};

use ignore::WalkBuilder;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Keep store housing all available keeps.
#[derive(Debug)]
pub struct KeepStore<'layout, F = HostFs>
where
    F: LinkFs,
{
    layout: &'layout Layout,
    state: StateStore,
    reconciler: Reconciler<F>,
}

impl<'layout> KeepStore<'layout> {
    /// Open keep store described by layout on the host file system.
    pub fn open(layout: &'layout Layout) -> Self {
        Self::with_fs(layout, HostFs)
    }
}

impl<'layout, F> KeepStore<'layout, F>
where
    F: LinkFs,
{
    /// Open keep store described by layout on a given file system.
    pub fn with_fs(layout: &'layout Layout, fs: F) -> Self {
        Self {
            layout,
            state: StateStore::new(layout.state_file()),
            reconciler: Reconciler::new(fs),
        }
    }

    /// Layout keep store operates on.
    pub fn layout(&self) -> &Layout {
        self.layout
    }

    /// Current state record.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::State`] if state record cannot be loaded.
    pub fn status(&self) -> Result<StateRecord> {
        Ok(self.state.load()?)
    }

    /// List names of keeps in keep store.
    ///
    /// Every immediate, non-hidden subdirectory of the keep store is listed,
    /// sorted by name. Symlinks to directories are listed too. A missing keep store simply has no keeps.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ListKeeps`] if keep store cannot be walked.
    pub fn list_keeps(&self) -> Result<Vec<String>> {
        let store_dir = self.layout.keep_store_dir();
        if !store_dir.is_dir() {
            warn!("keep store {:?} does not exist", store_dir.display());
            return Ok(Vec::new());
        }

        // INVARIANT: Symlinked keeps count as long as they point at a directory.
        let walker = WalkBuilder::new(store_dir)
            .standard_filters(false)
            .hidden(true)
            .max_depth(Some(1))
            .build();

        let mut keeps = Vec::new();
        for entry in walker {
            let entry = entry?;
            if entry.depth() == 0 || !entry.path().is_dir() {
                continue;
            }
            keeps.push(entry.file_name().to_string_lossy().into_owned());
        }
        keeps.sort();

        Ok(keeps)
    }

    /// Activate keep by name.
    ///
    /// Tears down links of the current state record, persists the now empty
    /// record, then creates the keep's links and records the ones that were
    /// actually created. Links that fail are reported, but do not stop
    /// activation.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Keep`] if keep name is invalid, or its
    ///   manifests cannot be loaded. Store is left inactive in the latter case.
    /// - Return [`StoreError::KeepNotFound`] if keep has no manifest. Store
    ///   is left inactive.
    /// - Return [`StoreError::State`] if state record cannot be loaded or
    ///   saved.
    #[instrument(skip(self, keep_name), fields(keep = keep_name.as_ref()), level = "debug")]
    pub fn activate(&self, keep_name: impl AsRef<str>) -> Result<ActivationReport> {
        let keep = Keep::locate(self.layout, keep_name.as_ref())?;

        let teardown = self.teardown()?;

        if !keep.exists() {
            return Err(StoreError::KeepNotFound {
                name: keep.name().to_string(),
                path: manifest_path(keep.root()),
            });
        }

        let desired = keep.desired_links(self.layout)?;
        let creation = self.reconciler.create(&desired);
        self.state
            .save(&StateRecord::active(keep.name(), creation.created.clone()))?;
        info!("activated keep {:?}", keep.name());

        Ok(ActivationReport {
            keep: keep.name().to_string(),
            teardown,
            desired,
            creation,
        })
    }

    /// Deactivate current keep.
    ///
    /// Calling this while nothing is active still rewrites the empty record.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::State`] if state record cannot be loaded or
    ///   saved.
    #[instrument(skip(self), level = "debug")]
    pub fn deactivate(&self) -> Result<Teardown> {
        self.teardown()
    }

    /// Fetch keep from remote repository into keep store.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidUrl`] if no keep name can be derived
    ///   from URL.
    /// - Return [`StoreError::KeepExists`] if keep store already holds a keep
    ///   of the same name.
    /// - Return [`StoreError::Fetch`] if fetching fails.
    #[instrument(skip(self, fetcher), level = "debug")]
    pub fn fetch(&self, url: &str, fetcher: &impl KeepFetcher) -> Result<Keep> {
        let name = keep_name_from_url(url).ok_or_else(|| StoreError::InvalidUrl {
            url: url.to_string(),
        })?;
        let keep = Keep::locate(self.layout, name)?;
        if keep.root().exists() {
            return Err(StoreError::KeepExists {
                name: keep.name().to_string(),
                path: keep.root().to_path_buf(),
            });
        }

        mkdirp::mkdirp(self.layout.keep_store_dir()).map_err(|err| StoreError::CreateStore {
            source: err,
            path: self.layout.keep_store_dir().to_path_buf(),
        })?;
        fetcher.fetch(url, keep.root())?;

        if keep.exists() {
            info!("fetched keep {:?}", keep.name());
        } else {
            warn!(
                "fetched keep {:?} has no manifest at {:?}",
                keep.name(),
                manifest_path(keep.root()).display()
            );
        }

        Ok(keep)
    }

    fn teardown(&self) -> Result<Teardown> {
        let previous = self.state.load()?;
        if let Some(name) = previous.active.name() {
            info!("deactivate keep {name:?}");
        }

        let teardown = self.reconciler.teardown(previous);
        self.state.save(&teardown.record())?;

        Ok(teardown)
    }
}

/// Summary of keep activation.
#[derive(Debug)]
pub struct ActivationReport {
    /// Name of activated keep.
    pub keep: String,

    /// Outcome of tearing down previously active keep.
    pub teardown: Teardown,

    /// Resolved links the keep asked for, in creation order.
    pub desired: Vec<Link>,

    /// Outcome of creating desired links.
    pub creation: Creation,
}

impl ActivationReport {
    /// Links that were created and are now owned.
    pub fn created(&self) -> &[Link] {
        self.creation.created.as_slice()
    }

    /// Links that failed during creation.
    pub fn failures(&self) -> &[LinkFailure] {
        self.creation.failures.as_slice()
    }

    /// Check if every desired link was created, and every old link removed.
    pub fn is_clean(&self) -> bool {
        self.creation.failures.is_empty() && self.teardown.failures.is_empty()
    }
}

/// All possible error types for keep store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Keep has no manifest in keep store.
    #[error("keep {name:?} not found, expected manifest at {:?}", path.display())]
    KeepNotFound { name: String, path: PathBuf },

    /// Keep of same name already in keep store.
    #[error("keep {name:?} already exists at {:?}", path.display())]
    KeepExists { name: String, path: PathBuf },

    /// Keep name cannot be derived from URL.
    #[error("cannot derive keep name from url {url:?}")]
    InvalidUrl { url: String },

    /// Keep store directory cannot be created.
    #[error("failed to create keep store at {:?}", path.display())]
    CreateStore {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Keep store directory cannot be walked.
    #[error("failed to list keeps")]
    ListKeeps(#[from] ignore::Error),

    /// Keep location or manifest loading fails.
    #[error(transparent)]
    Keep(#[from] KeepError),

    /// State record loading or saving fails.
    #[error(transparent)]
    State(#[from] StateError),

    /// Fetching keep fails.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{keep::HOST_OVERLAY_DIR, state::ActiveKeep};
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        cell::RefCell,
        fs::{create_dir_all, read_link, read_to_string, symlink_metadata, write},
        path::Path,
    };

    fn layout() -> anyhow::Result<Layout> {
        Ok(Layout::new(
            std::env::current_dir()?.join("home"),
            Some("box".into()),
        ))
    }

    fn add_keep(layout: &Layout, name: &str, manifest: &str) -> anyhow::Result<PathBuf> {
        let root = layout.keep_root(name);
        create_dir_all(root.join(HOST_OVERLAY_DIR))?;
        write(root.join("keep.json"), manifest)?;
        Ok(root)
    }

    fn add_source(root: &Path, name: &str) -> anyhow::Result<()> {
        write(root.join(name), name)?;
        Ok(())
    }

    // Every recorded link must be a live symlink to its recorded source.
    fn assert_record_matches_disk(record: &StateRecord) -> anyhow::Result<()> {
        for link in &record.links {
            assert_eq!(read_link(&link.target)?, link.source);
        }
        Ok(())
    }

    #[sealed_test]
    fn activate_creates_links_and_records_them() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [
                { "source": "vimrc", "target": "~/.vimrc" },
                { "source": "init.lua", "target": "~/.config/nvim/init.lua" }
            ] }"#,
        )?;
        add_source(&root, "vimrc")?;
        add_source(&root, "init.lua")?;
        let store = KeepStore::open(&layout);

        let report = store.activate("main")?;

        assert!(report.is_clean());
        assert_eq!(report.created().len(), 2);
        let record = store.status()?;
        assert_eq!(record.active, ActiveKeep::Active("main".into()));
        assert_eq!(record.links, report.created());
        assert_record_matches_disk(&record)?;
        assert_eq!(
            read_to_string(layout.home_dir().join(".config/nvim/init.lua"))?,
            "init.lua"
        );

        Ok(())
    }

    #[sealed_test]
    fn activate_twice_is_idempotent() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "vimrc", "target": "~/.vimrc" } ] }"#,
        )?;
        add_source(&root, "vimrc")?;
        let store = KeepStore::open(&layout);

        store.activate("main")?;
        let first = store.status()?;
        let report = store.activate("main")?;
        let second = store.status()?;

        assert_eq!(first, second);
        assert_eq!(report.teardown.removed, first.links);
        assert!(report.is_clean());
        assert_record_matches_disk(&second)?;

        Ok(())
    }

    #[sealed_test]
    fn activate_switches_between_keeps() -> anyhow::Result<()> {
        let layout = layout()?;
        let one = add_keep(
            &layout,
            "one",
            r#"{ "links": [ { "source": "a", "target": "~/.a" } ] }"#,
        )?;
        add_source(&one, "a")?;
        let two = add_keep(
            &layout,
            "two",
            r#"{ "links": [ { "source": "b", "target": "~/.b" } ] }"#,
        )?;
        add_source(&two, "b")?;
        let store = KeepStore::open(&layout);

        store.activate("one")?;
        store.activate("two")?;

        let record = store.status()?;
        assert_eq!(record.active, ActiveKeep::Active("two".into()));
        assert!(symlink_metadata(layout.home_dir().join(".a")).is_err());
        assert_eq!(read_link(layout.home_dir().join(".b"))?, two.join("b"));
        assert_record_matches_disk(&record)?;

        Ok(())
    }

    #[sealed_test]
    fn activate_appends_host_overlay() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "A", "target": "~/X" } ] }"#,
        )?;
        write(
            root.join(HOST_OVERLAY_DIR).join("box.json"),
            r#"{ "links": [ { "source": "B", "target": "~/Y" } ] }"#,
        )?;
        add_source(&root, "A")?;
        add_source(&root, "B")?;
        let store = KeepStore::open(&layout);

        let report = store.activate("main")?;

        let home = layout.home_dir();
        let expect = vec![
            Link::new(root.join("A"), home.join("X")),
            Link::new(root.join("B"), home.join("Y")),
        ];
        assert_eq!(report.desired, expect);
        assert_eq!(report.created(), expect.as_slice());

        Ok(())
    }

    #[sealed_test]
    fn activate_records_only_created_links_on_collision() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "A", "target": "~/X" } ] }"#,
        )?;
        write(
            root.join(HOST_OVERLAY_DIR).join("box.json"),
            r#"{ "links": [ { "source": "A", "target": "~/X" } ] }"#,
        )?;
        add_source(&root, "A")?;
        let store = KeepStore::open(&layout);

        let report = store.activate("main")?;

        assert_eq!(report.desired.len(), 2);
        assert_eq!(report.created().len(), 1);
        assert_eq!(report.failures().len(), 1);
        assert!(!report.is_clean());
        let record = store.status()?;
        assert_eq!(record.links.len(), 1);
        assert_record_matches_disk(&record)?;

        Ok(())
    }

    #[sealed_test]
    fn activate_missing_keep_leaves_store_inactive() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "vimrc", "target": "~/.vimrc" } ] }"#,
        )?;
        add_source(&root, "vimrc")?;
        let store = KeepStore::open(&layout);
        store.activate("main")?;

        let result = store.activate("missing");

        assert!(matches!(result, Err(StoreError::KeepNotFound { name, .. }) if name == "missing"));
        assert_eq!(store.status()?, StateRecord::inactive());
        assert!(symlink_metadata(layout.home_dir().join(".vimrc")).is_err());
        assert!(!layout.keep_root("missing").exists());

        Ok(())
    }

    #[sealed_test]
    fn activate_broken_manifest_leaves_store_inactive() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "vimrc", "target": "~/.vimrc" } ] }"#,
        )?;
        add_source(&root, "vimrc")?;
        add_keep(&layout, "broken", r#"{ "links": [ { "source": "#)?;
        let store = KeepStore::open(&layout);
        store.activate("main")?;

        let result = store.activate("broken");

        assert!(matches!(
            result,
            Err(StoreError::Keep(KeepError::ManifestParse { .. }))
        ));
        assert_eq!(store.status()?, StateRecord::inactive());

        Ok(())
    }

    #[sealed_test]
    fn activate_with_broken_state_changes_nothing() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "vimrc", "target": "~/.vimrc" } ] }"#,
        )?;
        add_source(&root, "vimrc")?;
        write(layout.state_file(), "garbage")?;
        let store = KeepStore::open(&layout);

        let result = store.activate("main");

        assert!(matches!(
            result,
            Err(StoreError::State(StateError::Parse { .. }))
        ));
        assert_eq!(read_to_string(layout.state_file())?, "garbage");
        assert!(symlink_metadata(layout.home_dir().join(".vimrc")).is_err());

        Ok(())
    }

    #[sealed_test]
    fn activate_rejects_invalid_name_without_teardown() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "vimrc", "target": "~/.vimrc" } ] }"#,
        )?;
        add_source(&root, "vimrc")?;
        let store = KeepStore::open(&layout);
        store.activate("main")?;

        let result = store.activate("../main");

        assert!(matches!(
            result,
            Err(StoreError::Keep(KeepError::InvalidName { .. }))
        ));
        assert_eq!(store.status()?.active, ActiveKeep::Active("main".into()));

        Ok(())
    }

    #[sealed_test]
    fn deactivate_removes_links_and_is_idempotent() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "vimrc", "target": "~/.vimrc" } ] }"#,
        )?;
        add_source(&root, "vimrc")?;
        let store = KeepStore::open(&layout);
        store.activate("main")?;

        let teardown = store.deactivate()?;
        assert_eq!(teardown.removed.len(), 1);
        assert_eq!(store.status()?, StateRecord::inactive());
        assert!(symlink_metadata(layout.home_dir().join(".vimrc")).is_err());
        assert!(root.join("vimrc").is_file());

        let teardown = store.deactivate()?;
        assert!(teardown.removed.is_empty());
        assert_eq!(store.status()?, StateRecord::inactive());
        assert!(layout.state_file().is_file());

        Ok(())
    }

    #[sealed_test]
    fn deactivate_leaves_replaced_targets_alone() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "vimrc", "target": "~/.vimrc" } ] }"#,
        )?;
        add_source(&root, "vimrc")?;
        let store = KeepStore::open(&layout);
        store.activate("main")?;

        // User replaced the symlink with their own file.
        let target = layout.home_dir().join(".vimrc");
        std::fs::remove_file(&target)?;
        write(&target, "mine")?;

        let teardown = store.deactivate()?;
        assert_eq!(teardown.skipped.len(), 1);
        assert_eq!(read_to_string(&target)?, "mine");

        Ok(())
    }

    #[sealed_test]
    fn list_keeps_skips_hidden_entries_and_files() -> anyhow::Result<()> {
        let layout = layout()?;
        let store = KeepStore::open(&layout);
        assert!(store.list_keeps()?.is_empty());

        add_keep(&layout, "zsh", r#"{ "links": [] }"#)?;
        add_keep(&layout, "vim", r#"{ "links": [] }"#)?;
        create_dir_all(layout.keep_store_dir().join(".git"))?;
        write(layout.keep_store_dir().join("README"), "hi")?;

        assert_eq!(store.list_keeps()?, vec!["vim".to_string(), "zsh".to_string()]);

        Ok(())
    }

    #[sealed_test]
    fn list_keeps_includes_symlinked_keeps() -> anyhow::Result<()> {
        let layout = layout()?;
        add_keep(&layout, "plain", r#"{ "links": [] }"#)?;
        let elsewhere = std::env::current_dir()?.join("elsewhere/real");
        create_dir_all(&elsewhere)?;
        std::os::unix::fs::symlink(&elsewhere, layout.keep_store_dir().join("linked"))?;
        std::os::unix::fs::symlink(
            std::env::current_dir()?.join("gone"),
            layout.keep_store_dir().join("dangling"),
        )?;
        let store = KeepStore::open(&layout);

        assert_eq!(
            store.list_keeps()?,
            vec!["linked".to_string(), "plain".to_string()]
        );

        Ok(())
    }

    #[sealed_test]
    fn deactivate_removes_links_created_through_directory_link() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [
                { "source": "cfg", "target": "~/.config" },
                { "source": "x", "target": "~/.config/sub/x" }
            ] }"#,
        )?;
        create_dir_all(root.join("cfg"))?;
        add_source(&root, "x")?;
        let store = KeepStore::open(&layout);

        let report = store.activate("main")?;
        assert_eq!(report.created().len(), 2);
        assert!(report.is_clean());
        // Second link lands inside keep through the directory symlink.
        assert_eq!(read_link(root.join("cfg/sub/x"))?, root.join("x"));

        let teardown = store.deactivate()?;

        assert_eq!(teardown.removed.len(), 2);
        assert!(teardown.skipped.is_empty());
        assert!(teardown.failures.is_empty());
        assert!(symlink_metadata(root.join("cfg/sub/x")).is_err());
        assert!(symlink_metadata(layout.home_dir().join(".config")).is_err());
        assert!(root.join("x").is_file());

        Ok(())
    }

    #[sealed_test]
    fn activate_records_normalized_keep_name() -> anyhow::Result<()> {
        let layout = layout()?;
        let root = add_keep(
            &layout,
            "main",
            r#"{ "links": [ { "source": "vimrc", "target": "~/.vimrc" } ] }"#,
        )?;
        add_source(&root, "vimrc")?;
        let store = KeepStore::open(&layout);

        let report = store.activate("main/")?;

        assert_eq!(report.keep, "main");
        assert_eq!(store.status()?.active, ActiveKeep::Active("main".into()));

        Ok(())
    }

    // Fetcher that lays down a keep instead of talking to a remote.
    #[derive(Default)]
    struct FakeFetcher {
        calls: RefCell<Vec<(String, PathBuf)>>,
    }

    impl KeepFetcher for FakeFetcher {
        fn fetch(&self, url: &str, path: &Path) -> crate::fetch::Result<()> {
            self.calls
                .borrow_mut()
                .push((url.to_string(), path.to_path_buf()));
            create_dir_all(path).map_err(|err| FetchError::Git2(git2::Error::from_str(&err.to_string())))?;
            write(path.join("keep.json"), r#"{ "links": [] }"#)
                .map_err(|err| FetchError::Git2(git2::Error::from_str(&err.to_string())))?;
            Ok(())
        }
    }

    #[sealed_test]
    fn fetch_clones_into_store_by_repository_name() -> anyhow::Result<()> {
        let layout = layout()?;
        let store = KeepStore::open(&layout);
        let fetcher = FakeFetcher::default();

        let keep = store.fetch("https://blah.org/me/shell.git", &fetcher)?;

        assert_eq!(keep.name(), "shell");
        assert_eq!(keep.root(), layout.keep_root("shell"));
        assert!(keep.exists());
        assert_eq!(
            fetcher.calls.borrow().as_slice(),
            &[(
                "https://blah.org/me/shell.git".to_string(),
                layout.keep_root("shell")
            )]
        );
        assert_eq!(store.list_keeps()?, vec!["shell".to_string()]);

        Ok(())
    }

    #[sealed_test]
    fn fetch_refuses_existing_keep() -> anyhow::Result<()> {
        let layout = layout()?;
        add_keep(&layout, "shell", r#"{ "links": [] }"#)?;
        let store = KeepStore::open(&layout);
        let fetcher = FakeFetcher::default();

        let result = store.fetch("https://blah.org/me/shell.git", &fetcher);

        assert!(matches!(result, Err(StoreError::KeepExists { .. })));
        assert!(fetcher.calls.borrow().is_empty());

        Ok(())
    }

    #[sealed_test]
    fn fetch_rejects_url_without_name() -> anyhow::Result<()> {
        let layout = layout()?;
        let store = KeepStore::open(&layout);

        let result = store.fetch("https://blah.org/.git", &FakeFetcher::default());

        assert!(matches!(result, Err(StoreError::InvalidUrl { .. })));

        Ok(())
    }
}
