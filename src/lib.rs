// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dotfile keep manager.
//!
//! A __keep__ is a named bundle of dotfiles together with a manifest that
//! says where each file should be symlinked. Dotkeeper activates one keep at
//! a time by symlinking its files into place, remembers every symlink it
//! created, and removes exactly those symlinks again when the keep is
//! deactivated or another keep takes its place.
//!
//! # See Also
//!
//! 1. [`KeepStore`](crate::store::KeepStore)
//! 2. [`KeepManifest`](crate::config::KeepManifest)
//! 3. [`reconcile`](crate::reconcile)

pub mod config;
pub mod fetch;
pub mod keep;
pub mod path;
pub mod reconcile;
pub mod state;
pub mod store;
