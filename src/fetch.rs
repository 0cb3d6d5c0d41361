// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Fetch keeps from remote repositories.
//!
//! Keeps are usually version controlled somewhere else. Fetching a keep
//! clones its repository into the keep store, under a directory named after
//! the repository itself. So fetching `https://blah.org/shell.git` yields a
//! keep named "shell".

use auth_git2::{GitAuthenticator, Prompter};
use git2::{build::RepoBuilder, Config, FetchOptions, RemoteCallbacks};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{path::Path, time};
use tracing::{info, instrument};

/// Layer of indirection for fetching keeps.
pub trait KeepFetcher {
    /// Clone remote repository at `url` into `path`.
    fn fetch(&self, url: &str, path: &Path) -> Result<()>;
}

/// Keep fetcher through libgit2.
///
/// The progress of the clone is displayed through a progress bar. If any
/// credentials are required for the clone to continue, then the user will be
/// prompted for them. The progress bar is suspended for user input.
#[derive(Clone)]
pub struct Git2Fetcher {
    bar: ProgressBar,
}

impl Git2Fetcher {
    /// Construct new fetcher reporting progress through `bar`.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl KeepFetcher for Git2Fetcher {
    /// Clone remote repository with its working tree.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::IndicatifStyleTemplate`] if progress bar style
    ///   cannot be set.
    /// - Return [`FetchError::Git2`] if libgit2 fails to clone.
    #[instrument(skip(self, path), level = "debug")]
    fn fetch(&self, url: &str, path: &Path) -> Result<()> {
        info!("fetch keep from {url} into {:?}", path.display());
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        self.bar.set_style(style);
        self.bar.set_message(url.to_string());
        self.bar.enable_steady_tick(time::Duration::from_millis(100));

        let prompter = CredentialPrompter::new(self.bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let stats = progress.to_owned();
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                prompter.bar.set_length(stats.total_objects() as u64);
                prompter.bar.set_position(stats.received_objects() as u64);
            }
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        let result = RepoBuilder::new().fetch_options(fo).clone(url, path);
        self.bar.finish_and_clear();
        result?;

        Ok(())
    }
}

/// Credential prompts shown while a keep is being cloned.
///
/// Clone progress is drawn on the shared progress bar, so every prompt
/// suspends it first. Cancelling any prompt gives up on authentication,
/// which makes libgit2 fail the clone.
#[derive(Clone)]
pub struct CredentialPrompter {
    pub(crate) bar: ProgressBar,
}

impl CredentialPrompter {
    /// Construct new prompter drawing over `bar`.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }

    fn ask(&self, prompt: &str) -> Option<String> {
        self.bar.suspend(|| Text::new(prompt).prompt().ok())
    }

    fn ask_secret(&self, prompt: &str) -> Option<String> {
        self.bar.suspend(|| {
            Password::new(prompt)
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

impl Prompter for CredentialPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("keep remote {url} wants credentials");
        let username = self.ask(&credential_prompt(Credential::Username, url))?;
        let password = self.ask_secret(&credential_prompt(Credential::Password, &username))?;
        Some((username, password))
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("keep remote {url} wants a password for {username}");
        self.ask_secret(&credential_prompt(Credential::Password, username))
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        let key = ssh_key_path.display().to_string();
        info!("ssh key {key} is locked");
        self.ask_secret(&credential_prompt(Credential::Passphrase, &key))
    }
}

/// Kind of credential asked for while fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Credential {
    Username,
    Password,
    Passphrase,
}

/// Prompt message asking for credential concerning `subject`.
pub(crate) fn credential_prompt(kind: Credential, subject: &str) -> String {
    match kind {
        Credential::Username => format!("username for {subject}:"),
        Credential::Password => format!("password for {subject}:"),
        Credential::Passphrase => format!("passphrase for ssh key {subject}:"),
    }
}

/// Determine keep name from repository URL.
///
/// Takes the last path segment, without any trailing slash or ".git"
/// extension. Works for scp-like URLs, e.g., `git@blah.org:me/shell.git`.
/// Returns `None` if nothing usable is left.
pub fn keep_name_from_url(url: impl AsRef<str>) -> Option<String> {
    let url = url.as_ref().trim().trim_end_matches('/');
    let segment = url.rsplit(['/', ':', '\\']).next()?;
    let name = segment.strip_suffix(".git").unwrap_or(segment);

    if name.is_empty() || name.starts_with('.') {
        return None;
    }

    Some(name.to_string())
}

/// Keep fetching error types.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error("git failed ({:?}/{:?}): {}", .0.class(), .0.code(), .0.message())]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = FetchError> = std::result::Result<T, E>;
