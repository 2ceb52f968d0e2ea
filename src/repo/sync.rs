// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Working-copy synchronization.
//!
//! A [`WorkingCopy`] owns one local directory that mirrors one remote
//! repository. It is the only writer of that directory. Every request goes
//! through [`WorkingCopy::with_checkout`], which brings the mirror up to date,
//! checks out the requested label, and hands the checked-out tree to the
//! caller while still holding the lock.
//!
//! # Lifecycle
//!
//! ```text
//! UNINITIALIZED -> CLONED -> SYNCHRONIZED <-> STALE -> SYNCHRONIZED
//!                                 |
//!                             CORRUPTED -> (wiped) -> UNINITIALIZED
//! ```
//!
//! The remote is always right. Local modifications are discarded before every
//! checkout. A local branch that cannot be fast-forwarded to its remote tip is
//! hard reset onto it. A directory that cannot be opened
//! as a clone of the configured remote is wiped, and cloned again.
//!
//! # Refresh Policy
//!
//! - A refresh rate of zero fetches on every request.
//! - Otherwise a clean working copy refreshed less than one refresh rate ago
//!   is served without contacting the remote.
//! - A dirty working copy always refreshes, unless `force_pull` is set, in
//!   which case only the refresh rate matters.
//! - Callers that queued behind a refresh reuse its result instead of
//!   fetching again.
//!
//! Fetch failures are logged, and the request is served from whatever the
//! working copy already holds. Only the first clone is fatal to a request.

use crate::repo::{RepoError, Result};

use auth_git2::GitAuthenticator;
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    AutotagOption, BranchType, CertificateCheckStatus, Config, ErrorCode, FetchOptions,
    FetchPrune, Oid, RemoteCallbacks, Repository, ResetType, StatusOptions,
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    fs::{create_dir_all, read_dir, remove_dir_all},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, warn};

/// Name of remote every working copy tracks.
pub const REMOTE: &str = "origin";

const FETCH_REFSPECS: [&str; 2] = [
    "+refs/heads/*:refs/remotes/origin/*",
    "+refs/tags/*:refs/tags/*",
];

/// Credentials used to reach the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    pub passphrase: Option<String>,
}

/// Settings of one working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Remote address to mirror.
    pub uri: String,

    /// Local directory holding the working copy.
    pub basedir: PathBuf,

    /// Minimum time between fetches. Zero fetches on every request.
    pub refresh_rate: Duration,

    /// Let the refresh rate throttle fetches even when the working copy is dirty.
    pub force_pull: bool,

    /// Delete local branches whose remote branch disappeared.
    pub delete_untracked_branches: bool,

    /// Accept any TLS certificate presented by the remote.
    pub skip_ssl_validation: bool,

    /// Credentials for the remote.
    pub credentials: Credentials,
}

impl SyncSettings {
    /// Construct new settings with every optional behavior disabled.
    pub fn new(uri: impl Into<String>, basedir: impl Into<PathBuf>) -> Self {
        Self {
            uri: uri.into(),
            basedir: basedir.into(),
            refresh_rate: Duration::ZERO,
            force_pull: false,
            delete_untracked_branches: false,
            skip_ssl_validation: false,
            credentials: Credentials::default(),
        }
    }
}

/// Result of preparing a working copy for a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    /// Root of checked-out tree.
    pub basedir: PathBuf,

    /// Label that was checked out.
    pub label: String,

    /// Commit id of checked-out HEAD.
    pub version: String,
}

#[derive(Debug, Default)]
struct SyncState {
    last_refresh: Option<Instant>,
}

/// Local mirror of one remote repository.
#[derive(Debug)]
pub struct WorkingCopy {
    settings: SyncSettings,
    state: Mutex<SyncState>,
    refreshes: AtomicU64,
}

impl WorkingCopy {
    /// Construct new working copy.
    ///
    /// Nothing touches the disk until the first request, or
    /// [`WorkingCopy::initialize`].
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(SyncState::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Settings of working copy.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Remote address being mirrored.
    pub fn uri(&self) -> &str {
        &self.settings.uri
    }

    /// Local directory of working copy.
    pub fn basedir(&self) -> &Path {
        &self.settings.basedir
    }

    /// Number of clones and successful fetches performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Acquire)
    }

    /// Clone remote right away if no working copy exists yet.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Transport`] or [`RepoError::NoSuchRepository`]
    ///   if the clone fails.
    /// - Return [`RepoError::Corrupted`] if an unusable directory cannot be
    ///   wiped.
    #[instrument(skip(self), fields(uri = %self.settings.uri), level = "debug")]
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.open_or_clone(&mut state).map(drop)
    }

    /// Bring working copy up to date, and check out a label.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError`] under the same conditions as
    ///   [`WorkingCopy::with_checkout`].
    pub fn prepare(&self, label: &str) -> Result<Checkout> {
        self.with_checkout(label, |checkout| Ok(checkout.clone()))
    }

    /// Bring working copy up to date, check out a label, and read from it.
    ///
    /// The working copy stays locked while `read` runs, so no other request
    /// can switch the checkout underneath it.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Transport`] or [`RepoError::NoSuchRepository`]
    ///   if the initial clone fails.
    /// - Return [`RepoError::NoSuchLabel`] if `label` names no branch, tag, or
    ///   revision.
    /// - Return [`RepoError::Checkout`] if checkout fails for any reason other
    ///   than diverged history.
    /// - Return whatever `read` returns.
    #[instrument(skip(self, read), fields(uri = %self.settings.uri), level = "debug")]
    pub fn with_checkout<T>(
        &self,
        label: &str,
        read: impl FnOnce(&Checkout) -> Result<T>,
    ) -> Result<T> {
        let ticket = self.refreshes.load(Ordering::Acquire);
        let mut state = self.state.lock();
        let repository = self.open_or_clone(&mut state)?;

        if self.refreshes.load(Ordering::Acquire) != ticket {
            debug!("refresh completed while waiting, reuse its result");
        } else if self.should_fetch(&repository, &state) {
            match self.fetch(&repository) {
                Ok(()) => {
                    state.last_refresh = Some(Instant::now());
                    self.refreshes.fetch_add(1, Ordering::AcqRel);
                }
                Err(err) => warn!("cannot fetch from {}, serving stale copy: {err}", self.uri()),
            }
        }

        let version = self.checkout(&repository, label)?;
        let checkout = Checkout {
            basedir: self.settings.basedir.clone(),
            label: label.to_owned(),
            version,
        };
        read(&checkout)
    }

    fn open_or_clone(&self, state: &mut SyncState) -> Result<Repository> {
        let basedir = &self.settings.basedir;
        if basedir.join(".git").exists() {
            match self.open_existing() {
                Ok(repository) => return Ok(repository),
                Err(err) => {
                    warn!(
                        "working copy at {:?} is unusable, recreating it: {err}",
                        basedir.display()
                    );
                    self.wipe()?;
                }
            }
        } else if has_entries(basedir) {
            warn!(
                "{:?} does not hold a working copy, recreating it",
                basedir.display()
            );
            self.wipe()?;
        }

        let repository = self.clone_remote()?;
        state.last_refresh = Some(Instant::now());
        self.refreshes.fetch_add(1, Ordering::AcqRel);

        Ok(repository)
    }

    fn open_existing(&self) -> std::result::Result<Repository, git2::Error> {
        let repository = Repository::open(&self.settings.basedir)?;
        let url = repository.find_remote(REMOTE)?.url().map(str::to_owned);

        // INVARIANT: Working copy must mirror the configured remote.
        if url.as_deref() != Some(self.settings.uri.as_str()) {
            return Err(git2::Error::from_str(&format!(
                "remote {REMOTE} points to {url:?} instead of {:?}",
                self.settings.uri
            )));
        }

        Ok(repository)
    }

    fn wipe(&self) -> Result<()> {
        remove_dir_all(&self.settings.basedir).map_err(|err| RepoError::Corrupted {
            basedir: self.settings.basedir.clone(),
            source: err,
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn clone_remote(&self) -> Result<Repository> {
        let SyncSettings { uri, basedir, .. } = &self.settings;
        info!("clone {uri} into {:?}", basedir.display());

        if let Some(parent) = basedir.parent() {
            create_dir_all(parent).map_err(|err| RepoError::Io {
                path: parent.to_path_buf(),
                source: err,
            })?;
        }

        let authenticator = self.authenticator();
        let config = git_config()?;
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.remote_callbacks(&authenticator, &config));
        fo.download_tags(AutotagOption::All);

        let cloned = RepoBuilder::new().fetch_options(fo).clone(uri, basedir);
        match cloned {
            Ok(repository) => Ok(repository),
            Err(err) => {
                // INVARIANT: Never leave a half-cloned directory behind.
                if basedir.exists() {
                    if let Err(rm_err) = remove_dir_all(basedir) {
                        warn!("cannot remove partial clone {:?}: {rm_err}", basedir.display());
                    }
                }

                if err.code() == ErrorCode::NotFound {
                    Err(RepoError::NoSuchRepository {
                        uri: uri.clone(),
                        source: err,
                    })
                } else {
                    Err(RepoError::Transport {
                        uri: uri.clone(),
                        basedir: basedir.clone(),
                        source: err,
                    })
                }
            }
        }
    }

    fn should_fetch(&self, repository: &Repository, state: &SyncState) -> bool {
        let rate = self.settings.refresh_rate;
        let throttled =
            !rate.is_zero() && state.last_refresh.is_some_and(|at| at.elapsed() < rate);
        if !throttled {
            return true;
        }

        if self.settings.force_pull {
            return false;
        }

        let clean = is_clean(repository).unwrap_or(false);
        if !clean {
            info!("working copy {:?} is dirty, refreshing early", self.basedir().display());
        }

        !clean
    }

    #[instrument(skip(self, repository), level = "debug")]
    fn fetch(&self, repository: &Repository) -> std::result::Result<(), git2::Error> {
        debug!("fetch from {}", self.uri());
        let before = remote_branches(repository)?;

        let authenticator = self.authenticator();
        let config = git_config()?;
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.remote_callbacks(&authenticator, &config));
        fo.download_tags(AutotagOption::All);
        if self.settings.delete_untracked_branches {
            fo.prune(FetchPrune::On);
        }

        repository
            .find_remote(REMOTE)?
            .fetch(&FETCH_REFSPECS, Some(&mut fo), None)?;

        if self.settings.delete_untracked_branches {
            let after = remote_branches(repository)?;
            for name in before.difference(&after) {
                prune_local_branch(repository, name);
            }
        }

        Ok(())
    }

    #[instrument(skip(self, repository), level = "debug")]
    fn checkout(&self, repository: &Repository, label: &str) -> Result<String> {
        if !is_clean(repository).unwrap_or(false) {
            self.discard_local_changes(repository).map_err(|err| RepoError::Checkout {
                label: label.to_owned(),
                basedir: self.settings.basedir.clone(),
                source: err,
            })?;
        }

        let remote_tip = repository
            .find_branch(&format!("{REMOTE}/{label}"), BranchType::Remote)
            .ok()
            .and_then(|branch| branch.get().target());
        let has_local = repository.find_branch(label, BranchType::Local).is_ok();

        let outcome = if has_local || remote_tip.is_some() {
            self.checkout_branch(repository, label, remote_tip)
        } else if let Some(oid) = find_revision(repository, label) {
            debug!("check out {label} detached at {oid}");
            self.checkout_detached(repository, oid)
        } else {
            return Err(RepoError::NoSuchLabel {
                label: label.to_owned(),
                uri: self.settings.uri.clone(),
            });
        };

        outcome.map_err(|err| RepoError::Checkout {
            label: label.to_owned(),
            basedir: self.settings.basedir.clone(),
            source: err,
        })?;

        Ok(repository.head()?.peel_to_commit()?.id().to_string())
    }

    fn checkout_branch(
        &self,
        repository: &Repository,
        label: &str,
        remote_tip: Option<Oid>,
    ) -> std::result::Result<(), git2::Error> {
        let refname = format!("refs/heads/{label}");
        let local_tip = match repository.find_branch(label, BranchType::Local) {
            Ok(branch) => branch.get().peel_to_commit()?.id(),
            Err(_) => {
                let Some(tip) = remote_tip else {
                    return Err(git2::Error::from_str("branch has no local or remote tip"));
                };
                let commit = repository.find_commit(tip)?;
                let mut branch = repository.branch(label, &commit, false)?;
                branch.set_upstream(Some(&format!("{REMOTE}/{label}")))?;
                info!("track {REMOTE}/{label} with new local branch");
                tip
            }
        };

        let on_branch = repository
            .head()
            .ok()
            .and_then(|head| head.name().map(str::to_owned))
            .is_some_and(|name| name == refname);
        if !on_branch {
            let target = repository.find_object(local_tip, None)?;
            repository.checkout_tree(&target, Some(&mut self.checkout_builder()))?;
            repository.set_head(&refname)?;
        }

        if let Some(remote_tip) = remote_tip {
            self.merge_remote(repository, label, &refname, remote_tip)?;
        }

        Ok(())
    }

    fn merge_remote(
        &self,
        repository: &Repository,
        label: &str,
        refname: &str,
        remote_tip: Oid,
    ) -> std::result::Result<(), git2::Error> {
        let annotated = repository.find_annotated_commit(remote_tip)?;
        let (analysis, _) = repository.merge_analysis(&[&annotated])?;
        if analysis.is_up_to_date() {
            return Ok(());
        }

        let target = repository.find_object(remote_tip, None)?;
        if analysis.is_fast_forward() {
            match repository.checkout_tree(&target, Some(&mut self.checkout_builder())) {
                Ok(()) => {
                    repository
                        .find_reference(refname)?
                        .set_target(remote_tip, "fast-forward")?;
                    debug!("fast-forward {label} to {remote_tip}");
                    return Ok(());
                }
                Err(err) => warn!("cannot fast-forward {label}, resetting instead: {err}"),
            }
        } else {
            warn!("{label} diverged from {REMOTE}/{label}, resetting to {remote_tip}");
        }

        // INVARIANT: Remote always wins, local history is discarded.
        repository.reset(&target, ResetType::Hard, None)
    }

    fn checkout_detached(
        &self,
        repository: &Repository,
        oid: Oid,
    ) -> std::result::Result<(), git2::Error> {
        let target = repository.find_object(oid, None)?;
        repository.checkout_tree(&target, Some(&mut self.checkout_builder()))?;
        repository.set_head_detached(oid)
    }

    fn discard_local_changes(
        &self,
        repository: &Repository,
    ) -> std::result::Result<(), git2::Error> {
        warn!(
            "working copy {:?} has local changes, discarding them",
            self.basedir().display()
        );
        let mut builder = self.checkout_builder();
        builder.remove_untracked(true);
        repository.checkout_head(Some(&mut builder))
    }

    // INVARIANT: This process is the only writer of the working copy.
    fn checkout_builder(&self) -> CheckoutBuilder<'static> {
        let mut builder = CheckoutBuilder::new();
        builder.force();
        builder
    }

    fn authenticator(&self) -> GitAuthenticator {
        let credentials = &self.settings.credentials;

        // INVARIANT: Never prompt, requests are served unattended.
        let mut authenticator = GitAuthenticator::default().try_password_prompt(0);
        match (&credentials.username, &credentials.password) {
            (Some(username), Some(password)) => {
                authenticator = authenticator.add_plaintext_credentials("*", username, password);
            }
            (Some(username), None) => {
                authenticator = authenticator.add_username("*", username);
            }
            _ => {}
        }

        if let Some(private_key) = &credentials.private_key {
            authenticator =
                authenticator.add_ssh_key_from_file(private_key, credentials.passphrase.clone());
        }

        authenticator
    }

    fn remote_callbacks<'a>(
        &self,
        authenticator: &'a GitAuthenticator,
        config: &'a Config,
    ) -> RemoteCallbacks<'a> {
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(config));
        if self.settings.skip_ssl_validation {
            rc.certificate_check(|_cert, host| {
                debug!("skip certificate validation for {host}");
                Ok(CertificateCheckStatus::CertificateOk)
            });
        }

        rc
    }
}

fn git_config() -> std::result::Result<Config, git2::Error> {
    Config::open_default().or_else(|_| Config::new())
}

fn has_entries(path: &Path) -> bool {
    read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn is_clean(repository: &Repository) -> std::result::Result<bool, git2::Error> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).include_ignored(false);
    Ok(repository.statuses(Some(&mut opts))?.is_empty())
}

fn remote_branches(repository: &Repository) -> std::result::Result<HashSet<String>, git2::Error> {
    let prefix = format!("{REMOTE}/");
    let mut names = HashSet::new();
    for branch in repository.branches(Some(BranchType::Remote))? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()?.and_then(|name| name.strip_prefix(&prefix)) {
            if name != "HEAD" {
                names.insert(name.to_owned());
            }
        }
    }

    Ok(names)
}

// Best-effort: the branch may be checked out, or otherwise protected.
fn prune_local_branch(repository: &Repository, name: &str) {
    let Ok(mut branch) = repository.find_branch(name, BranchType::Local) else {
        return;
    };

    match branch.delete() {
        Ok(()) => info!("delete local branch {name}, gone from {REMOTE}"),
        Err(err) => warn!("cannot delete local branch {name}: {err}"),
    }
}

fn find_revision(repository: &Repository, label: &str) -> Option<Oid> {
    repository
        .revparse_single(&format!("refs/tags/{label}"))
        .or_else(|_| repository.revparse_single(label))
        .ok()?
        .peel_to_commit()
        .ok()
        .map(|commit| commit.id())
}
