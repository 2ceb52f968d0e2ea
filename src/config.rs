// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the server configuration file that Oxiconf uses to
//! assemble its environment repositories. File I/O is left to the caller to
//! figure out.
//!
//! # General Layout
//!
//! ```toml
//! basedir = "$XDG_CACHE_HOME/oxiconf"
//!
//! [[repository]]
//! kind = "git"
//! order = 0
//! uri = "https://example.org/config.git"
//! search_paths = ["{application}"]
//! refresh_rate = 30
//!
//! [[repository.repo]]
//! name = "team"
//! pattern = ["team-*"]
//! uri = "https://example.org/team-config.git"
//!
//! [[repository]]
//! kind = "native"
//! order = 1
//! search_locations = ["file:/etc/oxiconf/"]
//! ```
//!
//! Paths and search locations go through shell expansion when parsed.

use crate::{
    path::{default_store_dir, NoWayHome},
    repo::{
        git::{GitRepositorySettings, DEFAULT_LABEL},
        native::NativeRepositorySettings,
        sync::{Credentials, SyncSettings},
    },
    store::WorkingCopyStore,
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// Server configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Root of working copy store. Defaults to [`default_store_dir`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basedir: Option<PathBuf>,

    /// Listing of environment repositories.
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,
}

impl ServerConfig {
    /// Working copy store for repositories without explicit basedir.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if no basedir is configured, and the default
    ///   cannot be determined.
    pub fn working_copy_store(&self) -> Result<WorkingCopyStore, NoWayHome> {
        match &self.basedir {
            Some(basedir) => Ok(WorkingCopyStore::new(basedir)),
            None => Ok(WorkingCopyStore::new(default_store_dir()?)),
        }
    }
}

impl FromStr for ServerConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: ServerConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path-like field.
        if let Some(basedir) = &config.basedir {
            config.basedir = Some(expand_path(basedir)?);
        }

        for repository in &mut config.repositories {
            match repository {
                RepositoryConfig::Git(git) => {
                    git.expand()?;
                    for repo in &mut git.repos {
                        repo.expand()?;
                    }
                }
                RepositoryConfig::Native(native) => {
                    native.search_locations = native
                        .search_locations
                        .iter()
                        .map(|location| expand(location))
                        .collect::<Result<_>>()?;
                }
            }
        }

        Ok(config)
    }
}

impl Display for ServerConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Environment repository entry.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepositoryConfig {
    /// Git backend, optionally routed by pattern.
    Git(GitRepoConfig),

    /// Plain directories on the local file system.
    Native(NativeRepoConfig),
}

impl RepositoryConfig {
    /// Position of repository in composite. Lower orders take precedence.
    pub fn order(&self) -> i32 {
        match self {
            Self::Git(git) => git.order,
            Self::Native(native) => native.order,
        }
    }
}

/// Git backend settings.
///
/// Named entries in `repo` inherit every setting they leave out, except
/// `basedir` and `search_paths`.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GitRepoConfig {
    /// Position in composite.
    #[serde(default)]
    pub order: i32,

    /// Remote URI, may contain `{application}` or `{profile}`.
    pub uri: String,

    /// Working copy directory. Picked from working copy store if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basedir: Option<PathBuf>,

    /// Search path templates relative to working copy root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<String>,

    /// Label used when a request names none.
    #[serde(default = "default_label")]
    pub default_label: String,

    /// Retry with `master` when the default label is missing.
    #[serde(default = "enabled")]
    pub try_master_branch: bool,

    /// Minimum seconds between fetches.
    #[serde(default)]
    pub refresh_rate: u64,

    /// Clone when the server starts instead of on first request.
    #[serde(default)]
    pub clone_on_start: bool,

    /// Let the refresh rate throttle fetches of a dirty working copy too.
    #[serde(default)]
    pub force_pull: bool,

    /// Delete local branches gone from remote.
    #[serde(default)]
    pub delete_untracked_branches: bool,

    /// Accept any TLS certificate.
    #[serde(default)]
    pub skip_ssl_validation: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    /// Pattern-scoped repositories, evaluated in declaration order.
    #[serde(default, rename = "repo", skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<PatternRepoConfig>,
}

impl GitRepoConfig {
    /// Construct new git entry with defaults for everything but the URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            order: 0,
            uri: uri.into(),
            basedir: None,
            search_paths: Vec::new(),
            default_label: default_label(),
            try_master_branch: true,
            refresh_rate: 0,
            clone_on_start: false,
            force_pull: false,
            delete_untracked_branches: false,
            skip_ssl_validation: false,
            username: None,
            password: None,
            private_key: None,
            passphrase: None,
            repos: Vec::new(),
        }
    }

    /// Settings of default repository.
    pub fn settings(&self, store: &WorkingCopyStore) -> GitRepositorySettings {
        let basedir = self
            .basedir
            .clone()
            .unwrap_or_else(|| store.working_copy_dir(&self.uri));

        let mut sync = SyncSettings::new(&self.uri, basedir);
        sync.refresh_rate = Duration::from_secs(self.refresh_rate);
        sync.force_pull = self.force_pull;
        sync.delete_untracked_branches = self.delete_untracked_branches;
        sync.skip_ssl_validation = self.skip_ssl_validation;
        sync.credentials = Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            private_key: self.private_key.clone(),
            passphrase: self.passphrase.clone(),
        };

        let mut settings = GitRepositorySettings::new(sync);
        settings.search_paths = self.search_paths.clone();
        settings.default_label = self.default_label.clone();
        settings.try_master_branch = self.try_master_branch;
        settings.clone_on_start = self.clone_on_start;
        settings
    }

    fn expand(&mut self) -> Result<()> {
        if let Some(basedir) = &self.basedir {
            self.basedir = Some(expand_path(basedir)?);
        }

        if let Some(private_key) = &self.private_key {
            self.private_key = Some(expand_path(private_key)?);
        }

        Ok(())
    }
}

/// Pattern-scoped git repository.
#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PatternRepoConfig {
    /// Name of entry. Used as the only pattern when `pattern` is empty.
    pub name: String,

    /// Glob patterns of the form `app[/profile]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pattern: Vec<String>,

    /// Remote URI, may contain `{application}` or `{profile}`.
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basedir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub try_master_branch: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_rate: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_on_start: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_pull: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_untracked_branches: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_ssl_validation: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl PatternRepoConfig {
    /// Patterns of entry, falling back to its name.
    pub fn patterns(&self) -> Vec<String> {
        if self.pattern.is_empty() {
            vec![self.name.clone()]
        } else {
            self.pattern.clone()
        }
    }

    /// Settings of entry, filling gaps from `parent`.
    pub fn settings(
        &self,
        parent: &GitRepoConfig,
        store: &WorkingCopyStore,
    ) -> GitRepositorySettings {
        // INVARIANT: Basedir and search paths are never inherited.
        let inherited = GitRepoConfig {
            order: parent.order,
            uri: self.uri.clone(),
            basedir: self.basedir.clone(),
            search_paths: self.search_paths.clone(),
            default_label: self
                .default_label
                .clone()
                .unwrap_or_else(|| parent.default_label.clone()),
            try_master_branch: self.try_master_branch.unwrap_or(parent.try_master_branch),
            refresh_rate: self.refresh_rate.unwrap_or(parent.refresh_rate),
            clone_on_start: self.clone_on_start.unwrap_or(parent.clone_on_start),
            force_pull: self.force_pull.unwrap_or(parent.force_pull),
            delete_untracked_branches: self
                .delete_untracked_branches
                .unwrap_or(parent.delete_untracked_branches),
            skip_ssl_validation: self.skip_ssl_validation.unwrap_or(parent.skip_ssl_validation),
            username: self.username.clone().or_else(|| parent.username.clone()),
            password: self.password.clone().or_else(|| parent.password.clone()),
            private_key: self.private_key.clone().or_else(|| parent.private_key.clone()),
            passphrase: self.passphrase.clone().or_else(|| parent.passphrase.clone()),
            repos: Vec::new(),
        };

        inherited.settings(store)
    }

    fn expand(&mut self) -> Result<()> {
        if let Some(basedir) = &self.basedir {
            self.basedir = Some(expand_path(basedir)?);
        }

        if let Some(private_key) = &self.private_key {
            self.private_key = Some(expand_path(private_key)?);
        }

        Ok(())
    }
}

/// Native backend settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct NativeRepoConfig {
    /// Position in composite.
    #[serde(default)]
    pub order: i32,

    /// Search location templates, optionally prefixed with `file:`.
    #[serde(default = "default_search_locations")]
    pub search_locations: Vec<String>,

    /// Also search `<location>/<label>/` before each location.
    #[serde(default = "enabled")]
    pub add_label_locations: bool,

    /// Label used when a request names none.
    #[serde(default = "default_native_label")]
    pub default_label: String,

    /// Fixed version reported for every environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for NativeRepoConfig {
    fn default() -> Self {
        Self {
            order: 0,
            search_locations: default_search_locations(),
            add_label_locations: true,
            default_label: default_native_label(),
            version: None,
        }
    }
}

impl NativeRepoConfig {
    /// Settings of native repository.
    pub fn settings(&self) -> NativeRepositorySettings {
        NativeRepositorySettings {
            search_locations: self.search_locations.clone(),
            add_label_locations: self.add_label_locations,
            default_label: self.default_label.clone(),
            version: self.version.clone(),
        }
    }
}

fn default_label() -> String {
    DEFAULT_LABEL.into()
}

fn default_native_label() -> String {
    "master".into()
}

fn default_search_locations() -> Vec<String> {
    vec!["file:./".into(), "file:./config/".into()]
}

fn enabled() -> bool {
    true
}

fn expand(data: &str) -> Result<String> {
    Ok(shellexpand::full(data)
        .map_err(ConfigError::ShellExpansion)?
        .into_owned())
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    expand(path.to_string_lossy().as_ref()).map(PathBuf::from)
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
