// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git-backed environment repository.
//!
//! Serves configuration files out of one [`WorkingCopy`]. Search paths are
//! resolved relative to the root of the checked-out tree, and the root itself
//! is always searched last.

use crate::{
    environment::{split_list, Environment, Locations},
    locations::SearchPathResolver,
    repo::{
        load::{expand_locations, load_sources},
        sync::{Checkout, SyncSettings, WorkingCopy},
        check_request, EnvironmentRepository, RepoError, Result,
    },
};

use std::{path::Path, sync::Arc};
use tracing::{info, instrument};

/// Label used when a request names none.
pub const DEFAULT_LABEL: &str = "main";

/// Label tried when the default label does not exist.
pub const FALLBACK_LABEL: &str = "master";

/// Encoding of `/` inside labels, for clients that cannot send slashes.
pub const SLASH_ESCAPE: &str = "(_)";

/// Everything needed to construct a [`GitRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepositorySettings {
    /// Working copy settings.
    pub sync: SyncSettings,

    /// Search path templates relative to the working copy root.
    pub search_paths: Vec<String>,

    /// Label used when a request names none.
    pub default_label: String,

    /// Retry with [`FALLBACK_LABEL`] when the default label is missing.
    pub try_master_branch: bool,

    /// Clone as soon as the repository is assembled.
    pub clone_on_start: bool,
}

impl GitRepositorySettings {
    /// Construct new settings with default label handling.
    pub fn new(sync: SyncSettings) -> Self {
        Self {
            sync,
            search_paths: Vec::new(),
            default_label: DEFAULT_LABEL.into(),
            try_master_branch: true,
            clone_on_start: false,
        }
    }
}

/// Environment repository over one git working copy.
#[derive(Debug)]
pub struct GitRepository {
    working_copy: Arc<WorkingCopy>,
    resolver: SearchPathResolver,
    default_label: String,
    try_master_branch: bool,
}

impl GitRepository {
    /// Construct new git repository with a working copy of its own.
    pub fn new(settings: GitRepositorySettings) -> Self {
        let working_copy = Arc::new(WorkingCopy::new(settings.sync.clone()));
        Self::with_working_copy(settings, working_copy)
    }

    /// Construct new git repository over a working copy other repositories may share.
    ///
    /// Sync settings are taken from `working_copy`, not from `settings`.
    pub fn with_working_copy(
        settings: GitRepositorySettings,
        working_copy: Arc<WorkingCopy>,
    ) -> Self {
        let GitRepositorySettings {
            mut search_paths,
            default_label,
            try_master_branch,
            ..
        } = settings;

        // INVARIANT: Root of working copy is always searched, last.
        search_paths.push(String::new());

        Self {
            working_copy,
            resolver: SearchPathResolver::new(search_paths),
            default_label,
            try_master_branch,
        }
    }

    /// Working copy backing this repository.
    pub fn working_copy(&self) -> &WorkingCopy {
        &self.working_copy
    }

    /// Label used when a request names none.
    pub fn default_label(&self) -> &str {
        &self.default_label
    }

    fn with_label<T>(
        &self,
        label: Option<&str>,
        read: impl Fn(&Checkout) -> Result<T>,
    ) -> Result<T> {
        let label = label
            .map(decode_label)
            .unwrap_or_else(|| self.default_label.clone());

        match self.working_copy.with_checkout(&label, &read) {
            Err(RepoError::NoSuchLabel { .. })
                if self.try_master_branch
                    && label == self.default_label
                    && label != FALLBACK_LABEL =>
            {
                info!("default label {label:?} not found, trying {FALLBACK_LABEL:?}");
                self.working_copy.with_checkout(FALLBACK_LABEL, &read)
            }
            other => other,
        }
    }

    fn source_name(&self, checkout: &Checkout, path: &Path) -> String {
        let relative = path.strip_prefix(&checkout.basedir).unwrap_or(path);
        format!(
            "{}/{}",
            self.working_copy.uri().trim_end_matches('/'),
            relative.display()
        )
    }
}

impl EnvironmentRepository for GitRepository {
    #[instrument(skip(self), fields(uri = %self.working_copy.uri()), level = "debug")]
    fn find_one(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<Environment> {
        check_request(application, profile, label.map(decode_label).as_deref())?;
        let profiles = split_list(profile);
        self.with_label(label, |checkout| {
            let paths = self
                .resolver
                .resolve(application, profile, Some(&checkout.label));
            let locations = expand_locations(Some(&checkout.basedir), &paths);
            let sources = load_sources(&locations, application, &profiles, |path| {
                self.source_name(checkout, path)
            })?;

            let mut environment = Environment::new(application, profiles.iter().cloned())
                .with_label(Some(checkout.label.as_str()));
            environment.version = Some(checkout.version.clone());
            environment.add_all(sources);

            Ok(environment)
        })
    }

    #[instrument(skip(self), fields(uri = %self.working_copy.uri()), level = "debug")]
    fn get_locations(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<Locations> {
        check_request(application, profile, label.map(decode_label).as_deref())?;
        self.with_label(label, |checkout| {
            let paths = self
                .resolver
                .resolve(application, profile, Some(&checkout.label));
            let locations = expand_locations(Some(&checkout.basedir), &paths)
                .into_iter()
                .map(|path| path.display().to_string())
                .collect();

            Ok(Locations {
                application: application.to_owned(),
                profile: profile.to_owned(),
                label: Some(checkout.label.clone()),
                version: Some(checkout.version.clone()),
                locations,
            })
        })
    }
}

/// Decode escaped slashes in a label.
pub fn decode_label(label: &str) -> String {
    label.replace(SLASH_ESCAPE, "/")
}
