// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pattern-matching router over git repositories.
//!
//! A [`PatternRouter`] holds one default repository, and a listing of named
//! routes. Each route carries glob patterns of the form `app[/profile]`
//! (`app,profile` works too). The first route with a pattern matching the
//! requested application, and any requested profile, serves the request.
//! Nothing matching falls back to the default repository.
//!
//! # URI Templates
//!
//! A repository URI may contain `{application}` or `{profile}`. Such a URI is
//! substituted per request, and every distinct substituted URI gets its own
//! [`GitRepository`] with its own working copy under the configured basedir.
//! A substituted URI whose first clone fails is not remembered.
//!
//! # Shared Directories
//!
//! Entries resolving to one directory, e.g., a named entry reusing the URI of
//! its parent with other search paths, share one [`WorkingCopy`].
//!
//! [`WorkingCopy`]: crate::repo::sync::WorkingCopy

use crate::{
    config::GitRepoConfig,
    environment::{split_list, Environment, Locations, DEFAULT_PROFILE},
    repo::{
        git::{GitRepository, GitRepositorySettings},
        EnvironmentRepository, RepoError, Result,
    },
    store::{working_copy_dir, WorkingCopyStore},
};

use glob::Pattern;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, instrument};

const APPLICATION: &str = "{application}";
const PROFILE: &str = "{profile}";

/// Glob pattern over application and profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    application: Pattern,
    profile: Pattern,
}

impl RoutePattern {
    /// Parse `app[/profile]` or `app,profile`. Missing profile matches any.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Construction`] if either glob is malformed.
    pub fn parse(pattern: &str) -> Result<Self> {
        let (application, profile) = pattern.split_once(['/', ',']).unwrap_or((pattern, "*"));
        let compile = |glob: &str| {
            Pattern::new(glob.trim()).map_err(|err| {
                RepoError::Construction(format!("malformed pattern {pattern:?}: {err}"))
            })
        };

        Ok(Self {
            application: compile(application)?,
            profile: compile(profile)?,
        })
    }

    /// Check if pattern matches application, and any of the profiles.
    pub fn matches(&self, application: &str, profiles: &[String]) -> bool {
        if !self.application.matches(application) {
            return false;
        }

        if profiles.is_empty() {
            return self.profile.matches(DEFAULT_PROFILE);
        }

        profiles.iter().any(|profile| self.profile.matches(profile))
    }
}

/// Repository whose URI may be templated.
///
/// Substituted repositories are created on first use, and kept for the rest
/// of the process unless their first clone fails.
#[derive(Debug)]
pub struct RepositorySlot {
    settings: GitRepositorySettings,
    resolved: Mutex<HashMap<String, Arc<GitRepository>>>,
}

impl RepositorySlot {
    /// Construct new slot.
    pub fn new(settings: GitRepositorySettings) -> Self {
        Self {
            settings,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Settings every repository of this slot is built from.
    pub fn settings(&self) -> &GitRepositorySettings {
        &self.settings
    }

    /// Check if URI needs substitution per request.
    pub fn is_templated(&self) -> bool {
        let uri = &self.settings.sync.uri;
        uri.contains(APPLICATION) || uri.contains(PROFILE)
    }

    /// Number of repositories created so far.
    pub fn resolved_count(&self) -> usize {
        self.resolved.lock().len()
    }

    /// Repository serving a request.
    ///
    /// A templated slot treats its basedir as the root under which every
    /// substituted URI gets a directory of its own. Working copies come from
    /// `store`, so repositories sharing a directory share its working copy.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Construction`] if the directory already mirrors
    ///   another remote.
    pub fn resolve(
        &self,
        application: &str,
        profile: &str,
        store: &WorkingCopyStore,
    ) -> Result<Arc<GitRepository>> {
        let uri = self
            .settings
            .sync
            .uri
            .replace(APPLICATION, application)
            .replace(PROFILE, profile);

        let mut resolved = self.resolved.lock();
        if let Some(repository) = resolved.get(&uri) {
            return Ok(repository.clone());
        }

        let mut settings = self.settings.clone();
        if self.is_templated() {
            settings.sync.basedir = working_copy_dir(&self.settings.sync.basedir, &uri);
            debug!("new working copy for {uri} at {:?}", settings.sync.basedir.display());
        }
        settings.sync.uri = uri.clone();

        let working_copy = store.working_copy(settings.sync.clone())?;
        let repository = Arc::new(GitRepository::with_working_copy(settings, working_copy));
        resolved.insert(uri, repository.clone());

        Ok(repository)
    }

    /// Forget a substituted repository whose remote could not be cloned.
    ///
    /// Plain slots keep their only repository.
    pub fn evict(&self, repository: &Arc<GitRepository>) {
        if !self.is_templated() {
            return;
        }

        let uri = repository.working_copy().uri();
        let mut resolved = self.resolved.lock();
        if resolved
            .get(uri)
            .is_some_and(|cached| Arc::ptr_eq(cached, repository))
        {
            debug!("forget {uri} after failed clone");
            resolved.remove(uri);
        }
    }

    /// Clone right away if configured to, and the URI is not templated.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError`] if the clone fails.
    pub fn initialize(&self, store: &WorkingCopyStore) -> Result<()> {
        if !self.settings.clone_on_start {
            return Ok(());
        }

        if self.is_templated() {
            debug!(
                "cannot clone templated {} on start, deferring to first request",
                self.settings.sync.uri
            );
            return Ok(());
        }

        self.resolve("", "", store)?.working_copy().initialize()
    }
}

/// Named pattern-scoped route.
#[derive(Debug)]
pub struct Route {
    name: String,
    patterns: Vec<RoutePattern>,
    slot: RepositorySlot,
}

impl Route {
    /// Construct new route.
    pub fn new(
        name: impl Into<String>,
        patterns: Vec<RoutePattern>,
        settings: GitRepositorySettings,
    ) -> Self {
        Self {
            name: name.into(),
            patterns,
            slot: RepositorySlot::new(settings),
        }
    }

    /// Name of route.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if any pattern of route matches request.
    pub fn matches(&self, application: &str, profiles: &[String]) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches(application, profiles))
    }
}

/// Select git repository per request by application and profile.
#[derive(Debug)]
pub struct PatternRouter {
    default: RepositorySlot,
    routes: Vec<Route>,
    store: WorkingCopyStore,
}

impl PatternRouter {
    /// Construct new router with no routes.
    ///
    /// Every working copy the router needs is taken from `store`.
    pub fn new(default: GitRepositorySettings, store: WorkingCopyStore) -> Self {
        Self {
            default: RepositorySlot::new(default),
            routes: Vec::new(),
            store,
        }
    }

    /// Assemble router from git backend configuration.
    ///
    /// Named entries keep their declaration order. An entry without patterns
    /// matches on its own name.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Construction`] if any pattern is malformed, or
    ///   two entries mirror different remotes in one directory.
    pub fn from_config(config: &GitRepoConfig, store: &WorkingCopyStore) -> Result<Self> {
        let mut router = Self::new(config.settings(store), store.clone());
        for repo in &config.repos {
            let patterns = repo
                .patterns()
                .iter()
                .map(|pattern| RoutePattern::parse(pattern))
                .collect::<Result<Vec<_>>>()?;
            let settings = repo.settings(config, store);
            router = router.with_route(Route::new(&repo.name, patterns, settings));
        }

        // INVARIANT: Conflicting working copy directories fail construction.
        for slot in router.slots() {
            if !slot.is_templated() {
                slot.resolve("", "", &router.store)?;
            }
        }

        Ok(router)
    }

    /// Add route, evaluated after every route added before it.
    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Listing of routes in evaluation order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Slot serving requests no route matches.
    pub fn default_slot(&self) -> &RepositorySlot {
        &self.default
    }

    /// Repository serving a request.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Construction`] if the chosen repository cannot
    ///   get a working copy.
    pub fn route(&self, application: &str, profile: &str) -> Result<Arc<GitRepository>> {
        self.select(application, profile)
            .resolve(application, profile, &self.store)
    }

    /// Clone every repository configured to clone on start.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError`] if any clone fails.
    pub fn initialize(&self) -> Result<()> {
        for slot in self.slots() {
            slot.initialize(&self.store)?;
        }

        Ok(())
    }

    fn slots(&self) -> impl Iterator<Item = &RepositorySlot> {
        std::iter::once(&self.default).chain(self.routes.iter().map(|route| &route.slot))
    }

    fn select(&self, application: &str, profile: &str) -> &RepositorySlot {
        let profiles = split_list(profile);
        match self
            .routes
            .iter()
            .find(|route| route.matches(application, &profiles))
        {
            Some(route) => {
                debug!("route {application}/{profile} to {:?}", route.name);
                &route.slot
            }
            None => &self.default,
        }
    }

    fn serve<T>(
        &self,
        application: &str,
        profile: &str,
        request: impl FnOnce(&GitRepository) -> Result<T>,
    ) -> Result<T> {
        let slot = self.select(application, profile);
        let repository = slot.resolve(application, profile, &self.store)?;
        let result = request(&*repository);
        if let Err(RepoError::NoSuchRepository { .. } | RepoError::Transport { .. }) = &result {
            slot.evict(&repository);
        }

        result
    }
}

impl EnvironmentRepository for PatternRouter {
    #[instrument(skip(self), level = "debug")]
    fn find_one(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<Environment> {
        self.serve(application, profile, |repository| {
            repository.find_one(application, profile, label)
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn get_locations(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<Locations> {
        self.serve(application, profile, |repository| {
            repository.get_locations(application, profile, label)
        })
    }
}
