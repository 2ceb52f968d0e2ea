// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ordered composite of environment repositories.
//!
//! Every request goes to every sub-repository, lowest order first, and the
//! property sources of each are appended in that order. So the first source of
//! the lowest order repository takes precedence over everything else.
//!
//! A failing sub-repository fails the whole request. Version and state are
//! only reported when exactly one sub-repository reports one.

use crate::{
    config::{RepositoryConfig, ServerConfig},
    environment::{split_list, Environment, Locations},
    repo::{
        native::NativeRepository, pattern::PatternRouter, EnvironmentRepository, RepoError,
        Result,
    },
};

use tracing::{debug, instrument};

/// Environment repository fanning out to ordered sub-repositories.
#[derive(Default)]
pub struct CompositeRepository {
    repositories: Vec<(i32, Box<dyn EnvironmentRepository>)>,
}

impl CompositeRepository {
    /// Construct new empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble composite from server configuration.
    ///
    /// Git backends configured to clone on start are cloned here.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Construction`] if any backend cannot be assembled.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let store = config
            .working_copy_store()
            .map_err(|err| RepoError::Construction(err.to_string()))?;

        let mut composite = Self::new();
        for repository in &config.repositories {
            match repository {
                RepositoryConfig::Git(git) => {
                    let router = PatternRouter::from_config(git, &store)?;
                    router.initialize().map_err(|err| {
                        RepoError::Construction(format!("cannot clone {} on start: {err}", git.uri))
                    })?;
                    composite.push(git.order, Box::new(router));
                }
                RepositoryConfig::Native(native) => {
                    composite.push(native.order, Box::new(NativeRepository::new(native.settings())));
                }
            }
        }

        Ok(composite)
    }

    /// Add sub-repository after every one of lower or equal order.
    pub fn push(&mut self, order: i32, repository: Box<dyn EnvironmentRepository>) {
        let at = self
            .repositories
            .partition_point(|(existing, _)| *existing <= order);
        self.repositories.insert(at, (order, repository));
    }

    /// Builder flavor of [`CompositeRepository::push`].
    pub fn with_repository(
        mut self,
        order: i32,
        repository: impl EnvironmentRepository + 'static,
    ) -> Self {
        self.push(order, Box::new(repository));
        self
    }

    /// Number of sub-repositories.
    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    /// Check if composite has no sub-repositories.
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

impl std::fmt::Debug for CompositeRepository {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("CompositeRepository")
            .field("orders", &self.repositories.iter().map(|(order, _)| *order).collect::<Vec<_>>())
            .finish()
    }
}

impl EnvironmentRepository for CompositeRepository {
    #[instrument(skip(self), level = "debug")]
    fn find_one(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<Environment> {
        let mut environment = Environment::new(application, split_list(profile)).with_label(label);
        let mut versions = Vec::new();
        let mut states = Vec::new();

        for (order, repository) in &self.repositories {
            let found = repository.find_one(application, profile, label)?;
            debug!(
                "order {order} contributed {} property sources",
                found.property_sources().len()
            );
            versions.extend(found.version.clone());
            states.extend(found.state.clone());
            environment.add_all(found.into_property_sources());
        }

        environment.version = only(versions);
        environment.state = only(states);

        Ok(environment)
    }

    #[instrument(skip(self), level = "debug")]
    fn get_locations(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<Locations> {
        let mut locations = Vec::new();
        let mut versions = Vec::new();

        for (_, repository) in &self.repositories {
            let found = repository.get_locations(application, profile, label)?;
            versions.extend(found.version);
            locations.extend(found.locations);
        }

        Ok(Locations {
            application: application.to_owned(),
            profile: profile.to_owned(),
            label: label.map(str::to_owned),
            version: only(versions),
            locations,
        })
    }
}

fn only(mut values: Vec<String>) -> Option<String> {
    if values.len() == 1 {
        values.pop()
    } else {
        None
    }
}
