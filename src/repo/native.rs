// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Native file system backend.
//!
//! Serves configuration files straight out of plain directories, with no
//! version control involved. Search locations may carry a `file:` prefix,
//! the usual placeholders, and globs.

use crate::{
    environment::{split_list, Environment, Locations},
    locations::SearchPathResolver,
    repo::{
        load::{expand_locations, load_sources},
        check_request, EnvironmentRepository, Result,
    },
};

use std::path::{Path, PathBuf};
use tracing::instrument;

/// Everything needed to construct a [`NativeRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeRepositorySettings {
    /// Search location templates.
    pub search_locations: Vec<String>,

    /// Also search `<location>/<label>/` before each location.
    pub add_label_locations: bool,

    /// Label used when a request names none.
    pub default_label: String,

    /// Fixed version reported for every environment.
    pub version: Option<String>,
}

/// Environment repository over plain directories.
#[derive(Debug)]
pub struct NativeRepository {
    resolver: SearchPathResolver,
    default_label: String,
    version: Option<String>,
}

impl NativeRepository {
    /// Construct new native repository.
    pub fn new(settings: NativeRepositorySettings) -> Self {
        Self {
            resolver: SearchPathResolver::new(settings.search_locations)
                .with_label_locations(settings.add_label_locations),
            default_label: settings.default_label,
            version: settings.version,
        }
    }

    fn resolve(&self, application: &str, profile: &str, label: &str) -> Vec<PathBuf> {
        let paths = self.resolver.resolve(application, profile, Some(label));
        expand_locations(None, &paths)
    }
}

impl EnvironmentRepository for NativeRepository {
    #[instrument(skip(self), level = "debug")]
    fn find_one(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<Environment> {
        check_request(application, profile, label)?;
        let label = label.unwrap_or(&self.default_label);
        let profiles = split_list(profile);
        let locations = self.resolve(application, profile, label);
        let sources = load_sources(&locations, application, &profiles, source_name)?;

        let mut environment =
            Environment::new(application, profiles.iter().cloned()).with_label(Some(label));
        environment.version = self.version.clone();
        environment.add_all(sources);

        Ok(environment)
    }

    #[instrument(skip(self), level = "debug")]
    fn get_locations(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<Locations> {
        check_request(application, profile, label)?;
        let label = label.unwrap_or(&self.default_label);
        let locations = self
            .resolve(application, profile, label)
            .into_iter()
            .map(|path| path.display().to_string())
            .collect();

        Ok(Locations {
            application: application.to_owned(),
            profile: profile.to_owned(),
            label: Some(label.to_owned()),
            version: self.version.clone(),
            locations,
        })
    }
}

fn source_name(path: &Path) -> String {
    format!("file:{}", path.display())
}
