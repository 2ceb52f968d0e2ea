// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Environment repositories.
//!
//! An __environment repository__ answers `(application, profile, label)`
//! requests with an [`Environment`]. Every backend, version-controlled or not,
//! exposes the same two operations through [`EnvironmentRepository`], so that
//! routing and composition never need to know what sits underneath.
//!
//! # Request Flow
//!
//! 1. [`CompositeRepository`] fans a request out to its sub-repositories in
//!    ascending order.
//! 2. A git backend is wrapped by a [`PatternRouter`] that picks which
//!    [`GitRepository`] serves the request.
//! 3. The chosen [`GitRepository`] asks its [`WorkingCopy`] to bring the
//!    local clone up to date, and check out the requested label.
//! 4. Search paths are resolved inside the working copy, and the files found
//!    there are loaded into property sources.
//!
//! [`CompositeRepository`]: crate::repo::composite::CompositeRepository
//! [`PatternRouter`]: crate::repo::pattern::PatternRouter
//! [`GitRepository`]: crate::repo::git::GitRepository
//! [`WorkingCopy`]: crate::repo::sync::WorkingCopy

pub mod composite;
pub mod git;
pub mod load;
pub mod native;
pub mod pattern;
pub mod sync;

use crate::{
    environment::{Environment, Locations},
    locations::escapes_root,
};

use std::path::PathBuf;
use tracing::warn;

/// Capability set shared by all backends.
pub trait EnvironmentRepository: Send + Sync {
    /// Resolve environment for a request.
    ///
    /// A `label` of `None` selects the backend's default label.
    fn find_one(&self, application: &str, profile: &str, label: Option<&str>)
        -> Result<Environment>;

    /// Resolve on-disk locations for a request without loading any files.
    fn get_locations(
        &self,
        application: &str,
        profile: &str,
        label: Option<&str>,
    ) -> Result<Locations>;
}

/// All possible failures of environment repositories.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Requested label names no branch, tag, or revision.
    #[error("no such label {label:?} in {uri}")]
    NoSuchLabel { label: String, uri: String },

    /// Remote repository does not exist.
    #[error("no such repository at {uri}")]
    NoSuchRepository {
        uri: String,
        #[source]
        source: git2::Error,
    },

    /// Initial clone failed on network, protocol, or authentication.
    #[error("failed to clone {uri} into {:?}", basedir.display())]
    Transport {
        uri: String,
        basedir: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// Working copy is unusable, and could not be wiped.
    #[error("working copy at {:?} is corrupted", basedir.display())]
    Corrupted {
        basedir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Checkout or merge failed for a reason other than diverged history.
    #[error("failed to check out {label:?} in {:?}", basedir.display())]
    Checkout {
        label: String,
        basedir: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// Request value would reach outside the searched directories.
    #[error("invalid request value {0:?}")]
    InvalidRequest(String),

    /// Configuration file could not be read or parsed.
    #[error(transparent)]
    Load(#[from] crate::repo::load::LoadError),

    /// Repository could not be assembled from configuration.
    #[error("failed to construct repository: {0}")]
    Construction(String),

    /// Search location could not be listed.
    #[error("failed to access {:?}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

impl RepoError {
    /// Check if failure should be reported as "not found" to a client.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchLabel { .. } | Self::NoSuchRepository { .. } | Self::InvalidRequest(_)
        )
    }
}

/// Reject request values that could reach outside the searched directories.
///
/// # Errors
///
/// - Return [`RepoError::InvalidRequest`] naming the first offending value.
pub fn check_request(application: &str, profile: &str, label: Option<&str>) -> Result<()> {
    for value in [Some(application), Some(profile), label].into_iter().flatten() {
        if escapes_root(value) {
            warn!("reject request value {value:?}");
            return Err(RepoError::InvalidRequest(value.to_owned()));
        }
    }

    Ok(())
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;
