// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Working copy store layout.
//!
//! Oxiconf keeps every working copy it manages under one directory called the
//! __working copy store__. A repository configured without an explicit
//! basedir, or one whose URI is templated, gets its directory picked here.
//!
//! # Working Copy Store Layout
//!
//! The store can be placed anywhere on the user's file system. However, the
//! default location is `$XDG_CACHE_HOME/oxiconf`. Each working copy directory
//! is named after the last path segment of its remote URI, followed by a short
//! digest of the full URI. So `https://example.org/team/app-config.git` lands
//! somewhere like `$XDG_CACHE_HOME/oxiconf/app-config-1f2e3d4c5b6a7988`.
//!
//! The digest keeps two remotes that share a final segment apart. Names are
//! stable across runs, so a restarted process picks its old working copies up
//! again instead of cloning from scratch.
//!
//! # Sharing
//!
//! Repositories asking the store for a working copy share one instance per
//! directory, no matter how many configuration entries point there. Clones of
//! a store share that bookkeeping. An instance lives as long as some
//! repository still holds it.

use crate::repo::{
    sync::{SyncSettings, WorkingCopy},
    RepoError, Result,
};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};
use tracing::debug;

const DIGEST_BYTES: usize = 8;

/// Root directory of all managed working copies.
#[derive(Debug, Clone)]
pub struct WorkingCopyStore {
    root: PathBuf,
    open: Arc<Mutex<HashMap<PathBuf, Weak<WorkingCopy>>>>,
}

impl WorkingCopyStore {
    /// Construct new working copy store at `root`.
    ///
    /// Does not touch the file system.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Root directory of store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for the working copy of `uri`.
    pub fn working_copy_dir(&self, uri: &str) -> PathBuf {
        working_copy_dir(&self.root, uri)
    }

    /// Working copy owning `settings.basedir`.
    ///
    /// Hands out the live instance for that directory if there is one, or
    /// constructs it from `settings` otherwise. A shared instance keeps the
    /// settings it was constructed with.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Construction`] if the directory already mirrors a
    ///   different remote.
    pub fn working_copy(&self, settings: SyncSettings) -> Result<Arc<WorkingCopy>> {
        let mut open = self.open.lock();
        if let Some(live) = open.get(&settings.basedir).and_then(Weak::upgrade) {
            if live.uri() != settings.uri {
                return Err(RepoError::Construction(format!(
                    "{:?} already holds working copy of {}, cannot also mirror {}",
                    settings.basedir.display(),
                    live.uri(),
                    settings.uri
                )));
            }

            if live.settings() != &settings {
                debug!(
                    "share working copy at {:?} with settings of its first user",
                    settings.basedir.display()
                );
            }
            return Ok(live);
        }

        open.retain(|_, weak| weak.strong_count() > 0);
        let basedir = settings.basedir.clone();
        let working_copy = Arc::new(WorkingCopy::new(settings));
        open.insert(basedir, Arc::downgrade(&working_copy));

        Ok(working_copy)
    }
}

/// Directory for the working copy of `uri` under `root`.
pub fn working_copy_dir(root: &Path, uri: &str) -> PathBuf {
    let digest = Sha256::digest(uri.as_bytes());
    let name = format!("{}-{}", stem(uri), hex::encode(&digest[..DIGEST_BYTES]));
    root.join(name)
}

fn stem(uri: &str) -> String {
    let segment = uri
        .trim_end_matches('/')
        .rsplit(['/', ':', '\\'])
        .next()
        .unwrap_or_default();
    let segment = segment.strip_suffix(".git").unwrap_or(segment);

    let sanitized = segment
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => ch,
            _ => '_',
        })
        .collect::<String>();

    match sanitized.trim_matches('.') {
        "" => "repo".into(),
        name => name.into(),
    }
}
