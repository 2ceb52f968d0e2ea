// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Resolved configuration model.
//!
//! Every repository answers a request with an [`Environment`]: an ordered
//! stack of [`PropertySource`]s plus the revision information that produced
//! them. The order of the stack _is_ the override order. Index zero wins
//! whenever two sources define the same key.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Profile that every environment carries when the caller does not name it.
pub const DEFAULT_PROFILE: &str = "default";

/// One resolved configuration result.
///
/// # Invariant
///
/// - `profiles` is never empty, and always ends up containing
///   [`DEFAULT_PROFILE`].
/// - Property sources are kept in precedence order, highest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Comma-joined application names this environment was resolved for.
    pub name: String,

    /// Requested profiles in request order.
    pub profiles: Vec<String>,

    /// Revision name that produced this result.
    pub label: Option<String>,

    /// Concrete revision identifier, e.g., a commit hash.
    pub version: Option<String>,

    /// Free-form backend status.
    pub state: Option<String>,

    property_sources: Vec<PropertySource>,
}

impl Environment {
    /// Construct new empty environment.
    ///
    /// The default profile is appended to `profiles` if the caller did not
    /// list it.
    pub fn new(
        name: impl Into<String>,
        profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut profiles = profiles.into_iter().map(Into::into).collect::<Vec<_>>();
        if !profiles.iter().any(|profile| profile == DEFAULT_PROFILE) {
            profiles.push(DEFAULT_PROFILE.into());
        }

        Self {
            name: name.into(),
            profiles,
            label: None,
            version: None,
            state: None,
            property_sources: Vec::new(),
        }
    }

    /// Set label of environment.
    pub fn with_label(mut self, label: Option<impl Into<String>>) -> Self {
        self.label = label.map(Into::into);
        self
    }

    /// Append property sources below everything already present.
    pub fn add_all(&mut self, sources: impl IntoIterator<Item = PropertySource>) {
        self.property_sources.extend(sources);
    }

    /// Insert property source above everything already present.
    pub fn add_first(&mut self, source: PropertySource) {
        self.property_sources.insert(0, source);
    }

    /// Property sources in precedence order.
    pub fn property_sources(&self) -> &[PropertySource] {
        &self.property_sources
    }

    /// Take ownership of property sources in precedence order.
    pub fn into_property_sources(self) -> Vec<PropertySource> {
        self.property_sources
    }

    /// Look up effective value of a key, honoring precedence.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.property_sources
            .iter()
            .find_map(|source| source.source.get(key))
    }
}

/// Named mapping of flattened keys to values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySource {
    /// Identifier encoding the origin of the source.
    pub name: String,

    /// Flattened keys in document order.
    pub source: IndexMap<String, Value>,
}

impl PropertySource {
    /// Construct new property source.
    pub fn new(name: impl Into<String>, source: IndexMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// Resolved search locations of one repository for one request.
///
/// `locations` follows search path declaration order. `version` is only set
/// when the backend can name a stable identifier for the content it read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locations {
    pub application: String,
    pub profile: String,
    pub label: Option<String>,
    pub version: Option<String>,
    pub locations: Vec<String>,
}

/// Split comma-separated list, dropping blank entries.
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}
