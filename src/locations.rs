// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Search path resolution.
//!
//! A __search path__ is a template describing a directory to scan for
//! configuration files. Templates may reference the request through three
//! placeholders:
//!
//! - `{application}`: expanded once per comma-separated application name.
//! - `{profile}`: expanded once per comma-separated profile.
//! - `{label}`: replaced by the requested label.
//!
//! Later applications and profiles take precedence over earlier ones, so their
//! expansions come first in the output. Any other brace token is left alone.

use crate::environment::split_list;

use indexmap::IndexSet;

const APPLICATION: &str = "{application}";
const PROFILE: &str = "{profile}";
const LABEL: &str = "{label}";

/// Expand search path templates for a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPathResolver {
    templates: Vec<String>,
    add_label_locations: bool,
}

impl SearchPathResolver {
    /// Construct new resolver over a listing of search path templates.
    pub fn new(templates: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            templates: templates.into_iter().map(Into::into).collect(),
            add_label_locations: false,
        }
    }

    /// Also search `<path>/<label>/` for templates without a label placeholder.
    pub fn with_label_locations(mut self, enabled: bool) -> Self {
        self.add_label_locations = enabled;
        self
    }

    /// Current listing of templates.
    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    /// Resolve ordered listing of search paths.
    ///
    /// Duplicates keep their first, i.e., highest precedence, position.
    /// Templates whose placeholder has nothing to expand into are skipped.
    pub fn resolve(&self, application: &str, profile: &str, label: Option<&str>) -> Vec<String> {
        let mut applications = split_list(application);
        applications.reverse();
        let mut profiles = split_list(profile);
        profiles.reverse();

        let mut output = IndexSet::new();
        for template in &self.templates {
            if (template.contains(APPLICATION) && applications.is_empty())
                || (template.contains(PROFILE) && profiles.is_empty())
                || (template.contains(LABEL) && label.is_none())
            {
                continue;
            }

            // INVARIANT: Profile is the outer loop so that a higher
            //   precedence profile wins over every application.
            for profile in or_blank(&profiles) {
                for application in or_blank(&applications) {
                    let mut path = template
                        .replace(APPLICATION, application)
                        .replace(PROFILE, profile);
                    if let Some(label) = label {
                        path = path.replace(LABEL, label);
                    }

                    if let Some(label) = label.filter(|_| self.add_label_locations) {
                        if !template.contains(LABEL) {
                            let base = path.trim_end_matches('/');
                            output.insert(format!("{base}/{label}/"));
                        }
                    }
                    output.insert(path);
                }
            }
        }

        output.into_iter().collect()
    }
}

/// Check if a request value could reach outside the directory it is joined onto.
///
/// Every comma-separated item is checked for a leading separator, or a `..`
/// segment.
pub fn escapes_root(value: &str) -> bool {
    value.contains('\0')
        || split_list(value).iter().any(|item| {
            item.starts_with(['/', '\\'])
                || item.split(['/', '\\']).any(|segment| segment.trim() == "..")
        })
}

fn or_blank(items: &[String]) -> Vec<&str> {
    if items.is_empty() {
        return vec![""];
    }

    items.iter().map(String::as_str).collect()
}
