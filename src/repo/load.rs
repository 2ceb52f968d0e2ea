// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration file discovery and parsing.
//!
//! Given a listing of search locations, find the configuration files that
//! apply to a request, and flatten each one into a [`PropertySource`].
//!
//! # File Naming
//!
//! Each location is searched for files named after every requested
//! application, and after the shared `application` name. Profile-specific
//! files use a `-<profile>` suffix, e.g., `foo-dev.yml`. Supported extensions
//! are `properties`, `yml`, `yaml`, `toml`, and `json`.
//!
//! # Precedence
//!
//! Profile-specific files always beat plain files. Later profiles beat earlier
//! ones. Within one tier, locations keep resolver order, and application names
//! beat the shared `application` name. When no profile is requested, the
//! `default` profile is searched instead.
//!
//! # Flattening
//!
//! Nested documents are flattened into dotted keys. Array elements are
//! addressed with a bracket index, e.g., `servers[0].host`. Key order follows
//! document order.
//!
//! YAML documents that declare `spring.config.activate.on-profile` or
//! `spring.profiles` only apply when one of the listed profiles is requested.

use crate::environment::{split_list, PropertySource, DEFAULT_PROFILE};

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use serde_json::{Number, Value};
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Supported file extensions in lookup order.
pub const EXTENSIONS: [&str; 5] = ["properties", "yml", "yaml", "toml", "json"];

/// Config name shared by every application.
pub const SHARED_NAME: &str = "application";

const ACTIVATION_KEYS: [&str; 2] = ["spring.config.activate.on-profile", "spring.profiles"];

/// Flattened key-value pairs of one file.
pub type Properties = IndexMap<String, Value>;

/// Discovered configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Absolute path to file.
    pub path: PathBuf,

    /// Profile the file is specific to, if any.
    pub profile: Option<String>,
}

/// Find configuration files in precedence order, highest first.
pub fn discover(
    locations: &[PathBuf],
    application: &str,
    profiles: &[String],
) -> Vec<ConfigFile> {
    let mut names = split_list(application);
    names.reverse();
    names.push(SHARED_NAME.into());
    let names = names.into_iter().collect::<IndexSet<_>>();

    let mut tiers = active_profiles(profiles)
        .into_iter()
        .rev()
        .map(Some)
        .collect::<Vec<_>>();
    tiers.push(None);

    let mut files = Vec::new();
    let mut seen = IndexSet::new();
    for tier in tiers {
        for location in locations {
            for name in &names {
                for ext in EXTENSIONS {
                    let filename = match &tier {
                        Some(profile) => format!("{name}-{profile}.{ext}"),
                        None => format!("{name}.{ext}"),
                    };
                    let path = location.join(filename);
                    if path.is_file() && seen.insert(path.clone()) {
                        files.push(ConfigFile {
                            path,
                            profile: tier.clone(),
                        });
                    }
                }
            }
        }
    }

    files
}

/// Turn resolved search paths into directories.
///
/// With a `root`, paths are taken relative to it, even when they start with a
/// slash. A `file:` prefix is dropped. Paths containing `*` are glob-expanded
/// into the directories they match, in sorted order.
pub fn expand_locations(root: Option<&Path>, paths: &[String]) -> Vec<PathBuf> {
    let mut locations = IndexSet::new();
    for path in paths {
        let path = path.strip_prefix("file:").unwrap_or(path);
        let location = match root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        };

        if !path.contains('*') {
            locations.insert(location);
            continue;
        }

        match glob::glob(&location.to_string_lossy()) {
            Ok(matches) => {
                let mut dirs = matches
                    .filter_map(std::result::Result::ok)
                    .filter(|dir| dir.is_dir() && !dir.ends_with(".git"))
                    .collect::<Vec<_>>();
                dirs.sort();
                locations.extend(dirs);
            }
            Err(err) => warn!("skip malformed search path {path:?}: {err}"),
        }
    }

    locations.into_iter().collect()
}

/// Discover and parse all configuration files for a request.
///
/// Files that flatten to nothing are skipped. Each source is named through
/// `naming`, which receives the absolute file path.
///
/// # Errors
///
/// - Return [`LoadError`] if any discovered file cannot be read or parsed.
pub fn load_sources(
    locations: &[PathBuf],
    application: &str,
    profiles: &[String],
    naming: impl Fn(&Path) -> String,
) -> Result<Vec<PropertySource>> {
    let active = active_profiles(profiles);
    let mut sources = Vec::new();
    for file in discover(locations, application, profiles) {
        let properties = read_properties(&file.path, &active)?;
        if properties.is_empty() {
            debug!("skip empty configuration file {:?}", file.path.display());
            continue;
        }

        sources.push(PropertySource::new(naming(&file.path), properties));
    }

    Ok(sources)
}

/// Read and flatten one configuration file.
///
/// # Errors
///
/// - Return [`LoadError::Read`] if the file cannot be read.
/// - Return parse specific variant of [`LoadError`] if content is malformed.
pub fn read_properties(path: &Path, profiles: &[String]) -> Result<Properties> {
    let content = read_to_string(path).map_err(|err| LoadError::Read {
        source: err,
        path: path.to_path_buf(),
    })?;

    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    match ext.as_str() {
        "yml" | "yaml" => parse_yaml(&content, profiles).map_err(|err| LoadError::Yaml {
            source: err,
            path: path.to_path_buf(),
        }),
        "toml" => parse_toml(&content).map_err(|err| LoadError::Toml {
            source: err,
            path: path.to_path_buf(),
        }),
        "json" => parse_json(&content).map_err(|err| LoadError::Json {
            source: err,
            path: path.to_path_buf(),
        }),
        _ => Ok(parse_properties(&content)),
    }
}

fn active_profiles(profiles: &[String]) -> Vec<String> {
    if profiles.is_empty() {
        return vec![DEFAULT_PROFILE.into()];
    }

    profiles.to_vec()
}

/// Parse Java-style properties content.
///
/// Supports `=` and `:` separators, `#` and `!` comments, and trailing
/// backslash line continuation.
pub fn parse_properties(content: &str) -> Properties {
    let mut properties = Properties::new();
    let mut pending = String::new();

    for line in content.lines() {
        let line = line.trim_start();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!'))
        {
            continue;
        }

        if let Some(partial) = line.strip_suffix('\\') {
            pending.push_str(partial);
            continue;
        }
        pending.push_str(line);

        insert_property(&mut properties, &std::mem::take(&mut pending));
    }

    if !pending.is_empty() {
        insert_property(&mut properties, &pending);
    }

    properties
}

fn insert_property(properties: &mut Properties, entry: &str) {
    let (key, value) = match entry.find(['=', ':']) {
        Some(idx) => (&entry[..idx], &entry[idx + 1..]),
        None => (entry, ""),
    };
    properties.insert(key.trim().to_owned(), Value::String(value.trim().to_owned()));
}

/// Parse possibly multi-document YAML content.
pub fn parse_yaml(
    content: &str,
    profiles: &[String],
) -> std::result::Result<Properties, serde_yaml::Error> {
    let mut properties = Properties::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if !value.is_mapping() {
            continue;
        }

        let mut flat = Properties::new();
        flatten_yaml(&mut flat, String::new(), value);

        if let Some(wanted) = activation_profiles(&flat) {
            if !wanted.iter().any(|profile| profiles.contains(profile)) {
                debug!("skip yaml document for profiles {wanted:?}");
                continue;
            }
        }

        properties.extend(flat);
    }

    Ok(properties)
}

/// Profiles a YAML document activates on, written either as a comma-separated scalar or as a
/// list, which flattens to indexed keys.
fn activation_profiles(flat: &Properties) -> Option<Vec<String>> {
    ACTIVATION_KEYS.iter().find_map(|key| {
        if let Some(value) = flat.get(*key) {
            return Some(split_list(&value_to_key(value)));
        }

        let indexed = format!("{key}[");
        let wanted = flat
            .iter()
            .filter(|(name, _)| {
                name.strip_prefix(&indexed)
                    .and_then(|rest| rest.strip_suffix(']'))
                    .is_some_and(|idx| idx.parse::<usize>().is_ok())
            })
            .flat_map(|(_, value)| split_list(&value_to_key(value)))
            .collect::<Vec<_>>();
        (!wanted.is_empty()).then_some(wanted)
    })
}

/// Parse TOML content.
pub fn parse_toml(content: &str) -> std::result::Result<Properties, toml::de::Error> {
    let table = toml::from_str::<toml::Table>(content)?;
    let mut properties = Properties::new();
    flatten_toml(&mut properties, String::new(), toml::Value::Table(table));

    Ok(properties)
}

/// Parse JSON content.
pub fn parse_json(content: &str) -> std::result::Result<Properties, serde_json::Error> {
    let value = serde_json::from_str::<Value>(content)?;
    let mut properties = Properties::new();
    flatten_json(&mut properties, String::new(), value);

    Ok(properties)
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

fn flatten_yaml(out: &mut Properties, prefix: String, value: serde_yaml::Value) {
    use serde_yaml::Value as Yaml;

    match value {
        Yaml::Mapping(mapping) => {
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(key) => key,
                    Yaml::Bool(key) => key.to_string(),
                    Yaml::Number(key) => key.to_string(),
                    other => format!("{other:?}"),
                };
                flatten_yaml(out, join_key(&prefix, &key), value);
            }
        }
        Yaml::Sequence(items) => {
            for (idx, item) in items.into_iter().enumerate() {
                flatten_yaml(out, format!("{prefix}[{idx}]"), item);
            }
        }
        Yaml::Tagged(tagged) => flatten_yaml(out, prefix, tagged.value),
        Yaml::Null => {
            out.insert(prefix, Value::Null);
        }
        Yaml::Bool(flag) => {
            out.insert(prefix, Value::Bool(flag));
        }
        Yaml::Number(number) => {
            let number = if let Some(int) = number.as_i64() {
                Value::Number(int.into())
            } else if let Some(uint) = number.as_u64() {
                Value::Number(uint.into())
            } else {
                number
                    .as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            };
            out.insert(prefix, number);
        }
        Yaml::String(string) => {
            out.insert(prefix, Value::String(string));
        }
    }
}

fn flatten_toml(out: &mut Properties, prefix: String, value: toml::Value) {
    match value {
        toml::Value::Table(table) => {
            for (key, value) in table {
                flatten_toml(out, join_key(&prefix, &key), value);
            }
        }
        toml::Value::Array(items) => {
            for (idx, item) in items.into_iter().enumerate() {
                flatten_toml(out, format!("{prefix}[{idx}]"), item);
            }
        }
        toml::Value::String(string) => {
            out.insert(prefix, Value::String(string));
        }
        toml::Value::Integer(int) => {
            out.insert(prefix, Value::Number(int.into()));
        }
        toml::Value::Float(float) => {
            let float = Number::from_f64(float).map(Value::Number).unwrap_or(Value::Null);
            out.insert(prefix, float);
        }
        toml::Value::Boolean(flag) => {
            out.insert(prefix, Value::Bool(flag));
        }
        toml::Value::Datetime(datetime) => {
            out.insert(prefix, Value::String(datetime.to_string()));
        }
    }
}

fn flatten_json(out: &mut Properties, prefix: String, value: Value) {
    match value {
        Value::Object(object) => {
            for (key, value) in object {
                flatten_json(out, join_key(&prefix, &key), value);
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.into_iter().enumerate() {
                flatten_json(out, format!("{prefix}[{idx}]"), item);
            }
        }
        scalar => {
            out.insert(prefix, scalar);
        }
    }
}

fn value_to_key(value: &Value) -> String {
    match value {
        Value::String(string) => string.clone(),
        other => other.to_string(),
    }
}

/// Configuration file loading error types.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Configuration file cannot be read from.
    #[error("failed to read configuration file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// YAML configuration file is malformed.
    #[error("failed to parse yaml configuration file at {:?}", path.display())]
    Yaml {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// TOML configuration file is malformed.
    #[error("failed to parse toml configuration file at {:?}", path.display())]
    Toml {
        #[source]
        source: toml::de::Error,
        path: PathBuf,
    },

    /// JSON configuration file is malformed.
    #[error("failed to parse json configuration file at {:?}", path.display())]
    Json {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LoadError> = std::result::Result<T, E>;
