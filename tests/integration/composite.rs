// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use anyhow::Result;
use oxiconf::{
    config::ServerConfig,
    repo::{composite::CompositeRepository, EnvironmentRepository, RepoError},
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs::{create_dir_all, write};
use tempfile::TempDir;

#[test]
fn git_and_native_backends_compose_by_order() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    let oid = remote.commit("main", &[("foo.properties", "port=8080\nsource=git\n")])?;

    let local = root.path().join("local");
    create_dir_all(&local)?;
    write(local.join("foo.properties"), "source=native\ntimeout=30\n")?;

    let config: ServerConfig = format!(
        r#"
            basedir = "{store}"

            [[repository]]
            kind = "native"
            order = 2
            search_locations = ["file:{local}/"]

            [[repository]]
            kind = "git"
            order = 1
            uri = "{uri}"
            clone_on_start = true
        "#,
        store = root.path().join("store").display(),
        local = local.display(),
        uri = remote.url(),
    )
    .parse()?;

    let composite = CompositeRepository::from_config(&config)?;
    assert_eq!(composite.len(), 2);

    let environment = composite.find_one("foo", "dev", None)?;
    assert_eq!(environment.property_sources().len(), 2);
    assert_eq!(environment.get("source"), Some(&json!("git")));
    assert_eq!(environment.get("timeout"), Some(&json!("30")));
    assert_eq!(environment.version, Some(oid.to_string()));
    assert_eq!(environment.label, None);

    Ok(())
}

#[test]
fn clone_on_start_failure_aborts_construction() -> Result<()> {
    let root = TempDir::new()?;
    let config: ServerConfig = format!(
        r#"
            basedir = "{store}"

            [[repository]]
            kind = "git"
            uri = "{uri}"
            clone_on_start = true
        "#,
        store = root.path().join("store").display(),
        uri = root.path().join("missing").display(),
    )
    .parse()?;

    let result = CompositeRepository::from_config(&config);
    assert!(matches!(result, Err(RepoError::Construction(_))));

    Ok(())
}
