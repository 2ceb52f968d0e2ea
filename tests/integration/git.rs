// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use anyhow::Result;
use indoc::indoc;
use oxiconf::repo::{
    git::{GitRepository, GitRepositorySettings},
    sync::SyncSettings,
    EnvironmentRepository, RepoError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn repository(remote: &RepoFixture, root: &TempDir, search_paths: &[&str]) -> GitRepository {
    let mut settings =
        GitRepositorySettings::new(SyncSettings::new(remote.url(), root.path().join("clone")));
    settings.search_paths = search_paths.iter().map(|path| path.to_string()).collect();
    GitRepository::new(settings)
}

fn source_names(environment: &oxiconf::environment::Environment) -> Vec<String> {
    environment
        .property_sources()
        .iter()
        .map(|source| source.name.clone())
        .collect()
}

#[test]
fn application_file_outranks_shared_file() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    let oid = remote.commit(
        "main",
        &[
            ("bar.properties", "foo=bar\nshared=app\n"),
            (
                "application.yml",
                indoc! {"
                    shared: common
                    info:
                      name: demo
                "},
            ),
        ],
    )?;
    let repository = repository(&remote, &root, &[]);

    let environment = repository.find_one("bar", "staging", None)?;

    assert_eq!(
        source_names(&environment),
        vec![
            format!("{}/bar.properties", remote.url()),
            format!("{}/application.yml", remote.url()),
        ]
    );
    assert_eq!(environment.get("foo"), Some(&json!("bar")));
    assert_eq!(environment.get("shared"), Some(&json!("app")));
    assert_eq!(environment.get("info.name"), Some(&json!("demo")));
    assert_eq!(environment.label.as_deref(), Some("main"));
    assert_eq!(environment.version, Some(oid.to_string()));
    assert_eq!(
        environment.profiles,
        vec!["staging".to_string(), "default".to_string()]
    );

    Ok(())
}

#[test]
fn search_paths_come_before_root() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit(
        "main",
        &[
            ("foo/application.properties", "level=app-dir\n"),
            ("foo/foo-dev.properties", "level=profile\n"),
            ("application.properties", "level=root\n"),
        ],
    )?;
    let repository = repository(&remote, &root, &["{application}"]);

    let environment = repository.find_one("foo", "dev", None)?;
    assert_eq!(
        source_names(&environment),
        vec![
            format!("{}/foo/foo-dev.properties", remote.url()),
            format!("{}/foo/application.properties", remote.url()),
            format!("{}/application.properties", remote.url()),
        ]
    );
    assert_eq!(environment.get("level"), Some(&json!("profile")));

    let locations = repository.get_locations("foo", "dev", None)?;
    assert_eq!(locations.locations.len(), 2);
    assert!(locations.locations[0].ends_with("foo"));
    assert_eq!(locations.version, environment.version);

    Ok(())
}

#[test]
fn missing_default_label_falls_back_to_master() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::with_head(root.path().join("remote"), "master")?;
    let oid = remote.commit("master", &[("application.yml", "foo: legacy\n")])?;
    let repository = repository(&remote, &root, &[]);

    let environment = repository.find_one("foo", "", None)?;
    assert_eq!(environment.label.as_deref(), Some("master"));
    assert_eq!(environment.version, Some(oid.to_string()));
    assert_eq!(environment.get("foo"), Some(&json!("legacy")));

    Ok(())
}

#[test]
fn explicit_label_never_falls_back() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::with_head(root.path().join("remote"), "master")?;
    remote.commit("master", &[("application.yml", "foo: legacy\n")])?;
    let repository = repository(&remote, &root, &[]);

    let result = repository.find_one("foo", "", Some("release"));
    assert!(matches!(result, Err(RepoError::NoSuchLabel { .. })));

    Ok(())
}

#[test]
fn escaped_slash_label_names_nested_branch() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("main", &[("application.yml", "foo: main\n")])?;
    remote.commit("feature/login", &[("application.yml", "foo: login\n")])?;
    let repository = repository(&remote, &root, &[]);

    let environment = repository.find_one("foo", "", Some("feature(_)login"))?;
    assert_eq!(environment.label.as_deref(), Some("feature/login"));
    assert_eq!(environment.get("foo"), Some(&json!("login")));

    Ok(())
}

#[test]
fn malformed_file_fails_request() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("main", &[("foo.json", "{ not json")])?;
    let repository = repository(&remote, &root, &[]);

    let result = repository.find_one("foo", "", None);
    assert!(matches!(result, Err(RepoError::Load(_))));

    Ok(())
}

#[test]
fn master_label_serves_application_file_before_shared_file() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::with_head(root.path().join("remote"), "master")?;
    let oid = remote.commit(
        "master",
        &[
            ("bar.properties", "foo=bar\n"),
            ("application.yml", "foo: shared\nlevel: info\n"),
        ],
    )?;
    let repository = repository(&remote, &root, &[]);

    let environment = repository.find_one("bar", "staging", Some("master"))?;

    assert_eq!(
        source_names(&environment),
        vec![
            format!("{}/bar.properties", remote.url()),
            format!("{}/application.yml", remote.url()),
        ]
    );
    assert_eq!(environment.get("foo"), Some(&json!("bar")));
    assert_eq!(environment.get("level"), Some(&json!("info")));
    assert_eq!(environment.label.as_deref(), Some("master"));
    assert_eq!(environment.version, Some(oid.to_string()));

    Ok(())
}

#[test]
fn request_cannot_escape_working_copy() -> Result<()> {
    let root = TempDir::new()?;
    let secret = root.path().join("secret");
    std::fs::create_dir_all(&secret)?;
    std::fs::write(secret.join("creds.properties"), "password=hunter2\n")?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("main", &[("application.yml", "foo: main\n")])?;
    let repository = repository(&remote, &root, &[]);

    let result = repository.find_one("../secret/creds", "", None);
    assert!(matches!(result, Err(RepoError::InvalidRequest(_))));

    let result = repository.find_one("foo", "../../secret/creds", None);
    assert!(matches!(result, Err(RepoError::InvalidRequest(_))));

    let result = repository.get_locations("foo", "", Some("..(_)..(_)secret"));
    assert!(matches!(result, Err(RepoError::InvalidRequest(_))));

    let environment = repository.find_one("foo", "", None)?;
    assert_eq!(environment.get("foo"), Some(&json!("main")));

    Ok(())
}
