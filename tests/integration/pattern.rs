// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use anyhow::Result;
use oxiconf::{
    config::{GitRepoConfig, PatternRepoConfig},
    repo::{pattern::PatternRouter, EnvironmentRepository, RepoError},
    store::WorkingCopyStore,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::{ptr, sync::Arc, thread};
use tempfile::TempDir;

#[test]
fn requests_reach_repository_of_matching_pattern() -> Result<()> {
    let root = TempDir::new()?;
    let default = RepoFixture::new(root.path().join("default"))?;
    default.commit("main", &[("application.yml", "origin: default\n")])?;
    let team = RepoFixture::new(root.path().join("team"))?;
    team.commit("main", &[("application.yml", "origin: team\n")])?;

    let mut config = GitRepoConfig::new(default.url());
    config.repos = vec![PatternRepoConfig {
        name: "team".into(),
        pattern: vec!["app1".into()],
        uri: team.url(),
        ..Default::default()
    }];
    let store = WorkingCopyStore::new(root.path().join("store"));
    let router = PatternRouter::from_config(&config, &store)?;

    let app1 = router.find_one("app1", "dev", None)?;
    let app2 = router.find_one("app2", "dev", None)?;

    assert_eq!(app1.get("origin"), Some(&json!("team")));
    assert_eq!(app2.get("origin"), Some(&json!("default")));

    Ok(())
}

#[test]
fn templated_uri_clones_one_working_copy_per_application() -> Result<()> {
    let root = TempDir::new()?;
    let foo = RepoFixture::new(root.path().join("foo-config"))?;
    foo.commit("main", &[("foo.properties", "owner=foo\n")])?;
    let bar = RepoFixture::new(root.path().join("bar-config"))?;
    bar.commit("main", &[("bar.properties", "owner=bar\n")])?;

    let mut config =
        GitRepoConfig::new(format!("{}/{{application}}-config", root.path().display()));
    config.basedir = Some(root.path().join("copies"));
    let store = WorkingCopyStore::new(root.path().join("store"));
    let router = PatternRouter::from_config(&config, &store)?;

    let foo_env = router.find_one("foo", "", None)?;
    let bar_env = router.find_one("bar", "", None)?;

    assert_eq!(foo_env.get("owner"), Some(&json!("foo")));
    assert_eq!(bar_env.get("owner"), Some(&json!("bar")));

    let foo_copy = router.route("foo", "")?;
    let bar_copy = router.route("bar", "")?;
    assert_ne!(foo_copy.working_copy().basedir(), bar_copy.working_copy().basedir());
    assert!(foo_copy.working_copy().basedir().starts_with(root.path().join("copies")));
    assert!(foo_copy.working_copy().basedir().is_dir());

    Ok(())
}

#[test]
fn entries_sharing_uri_serve_concurrent_requests() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit(
        "main",
        &[
            ("application.yml", "branch: main\n"),
            ("team/team-a.yml", "team: a\n"),
        ],
    )?;
    remote.commit("staging", &[("application.yml", "branch: staging\n")])?;

    let mut config = GitRepoConfig::new(remote.url());
    config.repos = vec![PatternRepoConfig {
        name: "team".into(),
        pattern: vec!["team-*".into()],
        uri: remote.url(),
        search_paths: vec!["team".into()],
        ..Default::default()
    }];
    let store = WorkingCopyStore::new(root.path().join("store"));
    let router = Arc::new(PatternRouter::from_config(&config, &store)?);
    assert!(ptr::eq(
        router.route("team-a", "")?.working_copy(),
        router.route("orders", "")?.working_copy()
    ));

    let requests = [
        ("team-a", "main"),
        ("orders", "staging"),
        ("team-a", "staging"),
        ("orders", "main"),
    ];
    let handles = requests
        .into_iter()
        .map(|(application, label)| {
            let router = Arc::clone(&router);
            thread::spawn(move || -> Result<()> {
                for _ in 0..10 {
                    let environment = router.find_one(application, "", Some(label))?;
                    assert_eq!(environment.get("branch"), Some(&json!(label)));
                    if application == "team-a" && label == "main" {
                        assert_eq!(environment.get("team"), Some(&json!("a")));
                    }
                }

                Ok(())
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    Ok(())
}

#[test]
fn templated_uri_without_remote_is_not_remembered() -> Result<()> {
    let root = TempDir::new()?;
    let foo = RepoFixture::new(root.path().join("foo-config"))?;
    foo.commit("main", &[("foo.properties", "owner=foo\n")])?;

    let config = GitRepoConfig::new(format!("{}/{{application}}-config", root.path().display()));
    let store = WorkingCopyStore::new(root.path().join("store"));
    let router = PatternRouter::from_config(&config, &store)?;

    for _ in 0..3 {
        let result = router.find_one("ghost", "", None);
        assert!(matches!(
            result,
            Err(RepoError::NoSuchRepository { .. } | RepoError::Transport { .. })
        ));
        assert_eq!(router.default_slot().resolved_count(), 0);
    }

    let environment = router.find_one("foo", "", None)?;
    assert_eq!(environment.get("owner"), Some(&json!("foo")));
    assert_eq!(router.default_slot().resolved_count(), 1);

    Ok(())
}
