// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use anyhow::Result;
use git2::{BranchType, Repository};
use oxiconf::repo::{
    sync::{SyncSettings, WorkingCopy},
    RepoError,
};
use pretty_assertions::assert_eq;
use std::{
    fs::{read_to_string, remove_dir_all, write},
    sync::Arc,
    thread,
    time::Duration,
};
use tempfile::TempDir;

fn working_copy(
    remote: &RepoFixture,
    root: &TempDir,
    configure: impl FnOnce(&mut SyncSettings),
) -> WorkingCopy {
    let mut settings = SyncSettings::new(remote.url(), root.path().join("clone"));
    configure(&mut settings);
    WorkingCopy::new(settings)
}

#[test]
fn clone_on_first_request_and_report_stable_version() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    let oid = remote.commit("main", &[("application.yml", "foo: bar\n")])?;
    let copy = working_copy(&remote, &root, |_| {});

    assert!(!copy.basedir().exists());
    let first = copy.prepare("main")?;
    let second = copy.prepare("main")?;

    assert_eq!(first.version, oid.to_string());
    assert_eq!(second.version, first.version);
    assert_eq!(read_to_string(first.basedir.join("application.yml"))?, "foo: bar\n");

    Ok(())
}

#[test]
fn refresh_rate_throttles_fetches() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("main", &[("application.yml", "foo: bar\n")])?;

    let throttled = working_copy(&remote, &root, |settings| {
        settings.refresh_rate = Duration::from_secs(60);
    });
    throttled.prepare("main")?;
    throttled.prepare("main")?;
    assert_eq!(throttled.refresh_count(), 1);

    let eager = WorkingCopy::new(SyncSettings::new(remote.url(), root.path().join("eager")));
    eager.prepare("main")?;
    eager.prepare("main")?;
    assert_eq!(eager.refresh_count(), 2);

    Ok(())
}

#[test]
fn dirty_working_copy_refreshes_early() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("main", &[("application.yml", "foo: bar\n")])?;
    let copy = working_copy(&remote, &root, |settings| {
        settings.refresh_rate = Duration::from_secs(60);
    });

    copy.prepare("main")?;
    write(copy.basedir().join("stray.txt"), "local edit")?;
    let checkout = copy.prepare("main")?;
    assert_eq!(copy.refresh_count(), 2);
    assert!(!checkout.basedir.join("stray.txt").exists());

    copy.prepare("main")?;
    assert_eq!(copy.refresh_count(), 2);

    Ok(())
}

#[test]
fn local_edits_never_outlive_next_request() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("main", &[("application.yml", "foo: remote\n")])?;
    remote.commit("other", &[("application.yml", "foo: other\n")])?;
    let copy = working_copy(&remote, &root, |settings| {
        settings.refresh_rate = Duration::from_secs(60);
    });

    copy.prepare("main")?;
    write(copy.basedir().join("application.yml"), "foo: local\n")?;
    let checkout = copy.prepare("main")?;
    assert_eq!(read_to_string(checkout.basedir.join("application.yml"))?, "foo: remote\n");

    write(copy.basedir().join("application.yml"), "foo: local\n")?;
    let checkout = copy.prepare("other")?;
    assert_eq!(read_to_string(checkout.basedir.join("application.yml"))?, "foo: other\n");

    let checkout = copy.prepare("main")?;
    assert_eq!(read_to_string(checkout.basedir.join("application.yml"))?, "foo: remote\n");

    Ok(())
}

#[test]
fn unreachable_remote_serves_existing_copy() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    let oid = remote.commit("main", &[("application.yml", "foo: bar\n")])?;
    let copy = working_copy(&remote, &root, |_| {});

    let first = copy.prepare("main")?;
    remove_dir_all(root.path().join("remote"))?;
    let second = copy.prepare("main")?;

    assert_eq!(second.version, oid.to_string());
    assert_eq!(second.version, first.version);
    assert_eq!(copy.refresh_count(), 1);
    assert_eq!(read_to_string(second.basedir.join("application.yml"))?, "foo: bar\n");

    Ok(())
}

#[test]
fn remote_changes_reach_working_copy() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("main", &[("application.yml", "foo: bar\n")])?;
    let copy = working_copy(&remote, &root, |_| {});
    copy.prepare("main")?;

    let added = remote.commit("main", &[("bar.properties", "foo=baz\n")])?;
    let checkout = copy.prepare("main")?;
    assert_eq!(checkout.version, added.to_string());
    assert!(checkout.basedir.join("bar.properties").is_file());

    let removed = remote.remove("main", &["bar.properties"])?;
    let checkout = copy.prepare("main")?;
    assert_eq!(checkout.version, removed.to_string());
    assert!(!checkout.basedir.join("bar.properties").exists());

    Ok(())
}

#[test]
fn diverged_history_converges_on_remote() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    let base = remote.commit("main", &[("application.yml", "foo: base\n")])?;
    remote.commit("main", &[("application.yml", "foo: local\n")])?;
    let copy = working_copy(&remote, &root, |_| {});
    copy.prepare("main")?;

    let rewritten =
        remote.force_commit("main", base, &[("application.yml", "foo: rewritten\n")])?;
    let checkout = copy.prepare("main")?;

    assert_eq!(checkout.version, rewritten.to_string());
    assert_eq!(
        read_to_string(checkout.basedir.join("application.yml"))?,
        "foo: rewritten\n"
    );

    Ok(())
}

#[test]
fn unknown_label_is_not_found() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("main", &[("application.yml", "foo: bar\n")])?;
    let copy = working_copy(&remote, &root, |_| {});

    let result = copy.prepare("nosuchbranch");
    assert!(
        matches!(&result, Err(RepoError::NoSuchLabel { label, .. }) if label == "nosuchbranch")
    );
    assert!(result.unwrap_err().is_not_found());

    Ok(())
}

#[test]
fn tag_and_commit_labels_check_out_detached() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    let first = remote.commit("main", &[("application.yml", "foo: one\n")])?;
    remote.tag("v1", first)?;
    let second = remote.commit("main", &[("application.yml", "foo: two\n")])?;
    let copy = working_copy(&remote, &root, |_| {});

    assert_eq!(copy.prepare("v1")?.version, first.to_string());
    assert_eq!(copy.prepare(&first.to_string())?.version, first.to_string());
    assert_eq!(copy.prepare("main")?.version, second.to_string());
    assert_eq!(
        read_to_string(copy.basedir().join("application.yml"))?,
        "foo: two\n"
    );

    Ok(())
}

#[test]
fn failed_clone_leaves_nothing_behind() -> Result<()> {
    let root = TempDir::new()?;
    let copy = WorkingCopy::new(SyncSettings::new(
        root.path().join("missing").display().to_string(),
        root.path().join("clone"),
    ));

    let result = copy.prepare("main");
    assert!(matches!(
        result,
        Err(RepoError::NoSuchRepository { .. } | RepoError::Transport { .. })
    ));
    assert!(!copy.basedir().exists());

    Ok(())
}

#[test]
fn corrupted_working_copy_is_recreated() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    let oid = remote.commit("main", &[("application.yml", "foo: bar\n")])?;
    let copy = working_copy(&remote, &root, |_| {});
    copy.prepare("main")?;

    remove_dir_all(copy.basedir().join(".git"))?;
    assert_eq!(copy.prepare("main")?.version, oid.to_string());

    Repository::open(copy.basedir())?.remote_set_url("origin", "https://example.org/other.git")?;
    assert_eq!(copy.prepare("main")?.version, oid.to_string());
    assert_eq!(copy.refresh_count(), 3);

    Ok(())
}

#[test]
fn deleted_remote_branches_are_pruned() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("main", &[("application.yml", "foo: bar\n")])?;
    remote.commit("feature", &[("application.yml", "foo: feature\n")])?;
    let copy = working_copy(&remote, &root, |settings| {
        settings.delete_untracked_branches = true;
    });

    copy.prepare("feature")?;
    copy.prepare("main")?;
    let local = Repository::open(copy.basedir())?;
    assert!(local.find_branch("feature", BranchType::Local).is_ok());

    remote.delete_branch("feature")?;
    copy.prepare("main")?;
    assert!(local.find_branch("feature", BranchType::Local).is_err());
    assert!(local.find_branch("main", BranchType::Local).is_ok());

    Ok(())
}

#[test]
fn concurrent_label_switches_never_tear_reads() -> Result<()> {
    let root = TempDir::new()?;
    let remote = RepoFixture::new(root.path().join("remote"))?;
    remote.commit("master", &[("application.yml", "branch: master\n")])?;
    remote.commit("staging", &[("application.yml", "branch: staging\n")])?;
    remote.commit("main", &[("application.yml", "branch: main\n")])?;
    let copy = Arc::new(working_copy(&remote, &root, |_| {}));

    let handles = ["master", "staging", "master", "staging"]
        .into_iter()
        .map(|label| {
            let copy = Arc::clone(&copy);
            thread::spawn(move || -> Result<()> {
                for _ in 0..10 {
                    let content = copy.with_checkout(label, |checkout| {
                        read_to_string(checkout.basedir.join("application.yml")).map_err(|err| {
                            RepoError::Io {
                                path: checkout.basedir.clone(),
                                source: err,
                            }
                        })
                    })?;
                    assert_eq!(content, format!("branch: {label}\n"));
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
