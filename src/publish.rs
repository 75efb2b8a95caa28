//! Publishing the generated site through a dedicated git worktree.
//!
//! Every step runs to completion before the next one starts and the first
//! failure stops the run. Nothing is rolled back.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context as _};
use log::info;

use crate::{context::Context, generator, shell};

#[derive(Debug, Clone)]
pub(crate) struct PublishOptions {
    /// Worktree holding the built site, relative to the site root.
    pub publish_dir: PathBuf,
    pub remote: String,
    pub branch: String,
    pub build_command: Vec<String>,
    pub message: String,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            publish_dir: PathBuf::from("public"),
            remote: "upstream".to_string(),
            branch: "master".to_string(),
            build_command: vec!["hugo".to_string()],
            message: "Committing to master".to_string(),
        }
    }
}

pub(crate) fn publish(ctx: &Context, options: &PublishOptions) -> anyhow::Result<()> {
    ensure_clean_worktree(&ctx.root)?;
    reset_publish_worktree(&ctx.root, options)?;

    let pages = generator::render_notebooks(ctx)?;
    info!("rendered {} notebooks", pages.len());
    shell::run_line(&ctx.root, &options.build_command, [] as [&str; 0])
        .context("site build failed")?;

    commit_and_push(&ctx.root, options)?;
    info!("push succeeded");

    Ok(())
}

fn ensure_clean_worktree(root: &Path) -> anyhow::Result<()> {
    if !shell::succeeds(root, "git", ["diff-index", "--quiet", "HEAD", "--"])? {
        shell::run(root, "git", ["status"])?;
        bail!("The working directory is dirty. Please commit any pending changes.");
    }
    Ok(())
}

fn reset_publish_worktree(root: &Path, options: &PublishOptions) -> anyhow::Result<()> {
    let publish_dir = root.join(&options.publish_dir);
    fs_extra::dir::remove(&publish_dir).with_context(|| format!("while removing {publish_dir:?}"))?;
    fs_extra::dir::create_all(&publish_dir, false)?;

    shell::run(root, "git", ["worktree", "prune"])?;
    if let Some(name) = options.publish_dir.file_name() {
        let stale = root.join(".git").join("worktrees").join(name);
        fs_extra::dir::remove(&stale).with_context(|| format!("while removing {stale:?}"))?;
    }

    let dir_arg = options.publish_dir.to_string_lossy();
    let start_point = format!("{}/{}", options.remote, options.branch);
    shell::run(
        root,
        "git",
        [
            "worktree",
            "add",
            "-B",
            options.branch.as_str(),
            &*dir_arg,
            start_point.as_str(),
        ],
    )?;

    clear_published_files(&publish_dir)
}

/// Empties the worktree while keeping dot entries such as its `.git` link.
fn clear_published_files(dir: &Path) -> anyhow::Result<()> {
    let mut items = vec![];
    for entry in fs::read_dir(dir).with_context(|| format!("while reading {dir:?}"))? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with('.') {
            items.push(entry.path());
        }
    }
    fs_extra::remove_items(&items)?;
    Ok(())
}

fn commit_and_push(root: &Path, options: &PublishOptions) -> anyhow::Result<()> {
    let publish_dir = root.join(&options.publish_dir);
    shell::run(&publish_dir, "git", ["add", "."])?;

    if shell::succeeds(&publish_dir, "git", ["diff", "--cached", "--quiet"])? {
        info!("nothing changed in {publish_dir:?}, skipping commit");
    } else {
        shell::run(
            &publish_dir,
            "git",
            ["commit", "-m", options.message.as_str()],
        )?;
    }

    shell::run(
        root,
        "git",
        ["push", options.remote.as_str(), options.branch.as_str()],
    )
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;
    use crate::{
        metadata::{self, MetadataOverrides},
        notebook,
    };
    use serde_json::json;

    fn git(dir: &Path, args: &[&str]) {
        shell::run(dir, "git", args).unwrap();
    }

    fn git_output(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
        assert!(output.status.success(), "git {args:?} failed");
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    /// A committed site on branch `source` whose `upstream` is a bare
    /// repository that already has a `master` branch.
    fn site_with_upstream() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote.git");
        let site = dir.path().join("site");
        fs_extra::dir::create_all(&remote, false).unwrap();
        fs_extra::dir::create_all(site.join("notebooks"), false).unwrap();

        git(&remote, &["init", "--quiet", "--bare"]);
        git(&site, &["init", "--quiet"]);
        git(&site, &["symbolic-ref", "HEAD", "refs/heads/source"]);
        for (key, value) in [
            ("user.name", "Site Author"),
            ("user.email", "author@example.com"),
            ("commit.gpgsign", "false"),
        ] {
            git(&site, &["config", key, value]);
        }

        // Already carries full metadata, so rendering leaves it untouched.
        let nb = site.join("notebooks/intro.ipynb");
        notebook::write_json(
            &nb,
            &json!({"cells": [], "metadata": {}, "nbformat": 4, "nbformat_minor": 5}),
        )
        .unwrap();
        let ctx = Context::new(site.clone(), None).unwrap();
        metadata::update_notebook_metadata(&ctx, &nb, MetadataOverrides::default()).unwrap();
        std::fs::write(site.join(".gitignore"), "public/\nstatic/\ncontent/\n").unwrap();

        git(&site, &["add", "."]);
        git(&site, &["commit", "--quiet", "-m", "Add intro notebook"]);
        git(&site, &["remote", "add", "upstream", remote.to_str().unwrap()]);
        git(&site, &["push", "--quiet", "upstream", "source:master"]);
        git(&site, &["fetch", "--quiet", "upstream"]);

        (dir, site, remote)
    }

    fn build_writing_index() -> PublishOptions {
        PublishOptions {
            build_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo built > public/index.html".to_string(),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn publishes_built_site_and_skips_empty_commits() {
        let (_dir, site, remote) = site_with_upstream();
        let ctx = Context::new(site.clone(), None).unwrap();
        let options = build_writing_index();

        publish(&ctx, &options).unwrap();

        assert!(site.join("public/.git").is_file());
        assert!(site.join("static/full_html/intro.html").is_file());
        assert!(site.join("content/notebooks/intro.md").is_file());
        assert_eq!(
            git_output(&remote, &["log", "-1", "--format=%s", "master"]),
            "Committing to master"
        );
        assert_eq!(git_output(&remote, &["show", "master:index.html"]), "built");
        assert_eq!(
            git_output(&remote, &["ls-tree", "--name-only", "master"]),
            ".gitignore\nindex.html"
        );

        let commits = git_output(&remote, &["rev-list", "--count", "master"]);
        publish(&ctx, &options).unwrap();
        assert_eq!(git_output(&remote, &["rev-list", "--count", "master"]), commits);
    }

    #[test]
    fn dirty_tracked_file_aborts_before_touching_files() {
        let (_dir, site, remote) = site_with_upstream();
        std::fs::write(site.join(".gitignore"), "changed\n").unwrap();
        let ctx = Context::new(site.clone(), None).unwrap();

        let err = publish(&ctx, &build_writing_index()).unwrap_err();

        assert!(err.to_string().contains("dirty"), "{err}");
        assert!(!site.join("public").exists());
        assert!(!site.join("static").exists());
        assert_eq!(
            git_output(&remote, &["log", "-1", "--format=%s", "master"]),
            "Add intro notebook"
        );
    }

    #[test]
    fn failed_build_stops_before_commit() {
        let (_dir, site, remote) = site_with_upstream();
        let ctx = Context::new(site.clone(), None).unwrap();
        let options = PublishOptions {
            build_command: vec!["false".to_string()],
            ..Default::default()
        };

        let err = publish(&ctx, &options).unwrap_err();

        assert!(err.to_string().contains("site build failed"), "{err}");
        assert!(site.join("public/.git").is_file());
        assert!(site.join("static/full_html/intro.html").is_file());
        assert_eq!(
            git_output(&remote, &["log", "-1", "--format=%s", "master"]),
            "Add intro notebook"
        );
    }

    #[test]
    fn clearing_keeps_dot_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".git"), "gitdir: elsewhere").unwrap();
        std::fs::write(dir.path().join("index.html"), "").unwrap();
        fs_extra::dir::create_all(dir.path().join("posts/a"), false).unwrap();

        clear_published_files(dir.path()).unwrap();

        let mut left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, vec![".git".to_string()]);
    }

    #[test]
    fn outside_a_repository_nothing_is_touched() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(dir.path().to_owned(), None).unwrap();

        assert!(publish(&ctx, &PublishOptions::default()).is_err());
        assert!(!dir.path().join("public").exists());
    }

    #[test]
    fn defaults_match_user_pages_layout() {
        let options = PublishOptions::default();
        assert_eq!(options.publish_dir, PathBuf::from("public"));
        assert_eq!(options.remote, "upstream");
        assert_eq!(options.branch, "master");
        assert_eq!(options.build_command, vec!["hugo".to_string()]);
    }
}
