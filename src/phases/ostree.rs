// src/phases/ostree.rs

//! OSTree commits with rpm-ostree
//!
//! Each `ostree` block matching a variant composes one commit per arch
//! from a treefile kept in a git repository. The repositories named by the
//! block are added to the treefile before composing.

use super::{block_arches, repo_urls, Phase, PhaseContext};
use crate::compose::overrides;
use crate::config::{OneOrMany, OstreeConfig, ScmKind, ScmSpec, ScmTable};
use crate::error::{Error, Result};
use crate::notifier;
use crate::scm;
use crate::tools::{self, ostree, runroot::Runroot, Requirement};
use crate::variants::Variant;
use rayon::prelude::*;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const NAME: &str = "ostree";
pub const DELIVERABLE: &str = "ostree";

/// Name of the repo file written next to a tweaked treefile
const REPO_FILE: &str = "compose-extra.repo";

#[derive(Debug, Clone)]
struct OstreeJob {
    variant: Variant,
    arch: String,
    index: usize,
    conf: OstreeConfig,
}

/// Add `urls` to a JSON treefile as `compose-extra-N` repositories
///
/// The repo definitions go into a `.repo` file beside the treefile, which
/// rpm-ostree reads from the treefile's directory.
pub fn add_repos(treefile: &Path, urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        return Ok(());
    }
    let mut tree: Value = serde_json::from_str(&std::fs::read_to_string(treefile)?)?;
    let mut repo_file = String::new();
    let mut names = Vec::new();
    for (i, url) in urls.iter().enumerate() {
        let name = format!("compose-extra-{i}");
        let _ = write!(repo_file, "[{name}]\nname={name}\nbaseurl={url}\ngpgcheck=0\n\n");
        names.push(Value::String(name));
    }
    let dir = treefile.parent().unwrap_or(Path::new("."));
    std::fs::write(dir.join(REPO_FILE), repo_file)?;

    let repos = tree
        .as_object_mut()
        .ok_or_else(|| Error::Parse(format!("{} is not a JSON object", treefile.display())))?
        .entry("repos")
        .or_insert_with(|| json!([]));
    match repos.as_array_mut() {
        Some(list) => list.extend(names),
        None => return Err(Error::Parse(format!("'repos' in {} is not a list", treefile.display()))),
    }
    let mut text = serde_json::to_string_pretty(&tree)?;
    text.push('\n');
    std::fs::write(treefile, text)?;
    Ok(())
}

pub struct OstreePhase {
    ctx: Arc<PhaseContext>,
}

impl OstreePhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn jobs(&self) -> Result<Vec<OstreeJob>> {
        let compose = &self.ctx.compose;
        let mut jobs = Vec::new();
        for variant in compose.variants().all() {
            for (index, conf) in overrides::variant_items(&compose.conf.ostree, &variant.uid)?
                .into_iter()
                .enumerate()
            {
                for arch in block_arches(variant, &conf.arches) {
                    jobs.push(OstreeJob {
                        variant: variant.clone(),
                        arch,
                        index,
                        conf: conf.clone(),
                    });
                }
            }
        }
        Ok(jobs)
    }

    fn config_spec(conf: &OstreeConfig) -> ScmSpec {
        ScmSpec::Table(ScmTable {
            scm: ScmKind::Git,
            repo: Some(conf.config_url.clone()),
            branch: conf.config_branch.clone(),
            file: None,
            dir: Some(OneOrMany::One(".".to_string())),
            command: None,
            target: None,
        })
    }

    fn compose_commit(&self, job: &OstreeJob) -> Result<String> {
        let compose = &self.ctx.compose;
        let uid = &job.variant.uid;
        let workdir = compose.paths.ostree_work_dir(&job.arch, uid, job.index);
        if workdir.exists() {
            std::fs::remove_dir_all(&workdir)?;
        }
        let log = compose.log_file(&job.arch, &format!("ostree-{uid}-{}", job.index))?;

        let config_dir = workdir.join("config_repo");
        scm::fetch(&Self::config_spec(&job.conf), &config_dir, &log)?;
        let treefile = config_dir.join(&job.conf.treefile);
        if !treefile.is_file() {
            return Err(Error::NotFound(format!(
                "treefile {} in {}",
                job.conf.treefile, job.conf.config_url
            )));
        }
        add_repos(&treefile, &repo_urls(compose, &job.arch, &job.conf.repo))?;

        let repo = PathBuf::from(&job.conf.ostree_repo);
        let runroot = Runroot::from_config(&compose.conf);
        let mounts = [compose.topdir().display().to_string(), job.conf.ostree_repo.clone()];
        let mounts: Vec<&str> = mounts.iter().map(String::as_str).collect();
        if !repo.join("config").is_file() {
            std::fs::create_dir_all(&repo)?;
            tools::run(&ostree::init_repo(&repo), &log)?;
        }

        let commitid_file = workdir.join("commitid");
        let opts = ostree::ComposeTree {
            repo: repo.clone(),
            treefile,
            commitid_file: commitid_file.clone(),
            version: job.conf.version.clone(),
            force_new_commit: job.conf.force_new_commit,
            cachedir: Some(workdir.join("cache")),
        };
        info!("Composing ostree tree for {}.{}", uid, job.arch);
        let cmd = runroot.wrap(
            ostree::compose_tree(&opts),
            &job.arch,
            &[ostree::RPM_OSTREE.package, ostree::OSTREE.package],
            &mounts,
        );
        tools::run(&cmd, &log)?;
        if job.conf.update_summary {
            tools::run(&ostree::update_summary(&repo), &log)?;
        }

        let commit = std::fs::read_to_string(&commitid_file)?.trim().to_string();
        info!("ostree commit {} for {}.{}", commit, uid, job.arch);
        compose.notifier.send(
            notifier::OSTREE_COMMIT,
            json!({"variant": uid, "arch": job.arch, "commitid": commit, "repo_path": job.conf.ostree_repo}),
        );
        Ok(commit)
    }
}

impl Phase for OstreePhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        !self.ctx.compose.conf.ostree.is_empty()
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![ostree::RPM_OSTREE, ostree::OSTREE, crate::scm::git::GIT]
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        self.jobs()?.par_iter().try_for_each(|job| {
            compose
                .failable_on(Some(&job.variant), &job.arch, DELIVERABLE, &job.conf.failable, || {
                    self.compose_commit(job)
                })
                .map(|_| ())
        })
    }
}
