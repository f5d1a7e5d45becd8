// src/phases/createrepo.rs

//! Repository metadata for every published tree
//!
//! Jobs arrive through the pipeline queue as gather finishes (variant,
//! arch) trees. When gather is skipped the trees already on disk are
//! indexed instead.

use super::{gather, Phase, PhaseContext, RepoJob};
use crate::compose::{status, Compose, ComposeStatus, RepoKind};
use crate::config::Config;
use crate::error::Result;
use crate::tools::{self, createrepo, Requirement};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const NAME: &str = "createrepo";

/// Repositories indexed at the same time
const CONCURRENT_REPOS: usize = 3;

/// createrepo options shared by every repository of the compose
pub(crate) fn repo_options(conf: &Config, directory: impl Into<PathBuf>) -> createrepo::CreaterepoOptions {
    let mut opts = createrepo::CreaterepoOptions::new(directory);
    opts.use_createrepo_c = conf.createrepo_c;
    opts.checksum = conf.createrepo_checksum.clone();
    opts.workers = conf.createrepo_threads();
    opts.database = conf.createrepo_database;
    opts.deltas = conf.createrepo_deltas;
    opts
}

/// Finished composes of the same release under `--old-composes`, newest first
pub(crate) fn old_compose_dirs(compose: &Compose) -> Vec<PathBuf> {
    let prefix = format!(
        "{}-{}",
        compose.ids.ident.release_short, compose.ids.ident.release_version
    );
    let mut found = Vec::new();
    for parent in &compose.old_composes {
        let Ok(entries) = std::fs::read_dir(parent) else {
            debug!("Cannot read old composes in {}", parent.display());
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || entry.path() == compose.topdir() {
                continue;
            }
            let finished = matches!(
                status::read_status_file(&entry.path().join("STATUS")),
                Ok(Some(ComposeStatus::Finished | ComposeStatus::FinishedIncomplete))
            );
            if finished {
                found.push((name, entry.path()));
            }
        }
    }
    found.sort();
    found.into_iter().rev().map(|(_, path)| path).collect()
}

/// Same repository in the newest finished old compose that has one
fn old_repository(compose: &Compose, repo: &Path) -> Option<PathBuf> {
    let relative = compose.paths.relative_to_compose(repo);
    old_compose_dirs(compose)
        .into_iter()
        .map(|old| old.join("compose").join(relative))
        .find(|old| old.join("repodata").join("repomd.xml").is_file())
}

pub struct CreaterepoPhase {
    ctx: Arc<PhaseContext>,
}

impl CreaterepoPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    /// Every repository tree that exists on disk
    fn existing_jobs(&self) -> Vec<RepoJob> {
        let compose = &self.ctx.compose;
        let mut jobs = Vec::new();
        for (variant, arch) in self.ctx.variant_arches() {
            for kind in [RepoKind::Binary, RepoKind::Debug] {
                if compose.paths.packages_dir(&arch, &variant.uid, kind).is_dir() {
                    jobs.push(RepoJob {
                        variant: variant.uid.clone(),
                        arch: arch.clone(),
                        kind,
                    });
                }
            }
        }
        for variant in compose.variants().all() {
            if compose.paths.packages_dir("src", &variant.uid, RepoKind::Source).is_dir() {
                jobs.push(RepoJob {
                    variant: variant.uid.clone(),
                    arch: "src".to_string(),
                    kind: RepoKind::Source,
                });
            }
        }
        jobs
    }

    fn create_repo(&self, job: &RepoJob) -> Result<()> {
        let compose = &self.ctx.compose;
        let repo = compose.paths.repository(&job.arch, &job.variant, job.kind);
        std::fs::create_dir_all(&repo)?;

        let mut opts = repo_options(&compose.conf, &repo);
        if job.kind == RepoKind::Binary {
            let comps = compose.paths.variant_comps(&job.arch, &job.variant);
            opts.groupfile = comps.is_file().then_some(comps);
        }
        opts.update_md_path = old_repository(compose, &repo);
        if let Some(old) = &opts.update_md_path {
            debug!("Reusing repodata from {}", old.display());
        }

        info!(
            "Creating {} repo for {}.{}",
            job.kind.category(),
            job.variant,
            job.arch
        );
        let log = compose.log_file(
            &job.arch,
            &format!("createrepo-{}.{}", job.variant, job.kind.category()),
        )?;
        tools::run(&createrepo::command(&opts), &log)
    }

    fn run_jobs(&self, next: impl Fn() -> Option<RepoJob> + Sync) -> Result<()> {
        let first_error = Mutex::new(None);
        std::thread::scope(|s| {
            for _ in 0..CONCURRENT_REPOS {
                s.spawn(|| {
                    while let Some(job) = next() {
                        if let Err(e) = self.create_repo(&job) {
                            super::lock(&first_error).get_or_insert(e);
                        }
                    }
                });
            }
        });
        let first_error = match first_error.into_inner() {
            Ok(first) => first,
            Err(poisoned) => poisoned.into_inner(),
        };
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Phase for CreaterepoPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![repo_options(&self.ctx.compose.conf, "").requirement()]
    }

    fn start(&self) -> Result<()> {
        if self.ctx.is_skipped(gather::NAME) {
            let jobs = Mutex::new(self.existing_jobs());
            return self.run_jobs(|| super::lock(&jobs).pop());
        }
        let queue = &self.ctx.state.repo_queue;
        self.run_jobs(|| queue.pop())
    }
}
