// src/phases/mod.rs

//! Compose phases
//!
//! Every phase implements [`Phase`]. The driver runs them in a fixed
//! sequence; a [`weaver::Weaver`] runs groups of them concurrently. Phases
//! hand data to each other through [`PipelineState`] on the shared
//! [`PhaseContext`].

pub mod buildinstall;
pub mod createiso;
pub mod createrepo;
pub mod driver;
pub mod extra_isos;
pub mod extrafiles;
pub mod gather;
pub mod image_build;
pub mod image_checksum;
pub mod init;
pub mod koji_task;
pub mod liveimages;
pub mod livemedia;
pub mod osbs;
pub mod ostree;
pub mod ostree_installer;
pub mod pkgset;
pub mod productimg;
pub mod test;
pub mod weaver;

use crate::compose::{Compose, RepoKind};
use crate::config::OneOrMany;
use crate::error::Result;
use crate::gather::GatherResult;
use crate::notifier;
use crate::pkgset::PackageRecord;
use crate::tools::Requirement;
use crate::variants::Variant;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use tracing::info;

/// Phase names accepted by `--skip-phase` and `--just-phase`, in run order
pub const PHASES: &[&str] = &[
    init::NAME,
    pkgset::NAME,
    buildinstall::NAME,
    gather::NAME,
    extrafiles::NAME,
    createrepo::NAME,
    ostree::NAME,
    ostree_installer::NAME,
    productimg::NAME,
    createiso::NAME,
    extra_isos::NAME,
    liveimages::NAME,
    image_build::NAME,
    livemedia::NAME,
    osbs::NAME,
    image_checksum::NAME,
    test::NAME,
];

pub trait Phase: Send + Sync {
    fn name(&self) -> &'static str;

    fn context(&self) -> &PhaseContext;

    /// Whether the configuration asks for this phase at all
    fn is_configured(&self) -> bool {
        true
    }

    /// Consulted every time; never cached
    fn skip(&self) -> bool {
        self.context().is_skipped(self.name()) || !self.is_configured()
    }

    /// Pre-flight errors; any error dooms the compose before it starts
    fn validate(&self) -> Vec<String> {
        Vec::new()
    }

    /// Host tools the phase runs locally
    fn requirements(&self) -> Vec<Requirement> {
        Vec::new()
    }

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Start a phase unless it is skipped
pub fn start_phase(phase: &dyn Phase) -> Result<()> {
    if phase.skip() {
        info!("[SKIP ] {}", phase.name());
        return Ok(());
    }
    info!("[BEGIN] {}", phase.name());
    phase
        .context()
        .compose
        .notifier
        .send(notifier::PHASE_START, json!({"phase_name": phase.name()}));
    phase.start()
}

/// Stop a phase unless it is skipped
pub fn stop_phase(phase: &dyn Phase) -> Result<()> {
    if phase.skip() {
        return Ok(());
    }
    phase.stop()?;
    info!("[DONE ] {}", phase.name());
    phase
        .context()
        .compose
        .notifier
        .send(notifier::PHASE_STOP, json!({"phase_name": phase.name()}));
    Ok(())
}

/// Start and stop in one go
///
/// The phase is stopped even when `start` fails; the first error wins.
pub fn run_phase(phase: &dyn Phase) -> Result<()> {
    let started = start_phase(phase);
    let stopped = stop_phase(phase);
    started.and(stopped)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Arches a config block applies to: its own list narrowed to the variant's
pub(crate) fn block_arches(variant: &Variant, wanted: &[String]) -> Vec<String> {
    variant
        .arches
        .iter()
        .filter(|arch| wanted.is_empty() || wanted.contains(arch))
        .cloned()
        .collect()
}

/// `repo` entries of a config block as URLs
///
/// An entry naming a variant uid stands for that variant's os tree on `arch`.
pub(crate) fn repo_urls(compose: &Compose, arch: &str, repos: &OneOrMany<String>) -> Vec<String> {
    repos
        .iter()
        .map(|repo| match compose.variants().by_uid(repo) {
            Some(variant) => {
                let tree = compose.paths.os_tree(arch, &variant.uid);
                buildinstall::as_url(compose, &tree.display().to_string())
            }
            None => buildinstall::as_url(compose, repo),
        })
        .collect()
}

/// Package set of one tree arch
#[derive(Debug, Clone, Default)]
pub struct PackageSets {
    pub by_arch: BTreeMap<String, Vec<PackageRecord>>,
}

/// One repository waiting for createrepo
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RepoJob {
    pub variant: String,
    pub arch: String,
    pub kind: RepoKind,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<RepoJob>,
    closed: bool,
}

/// Hand-off from gather to createrepo
///
/// Gather pushes a job per finished repository tree and closes the queue
/// when it is done, successfully or not; createrepo workers drain it.
#[derive(Debug, Default)]
pub struct RepoQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl RepoQueue {
    pub fn push(&self, job: RepoJob) {
        lock(&self.state).jobs.push_back(job);
        self.ready.notify_one();
    }

    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Next job; `None` once the queue is closed and drained
    pub fn pop(&self) -> Option<RepoJob> {
        let mut state = lock(&self.state);
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            if state.closed {
                return None;
            }
            state = match self.ready.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Closes the queue when dropped
    pub fn closer(&self) -> QueueCloser<'_> {
        QueueCloser { queue: self }
    }
}

pub struct QueueCloser<'a> {
    queue: &'a RepoQueue,
}

impl Drop for QueueCloser<'_> {
    fn drop(&mut self) {
        self.queue.close();
    }
}

/// Boot artifacts of an installer tree: (kind, path relative to the os tree)
pub type BootImages = Vec<(String, String)>;

/// Data produced by one phase and consumed by later ones
#[derive(Debug, Default)]
pub struct PipelineState {
    pub package_sets: OnceLock<PackageSets>,
    pub gathered: Mutex<BTreeMap<(String, String), GatherResult>>,
    pub repo_queue: RepoQueue,
    /// (variant uid, arch) → boot images copied into the os tree
    pub boot_images: Mutex<BTreeMap<(String, String), BootImages>>,
}

impl PipelineState {
    pub fn gathered(&self, uid: &str, arch: &str) -> Option<GatherResult> {
        lock(&self.gathered).get(&(uid.to_string(), arch.to_string())).cloned()
    }

    pub fn is_bootable(&self, uid: &str, arch: &str) -> bool {
        lock(&self.boot_images).contains_key(&(uid.to_string(), arch.to_string()))
    }

    pub fn boot_images(&self, uid: &str, arch: &str) -> BootImages {
        lock(&self.boot_images)
            .get(&(uid.to_string(), arch.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

/// What every phase shares: the compose, the phase selection, the pipeline
#[derive(Debug)]
pub struct PhaseContext {
    pub compose: Arc<Compose>,
    pub skip_phases: BTreeSet<String>,
    pub just_phases: BTreeSet<String>,
    pub state: PipelineState,
}

impl PhaseContext {
    pub fn new(compose: Arc<Compose>, skip_phases: BTreeSet<String>, just_phases: BTreeSet<String>) -> Self {
        Self {
            compose,
            skip_phases,
            just_phases,
            state: PipelineState::default(),
        }
    }

    pub fn is_skipped(&self, name: &str) -> bool {
        self.skip_phases.contains(name) || (!self.just_phases.is_empty() && !self.just_phases.contains(name))
    }

    /// Every (variant, arch) pair, owned so work can fan out
    pub fn variant_arches(&self) -> Vec<(Variant, String)> {
        self.compose
            .variants()
            .variant_arches()
            .into_iter()
            .map(|(v, a)| (v.clone(), a.to_string()))
            .collect()
    }

    pub fn tree_arches(&self) -> Vec<String> {
        self.compose.variants().arches().into_iter().collect()
    }
}
