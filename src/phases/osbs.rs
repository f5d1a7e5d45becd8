// src/phases/osbs.rs

//! Container images built through OSBS with `koji container-build`
//!
//! Images go to a registry rather than the compose tree, so the compose
//! only records the finished tasks in `metadata/osbs.json`.

use super::koji_task;
use super::{lock, repo_urls, Phase, PhaseContext};
use crate::compose::overrides;
use crate::config::OsbsConfig;
use crate::error::Result;
use crate::metadata;
use crate::tools::koji::{self, ContainerTask};
use crate::tools::Requirement;
use crate::variants::Variant;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const NAME: &str = "osbs";
pub const DELIVERABLE: &str = "osbs";
pub const METADATA_FILE: &str = "osbs.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerBuild {
    pub task_id: u64,
    pub target: String,
    pub source: String,
    pub git_branch: String,
    pub scratch: bool,
}

pub struct OsbsPhase {
    ctx: Arc<PhaseContext>,
    /// variant uid → finished builds
    builds: Mutex<BTreeMap<String, Vec<ContainerBuild>>>,
}

impl OsbsPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self {
            ctx,
            builds: Mutex::new(BTreeMap::new()),
        }
    }

    fn jobs(&self) -> Result<Vec<(Variant, OsbsConfig)>> {
        let compose = &self.ctx.compose;
        let mut jobs = Vec::new();
        for variant in compose.variants().all() {
            for conf in overrides::variant_items(&compose.conf.osbs, &variant.uid)? {
                jobs.push((variant.clone(), conf.clone()));
            }
        }
        Ok(jobs)
    }

    fn task(&self, conf: &OsbsConfig) -> ContainerTask {
        ContainerTask {
            target: conf.target.clone(),
            source: conf.url.clone(),
            git_branch: conf.git_branch.clone(),
            repo_urls: repo_urls(&self.ctx.compose, "$basearch", &conf.repo),
            scratch: conf.scratch,
        }
    }

    fn build(&self, variant: &Variant, conf: &OsbsConfig) -> Result<()> {
        let compose = &self.ctx.compose;
        let task = self.task(conf);
        let log = compose.log_file("global", &format!("osbs-{}", variant.uid))?;
        let cmd = koji::container_build(compose.conf.koji_profile.as_deref(), &task);
        let task_id = koji_task::submit(compose, &cmd, &log)?;
        lock(&self.builds)
            .entry(variant.uid.clone())
            .or_default()
            .push(ContainerBuild {
                task_id,
                target: task.target,
                source: task.source,
                git_branch: task.git_branch,
                scratch: task.scratch,
            });
        Ok(())
    }
}

impl Phase for OsbsPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        !self.ctx.compose.conf.osbs.is_empty()
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![koji::KOJI]
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        self.jobs()?.par_iter().try_for_each(|(variant, conf)| {
            compose
                .failable(Some(variant), "*", DELIVERABLE, || self.build(variant, conf))
                .map(|_| ())
        })
    }

    fn stop(&self) -> Result<()> {
        let builds = lock(&self.builds);
        if builds.is_empty() {
            return Ok(());
        }
        let compose = &self.ctx.compose;
        metadata::write_document(
            &compose.paths.metadata_dir().join(METADATA_FILE),
            "osbs",
            &serde_json::json!({"compose": {"id": compose.compose_id()}, "builds": *builds}),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests::context_in;

    const CONFIG: &str = r#"
osbs = [
  ["^Server$", { url = "git://pkgs.example.com/container/fedora", target = "f40-container-candidate", git_branch = "f40", repo = ["Server"] }],
]
"#;

    #[test]
    fn test_task_from_block() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), CONFIG);
        let phase = OsbsPhase::new(Arc::clone(&ctx));
        let jobs = phase.jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        let task = phase.task(&jobs[0].1);
        assert_eq!(task.target, "f40-container-candidate");
        assert_eq!(task.repo_urls.len(), 1);
        assert!(task.repo_urls[0].ends_with("compose/Server/$basearch/os"));
    }

    #[test]
    fn test_stop_writes_recorded_builds() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), CONFIG);
        let phase = OsbsPhase::new(Arc::clone(&ctx));
        phase.stop().unwrap();
        let path = ctx.compose.paths.metadata_dir().join(METADATA_FILE);
        assert!(!path.exists());

        lock(&phase.builds).entry("Server".to_string()).or_default().push(ContainerBuild {
            task_id: 42,
            target: "f40-container-candidate".to_string(),
            source: "git://pkgs.example.com/container/fedora".to_string(),
            git_branch: "f40".to_string(),
            scratch: false,
        });
        phase.stop().unwrap();
        let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(doc["payload"]["builds"]["Server"][0]["task_id"], 42);
    }
}
