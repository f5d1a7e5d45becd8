// src/phases/livemedia.rs

//! Live media built with `koji spin-livemedia` (livemedia-creator)

use super::koji_task;
use super::{block_arches, buildinstall, repo_urls, Phase, PhaseContext};
use crate::compose::overrides;
use crate::config::LiveMediaConfig;
use crate::error::Result;
use crate::tools::koji::{self, LiveMediaTask};
use crate::tools::Requirement;
use crate::variants::Variant;
use rayon::prelude::*;
use std::sync::Arc;

pub const NAME: &str = "livemedia";
pub const DELIVERABLE: &str = "live-media";

pub struct LivemediaPhase {
    ctx: Arc<PhaseContext>,
}

impl LivemediaPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn jobs(&self) -> Result<Vec<(Variant, Vec<String>, LiveMediaConfig)>> {
        let compose = &self.ctx.compose;
        let mut jobs = Vec::new();
        for variant in compose.variants().all() {
            for conf in overrides::variant_items(&compose.conf.live_media, &variant.uid)? {
                let arches = block_arches(variant, &conf.arches);
                if !arches.is_empty() {
                    jobs.push((variant.clone(), arches, conf.clone()));
                }
            }
        }
        Ok(jobs)
    }

    fn task(&self, variant: &Variant, arches: &[String], conf: &LiveMediaConfig) -> LiveMediaTask {
        let compose = &self.ctx.compose;
        let tree_variant = conf.install_tree_from.as_deref().unwrap_or(&variant.uid);
        let install_tree = compose.paths.os_tree("$arch", tree_variant).display().to_string();
        LiveMediaTask {
            name: conf.name.clone(),
            version: conf.version.clone().unwrap_or_else(|| compose.conf.release_version.clone()),
            target: conf.target.clone().unwrap_or_default(),
            arches: arches.to_vec(),
            kickstart: conf.kickstart.clone(),
            ksurl: conf.ksurl.clone(),
            release: Some(
                conf.release
                    .clone()
                    .unwrap_or_else(|| format!("{}.{}", compose.ids.date, compose.ids.respin)),
            ),
            title: conf.title.clone(),
            install_tree: Some(buildinstall::as_url(compose, &install_tree)),
            repos: repo_urls(compose, "$arch", &conf.repo),
            scratch: conf.scratch,
        }
    }

    fn build(&self, variant: &Variant, arches: &[String], conf: &LiveMediaConfig) -> Result<()> {
        let compose = &self.ctx.compose;
        let task = self.task(variant, arches, conf);
        let log = compose.log_file("global", &format!("livemedia-{}-{}", variant.uid, task.name))?;
        let cmd = koji::spin_livemedia(compose.conf.koji_profile.as_deref(), &task);
        let task_id = koji_task::submit(compose, &cmd, &log)?;

        let subvariant = conf.subvariant.clone().unwrap_or_else(|| variant.uid.clone());
        for output in koji_task::collect(compose, task_id, &[".iso"], &log)? {
            if !arches.contains(&output.arch) {
                continue;
            }
            let dir = compose.paths.iso_dir(&output.arch, &variant.uid);
            koji_task::publish(compose, &variant.uid, &output, &dir, "live", "iso", &subvariant, true)?;
        }
        Ok(())
    }
}

impl Phase for LivemediaPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        !self.ctx.compose.conf.live_media.is_empty()
    }

    fn validate(&self) -> Vec<String> {
        self.ctx
            .compose
            .conf
            .live_media
            .iter()
            .flat_map(|(_, items)| items.iter())
            .filter(|conf| conf.target.is_none())
            .map(|conf| format!("live_media {} has no target", conf.name))
            .collect()
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![koji::KOJI]
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        self.jobs()?.par_iter().try_for_each(|(variant, arches, conf)| {
            compose
                .failable(Some(variant), &arches.join(","), DELIVERABLE, || {
                    self.build(variant, arches, conf)
                })
                .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests::context_in;

    #[test]
    fn test_task_from_block() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(
            dir.path(),
            r#"
translate_paths = [["/", "https://kojipkgs.example.com/"]]
live_media = [
  ["^Server$", { name = "Fedora-Server-Live", kickstart = "server.ks", target = "f40", title = "Fedora Server", install_tree_from = "Server-optional" }],
]
"#,
        );
        let phase = LivemediaPhase::new(Arc::clone(&ctx));
        assert!(phase.validate().is_empty());
        let jobs = phase.jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        let (variant, arches, conf) = &jobs[0];

        let task = phase.task(variant, arches, conf);
        assert_eq!(task.arches, vec!["x86_64"]);
        assert_eq!(task.title.as_deref(), Some("Fedora Server"));
        let tree = task.install_tree.unwrap();
        assert!(tree.starts_with("https://kojipkgs.example.com/"));
        assert!(tree.ends_with("compose/Server-optional/$arch/os"));
        assert!(task.repos.is_empty());
    }
}
