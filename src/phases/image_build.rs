// src/phases/image_build.rs

//! Disk and cloud images built with `koji image-build`
//!
//! One task per config block covers all of its arches; koji expands
//! `$arch` in the install tree and repository URLs.

use super::koji_task::{self, IMAGE_FORMATS};
use super::{block_arches, buildinstall, repo_urls, Phase, PhaseContext};
use crate::compose::overrides;
use crate::config;
use crate::error::Result;
use crate::tools::koji::{self, ImageBuildTask};
use crate::tools::Requirement;
use crate::variants::Variant;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::warn;

pub const NAME: &str = "image_build";
pub const DELIVERABLE: &str = "image-build";

/// Placeholder koji replaces with each task arch
const ARCH_PLACEHOLDER: &str = "$arch";

#[derive(Debug, Clone)]
struct ImageJob {
    variant: Variant,
    arches: Vec<String>,
    conf: config::ImageBuildTask,
}

pub struct ImageBuildPhase {
    ctx: Arc<PhaseContext>,
}

impl ImageBuildPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn jobs(&self) -> Result<Vec<ImageJob>> {
        let compose = &self.ctx.compose;
        let mut jobs = Vec::new();
        for variant in compose.variants().all() {
            for block in overrides::variant_items(&compose.conf.image_build, &variant.uid)? {
                let arches = block_arches(variant, &block.image_build.arches);
                if arches.is_empty() {
                    continue;
                }
                jobs.push(ImageJob {
                    variant: variant.clone(),
                    arches,
                    conf: block.image_build.clone(),
                });
            }
        }
        Ok(jobs)
    }

    fn task(&self, job: &ImageJob) -> ImageBuildTask {
        let compose = &self.ctx.compose;
        let conf = &job.conf;
        let tree_variant = conf.install_tree_from.as_deref().unwrap_or(&job.variant.uid);
        let install_tree = compose.paths.os_tree(ARCH_PLACEHOLDER, tree_variant);
        ImageBuildTask {
            name: conf
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-{}", compose.conf.release_short, job.variant.uid)),
            version: conf.version.clone().unwrap_or_else(|| compose.conf.release_version.clone()),
            release: Some(
                conf.release
                    .clone()
                    .unwrap_or_else(|| format!("{}.{}", compose.ids.date, compose.ids.respin)),
            ),
            target: conf.target.clone().unwrap_or_default(),
            arches: job.arches.clone(),
            formats: conf.format.clone(),
            kickstart: conf.kickstart.clone(),
            ksurl: conf.ksurl.clone(),
            distro: conf.distro.clone(),
            disk_size: conf.disk_size,
            install_tree: buildinstall::as_url(compose, &install_tree.display().to_string()),
            repos: repo_urls(compose, ARCH_PLACEHOLDER, &conf.repo),
            scratch: false,
        }
    }

    fn build(&self, job: &ImageJob) -> Result<()> {
        let compose = &self.ctx.compose;
        let task = self.task(job);
        let config_file = compose
            .paths
            .work_global()
            .join("image-build")
            .join(&job.variant.uid)
            .join(format!("{}-{}.cfg", task.name, task.formats.join("-")));
        if let Some(parent) = config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_file, task.render_config())?;

        let log = compose.log_file("global", &format!("imagebuild-{}-{}", job.variant.uid, task.name))?;
        let cmd = koji::image_build(compose.conf.koji_profile.as_deref(), &config_file);
        let task_id = koji_task::submit(compose, &cmd, &log)?;

        let suffixes: Vec<&str> = IMAGE_FORMATS
            .iter()
            .filter(|(_, image_type, _)| task.formats.iter().any(|f| f == image_type))
            .map(|(suffix, _, _)| *suffix)
            .collect();
        let subvariant = job.conf.subvariant.clone().unwrap_or_else(|| job.variant.uid.clone());
        for output in koji_task::collect(compose, task_id, &suffixes, &log)? {
            if !job.arches.contains(&output.arch) {
                continue;
            }
            let file_name = output.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let Some((image_type, format)) = koji_task::image_format(&file_name) else {
                warn!("Unrecognised image-build output {}", output.path.display());
                continue;
            };
            let dir = compose.paths.images_dir(&output.arch, &job.variant.uid);
            koji_task::publish(compose, &job.variant.uid, &output, &dir, image_type, format, &subvariant, false)?;
        }
        Ok(())
    }

    /// Tolerate a task failure only when every arch it covers may fail
    fn failable_arches(job: &ImageJob) -> Vec<String> {
        let all_failable = job
            .arches
            .iter()
            .all(|arch| job.conf.failable.iter().any(|f| f == "*" || f == arch));
        if all_failable { vec!["*".to_string()] } else { Vec::new() }
    }
}

impl Phase for ImageBuildPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        !self.ctx.compose.conf.image_build.is_empty()
    }

    fn validate(&self) -> Vec<String> {
        self.ctx
            .compose
            .conf
            .image_build
            .iter()
            .flat_map(|(pattern, items)| items.iter().map(move |block| (pattern, block)))
            .filter(|(_, block)| block.image_build.target.is_none())
            .map(|(pattern, _)| format!("image_build block for {pattern} has no target"))
            .collect()
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![koji::KOJI]
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        self.jobs()?.par_iter().try_for_each(|job| {
            let arch = job.arches.join(",");
            compose
                .failable_on(Some(&job.variant), &arch, DELIVERABLE, &Self::failable_arches(job), || {
                    self.build(job)
                })
                .map(|_| ())
        })
    }
}
