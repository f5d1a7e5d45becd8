// src/phases/liveimages.rs

//! Live CDs and appliances built with `koji spin-livecd`

use super::koji_task::{self, TaskOutput};
use super::{block_arches, repo_urls, Phase, PhaseContext};
use crate::compose::overrides;
use crate::config::LiveImageConfig;
use crate::error::Result;
use crate::tools::koji::{self, LiveTask};
use crate::tools::Requirement;
use crate::variants::Variant;
use rayon::prelude::*;
use std::sync::Arc;

pub const NAME: &str = "liveimages";
pub const DELIVERABLE: &str = "live";

pub struct LiveimagesPhase {
    ctx: Arc<PhaseContext>,
}

impl LiveimagesPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn jobs(&self) -> Result<Vec<(Variant, String, LiveImageConfig)>> {
        let compose = &self.ctx.compose;
        let mut jobs = Vec::new();
        for variant in compose.variants().all() {
            for conf in overrides::variant_items(&compose.conf.live_images, &variant.uid)? {
                for arch in block_arches(variant, &conf.arches) {
                    jobs.push((variant.clone(), arch, conf.clone()));
                }
            }
        }
        Ok(jobs)
    }

    pub fn task(&self, variant: &Variant, arch: &str, conf: &LiveImageConfig) -> LiveTask {
        let compose = &self.ctx.compose;
        let mut repos = repo_urls(compose, arch, &conf.repo);
        repos.insert(
            0,
            super::buildinstall::as_url(compose, &compose.paths.os_tree(arch, &variant.uid).display().to_string()),
        );
        LiveTask {
            name: conf
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-{}-Live", compose.conf.release_short, variant.uid)),
            version: conf.version.clone().unwrap_or_else(|| compose.conf.release_version.clone()),
            target: conf.target.clone().unwrap_or_default(),
            arch: arch.to_string(),
            kickstart: conf.kickstart.clone(),
            ksurl: conf.ksurl.clone(),
            release: Some(format!("{}.{}", compose.ids.date, compose.ids.respin)),
            repos,
            specfile: conf.specfile.clone(),
            scratch: conf.scratch,
            image_type: conf.image_type.clone(),
        }
    }

    fn build(&self, variant: &Variant, arch: &str, conf: &LiveImageConfig) -> Result<()> {
        let compose = &self.ctx.compose;
        let task = self.task(variant, arch, conf);
        let log = compose.log_file(arch, &format!("liveimage-{}-{}", variant.uid, task.name))?;
        let task_id = koji_task::submit(compose, &koji::spin_live(compose.conf.koji_profile.as_deref(), &task), &log)?;

        let appliance = conf.image_type == "appliance";
        let (suffixes, dir, image_type, format) = if appliance {
            (&[".raw.xz", ".raw"][..], compose.paths.images_dir(arch, &variant.uid), "appliance", "raw.xz")
        } else {
            (&[".iso"][..], compose.paths.iso_dir(arch, &variant.uid), "live", "iso")
        };
        let subvariant = conf.subvariant.clone().unwrap_or_else(|| variant.uid.clone());
        for output in koji_task::collect(compose, task_id, suffixes, &log)? {
            let output = TaskOutput {
                arch: arch.to_string(),
                ..output
            };
            koji_task::publish(compose, &variant.uid, &output, &dir, image_type, format, &subvariant, !appliance)?;
        }
        Ok(())
    }
}

impl Phase for LiveimagesPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        !self.ctx.compose.conf.live_images.is_empty()
    }

    fn validate(&self) -> Vec<String> {
        self.ctx
            .compose
            .conf
            .live_images
            .iter()
            .flat_map(|(pattern, items)| items.iter().map(move |conf| (pattern, conf)))
            .filter(|(_, conf)| conf.target.is_none())
            .map(|(pattern, _)| format!("live_images block for {pattern} has no target"))
            .collect()
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![koji::KOJI]
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        self.jobs()?.par_iter().try_for_each(|(variant, arch, conf)| {
            compose
                .failable(Some(variant), arch, DELIVERABLE, || self.build(variant, arch, conf))
                .map(|_| ())
        })
    }
}
