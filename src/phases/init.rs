// src/phases/init.rs

//! Comps preparation
//!
//! Fetches the comps file, writes a filtered copy per tree arch and per
//! (variant, arch), and builds a small repository carrying only the group
//! metadata.

use super::createrepo::repo_options;
use super::{Phase, PhaseContext};
use crate::comps::Comps;
use crate::error::Result;
use crate::gather::source::variant_groups;
use crate::scm;
use crate::tools::{self, createrepo, Requirement};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const NAME: &str = "init";

pub struct InitPhase {
    ctx: Arc<PhaseContext>,
}

impl InitPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    /// Fetch comps into `work/global/comps.xml`
    fn fetch_comps(&self) -> Result<Option<Comps>> {
        let compose = &self.ctx.compose;
        let Some(spec) = &compose.conf.comps_file else {
            debug!("No comps_file configured");
            return Ok(None);
        };
        let global = compose.paths.work_global();
        let log = compose.log_file("global", "scm-comps")?;
        let fetched = scm::fetch_file(spec, &global.join("comps"), &log)?;
        let comps = Comps::load(&fetched)?;
        comps.write(&compose.paths.comps(None))?;
        info!(
            "Loaded comps with {} groups and {} environments",
            comps.groups.len(),
            comps.environments.len()
        );
        Ok(Some(comps))
    }

    fn write_arch_comps(&self, comps: &Comps, arch: &str) -> Result<()> {
        let compose = &self.ctx.compose;
        let arch_comps = comps.filter_arch(arch);
        arch_comps.write(&compose.paths.comps(Some(arch)))?;

        for variant in compose.variants().all() {
            if !variant.arches.contains(arch) {
                continue;
            }
            let keep: BTreeSet<String> = variant_groups(&arch_comps, variant).into_iter().collect();
            arch_comps
                .filter_groups(&keep)
                .write(&compose.paths.variant_comps(arch, &variant.uid))?;
        }

        let repo = compose.paths.comps_repo(arch);
        std::fs::create_dir_all(&repo)?;
        let mut opts = repo_options(&compose.conf, &repo);
        opts.groupfile = Some(compose.paths.comps(Some(arch)));
        tools::run(
            &createrepo::command(&opts),
            &compose.log_file(arch, "comps_repo")?,
        )
    }
}

impl Phase for InitPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn requirements(&self) -> Vec<Requirement> {
        let conf = &self.ctx.compose.conf;
        match &conf.comps_file {
            Some(spec) => {
                let mut reqs = scm::requirements(spec.kind());
                reqs.push(repo_options(conf, "").requirement());
                reqs
            }
            None => Vec::new(),
        }
    }

    fn start(&self) -> Result<()> {
        let Some(comps) = self.fetch_comps()? else {
            return Ok(());
        };
        for arch in self.ctx.tree_arches() {
            self.write_arch_comps(&comps, &arch)?;
        }
        Ok(())
    }
}
