// src/phases/extra_isos.rs

//! ISOs combining several variants
//!
//! The variant owning an `extra_isos` block provides the ISO root; each
//! included variant's tree is grafted below a directory named after its
//! uid. Extra files are fetched and placed at the root.

use super::createiso::{master, IsoJob};
use super::extrafiles;
use super::{block_arches, Phase, PhaseContext};
use crate::compose::{naming, overrides, RepoKind};
use crate::config::{ChecksumType, ExtraIsoConfig};
use crate::error::Result;
use crate::metadata;
use crate::scm;
use crate::tools::{iso, Requirement};
use crate::variants::Variant;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub const NAME: &str = "extra_isos";
pub const DELIVERABLE: &str = "extra-iso";

const DISC_TYPE: &str = "extra";

pub struct ExtraIsosPhase {
    ctx: Arc<PhaseContext>,
}

impl ExtraIsosPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn jobs(&self) -> Result<Vec<(Variant, String, ExtraIsoConfig)>> {
        let compose = &self.ctx.compose;
        let mut jobs = Vec::new();
        for variant in compose.variants().all() {
            for conf in overrides::variant_items(&compose.conf.extra_isos, &variant.uid)? {
                for arch in block_arches(variant, &conf.arches) {
                    jobs.push((variant.clone(), arch, conf.clone()));
                }
                if !conf.skip_src {
                    jobs.push((variant.clone(), "src".to_string(), conf.clone()));
                }
            }
        }
        Ok(jobs)
    }

    fn tree(&self, uid: &str, arch: &str) -> PathBuf {
        let kind = if arch == "src" { RepoKind::Source } else { RepoKind::Binary };
        self.ctx.compose.paths.repository(arch, uid, kind)
    }

    /// Graft points of the owning tree, the included trees and extra files
    fn contents(
        &self,
        variant: &Variant,
        arch: &str,
        conf: &ExtraIsoConfig,
        extra_dir: Option<PathBuf>,
    ) -> Result<BTreeMap<String, PathBuf>> {
        let mut graft = BTreeMap::new();
        let own = self.tree(&variant.uid, arch);
        if own.is_dir() {
            graft.extend(iso::tree_graft_points(&own)?);
        }
        for included in &conf.include_variants {
            let tree = self.tree(included, arch);
            if !tree.is_dir() {
                warn!("Included variant {} has no {} tree", included, arch);
                continue;
            }
            for (path, host) in iso::tree_graft_points(&tree)? {
                graft.insert(format!("{included}/{path}"), host);
            }
        }
        if let Some(dir) = extra_dir {
            graft.extend(iso::tree_graft_points(&dir)?);
        }
        Ok(graft)
    }

    pub fn plan(
        &self,
        variant: &Variant,
        arch: &str,
        conf: &ExtraIsoConfig,
        extra_dir: Option<PathBuf>,
    ) -> Result<IsoJob> {
        let compose = &self.ctx.compose;
        let label = naming::image_variant_label(compose.variants(), variant);
        let format = conf.filename.as_deref().unwrap_or(&compose.conf.image_name_format);
        let name = compose.ids.image_name(format, label, arch, DISC_TYPE, None, ".iso")?;
        let volid = match &conf.volid {
            Some(formats) => compose.ids.volume_id(&formats.to_vec(), label, arch, DISC_TYPE)?,
            None => compose.volume_id(variant, arch, DISC_TYPE)?,
        };
        let options = iso::IsoOptions {
            output: compose.paths.iso_dir(arch, &variant.uid).join(&name),
            volid,
            arch: arch.to_string(),
            bootable: arch != "src" && self.ctx.state.is_bootable(&variant.uid, arch),
            use_xorrisofs: compose.conf.createiso_use_xorrisofs,
            graft_points: compose.paths.iso_staging_dir(arch, &name).join("graft-points"),
        };
        Ok(IsoJob {
            variant: variant.uid.clone(),
            arch: arch.to_string(),
            graft_points: self.contents(variant, arch, conf, extra_dir)?,
            name,
            image_type: DISC_TYPE.to_string(),
            options,
        })
    }

    /// Fetch the block's extra files into a staging directory
    fn fetch_extra_files(&self, variant: &Variant, arch: &str, conf: &ExtraIsoConfig) -> Result<Option<PathBuf>> {
        if conf.extra_files.is_empty() {
            return Ok(None);
        }
        let compose = &self.ctx.compose;
        let dir = compose
            .paths
            .work_dir(arch)
            .join(&variant.uid)
            .join("extra-iso-extra-files");
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        let log = compose.log_file(arch, &format!("extra-iso-files-{}", variant.uid))?;
        for spec in &conf.extra_files {
            let target = spec.target().unwrap_or("").trim_start_matches('/');
            scm::fetch(spec, &dir.join(target), &log)?;
        }
        let files = extrafiles::list_files(&dir, &[ChecksumType::Sha256])?;
        metadata::write_document(
            &dir.join(extrafiles::METADATA_FILE),
            "extra_files",
            &serde_json::json!({ "data": files }),
        )?;
        Ok(Some(dir))
    }

    fn build(&self, variant: &Variant, arch: &str, conf: &ExtraIsoConfig) -> Result<()> {
        let extra_dir = self.fetch_extra_files(variant, arch, conf)?;
        let job = self.plan(variant, arch, conf, extra_dir)?;
        if job.graft_points.is_empty() {
            warn!("Nothing to put on {}", job.name);
            return Ok(());
        }
        master(&self.ctx.compose, &job)
    }
}

impl Phase for ExtraIsosPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        !self.ctx.compose.conf.extra_isos.is_empty()
    }

    fn validate(&self) -> Vec<String> {
        let compose = &self.ctx.compose;
        compose
            .conf
            .extra_isos
            .iter()
            .flat_map(|(_, items)| items.iter())
            .flat_map(|conf| conf.include_variants.iter())
            .filter(|uid| compose.variants().by_uid(uid).is_none())
            .map(|uid| format!("extra_isos includes unknown variant {uid}"))
            .collect()
    }

    fn requirements(&self) -> Vec<Requirement> {
        let conf = &self.ctx.compose.conf;
        let mut reqs = vec![
            if conf.createiso_use_xorrisofs { iso::XORRISOFS } else { iso::GENISOIMAGE },
            iso::IMPLANTISOMD5,
        ];
        for spec in conf.extra_isos.iter().flat_map(|(_, items)| items.iter()).flat_map(|c| c.extra_files.iter()) {
            reqs.extend(scm::requirements(spec.kind()));
        }
        reqs.dedup();
        reqs
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        self.jobs()?.par_iter().try_for_each(|(variant, arch, conf)| {
            compose
                .failable_on(Some(variant), arch, DELIVERABLE, &conf.failable_arches, || {
                    self.build(variant, arch, conf)
                })
                .map(|_| ())
        })
    }
}
