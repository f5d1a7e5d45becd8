// src/phases/createiso.rs

//! Installation DVDs for every published tree
//!
//! One ISO per (top-level variant, arch) from the os tree, and one source
//! ISO per variant. Bootable trees get El Torito boot records, an MBR via
//! isohybrid on x86 and an implanted md5 checksum.

use super::{Phase, PhaseContext};
use crate::compose::{Compose, RepoKind};
use crate::error::Result;
use crate::metadata::Image;
use crate::notifier;
use crate::tools::{self, iso, runroot::Runroot, Requirement, ToolCommand};
use crate::variants::Variant;
use rayon::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const NAME: &str = "createiso";
pub const DELIVERABLE: &str = "iso";

const DISC_TYPE: &str = "dvd";

/// Everything needed to master one ISO
#[derive(Debug, Clone, PartialEq)]
pub struct IsoJob {
    pub variant: String,
    pub arch: String,
    pub name: String,
    pub image_type: String,
    pub options: iso::IsoOptions,
    pub graft_points: BTreeMap<String, PathBuf>,
}

impl IsoJob {
    /// mkisofs, then isohybrid for bootable x86, then implantisomd5
    pub fn commands(&self) -> Vec<ToolCommand> {
        let mut cmds = vec![iso::mkisofs(&self.options)];
        if self.options.bootable && matches!(self.arch.as_str(), "x86_64" | "i386" | "i686") {
            cmds.push(iso::isohybrid(&self.options.output, self.arch == "x86_64"));
        }
        cmds.push(iso::implantisomd5(&self.options.output));
        cmds
    }
}

/// Run a chain of commands, as a single shell command under runroot
pub(crate) fn run_chain(compose: &Compose, cmds: Vec<ToolCommand>, arch: &str, packages: &[&str], log: &Path) -> Result<()> {
    let runroot = Runroot::from_config(&compose.conf);
    if !runroot.is_remote() {
        return cmds.iter().try_for_each(|cmd| tools::run(cmd, log));
    }
    let script: Vec<String> = cmds.iter().map(ToolCommand::to_shell).collect();
    let chained = ToolCommand::new("sh").arg("-c").arg(script.join(" && "));
    let topdir = compose.topdir().display().to_string();
    tools::run(&runroot.wrap(chained, arch, packages, &[topdir.as_str()]), log)
}

/// Write the graft points, master the ISO and record it in the images index
pub(crate) fn master(compose: &Compose, job: &IsoJob) -> Result<()> {
    let staging = compose.paths.iso_staging_dir(&job.arch, &job.name);
    std::fs::create_dir_all(&staging)?;
    std::fs::write(&job.options.graft_points, iso::render_graft_points(&job.graft_points))?;
    if let Some(parent) = job.options.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if job.options.output.exists() {
        std::fs::remove_file(&job.options.output)?;
    }

    let packages: Vec<&str> = iso::requirements(&job.options).iter().map(|r| r.package).collect();
    let log = compose.log_file(&job.arch, &format!("createiso-{}", job.name))?;
    info!("Creating {}", job.name);
    run_chain(compose, job.commands(), &job.arch, &packages, &log)?;

    let relative = compose.paths.relative_to_compose(&job.options.output).display().to_string();
    let mut image = Image::from_file(&job.options.output, &relative, &job.image_type, "iso", &job.arch, &job.variant)?;
    image.volume_id = Some(job.options.volid.clone());
    image.bootable = job.options.bootable;
    compose.add_image(&job.variant, &job.arch, image);
    compose.notifier.send(
        notifier::IMAGE_DONE,
        json!({"file": relative, "arch": job.arch, "variant": job.variant}),
    );
    Ok(())
}

pub struct CreateisoPhase {
    ctx: Arc<PhaseContext>,
}

impl CreateisoPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn is_skipped_for(&self, variant: &Variant, arch: &str) -> Result<bool> {
        let compose = &self.ctx.compose;
        Ok(compose
            .conf_scalar(&compose.conf.createiso_skip, arch, Some(variant))?
            .unwrap_or(false))
    }

    /// ISO of one tree; `None` when the tree is skipped or empty
    pub fn plan(&self, variant: &Variant, arch: &str) -> Result<Option<IsoJob>> {
        let compose = &self.ctx.compose;
        if self.is_skipped_for(variant, arch)? {
            info!("Skipping ISO for {}.{}", variant.uid, arch);
            return Ok(None);
        }
        let (kind, image_type) = if arch == "src" {
            (RepoKind::Source, "source")
        } else {
            (RepoKind::Binary, DISC_TYPE)
        };
        let tree = compose.paths.repository(arch, &variant.uid, kind);
        if !tree.is_dir() {
            warn!("No {} tree for {}, not creating an ISO", arch, variant.uid);
            return Ok(None);
        }
        let graft_points = iso::tree_graft_points(&tree)?;
        if graft_points.is_empty() {
            return Ok(None);
        }

        let name = compose.image_name(variant, arch, DISC_TYPE, None, ".iso")?;
        let bootable = arch != "src" && self.ctx.state.is_bootable(&variant.uid, arch);
        let options = iso::IsoOptions {
            output: compose.paths.iso_dir(arch, &variant.uid).join(&name),
            volid: compose.volume_id(variant, arch, DISC_TYPE)?,
            arch: arch.to_string(),
            bootable,
            use_xorrisofs: compose.conf.createiso_use_xorrisofs,
            graft_points: compose.paths.iso_staging_dir(arch, &name).join("graft-points"),
        };
        Ok(Some(IsoJob {
            variant: variant.uid.clone(),
            arch: arch.to_string(),
            name,
            image_type: image_type.to_string(),
            options,
            graft_points,
        }))
    }

    fn targets(&self) -> Vec<(Variant, String)> {
        let mut targets: Vec<(Variant, String)> = self
            .ctx
            .variant_arches()
            .into_iter()
            .filter(|(variant, _)| variant.is_top_level())
            .collect();
        for variant in self.ctx.compose.variants().top_level() {
            targets.push((variant.clone(), "src".to_string()));
        }
        targets
    }
}

impl Phase for CreateisoPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn requirements(&self) -> Vec<Requirement> {
        let conf = &self.ctx.compose.conf;
        let mut reqs = vec![
            if conf.createiso_use_xorrisofs { iso::XORRISOFS } else { iso::GENISOIMAGE },
            iso::IMPLANTISOMD5,
        ];
        let x86 = self
            .ctx
            .tree_arches()
            .iter()
            .any(|a| matches!(a.as_str(), "x86_64" | "i386" | "i686"));
        if conf.bootable && x86 {
            reqs.push(iso::ISOHYBRID);
        }
        reqs
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        self.targets().par_iter().try_for_each(|(variant, arch)| {
            compose
                .failable(Some(variant), arch, DELIVERABLE, || match self.plan(variant, arch)? {
                    Some(job) => master(compose, &job),
                    None => Ok(()),
                })
                .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests::context_in;
    use crate::phases::lock;

    fn populate(ctx: &PhaseContext) {
        let paths = &ctx.compose.paths;
        let packages = paths.packages_dir("x86_64", "Server", RepoKind::Binary);
        std::fs::create_dir_all(&packages).unwrap();
        std::fs::write(packages.join("bash-5.2-1.fc40.x86_64.rpm"), b"rpm").unwrap();
        let source = paths.packages_dir("src", "Server", RepoKind::Source);
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("bash-5.2-1.fc40.src.rpm"), b"srpm").unwrap();
    }

    #[test]
    fn test_plan_binary_and_source_isos() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), "");
        populate(&ctx);
        let phase = CreateisoPhase::new(Arc::clone(&ctx));
        let server = ctx.compose.variants().by_uid("Server").unwrap().clone();

        let job = phase.plan(&server, "x86_64").unwrap().unwrap();
        assert_eq!(job.name, "Fedora-Server-40-x86_64-dvd.iso");
        assert_eq!(job.options.volid, "Fedora-40 Server.x86_64");
        assert!(!job.options.bootable);
        assert_eq!(
            job.graft_points.keys().collect::<Vec<_>>(),
            vec!["Packages/bash-5.2-1.fc40.x86_64.rpm"]
        );
        let programs: Vec<String> = job.commands().iter().map(|c| c.program.clone()).collect();
        assert_eq!(programs, vec!["genisoimage", "implantisomd5"]);

        let source = phase.plan(&server, "src").unwrap().unwrap();
        assert_eq!(source.name, "Fedora-Server-40-source-dvd.iso");
        assert_eq!(source.image_type, "source");
        assert!(source.options.output.ends_with("compose/Server/source/iso/Fedora-Server-40-source-dvd.iso"));
    }

    #[test]
    fn test_bootable_tree_gets_isohybrid() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), "");
        populate(&ctx);
        lock(&ctx.state.boot_images).insert(("Server".to_string(), "x86_64".to_string()), Vec::new());
        let phase = CreateisoPhase::new(Arc::clone(&ctx));
        let server = ctx.compose.variants().by_uid("Server").unwrap().clone();
        let job = phase.plan(&server, "x86_64").unwrap().unwrap();
        assert!(job.options.bootable);
        let programs: Vec<String> = job.commands().iter().map(|c| c.program.clone()).collect();
        assert_eq!(programs, vec!["genisoimage", "isohybrid", "implantisomd5"]);
        assert_eq!(job.commands()[1].args, vec!["--uefi", job.options.output.to_str().unwrap()]);
    }

    #[test]
    fn test_skip_and_empty_trees() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), "createiso_skip = [[\"^Server$\", { x86_64 = true }]]");
        populate(&ctx);
        let phase = CreateisoPhase::new(Arc::clone(&ctx));
        let server = ctx.compose.variants().by_uid("Server").unwrap().clone();
        assert!(phase.plan(&server, "x86_64").unwrap().is_none());
        assert!(phase.plan(&server, "src").unwrap().is_some());

        let targets: Vec<(String, String)> = phase
            .targets()
            .into_iter()
            .map(|(v, a)| (v.uid, a))
            .collect();
        assert_eq!(
            targets,
            vec![
                ("Server".to_string(), "x86_64".to_string()),
                ("Server".to_string(), "src".to_string())
            ]
        );
    }
}
