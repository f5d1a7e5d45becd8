// src/phases/ostree_installer.rs

//! Installer ISOs that deploy an OSTree commit
//!
//! lorax runs with the templates configured in the `ostree_installer`
//! block, optionally taken from a git repository. The resulting boot.iso
//! is published in the variant's iso directory.

use super::{block_arches, buildinstall, repo_urls, Phase, PhaseContext};
use crate::compose::overrides;
use crate::config::{LoraxOptions, OneOrMany, OstreeInstallerConfig, ScmKind, ScmSpec, ScmTable};
use crate::error::{Error, Result};
use crate::metadata::Image;
use crate::scm;
use crate::tools::{self, lorax, runroot::Runroot, Requirement};
use crate::variants::Variant;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const NAME: &str = "ostree_installer";
pub const DELIVERABLE: &str = "ostree-installer";

const DISC_TYPE: &str = "ostree";

/// Template paths resolved against a fetched template checkout
fn resolve_templates(templates: &[String], template_dir: Option<&Path>) -> Vec<String> {
    templates
        .iter()
        .map(|t| match template_dir {
            Some(dir) if !t.starts_with('/') => dir.join(t).display().to_string(),
            _ => t.clone(),
        })
        .collect()
}

pub struct OstreeInstallerPhase {
    ctx: Arc<PhaseContext>,
}

impl OstreeInstallerPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn jobs(&self) -> Result<Vec<(Variant, String, OstreeInstallerConfig)>> {
        let compose = &self.ctx.compose;
        let mut jobs = Vec::new();
        for variant in compose.variants().all() {
            for conf in overrides::variant_items(&compose.conf.ostree_installer, &variant.uid)? {
                for arch in block_arches(variant, &conf.arches) {
                    jobs.push((variant.clone(), arch, conf.clone()));
                }
            }
        }
        Ok(jobs)
    }

    fn lorax_run(
        &self,
        variant: &Variant,
        arch: &str,
        conf: &OstreeInstallerConfig,
        template_dir: Option<&Path>,
    ) -> Result<lorax::LoraxRun> {
        let compose = &self.ctx.compose;
        let os_tree = compose.paths.os_tree(arch, &variant.uid).display().to_string();
        let mut sources = vec![buildinstall::as_url(compose, &os_tree)];
        sources.extend(repo_urls(compose, arch, &conf.repo));
        let workdir = compose.paths.ostree_installer_dir(arch, &variant.uid);
        Ok(lorax::LoraxRun {
            product: compose.conf.release_name.clone(),
            version: compose.conf.release_version.clone(),
            release: conf.release.clone().unwrap_or_else(|| compose.conf.release_version.clone()),
            sources,
            variant: Some(variant.uid.clone()),
            buildarch: arch.to_string(),
            volid: Some(compose.volume_id(variant, arch, DISC_TYPE)?),
            is_final: false,
            options: LoraxOptions {
                nomacboot: true,
                noupgrade: true,
                add_template: resolve_templates(&conf.add_template, template_dir),
                add_arch_template: resolve_templates(&conf.add_arch_template, template_dir),
                add_template_var: conf.add_template_var.clone(),
                add_arch_template_var: conf.add_arch_template_var.clone(),
                rootfs_size: conf.rootfs_size,
                ..LoraxOptions::default()
            },
            installpkgs: conf.installpkgs.clone(),
            logfile: Some(compose.paths.log_dir(arch).join(format!("lorax-ostree-{}.log", variant.uid))),
            output: workdir.join("output"),
        })
    }

    fn build(&self, variant: &Variant, arch: &str, conf: &OstreeInstallerConfig) -> Result<()> {
        let compose = &self.ctx.compose;
        let workdir = compose.paths.ostree_installer_dir(arch, &variant.uid);
        if workdir.exists() {
            std::fs::remove_dir_all(&workdir)?;
        }
        std::fs::create_dir_all(&workdir)?;
        let log = compose.log_file(arch, &format!("ostree-installer-{}", variant.uid))?;

        let template_dir = match &conf.template_repo {
            Some(repo) => {
                let dir = workdir.join("templates");
                let spec = ScmSpec::Table(ScmTable {
                    scm: ScmKind::Git,
                    repo: Some(repo.clone()),
                    branch: conf.template_branch.clone(),
                    file: None,
                    dir: Some(OneOrMany::One(".".to_string())),
                    command: None,
                    target: None,
                });
                scm::fetch(&spec, &dir, &log)?;
                Some(dir)
            }
            None => None,
        };

        let run = self.lorax_run(variant, arch, conf, template_dir.as_deref())?;
        let topdir = compose.topdir().display().to_string();
        let cmd = Runroot::from_config(&compose.conf).wrap(
            lorax::command(&run),
            arch,
            &[lorax::LORAX.package],
            &[topdir.as_str()],
        );
        info!("Running lorax for the {}.{} ostree installer", variant.uid, arch);
        tools::run(&cmd, &log)?;

        let boot_iso = run.output.join("images").join("boot.iso");
        if !boot_iso.is_file() {
            return Err(Error::NotFound(format!("{} after lorax", boot_iso.display())));
        }
        let iso_dir = compose.paths.iso_dir(arch, &variant.uid);
        std::fs::create_dir_all(&iso_dir)?;
        let name = compose.image_name(variant, arch, DISC_TYPE, None, "boot.iso")?;
        let dest = iso_dir.join(&name);
        std::fs::copy(&boot_iso, &dest)?;

        let relative = compose.paths.relative_to_compose(&dest).display().to_string();
        let mut image = Image::from_file(&dest, &relative, "boot", "iso", arch, &variant.uid)?;
        image.volume_id = run.volid.clone();
        image.bootable = true;
        compose.add_image(&variant.uid, arch, image);
        Ok(())
    }
}

impl Phase for OstreeInstallerPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        !self.ctx.compose.conf.ostree_installer.is_empty()
    }

    fn requirements(&self) -> Vec<Requirement> {
        let mut reqs = vec![lorax::LORAX];
        let uses_git = self
            .ctx
            .compose
            .conf
            .ostree_installer
            .iter()
            .flat_map(|(_, items)| items.iter())
            .any(|conf| conf.template_repo.is_some());
        if uses_git {
            reqs.push(crate::scm::git::GIT);
        }
        reqs
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        self.jobs()?.par_iter().try_for_each(|(variant, arch, conf)| {
            compose
                .failable_on(Some(variant), arch, DELIVERABLE, &conf.failable, || {
                    self.build(variant, arch, conf)
                })
                .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests::context_in;

    const CONFIG: &str = r#"
ostree_installer = [
  ["^Server$", { release = "40.1", installpkgs = ["fedora-productimg-atomic"], add_template = ["ostree-based-installer/lorax-configure-repo.tmpl", "/abs/extra.tmpl"], add_template_var = ["ostree_osname=fedora-atomic"], template_repo = "https://pagure.io/fedora-lorax-templates.git", repo = ["Server"] }],
]
"#;

    #[test]
    fn test_templates_resolved_against_checkout() {
        assert_eq!(
            resolve_templates(&["a.tmpl".to_string(), "/abs/b.tmpl".to_string()], Some(Path::new("/w/templates"))),
            vec!["/w/templates/a.tmpl", "/abs/b.tmpl"]
        );
        assert_eq!(resolve_templates(&["a.tmpl".to_string()], None), vec!["a.tmpl"]);
    }

    #[test]
    fn test_lorax_run_from_block() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), CONFIG);
        let phase = OstreeInstallerPhase::new(Arc::clone(&ctx));
        let jobs = phase.jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        let (variant, arch, conf) = &jobs[0];

        let run = phase.lorax_run(variant, arch, conf, Some(Path::new("/w/templates"))).unwrap();
        assert_eq!(run.release, "40.1");
        assert_eq!(run.installpkgs, vec!["fedora-productimg-atomic"]);
        assert_eq!(
            run.options.add_template,
            vec!["/w/templates/ostree-based-installer/lorax-configure-repo.tmpl", "/abs/extra.tmpl"]
        );
        let os_tree = format!("file://{}", ctx.compose.paths.os_tree("x86_64", "Server").display());
        assert_eq!(run.sources, vec![os_tree.clone(), os_tree]);
        assert!(phase.requirements().iter().any(|r| r.tool == "git"));
    }
}
