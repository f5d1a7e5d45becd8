// src/phases/buildinstall.rs

//! Installer trees built with lorax
//!
//! Runs once per (top-level variant, arch) when the compose is bootable.
//! The lorax output is copied into the variant's os tree and its boot
//! images are recorded for the ISO and treeinfo writers.

use super::{lock, Phase, PhaseContext};
use crate::compose::{overrides, Compose, ComposeType};
use crate::config::{LoraxOptions, PkgsetSource};
use crate::error::Result;
use crate::scm;
use crate::tools::{self, lorax, runroot::Runroot, Requirement};
use crate::variants::Variant;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};

pub const NAME: &str = "buildinstall";
pub const DELIVERABLE: &str = "buildinstall";

/// Local path as a URL, after `translate_paths`
pub(crate) fn as_url(compose: &Compose, location: &str) -> String {
    if location.contains("://") {
        return location.to_string();
    }
    let translated = compose.conf.translate_path(location);
    if translated.contains("://") {
        translated
    } else {
        format!("file://{translated}")
    }
}

/// Repositories holding the package set of `arch`
pub(crate) fn package_sources(compose: &Compose, arch: &str) -> Vec<String> {
    match compose.conf.pkgset_source {
        PkgsetSource::Koji => vec![as_url(compose, &compose.paths.pkgset_repo(arch).display().to_string())],
        PkgsetSource::Repos => compose
            .conf
            .pkgset_repos
            .get(arch)
            .map(|repos| repos.iter().map(|r| as_url(compose, r)).collect())
            .unwrap_or_default(),
    }
}

/// Lorax options for a variant; the last matching entry wins
pub(crate) fn lorax_options(compose: &Compose, uid: &str) -> Result<LoraxOptions> {
    Ok(overrides::variant_items(&compose.conf.lorax_options, uid)?
        .into_iter()
        .last()
        .cloned()
        .unwrap_or_else(|| LoraxOptions {
            nomacboot: true,
            noupgrade: true,
            ..LoraxOptions::default()
        }))
}

pub struct BuildinstallPhase {
    ctx: Arc<PhaseContext>,
}

impl BuildinstallPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn is_skipped_for(&self, variant: &Variant, arch: &str) -> Result<bool> {
        let compose = &self.ctx.compose;
        Ok(compose
            .conf_scalar(&compose.conf.buildinstall_skip, arch, Some(variant))?
            .unwrap_or(false))
    }

    fn lorax_run(&self, variant: &Variant, arch: &str) -> Result<lorax::LoraxRun> {
        let compose = &self.ctx.compose;
        let conf = &compose.conf;
        Ok(lorax::LoraxRun {
            product: conf.release_name.clone(),
            version: conf.release_version.clone(),
            release: conf.release_version.clone(),
            sources: package_sources(compose, arch),
            variant: Some(variant.uid.clone()),
            buildarch: arch.to_string(),
            volid: Some(compose.volume_id(variant, arch, "dvd")?),
            is_final: compose.ids.compose_type == ComposeType::Production,
            options: lorax_options(compose, &variant.uid)?,
            installpkgs: Vec::new(),
            logfile: Some(compose.paths.log_dir(arch).join(format!("lorax-{}.log", variant.uid))),
            output: compose.paths.buildinstall_dir(arch, &variant.uid),
        })
    }

    fn build(&self, variant: &Variant, arch: &str) -> Result<()> {
        let compose = &self.ctx.compose;
        let run = self.lorax_run(variant, arch)?;
        if run.output.exists() {
            std::fs::remove_dir_all(&run.output)?;
        }
        if let Some(parent) = run.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let topdir = compose.topdir().display().to_string();
        let cmd = Runroot::from_config(&compose.conf).wrap(
            lorax::command(&run),
            arch,
            &[lorax::LORAX.package],
            &[topdir.as_str()],
        );
        info!("Running lorax for {}.{}", variant.uid, arch);
        tools::run(&cmd, &compose.log_file(arch, &format!("buildinstall-{}", variant.uid))?)?;

        let os_tree = compose.paths.os_tree(arch, &variant.uid);
        scm::copy_tree(&run.output, &os_tree)?;
        let images = lorax::boot_images(&os_tree);
        if images.is_empty() {
            warn!("lorax left no boot images in {}", os_tree.display());
        }
        lock(&self.ctx.state.boot_images).insert((variant.uid.clone(), arch.to_string()), images);
        Ok(())
    }
}

impl Phase for BuildinstallPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        self.ctx.compose.conf.bootable
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![lorax::LORAX]
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        let mut targets = Vec::new();
        for (variant, arch) in self.ctx.variant_arches() {
            if !variant.is_top_level() {
                continue;
            }
            if self.is_skipped_for(&variant, &arch)? {
                info!("Skipping buildinstall for {}.{}", variant.uid, arch);
                continue;
            }
            targets.push((variant, arch));
        }

        targets.par_iter().try_for_each(|(variant, arch)| {
            compose
                .failable(Some(variant), arch, DELIVERABLE, || self.build(variant, arch))
                .map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::tests::context_in;

    #[test]
    fn test_configured_only_when_bootable() {
        let dir = tempfile::tempdir().unwrap();
        let phase = BuildinstallPhase::new(context_in(&dir.path().join("a"), ""));
        assert!(phase.skip());
        let phase = BuildinstallPhase::new(context_in(
            &dir.path().join("b"),
            "bootable = true\nbuildinstall_method = \"lorax\"",
        ));
        assert!(!phase.skip());
    }

    #[test]
    fn test_lorax_run() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(
            dir.path(),
            r#"
bootable = true
buildinstall_method = "lorax"
translate_paths = [["/srv", "http://mirror.example.com/srv"]]
lorax_options = [["^Server$", { bugurl = "https://bugz", nomacboot = false }]]
"#,
        );
        let phase = BuildinstallPhase::new(Arc::clone(&ctx));
        let variant = ctx.compose.variants().by_uid("Server").unwrap().clone();
        let run = phase.lorax_run(&variant, "x86_64").unwrap();
        assert_eq!(run.sources, vec!["http://mirror.example.com/srv/repos/x86_64"]);
        assert_eq!(run.options.bugurl.as_deref(), Some("https://bugz"));
        assert!(!run.options.nomacboot);
        assert!(run.options.noupgrade);
        assert!(run.is_final);
        assert!(run.volid.unwrap().len() <= 32);
    }
}
