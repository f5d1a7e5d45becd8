// src/phases/productimg.rs

//! product.img for bootable trees
//!
//! The installer loads `images/product.img` from the tree and picks up the
//! install class and buildstamp inside it.

use super::{lock, Phase, PhaseContext};
use crate::error::{Error, Result};
use crate::scm;
use crate::tools::{self, squashfs, Requirement};
use crate::variants::Variant;
use rayon::prelude::*;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

pub const NAME: &str = "productimg";

pub const IMAGE: &str = "images/product.img";
const INSTALL_CLASS_DIR: &str = "run/install/product/pyanaconda/installclasses";

pub struct ProductimgPhase {
    ctx: Arc<PhaseContext>,
}

impl ProductimgPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn buildstamp(&self, variant: &Variant) -> String {
        let compose = &self.ctx.compose;
        let conf = &compose.conf;
        let mut text = String::from("[Main]\n");
        let _ = writeln!(text, "Product={}", conf.release_name);
        let _ = writeln!(text, "Version={}", conf.release_version);
        let _ = writeln!(text, "IsFinal={}", compose.supported);
        let _ = writeln!(text, "UUID={}.{}", compose.compose_id(), variant.uid);
        text.push_str("\n[Compose]\n");
        let _ = writeln!(text, "Id={}", compose.compose_id());
        text
    }

    fn build(&self, variant: &Variant, arch: &str) -> Result<()> {
        let compose = &self.ctx.compose;
        let spec = compose
            .conf
            .productimg_install_class
            .as_ref()
            .ok_or_else(|| Error::phase(NAME, "productimg_install_class is not set"))?;
        let workdir = compose.paths.productimg_dir(arch, &variant.uid);
        if workdir.exists() {
            std::fs::remove_dir_all(&workdir)?;
        }
        let log = compose.log_file(arch, &format!("productimg-{}", variant.uid))?;
        let staging = workdir.join("product");
        scm::fetch(spec, &staging.join(INSTALL_CLASS_DIR), &log)?;
        std::fs::write(staging.join(".buildstamp"), self.buildstamp(variant))?;

        let output = compose.paths.os_tree(arch, &variant.uid).join(IMAGE);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Creating product.img for {}.{}", variant.uid, arch);
        let cmd = squashfs::command(&staging, &output, &squashfs::SquashfsOptions::default());
        tools::run(&cmd, &log)?;

        lock(&self.ctx.state.boot_images)
            .entry((variant.uid.clone(), arch.to_string()))
            .or_default()
            .push(("product.img".to_string(), IMAGE.to_string()));
        Ok(())
    }
}

impl Phase for ProductimgPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        let conf = &self.ctx.compose.conf;
        conf.productimg && conf.bootable
    }

    fn requirements(&self) -> Vec<Requirement> {
        let mut reqs = vec![squashfs::MKSQUASHFS];
        if let Some(spec) = &self.ctx.compose.conf.productimg_install_class {
            reqs.extend(scm::requirements(spec.kind()));
        }
        reqs
    }

    fn start(&self) -> Result<()> {
        let targets: Vec<(Variant, String)> = self
            .ctx
            .variant_arches()
            .into_iter()
            .filter(|(variant, arch)| variant.is_top_level() && self.ctx.state.is_bootable(&variant.uid, arch))
            .collect();
        targets
            .par_iter()
            .try_for_each(|(variant, arch)| self.build(variant, arch))
    }
}
