// src/phases/test.rs

//! Post-compose sanity checks
//!
//! Runs `dnf repoclosure` over every variant's binary repository and
//! checks that every ISO carries an ISO9660 signature.

use super::{Phase, PhaseContext};
use crate::arch::TreeArch;
use crate::compose::{Compose, RepoKind};
use crate::config::RepoclosureStrictness;
use crate::error::{Error, Result};
use crate::tools::{self, repoclosure, Requirement};
use crate::tools::iso::has_iso9660_signature;
use crate::variants::Variant;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NAME: &str = "test";

pub struct TestPhase {
    ctx: Arc<PhaseContext>,
}

impl TestPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn strictness(&self, variant: &Variant, arch: &str) -> Result<RepoclosureStrictness> {
        let compose = &self.ctx.compose;
        Ok(compose
            .conf_scalar(&compose.conf.repoclosure_strictness, arch, Some(variant))?
            .unwrap_or(RepoclosureStrictness::Lenient))
    }

    /// (check repos, lookaside repos) for one variant tree
    pub fn repos(compose: &Compose, variant: &Variant, arch: &str) -> Result<(Vec<(String, String)>, Vec<(String, String)>)> {
        let tree = compose.paths.repository(arch, &variant.uid, RepoKind::Binary);
        let check = vec![(format!("{}-{}", variant.uid, arch), tree.display().to_string())];

        let mut lookaside = Vec::new();
        if let Some(parent) = compose.variants().parent(variant) {
            let parent_tree = compose.paths.repository(arch, &parent.uid, RepoKind::Binary);
            lookaside.push((format!("{}-{}", parent.uid, arch), parent_tree.display().to_string()));
        }
        let extra = compose.conf_list(&compose.conf.gather_lookaside_repos, arch, Some(variant))?;
        for (i, location) in extra.into_iter().enumerate() {
            lookaside.push((format!("lookaside-{i}"), location));
        }
        Ok((check, lookaside))
    }

    fn repoclosure(&self, variant: &Variant, arch: &str) -> Result<()> {
        let compose = &self.ctx.compose;
        let strictness = self.strictness(variant, arch)?;
        if strictness == RepoclosureStrictness::Off {
            debug!("repoclosure disabled for {}.{}", variant.uid, arch);
            return Ok(());
        }
        let tree = compose.paths.repository(arch, &variant.uid, RepoKind::Binary);
        if !tree.join("repodata").is_dir() {
            debug!("No repository in {}, skipping repoclosure", tree.display());
            return Ok(());
        }

        let (check, lookaside) = Self::repos(compose, variant, arch)?;
        let tree_arch = TreeArch::new(arch);
        let cmd = repoclosure::command(&tree_arch.priority_list(), &check, &lookaside);
        let log = compose.log_file(arch, &format!("repoclosure-{}", variant.uid))?;
        match tools::run(&cmd, &log) {
            Ok(()) => Ok(()),
            Err(e) if strictness == RepoclosureStrictness::Lenient => {
                warn!("Repoclosure failed for {}.{}: {} (see {})", variant.uid, arch, e, log.display());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Every ISO in the images index that lacks an ISO9660 signature
    pub fn broken_isos(compose: &Compose) -> Result<Vec<String>> {
        let compose_dir = compose.paths.compose_dir();
        let isos: Vec<String> = compose.with_images(|index| {
            index
                .iter()
                .filter(|(_, _, image)| image.format == "iso")
                .map(|(_, _, image)| image.path.clone())
                .collect()
        });
        let mut broken = Vec::new();
        for path in isos {
            if !has_iso9660_signature(&compose_dir.join(&path))? {
                broken.push(path);
            }
        }
        Ok(broken)
    }
}

impl Phase for TestPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![repoclosure::DNF]
    }

    fn start(&self) -> Result<()> {
        for (variant, arch) in self.ctx.variant_arches() {
            self.repoclosure(&variant, &arch)?;
        }

        let broken = Self::broken_isos(&self.ctx.compose)?;
        if !broken.is_empty() {
            return Err(Error::phase(
                NAME,
                format!("images without an ISO9660 signature: {}", broken.join(", ")),
            ));
        }
        info!("Compose checks passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Image;
    use crate::phases::tests::context_in;

    #[test]
    fn test_optional_resolves_against_parent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(
            dir.path(),
            "gather_lookaside_repos = [[\"Server.*\", { \"*\" = [\"https://example.com/base\"] }]]",
        );
        let compose = &ctx.compose;
        let optional = compose.variants().by_uid("Server-optional").unwrap().clone();
        let (check, lookaside) = TestPhase::repos(compose, &optional, "x86_64").unwrap();
        assert_eq!(check[0].0, "Server-optional-x86_64");
        assert_eq!(lookaside[0].0, "Server-x86_64");
        assert!(lookaside[0].1.ends_with("compose/Server/x86_64/os"));
        assert_eq!(lookaside[1], ("lookaside-0".to_string(), "https://example.com/base".to_string()));
    }

    #[test]
    fn test_strictness_override() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), "repoclosure_strictness = [[\"^Server$\", { \"*\" = \"off\" }]]");
        let phase = TestPhase::new(Arc::clone(&ctx));
        let compose = &ctx.compose;
        let server = compose.variants().by_uid("Server").unwrap().clone();
        let optional = compose.variants().by_uid("Server-optional").unwrap().clone();
        assert_eq!(phase.strictness(&server, "x86_64").unwrap(), RepoclosureStrictness::Off);
        assert_eq!(phase.strictness(&optional, "x86_64").unwrap(), RepoclosureStrictness::Lenient);
    }

    #[test]
    fn test_iso_signature_check() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), "");
        let compose = &ctx.compose;
        let relative = "Server/x86_64/iso/bad.iso";
        let path = compose.paths.compose_dir().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![0u8; 40 * 1024]).unwrap();
        let image = Image::from_file(&path, relative, "dvd", "iso", "x86_64", "Server").unwrap();
        compose.add_image("Server", "x86_64", image);

        assert_eq!(TestPhase::broken_isos(compose).unwrap(), vec![relative.to_string()]);
        let err = TestPhase::new(Arc::clone(&ctx)).start().unwrap_err();
        assert!(err.to_string().contains("bad.iso"));
    }
}
