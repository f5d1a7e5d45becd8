// src/phases/pkgset.rs

//! Package set loading
//!
//! Produces, per tree arch, every package record the gatherer may choose
//! from. Records come either from local repositories or from the latest
//! builds tagged in koji.

use super::createrepo::repo_options;
use super::{PackageSets, Phase, PhaseContext};
use crate::arch::TreeArch;
use crate::config::PkgsetSource;
use crate::error::{Error, Result};
use crate::pkgset::{self, koji, repodata, PackageRecord};
use crate::tools::{self, createrepo, koji as koji_cmd, Requirement};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const NAME: &str = "pkgset";

pub struct PkgsetPhase {
    ctx: Arc<PhaseContext>,
}

/// Repo id of the `index`-th configured repository of an arch
pub fn repo_id(arch: &str, index: usize) -> String {
    format!("pkgset-{arch}-{index}")
}

impl PkgsetPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn koji_source(&self) -> koji::KojiSource {
        let compose = &self.ctx.compose;
        let conf = &compose.conf;
        koji::KojiSource {
            profile: conf.koji_profile.clone(),
            tags: conf.pkgset_koji_tag.as_ref().map(|t| t.to_vec()).unwrap_or_default(),
            inherit: conf.pkgset_koji_inherit,
            event: compose.koji_event,
            topdir: PathBuf::from(&conf.koji_topdir),
            sigkeys: conf.sigkeys.clone(),
        }
    }

    fn load_repos(&self, arch: &str) -> Result<Vec<PackageRecord>> {
        let conf = &self.ctx.compose.conf;
        let Some(locations) = conf.pkgset_repos.get(arch) else {
            return Ok(Vec::new());
        };
        let mut records = Vec::new();
        for (i, location) in locations.iter().enumerate() {
            let dir = repodata::repo_dir(location)?;
            let loaded = repodata::load_repo(&dir, &repo_id(arch, i))?;
            debug!("{} packages in {}", loaded.len(), dir.display());
            records.extend(loaded);
        }
        Ok(records)
    }

    fn write_file_list(&self, arch: &str, records: &[PackageRecord]) -> Result<()> {
        let path = self.ctx.compose.paths.pkgset_file_list(arch);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = String::new();
        for record in records {
            let _ = writeln!(text, "{}", record.location);
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Repository over the tagged packages, indexed in place under the koji
    /// top directory
    fn create_koji_repo(&self, arch: &str, records: &[PackageRecord]) -> Result<()> {
        let compose = &self.ctx.compose;
        let topdir = Path::new(&compose.conf.koji_topdir);
        let pkglist = compose.paths.work_dir(arch).join("pkgset_pkglist");
        let mut text = String::new();
        for record in records {
            let path = Path::new(&record.location);
            let relative = path.strip_prefix(topdir).unwrap_or(path);
            let _ = writeln!(text, "{}", relative.display());
        }
        std::fs::create_dir_all(compose.paths.work_dir(arch))?;
        std::fs::write(&pkglist, text)?;

        let output = compose.paths.pkgset_repo(arch);
        std::fs::create_dir_all(&output)?;
        let mut opts = repo_options(&compose.conf, topdir);
        opts.pkglist = Some(pkglist);
        opts.outputdir = Some(output);
        tools::run(&createrepo::command(&opts), &compose.log_file(arch, "pkgset_repo")?)
    }
}

impl Phase for PkgsetPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn validate(&self) -> Vec<String> {
        let conf = &self.ctx.compose.conf;
        match conf.pkgset_source {
            PkgsetSource::Repos => self
                .ctx
                .tree_arches()
                .into_iter()
                .filter(|arch| !conf.pkgset_repos.contains_key(arch))
                .map(|arch| format!("pkgset_repos has no repositories for tree arch {arch}"))
                .collect(),
            PkgsetSource::Koji => match &conf.pkgset_koji_tag {
                Some(tags) if tags.iter().next().is_some() => Vec::new(),
                _ => vec!["pkgset_source = \"koji\" needs pkgset_koji_tag".to_string()],
            },
        }
    }

    fn requirements(&self) -> Vec<Requirement> {
        let conf = &self.ctx.compose.conf;
        match conf.pkgset_source {
            PkgsetSource::Repos => Vec::new(),
            PkgsetSource::Koji => vec![koji_cmd::KOJI, repo_options(conf, "").requirement()],
        }
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        let arches = self.ctx.tree_arches();
        let koji_records = match compose.conf.pkgset_source {
            PkgsetSource::Koji => Some(koji::load(&self.koji_source(), &compose.paths.log_dir("global"))?),
            PkgsetSource::Repos => None,
        };

        let by_arch: BTreeMap<String, Vec<PackageRecord>> = arches
            .par_iter()
            .map(|arch| {
                let records = match &koji_records {
                    Some(all) => all.clone(),
                    None => self.load_repos(arch)?,
                };
                let records = pkgset::filter_for_arch(records, &TreeArch::new(arch));
                self.write_file_list(arch, &records)?;
                if koji_records.is_some() {
                    self.create_koji_repo(arch, &records)?;
                }
                info!("Package set for {}: {} packages", arch, records.len());
                Ok((arch.clone(), records))
            })
            .collect::<Result<_>>()?;

        self.ctx
            .state
            .package_sets
            .set(PackageSets { by_arch })
            .map_err(|_| Error::phase(NAME, "package sets were already loaded"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::config_with;
    use crate::config::OneOrMany;
    use crate::phases::tests::context_from;
    use crate::pkgset::repodata::tests::{write_repo, PRIMARY_XML};

    #[test]
    fn test_loads_repos_per_arch() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        write_repo(&repo, PRIMARY_XML);
        let mut conf = config_with("");
        conf.pkgset_repos.insert(
            "x86_64".to_string(),
            OneOrMany::Many(vec![format!("file://{}", repo.display())]),
        );
        let ctx = context_from(&dir.path().join("composes"), conf);
        let phase = PkgsetPhase::new(Arc::clone(&ctx));
        assert!(phase.validate().is_empty());
        phase.start().unwrap();

        let sets = ctx.state.package_sets.get().unwrap();
        let names: Vec<String> = sets.by_arch["x86_64"].iter().map(|r| r.nvra()).collect();
        assert_eq!(names, vec!["bash-5.2-1.fc40.x86_64", "bash-5.2-1.fc40.src"]);
        assert_eq!(sets.by_arch["x86_64"][0].repo_id, "pkgset-x86_64-0");

        let list = std::fs::read_to_string(ctx.compose.paths.pkgset_file_list("x86_64")).unwrap();
        assert_eq!(list.lines().count(), 2);
    }

    #[test]
    fn test_missing_arch_repos_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut conf = config_with("");
        conf.pkgset_repos.clear();
        let phase = PkgsetPhase::new(context_from(dir.path(), conf));
        assert_eq!(
            phase.validate(),
            vec!["pkgset_repos has no repositories for tree arch x86_64"]
        );
    }

    #[test]
    fn test_koji_source_needs_tags() {
        let dir = tempfile::tempdir().unwrap();
        let mut conf = config_with("");
        conf.pkgset_source = PkgsetSource::Koji;
        let phase = PkgsetPhase::new(context_from(&dir.path().join("a"), conf.clone()));
        assert_eq!(phase.validate().len(), 1);

        conf.pkgset_koji_tag = Some(OneOrMany::One("f40".to_string()));
        let phase = PkgsetPhase::new(context_from(&dir.path().join("b"), conf));
        assert!(phase.validate().is_empty());
        assert_eq!(phase.koji_source().tags, vec!["f40"]);
        assert_eq!(phase.requirements()[0].tool, "koji");
    }
}
