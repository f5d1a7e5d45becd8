// src/phases/gather.rs

//! Package gathering for every (variant, arch)
//!
//! Arches are processed in parallel; within an arch variants run in tree
//! order so a child variant can drop what its parent already delivers.
//! Gathered packages are linked into the published trees, and every
//! finished tree is handed to createrepo through the pipeline queue.

use super::{Phase, PhaseContext, RepoJob};
use crate::arch::TreeArch;
use crate::comps::Comps;
use crate::compose::{Compose, RepoKind};
use crate::config::{GatherSource, LinkType};
use crate::error::{Error, Result};
use crate::gather::{self, source, GatherResult, GatheredPackage};
use crate::metadata::rpms::RpmEntry;
use crate::metadata::RpmsManifest;
use crate::pkgset::{repodata, PackageRecord, Universe};
use crate::variants::Variant;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const NAME: &str = "gather";

/// Relative path from directory `from` to `to`; both absolute
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component.as_os_str());
    }
    out
}

/// Place `src` at `dst` the way `link_type` says
///
/// An existing `dst` is left alone.
pub fn link_file(src: &Path, dst: &Path, link_type: LinkType) -> Result<()> {
    if dst.symlink_metadata().is_ok() {
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let result = match link_type {
        LinkType::Hardlink => std::fs::hard_link(src, dst),
        LinkType::Copy => std::fs::copy(src, dst).map(|_| ()),
        LinkType::HardlinkOrCopy => std::fs::hard_link(src, dst).or_else(|e| {
            debug!("Hardlink failed for {}, falling back to copy: {}", src.display(), e);
            std::fs::copy(src, dst).map(|_| ())
        }),
        LinkType::Symlink => {
            let base = dst.parent().unwrap_or(Path::new("/"));
            std::os::unix::fs::symlink(relative_path(base, src), dst)
        }
        LinkType::AbspathSymlink => std::os::unix::fs::symlink(src, dst),
    };
    match result {
        Ok(()) => Ok(()),
        // Another arch linked the same source package first
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Destination of a package inside a `Packages/` directory
pub fn package_dest(packages_dir: &Path, file_name: &str, hashed: bool) -> PathBuf {
    match file_name.chars().next() {
        Some(first) if hashed => packages_dir
            .join(first.to_lowercase().to_string())
            .join(file_name),
        _ => packages_dir.join(file_name),
    }
}

pub struct GatherPhase {
    ctx: Arc<PhaseContext>,
}

/// What one arch contributes once all its variants are gathered
struct ArchOutcome {
    manifest: RpmsManifest,
    with_sources: BTreeSet<String>,
}

impl GatherPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn mapping(&self) -> Result<Option<Value>> {
        let conf = &self.ctx.compose.conf;
        match (&conf.gather_source, &conf.gather_source_mapping) {
            (GatherSource::Json, Some(path)) => Ok(Some(source::load_json_mapping(Path::new(path))?)),
            _ => Ok(None),
        }
    }

    fn universe(&self, variant: &Variant, arch: &str, records: &[PackageRecord]) -> Result<Universe> {
        let compose = &self.ctx.compose;
        let lookaside = compose.conf_list(&compose.conf.gather_lookaside_repos, arch, Some(variant))?;
        let ids = source::lookaside_repo_ids(lookaside.len());
        let mut all = records.to_vec();
        for (location, id) in lookaside.iter().zip(&ids) {
            let loaded = repodata::load_repo(&repodata::repo_dir(location)?, id)?;
            debug!("Lookaside {} for {}.{}: {} packages", id, variant.uid, arch, loaded.len());
            all.extend(loaded);
        }
        Ok(Universe::new(TreeArch::new(arch), all))
    }

    fn gather_variant(
        &self,
        variant: &Variant,
        arch: &str,
        records: &[PackageRecord],
        comps: Option<&Comps>,
        mapping: Option<&Value>,
        done: &BTreeMap<String, GatherResult>,
    ) -> Result<GatherResult> {
        let compose = &self.ctx.compose;
        let universe = self.universe(variant, arch, records)?;
        let input = source::gather_input(compose, variant, arch, comps, mapping)?;
        let policy = source::policy(compose, variant, arch, input.langpacks.clone())?;
        let result = gather::gather(&universe, &input.patterns, &input.conditionals, &policy)?;

        if !variant.is_child_content() {
            return Ok(result);
        }
        let parent = compose
            .variants()
            .parent(variant)
            .and_then(|p| done.get(&p.uid));
        Ok(match parent {
            Some(parent) => {
                let trimmed = result.without_packages(parent);
                debug!(
                    "{}.{}: {} packages already in the parent",
                    variant.uid,
                    arch,
                    result.len() - trimmed.len()
                );
                trimmed
            }
            None => result,
        })
    }

    /// Link every non-lookaside package and record it in the manifest
    fn link_result(&self, variant: &Variant, arch: &str, result: &GatherResult) -> Result<RpmsManifest> {
        let compose = &self.ctx.compose;
        let conf = &compose.conf;
        let mut manifest = RpmsManifest::default();
        let sets: [(RepoKind, &[GatheredPackage]); 3] = [
            (RepoKind::Binary, &result.binary),
            (RepoKind::Source, &result.source),
            (RepoKind::Debug, &result.debug),
        ];
        for (kind, packages) in sets {
            let dir = compose.paths.packages_dir(arch, &variant.uid, kind);
            for gathered in packages.iter().filter(|p| !p.is_lookaside()) {
                let pkg = &gathered.package;
                let src = repodata::repo_dir(&pkg.location)?;
                let dst = package_dest(&dir, &pkg.file_name(), conf.hashed_directories);
                link_file(&src, &dst, conf.link_type)?;
                manifest.add(
                    &variant.uid,
                    arch,
                    &pkg.srpm_nevra(),
                    &pkg.nevra(),
                    RpmEntry {
                        path: compose.paths.relative_to_compose(&dst).display().to_string(),
                        sigkey: pkg.sigkey.clone(),
                        category: kind.category().to_string(),
                    },
                );
            }
        }
        Ok(manifest)
    }

    fn write_package_list(&self, variant: &Variant, arch: &str, result: &GatherResult) -> Result<()> {
        let path = self.ctx.compose.paths.package_list(arch, &variant.uid);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = String::new();
        for gathered in result.all() {
            let flags: Vec<String> = gathered.flags.iter().map(|f| f.to_string()).collect();
            let _ = writeln!(text, "{} {}", gathered.package.location, flags.join(","));
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    fn gather_arch(&self, arch: &str, records: &[PackageRecord], mapping: Option<&Value>) -> Result<ArchOutcome> {
        let compose = &self.ctx.compose;
        let comps_path = compose.paths.comps(Some(arch));
        let comps = if comps_path.is_file() {
            Some(Comps::load(&comps_path)?)
        } else {
            None
        };

        let mut done: BTreeMap<String, GatherResult> = BTreeMap::new();
        let mut outcome = ArchOutcome {
            manifest: RpmsManifest::default(),
            with_sources: BTreeSet::new(),
        };
        for variant in compose.variants().all().iter().filter(|v| v.arches.contains(arch)) {
            let result = self.gather_variant(variant, arch, records, comps.as_ref(), mapping, &done)?;
            self.write_package_list(variant, arch, &result)?;
            outcome.manifest.merge(self.link_result(variant, arch, &result)?);

            let queue = &self.ctx.state.repo_queue;
            queue.push(RepoJob {
                variant: variant.uid.clone(),
                arch: arch.to_string(),
                kind: RepoKind::Binary,
            });
            if result.debug.iter().any(|p| !p.is_lookaside()) {
                queue.push(RepoJob {
                    variant: variant.uid.clone(),
                    arch: arch.to_string(),
                    kind: RepoKind::Debug,
                });
            }
            if result.source.iter().any(|p| !p.is_lookaside()) {
                outcome.with_sources.insert(variant.uid.clone());
            }
            super::lock(&self.ctx.state.gathered)
                .insert((variant.uid.clone(), arch.to_string()), result.clone());
            done.insert(variant.uid.clone(), result);
        }
        Ok(outcome)
    }
}

fn linked_count(compose: &Compose, arch: &str) -> usize {
    compose
        .variants()
        .all()
        .iter()
        .filter_map(|v| std::fs::read_dir(compose.paths.packages_dir(arch, &v.uid, RepoKind::Binary)).ok())
        .map(|entries| entries.count())
        .sum()
}

impl Phase for GatherPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn validate(&self) -> Vec<String> {
        let conf = &self.ctx.compose.conf;
        let mut errors = Vec::new();
        if conf.gather_source == GatherSource::Json && conf.gather_source_mapping.is_none() {
            errors.push("gather_source = \"json\" needs gather_source_mapping".to_string());
        }
        if conf.gather_source == GatherSource::Comps && conf.comps_file.is_none() {
            errors.push("gather_source = \"comps\" needs comps_file".to_string());
        }
        errors
    }

    fn start(&self) -> Result<()> {
        let state = &self.ctx.state;
        let _closer = state.repo_queue.closer();
        let sets = state
            .package_sets
            .get()
            .ok_or_else(|| Error::phase(NAME, "package sets are not loaded"))?;
        let mapping = self.mapping()?;
        let empty = Vec::new();

        let outcomes: Vec<ArchOutcome> = self
            .ctx
            .tree_arches()
            .par_iter()
            .map(|arch| {
                let records = sets.by_arch.get(arch).unwrap_or(&empty);
                self.gather_arch(arch, records, mapping.as_ref())
            })
            .collect::<Result<_>>()?;

        let compose = &self.ctx.compose;
        let mut manifest = RpmsManifest::default();
        let mut with_sources = BTreeSet::new();
        for outcome in outcomes {
            manifest.merge(outcome.manifest);
            with_sources.extend(outcome.with_sources);
        }
        info!("Linked {} packages into the compose", manifest.len());
        compose.add_rpms(manifest);
        for uid in with_sources {
            state.repo_queue.push(RepoJob {
                variant: uid,
                arch: "src".to_string(),
                kind: RepoKind::Source,
            });
        }
        for arch in self.ctx.tree_arches() {
            debug!("{}: {} entries in binary Packages dirs", arch, linked_count(compose, &arch));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::config_with;
    use crate::phases::tests::context_from;
    use crate::phases::PackageSets;
    use crate::pkgset::tests::pkg;

    fn record_at(dir: &Path, nvra: &str, srpm: &str, provides: &[&str], requires: &[&str]) -> PackageRecord {
        let mut record = pkg(nvra, srpm, provides, requires);
        let file = dir.join(record.file_name());
        std::fs::write(&file, nvra).unwrap();
        record.location = file.display().to_string();
        record
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/c/Server/x86_64/os/Packages"), Path::new("/repo/a.rpm")),
            PathBuf::from("../../../../../repo/a.rpm")
        );
        assert_eq!(
            relative_path(Path::new("/c/os"), Path::new("/c/os/b/a.rpm")),
            PathBuf::from("b/a.rpm")
        );
    }

    #[test]
    fn test_package_dest_hashed() {
        let dir = Path::new("/c/os/Packages");
        assert_eq!(package_dest(dir, "Bash-1.rpm", true), PathBuf::from("/c/os/Packages/b/Bash-1.rpm"));
        assert_eq!(package_dest(dir, "bash-1.rpm", false), PathBuf::from("/c/os/Packages/bash-1.rpm"));
    }

    #[test]
    fn test_link_types() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.rpm");
        std::fs::write(&src, "rpm").unwrap();
        for (i, link_type) in [
            LinkType::Hardlink,
            LinkType::Copy,
            LinkType::HardlinkOrCopy,
            LinkType::Symlink,
            LinkType::AbspathSymlink,
        ]
        .into_iter()
        .enumerate()
        {
            let dst = dir.path().join(format!("out{i}/Packages/a.rpm"));
            link_file(&src, &dst, link_type).unwrap();
            link_file(&src, &dst, link_type).unwrap();
            assert_eq!(std::fs::read_to_string(&dst).unwrap(), "rpm");
        }
        let link = std::fs::read_link(dir.path().join("out3/Packages/a.rpm")).unwrap();
        assert_eq!(link, PathBuf::from("../../a.rpm"));
    }

    #[test]
    fn test_gathers_links_and_queues() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let records = vec![
            record_at(&repo, "bash-5.2-1.x86_64", "bash-5.2-1.src.rpm", &[], &["glibc"]),
            record_at(&repo, "glibc-2.39-1.x86_64", "glibc-2.39-1.src.rpm", &[], &[]),
            record_at(&repo, "bash-5.2-1.src", "", &[], &[]),
            record_at(&repo, "bash-debuginfo-5.2-1.x86_64", "bash-5.2-1.src.rpm", &[], &[]),
        ];

        let conf = config_with(
            r#"
additional_packages = [[".*", { "*" = ["bash"] }]]
hashed_directories = true
link_type = "copy"
"#,
        );
        let ctx = context_from(&dir.path().join("composes"), conf);
        ctx.state
            .package_sets
            .set(PackageSets {
                by_arch: BTreeMap::from([("x86_64".to_string(), records)]),
            })
            .unwrap();

        GatherPhase::new(Arc::clone(&ctx)).start().unwrap();

        let server = ctx.state.gathered("Server", "x86_64").unwrap();
        assert_eq!(server.binary_nvras(), vec!["bash-5.2-1.x86_64", "glibc-2.39-1.x86_64"]);
        assert_eq!(server.source_nvras(), vec!["bash-5.2-1.src"]);
        assert_eq!(server.debug_nvras(), vec!["bash-debuginfo-5.2-1.x86_64"]);

        // optional inherits the same input and drops everything Server has
        let optional = ctx.state.gathered("Server-optional", "x86_64").unwrap();
        assert!(optional.is_empty());

        let paths = &ctx.compose.paths;
        assert!(paths
            .packages_dir("x86_64", "Server", RepoKind::Binary)
            .join("b/bash-5.2-1.x86_64.rpm")
            .is_file());
        assert!(paths
            .packages_dir("src", "Server", RepoKind::Source)
            .join("b/bash-5.2-1.src.rpm")
            .is_file());
        assert!(paths.package_list("x86_64", "Server").is_file());
        assert_eq!(ctx.compose.rpms().len(), 4);

        let queue = &ctx.state.repo_queue;
        assert!(queue.is_closed());
        let mut jobs = Vec::new();
        while let Some(job) = queue.pop() {
            jobs.push((job.variant, job.arch, job.kind));
        }
        assert!(jobs.contains(&("Server".to_string(), "x86_64".to_string(), RepoKind::Debug)));
        assert!(jobs.contains(&("Server".to_string(), "src".to_string(), RepoKind::Source)));
        assert!(jobs.contains(&("Server-optional".to_string(), "x86_64".to_string(), RepoKind::Binary)));
    }

    #[test]
    fn test_missing_package_sets_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_from(dir.path(), config_with(""));
        let err = GatherPhase::new(Arc::clone(&ctx)).start().unwrap_err();
        assert!(err.to_string().contains("package sets"));
        assert!(ctx.state.repo_queue.is_closed());
    }
}
