// src/pkgset/koji.rs

//! Package set from koji tags
//!
//! Builds are listed with the `koji` CLI, their RPMs are located on the
//! shared koji volume and package headers are read with the `rpm` crate.
//! Signed copies are preferred in `sigkeys` order; an empty key accepts the
//! unsigned file.

use super::{PackageRecord, Reldep};
use crate::error::{Error, Result};
use crate::tools::{self, koji as koji_cmd};
use crate::version::{DepFlag, RpmVersion};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What to list and where to find it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KojiSource {
    pub profile: Option<String>,
    pub tags: Vec<String>,
    pub inherit: bool,
    pub event: Option<u64>,
    pub topdir: PathBuf,
    pub sigkeys: Vec<String>,
}

/// Build NVRs from `list-tagged --quiet` output (first column)
pub fn parse_builds(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn build_name(nvr: &str) -> &str {
    nvr.rsplitn(3, '-').nth(2).unwrap_or(nvr)
}

/// Latest builds across all tags; earlier tags win for the same package
pub fn list_builds(source: &KojiSource, log_dir: &Path) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut builds = Vec::new();
    for (i, tag) in source.tags.iter().enumerate() {
        let cmd = koji_cmd::list_tagged(source.profile.as_deref(), tag, source.inherit, source.event);
        let output = tools::run_capture(&cmd, &log_dir.join(format!("koji-list-tagged-{i}.log")))?;
        for nvr in parse_builds(&output) {
            if seen.insert(build_name(&nvr).to_string()) {
                builds.push(nvr);
            }
        }
    }
    info!("Koji tags {:?} provide {} builds", source.tags, builds.len());
    Ok(builds)
}

/// RPM files of one build with the sigkey each resolved copy is signed with
pub fn locate_rpms(build_dir: &Path, sigkeys: &[String]) -> Result<Vec<(PathBuf, Option<String>)>> {
    let pattern = format!("{}/*/*.rpm", build_dir.display());
    let mut unsigned: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| Error::Parse(format!("bad glob '{pattern}': {e}")))?
        .filter_map(|entry| entry.ok())
        .collect();
    unsigned.sort();

    let mut located = Vec::with_capacity(unsigned.len());
    for path in unsigned {
        let (Some(file), Some(arch)) = (
            path.file_name(),
            path.parent().and_then(|p| p.file_name()),
        ) else {
            continue;
        };
        if sigkeys.is_empty() {
            located.push((path.clone(), None));
            continue;
        }
        let found = sigkeys.iter().find_map(|key| {
            if key.is_empty() {
                return Some((path.clone(), None));
            }
            let key = key.to_lowercase();
            let signed = build_dir
                .join("data")
                .join("signed")
                .join(&key)
                .join(arch)
                .join(file);
            signed.exists().then_some((signed, Some(key)))
        });
        match found {
            Some(entry) => located.push(entry),
            None => {
                return Err(Error::NotFound(format!(
                    "{} is not signed with any of {:?}",
                    path.display(),
                    sigkeys
                )))
            }
        }
    }
    Ok(located)
}

fn flag(flags: rpm::DependencyFlags) -> Option<DepFlag> {
    use rpm::DependencyFlags;
    let less = flags.contains(DependencyFlags::LESS);
    let greater = flags.contains(DependencyFlags::GREATER);
    let equal = flags.contains(DependencyFlags::EQUAL);
    match (less, greater, equal) {
        (true, _, true) => Some(DepFlag::LessOrEqual),
        (_, true, true) => Some(DepFlag::GreaterOrEqual),
        (true, _, false) => Some(DepFlag::Less),
        (_, true, false) => Some(DepFlag::Greater),
        (false, false, true) => Some(DepFlag::Equal),
        _ => None,
    }
}

fn reldep(dep: &rpm::Dependency) -> Reldep {
    match flag(dep.flags) {
        Some(f) if !dep.version.is_empty() => match RpmVersion::parse(&dep.version) {
            Ok(version) => Reldep::versioned(dep.name.clone(), f, version),
            Err(_) => Reldep::unversioned(dep.name.clone()),
        },
        _ => Reldep::unversioned(dep.name.clone()),
    }
}

fn rpm_err(path: &Path, e: rpm::Error) -> Error {
    Error::Rpm(format!("{}: {e}", path.display()))
}

/// Read a package header into a record
pub fn read_header(path: &Path, repo_id: &str, sigkey: Option<String>) -> Result<PackageRecord> {
    let mut reader = BufReader::new(File::open(path)?);
    let pkg = rpm::Package::parse(&mut reader).map_err(|e| rpm_err(path, e))?;
    let meta = &pkg.metadata;

    let file_name = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
    let arch = if file_name.ends_with(".src.rpm") {
        "src".to_string()
    } else if file_name.ends_with(".nosrc.rpm") {
        "nosrc".to_string()
    } else {
        meta.get_arch().map_err(|e| rpm_err(path, e))?.to_string()
    };
    let is_source = arch == "src" || arch == "nosrc";

    Ok(PackageRecord {
        name: meta.get_name().map_err(|e| rpm_err(path, e))?.to_string(),
        epoch: meta.get_epoch().map(u64::from).unwrap_or(0),
        version: meta.get_version().map_err(|e| rpm_err(path, e))?.to_string(),
        release: meta.get_release().map_err(|e| rpm_err(path, e))?.to_string(),
        arch,
        sourcerpm: if is_source {
            None
        } else {
            meta.get_source_rpm().ok().map(str::to_string)
        },
        provides: meta
            .get_provides()
            .unwrap_or_default()
            .iter()
            .map(reldep)
            .collect(),
        requires: meta
            .get_requires()
            .unwrap_or_default()
            .iter()
            .map(reldep)
            .filter(|r| !r.is_internal())
            .collect(),
        files: meta
            .get_file_paths()
            .unwrap_or_default()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        repo_id: repo_id.to_string(),
        location: path.to_string_lossy().into_owned(),
        sigkey,
    })
}

/// Every package of the latest tagged builds
pub fn load(source: &KojiSource, log_dir: &Path) -> Result<Vec<PackageRecord>> {
    let builds = list_builds(source, log_dir)?;
    let mut files = Vec::new();
    for nvr in &builds {
        let dir = koji_cmd::build_dir(&source.topdir, nvr)
            .ok_or_else(|| Error::Parse(format!("malformed build NVR '{nvr}'")))?;
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("build directory {}", dir.display())));
        }
        files.extend(locate_rpms(&dir, &source.sigkeys)?);
    }
    debug!("Reading {} package headers", files.len());
    let repo_id = format!("koji-{}", source.tags.join("+"));
    files
        .into_par_iter()
        .map(|(path, sigkey)| read_header(&path, &repo_id, sigkey))
        .collect()
}
