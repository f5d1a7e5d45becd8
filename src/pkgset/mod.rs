// src/pkgset/mod.rs

//! Package records and the sources they are collected from
//!
//! A package set is the flat list of [`PackageRecord`]s visible to one tree
//! arch. It is read either from yum repositories ([`repodata`]) or from koji
//! tags ([`koji`]) and then indexed into a [`Universe`] for gathering.

pub mod koji;
pub mod repodata;
pub mod universe;

pub use universe::{ArchSlice, Universe};

use crate::arch::{TreeArch, NOARCH, NOSRC, SRC};
use crate::error::{Error, Result};
use crate::version::{ranges_overlap, rpmvercmp, DepFlag, RpmVersion};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A relational dependency: name plus optional flag and version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reldep {
    pub name: String,
    pub flag: Option<DepFlag>,
    pub version: Option<RpmVersion>,
}

impl Reldep {
    pub fn unversioned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flag: None,
            version: None,
        }
    }

    pub fn versioned(name: impl Into<String>, flag: DepFlag, version: RpmVersion) -> Self {
        Self {
            name: name.into(),
            flag: Some(flag),
            version: Some(version),
        }
    }

    /// Parse `name`, or `name OP version`
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        match parts.as_slice() {
            [name] => Ok(Self::unversioned(*name)),
            [name, op, version] => {
                let flag = DepFlag::parse(op)
                    .ok_or_else(|| Error::Parse(format!("unknown operator '{op}' in '{s}'")))?;
                Ok(Self::versioned(*name, flag, RpmVersion::parse(version)?))
            }
            _ => Err(Error::Parse(format!("cannot parse dependency '{s}'"))),
        }
    }

    /// Dependencies that are never resolved against packages
    pub fn is_internal(&self) -> bool {
        self.name.starts_with("rpmlib(") || self.name.starts_with("config(")
    }

    pub fn is_file(&self) -> bool {
        self.name.starts_with('/')
    }

    /// Whether `provide` satisfies this requirement
    ///
    /// An unversioned side matches any version.
    pub fn satisfied_by(&self, provide: &Reldep) -> bool {
        if self.name != provide.name {
            return false;
        }
        match (self.flag, &self.version, provide.flag, &provide.version) {
            (Some(r_flag), Some(r_ver), Some(p_flag), Some(p_ver)) => {
                ranges_overlap((p_flag, p_ver), (r_flag, r_ver))
            }
            _ => true,
        }
    }
}

impl fmt::Display for Reldep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.flag, &self.version) {
            (Some(flag), Some(version)) => write!(f, "{} {} {}", self.name, flag, version),
            _ => f.write_str(&self.name),
        }
    }
}

/// One package as seen by the gatherer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub epoch: u64,
    pub version: String,
    pub release: String,
    pub arch: String,
    /// Source package file name, e.g. `bash-5.2-1.fc40.src.rpm`
    pub sourcerpm: Option<String>,
    pub provides: Vec<Reldep>,
    pub requires: Vec<Reldep>,
    pub files: Vec<String>,
    pub repo_id: String,
    /// Absolute path or URL of the package file
    pub location: String,
    /// Key the package is signed with; empty for unsigned
    pub sigkey: Option<String>,
}

impl PackageRecord {
    pub fn evr(&self) -> RpmVersion {
        RpmVersion::new(self.epoch, self.version.clone(), Some(self.release.clone()))
    }

    pub fn nvra(&self) -> String {
        format!("{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
    }

    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name, self.epoch, self.version, self.release, self.arch
        )
    }

    pub fn file_name(&self) -> String {
        format!("{}.rpm", self.nvra())
    }

    pub fn is_source(&self) -> bool {
        self.arch == SRC || self.arch == NOSRC
    }

    pub fn is_noarch(&self) -> bool {
        self.arch == NOARCH
    }

    pub fn is_debug(&self) -> bool {
        !self.is_source()
            && (self.name.contains("-debuginfo") || self.name.contains("-debugsource"))
    }

    /// File name of the source package this record belongs to
    pub fn srpm_file(&self) -> Option<String> {
        if self.is_source() {
            Some(self.file_name())
        } else {
            self.sourcerpm.clone()
        }
    }

    /// Source package NEVRA for metadata; epoch is unknown for binaries
    pub fn srpm_nevra(&self) -> String {
        if self.is_source() {
            return self.nevra();
        }
        match self.sourcerpm.as_deref().and_then(split_srpm_filename) {
            Some((name, version, release)) => format!("{name}-0:{version}-{release}.src"),
            None => format!("{}-{}:{}-{}.src", self.name, self.epoch, self.version, self.release),
        }
    }

    pub fn provides_name(&self, name: &str) -> bool {
        self.name == name || self.provides.iter().any(|p| p.name == name)
    }

    /// Does anything this package provides satisfy `req`
    pub fn satisfies(&self, req: &Reldep) -> bool {
        if req.is_file() {
            return self.files.iter().any(|f| f == &req.name)
                || self.provides.iter().any(|p| p.name == req.name);
        }
        if self.name == req.name {
            let own = Reldep::versioned(self.name.clone(), DepFlag::Equal, self.evr());
            if req.satisfied_by(&own) {
                return true;
            }
        }
        self.provides.iter().any(|p| req.satisfied_by(p))
    }

    /// Total order: name, epoch, version, release, arch
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.epoch.cmp(&other.epoch))
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| rpmvercmp(&self.release, &other.release))
            .then_with(|| self.release.cmp(&other.release))
            .then_with(|| self.arch.cmp(&other.arch))
            .then_with(|| self.repo_id.cmp(&other.repo_id))
    }

    /// EVR ordering used to select the newest build
    pub fn cmp_evr(&self, other: &Self) -> Ordering {
        self.evr().compare_strict(&other.evr())
    }
}

/// Split `name-version-release.src.rpm`
pub fn split_srpm_filename(file: &str) -> Option<(&str, &str, &str)> {
    let stem = file
        .strip_suffix(".src.rpm")
        .or_else(|| file.strip_suffix(".nosrc.rpm"))?;
    let (rest, release) = stem.rsplit_once('-')?;
    let (name, version) = rest.rsplit_once('-')?;
    Some((name, version, release))
}

/// Keep only records installable on `arch` (plus source packages)
pub fn filter_for_arch(records: Vec<PackageRecord>, arch: &TreeArch) -> Vec<PackageRecord> {
    let allowed = arch.priority_list();
    records
        .into_iter()
        .filter(|r| r.is_source() || allowed.contains(&r.arch.as_str()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Test helper: a package with simple string provides/requires
    pub(crate) fn pkg(nvra: &str, srpm: &str, provides: &[&str], requires: &[&str]) -> PackageRecord {
        let (nvr, arch) = nvra.rsplit_once('.').unwrap();
        let (nv, release) = nvr.rsplit_once('-').unwrap();
        let (name, version) = nv.rsplit_once('-').unwrap();
        PackageRecord {
            name: name.to_string(),
            epoch: 0,
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
            sourcerpm: if arch == "src" { None } else { Some(srpm.to_string()) },
            provides: provides.iter().map(|p| Reldep::parse(p).unwrap()).collect(),
            requires: requires.iter().map(|r| Reldep::parse(r).unwrap()).collect(),
            files: Vec::new(),
            repo_id: "repo".to_string(),
            location: format!("/repo/{nvra}.rpm"),
            sigkey: None,
        }
    }

    #[test]
    fn test_reldep_parse_and_display() {
        let dep = Reldep::parse("glibc >= 2.38-1").unwrap();
        assert_eq!(dep.flag, Some(DepFlag::GreaterOrEqual));
        assert_eq!(dep.to_string(), "glibc >= 2.38-1");
        assert!(Reldep::parse("a b").is_err());
    }

    #[test]
    fn test_versioned_satisfaction() {
        let req = Reldep::parse("foo >= 2.0").unwrap();
        assert!(req.satisfied_by(&Reldep::parse("foo = 2.1-1").unwrap()));
        assert!(!req.satisfied_by(&Reldep::parse("foo = 1.9-1").unwrap()));
        assert!(req.satisfied_by(&Reldep::unversioned("foo")));
        assert!(!req.satisfied_by(&Reldep::unversioned("bar")));
    }

    #[test]
    fn test_package_satisfies_own_name_and_files() {
        let mut p = pkg("bash-5.2-1.x86_64", "bash-5.2-1.src.rpm", &[], &[]);
        p.files.push("/usr/bin/bash".to_string());
        assert!(p.satisfies(&Reldep::parse("bash >= 5").unwrap()));
        assert!(!p.satisfies(&Reldep::parse("bash > 6").unwrap()));
        assert!(p.satisfies(&Reldep::unversioned("/usr/bin/bash")));
    }

    #[test]
    fn test_debug_and_source_detection() {
        assert!(pkg("bash-debuginfo-5.2-1.x86_64", "bash-5.2-1.src.rpm", &[], &[]).is_debug());
        assert!(pkg("bash-debugsource-5.2-1.x86_64", "bash-5.2-1.src.rpm", &[], &[]).is_debug());
        let src = pkg("bash-5.2-1.src", "", &[], &[]);
        assert!(src.is_source());
        assert_eq!(src.srpm_file().unwrap(), "bash-5.2-1.src.rpm");
    }

    #[test]
    fn test_split_srpm_filename() {
        assert_eq!(
            split_srpm_filename("python3-foo-1.2-3.fc40.src.rpm"),
            Some(("python3-foo", "1.2", "3.fc40"))
        );
        assert_eq!(split_srpm_filename("nope.rpm"), None);
    }

    #[test]
    fn test_filter_for_arch() {
        let records = vec![
            pkg("a-1-1.x86_64", "a-1-1.src.rpm", &[], &[]),
            pkg("a-1-1.i686", "a-1-1.src.rpm", &[], &[]),
            pkg("a-1-1.aarch64", "a-1-1.src.rpm", &[], &[]),
            pkg("a-1-1.src", "", &[], &[]),
        ];
        let kept = filter_for_arch(records, &TreeArch::new("x86_64"));
        let arches: Vec<&str> = kept.iter().map(|r| r.arch.as_str()).collect();
        assert_eq!(arches, vec!["x86_64", "i686", "src"]);
    }
}
