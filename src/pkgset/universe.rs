// src/pkgset/universe.rs

//! Indexed, read-only view over the package records of one tree arch
//!
//! Records are sorted by their total order at construction, so a package's
//! id (its position) sorts the same way the record does. Every query returns
//! ids in ascending order.

use super::{PackageRecord, Reldep};
use crate::arch::{split_name_arch, ArchClass, TreeArch};
use glob::Pattern;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Index of a record inside a [`Universe`]
pub type PkgId = usize;

/// Named subsets of the universe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchSlice {
    /// Native-arch binaries, debug packages excluded
    Native,
    /// Multilib-arch binaries, debug packages excluded
    Multilib,
    Noarch,
    Source,
    /// Debug packages of native arches
    DebugNative,
    /// Debug packages of multilib arches
    DebugMultilib,
}

#[derive(Debug, Clone)]
pub struct Universe {
    base: TreeArch,
    packages: Vec<PackageRecord>,
    classes: Vec<ArchClass>,
    by_name: HashMap<String, Vec<PkgId>>,
    by_provide: HashMap<String, Vec<PkgId>>,
    by_file: HashMap<String, Vec<PkgId>>,
    /// Binary and debug packages keyed by their source rpm file
    by_srpm: HashMap<String, Vec<PkgId>>,
    /// Source packages keyed by their own file name
    sources: HashMap<String, PkgId>,
}

fn has_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

impl Universe {
    /// Build the index
    ///
    /// Duplicate (name, epoch, version, release, arch) records keep the first
    /// occurrence in input order.
    pub fn new(base: TreeArch, records: Vec<PackageRecord>) -> Self {
        let mut seen = HashSet::new();
        let mut packages: Vec<PackageRecord> = Vec::with_capacity(records.len());
        for record in records {
            let key = (
                record.name.clone(),
                record.epoch,
                record.version.clone(),
                record.release.clone(),
                record.arch.clone(),
            );
            if seen.insert(key) {
                packages.push(record);
            } else {
                debug!("Ignoring duplicate package {} from {}", record.nevra(), record.repo_id);
            }
        }
        packages.sort_by(|a, b| a.total_cmp(b));

        let classes = packages.iter().map(|p| base.classify(&p.arch)).collect();
        let mut universe = Self {
            base,
            packages,
            classes,
            by_name: HashMap::new(),
            by_provide: HashMap::new(),
            by_file: HashMap::new(),
            by_srpm: HashMap::new(),
            sources: HashMap::new(),
        };
        universe.index();
        universe
    }

    fn index(&mut self) {
        for (id, pkg) in self.packages.iter().enumerate() {
            self.by_name.entry(pkg.name.clone()).or_default().push(id);
            self.by_provide.entry(pkg.name.clone()).or_default().push(id);
            for provide in &pkg.provides {
                let entry = self.by_provide.entry(provide.name.clone()).or_default();
                if entry.last() != Some(&id) {
                    entry.push(id);
                }
            }
            for file in &pkg.files {
                self.by_file.entry(file.clone()).or_default().push(id);
            }
            if pkg.is_source() {
                self.sources.insert(pkg.file_name(), id);
            } else if let Some(srpm) = &pkg.sourcerpm {
                self.by_srpm.entry(srpm.clone()).or_default().push(id);
            }
        }
    }

    /// Derived view without the records `exclude` matches
    pub fn without(&self, exclude: impl Fn(&PackageRecord) -> bool) -> Universe {
        let kept = self
            .packages
            .iter()
            .filter(|p| !exclude(p))
            .cloned()
            .collect();
        Universe::new(self.base.clone(), kept)
    }

    pub fn base_arch(&self) -> &TreeArch {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn get(&self, id: PkgId) -> &PackageRecord {
        &self.packages[id]
    }

    pub fn records(&self) -> &[PackageRecord] {
        &self.packages
    }

    pub fn class(&self, id: PkgId) -> ArchClass {
        self.classes[id]
    }

    /// Native family: native arches and noarch
    pub fn is_native_family(&self, id: PkgId) -> bool {
        matches!(self.classes[id], ArchClass::Native | ArchClass::Noarch)
    }

    pub fn is_multilib(&self, id: PkgId) -> bool {
        self.classes[id] == ArchClass::Multilib
    }

    pub fn in_slice(&self, id: PkgId, slice: ArchSlice) -> bool {
        let pkg = &self.packages[id];
        let class = self.classes[id];
        match slice {
            ArchSlice::Native => class == ArchClass::Native && !pkg.is_debug(),
            ArchSlice::Multilib => class == ArchClass::Multilib && !pkg.is_debug(),
            ArchSlice::Noarch => class == ArchClass::Noarch && !pkg.is_debug(),
            ArchSlice::Source => class == ArchClass::Source,
            ArchSlice::DebugNative => {
                pkg.is_debug() && matches!(class, ArchClass::Native | ArchClass::Noarch)
            }
            ArchSlice::DebugMultilib => pkg.is_debug() && class == ArchClass::Multilib,
        }
    }

    pub fn filter(&self, slice: ArchSlice) -> Vec<PkgId> {
        (0..self.packages.len())
            .filter(|id| self.in_slice(*id, slice))
            .collect()
    }

    /// Packages with a provide (or file) matching `req`
    pub fn by_provides(&self, req: &Reldep) -> Vec<PkgId> {
        let mut found: Vec<PkgId> = Vec::new();
        if req.is_file() {
            if let Some(ids) = self.by_file.get(&req.name) {
                found.extend(ids);
            }
        }
        if let Some(ids) = self.by_provide.get(&req.name) {
            found.extend(ids.iter().filter(|id| self.packages[**id].satisfies(req)));
        }
        found.retain(|id| {
            let pkg = &self.packages[*id];
            !pkg.is_source() && !pkg.is_debug()
        });
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Highest EVR per (name, arch)
    pub fn latest_per_arch(&self, ids: &[PkgId]) -> Vec<PkgId> {
        let mut best: BTreeMap<(&str, &str), PkgId> = BTreeMap::new();
        for id in ids {
            let pkg = &self.packages[*id];
            let slot = best.entry((pkg.name.as_str(), pkg.arch.as_str())).or_insert(*id);
            if pkg.cmp_evr(&self.packages[*slot]).is_gt() {
                *slot = *id;
            }
        }
        let mut out: Vec<PkgId> = best.into_values().collect();
        out.sort_unstable();
        out
    }

    /// Shell-glob match on package names
    ///
    /// `name.+` restricts to multilib arches; `name.arch` restricts to one
    /// arch. Source and debug packages are never returned.
    pub fn by_name_glob(&self, pattern: &str) -> Vec<PkgId> {
        let mut found = self.by_name_glob_with_debug(pattern);
        found.retain(|id| !self.packages[*id].is_debug());
        found
    }

    /// [`by_name_glob`](Self::by_name_glob) including debug packages
    pub fn by_name_glob_with_debug(&self, pattern: &str) -> Vec<PkgId> {
        let (pattern, multilib_only, arch) = match pattern.strip_suffix(".+") {
            Some(base) => (base, true, None),
            None => {
                let (name, arch) = split_name_arch(pattern);
                (name, false, arch)
            }
        };

        let mut found: Vec<PkgId> = if has_glob(pattern) {
            match Pattern::new(pattern) {
                Ok(glob) => self
                    .by_name
                    .iter()
                    .filter(|(name, _)| glob.matches(name))
                    .flat_map(|(_, ids)| ids.iter().copied())
                    .collect(),
                Err(_) => Vec::new(),
            }
        } else {
            self.by_name.get(pattern).cloned().unwrap_or_default()
        };

        found.retain(|id| {
            let pkg = &self.packages[*id];
            !pkg.is_source()
                && (!multilib_only || self.is_multilib(*id))
                && arch.is_none_or(|a| pkg.arch == a)
        });
        found.sort_unstable();
        found
    }

    pub fn by_name(&self, name: &str) -> &[PkgId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Source package of a binary
    pub fn source_of(&self, id: PkgId) -> Option<PkgId> {
        let pkg = &self.packages[id];
        if pkg.is_source() {
            return None;
        }
        pkg.sourcerpm.as_ref().and_then(|s| self.sources.get(s).copied())
    }

    /// Binary and debug packages built from a source rpm file
    pub fn built_from(&self, srpm: &str) -> &[PkgId] {
        self.by_srpm.get(srpm).map(Vec::as_slice).unwrap_or(&[])
    }
}
