// src/gather/mod.rs

//! Package gathering
//!
//! Expands an initial pattern list into a closed package set over a
//! [`Universe`]: binary packages plus the source and debug packages that
//! belong to them. Expansion is a fixed-point loop over ordered
//! sub-stages; every pass restarts at the first stage as soon as one stage
//! admits something, so the admission order is reproducible.

pub mod multilib;
pub mod source;

pub use multilib::MultilibClassifier;

use crate::arch::ArchClass;
use crate::comps::Langpack;
use crate::config::GreedyMethod;
use crate::error::Result;
use crate::pkgset::universe::PkgId;
use crate::pkgset::{PackageRecord, Reldep, Universe};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use strum_macros::Display;
use tracing::{debug, info};

/// Why a package was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Flag {
    Input,
    Prepopulate,
    Conditional,
    SelfHosting,
    Fulltree,
    Langpack,
    Multilib,
    Lookaside,
    #[strum(serialize = "greedy:build")]
    #[serde(rename = "greedy:build")]
    GreedyBuild,
}

/// `installed` joins the set when `trigger` is in it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Conditional {
    pub trigger: String,
    pub installed: String,
}

/// Langpack names never pulled in
const LANGPACK_EXCEPTIONS: &[&str] = &["man-pages-overrides"];

pub struct GatherPolicy {
    pub resolve_deps: bool,
    pub selfhosting: bool,
    pub fulltree: bool,
    pub greedy: GreedyMethod,
    pub multilib: MultilibClassifier,
    pub langpacks: Vec<Langpack>,
    pub lookaside_repos: BTreeSet<String>,
    /// `name.arch` entries admitted up front
    pub prepopulate: Vec<String>,
    /// Source package names fulltree never expands
    pub fulltree_excludes: BTreeSet<String>,
}

impl Default for GatherPolicy {
    fn default() -> Self {
        Self {
            resolve_deps: true,
            selfhosting: false,
            fulltree: false,
            greedy: GreedyMethod::None,
            multilib: MultilibClassifier::disabled(),
            langpacks: Vec::new(),
            lookaside_repos: BTreeSet::new(),
            prepopulate: Vec::new(),
            fulltree_excludes: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatheredPackage {
    pub package: PackageRecord,
    pub flags: BTreeSet<Flag>,
}

impl GatheredPackage {
    pub fn is_lookaside(&self) -> bool {
        self.flags.contains(&Flag::Lookaside)
    }
}

/// Binary, source and debug sets, each in package order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatherResult {
    pub binary: Vec<GatheredPackage>,
    pub source: Vec<GatheredPackage>,
    pub debug: Vec<GatheredPackage>,
}

impl GatherResult {
    pub fn is_empty(&self) -> bool {
        self.binary.is_empty() && self.source.is_empty() && self.debug.is_empty()
    }

    pub fn len(&self) -> usize {
        self.binary.len() + self.source.len() + self.debug.len()
    }

    pub fn all(&self) -> impl Iterator<Item = &GatheredPackage> {
        self.binary.iter().chain(&self.source).chain(&self.debug)
    }

    /// Flags keyed by NVRA across all three sets
    pub fn flags(&self) -> BTreeMap<String, BTreeSet<Flag>> {
        self.all()
            .map(|p| (p.package.nvra(), p.flags.clone()))
            .collect()
    }

    pub fn binary_nvras(&self) -> Vec<String> {
        self.binary.iter().map(|p| p.package.nvra()).collect()
    }

    pub fn source_nvras(&self) -> Vec<String> {
        self.source.iter().map(|p| p.package.nvra()).collect()
    }

    pub fn debug_nvras(&self) -> Vec<String> {
        self.debug.iter().map(|p| p.package.nvra()).collect()
    }

    /// Remove packages the parent variant already delivers
    pub fn without_packages(&self, parent: &GatherResult) -> GatherResult {
        let delivered: HashSet<String> = parent.all().map(|p| p.package.nevra()).collect();
        let keep = |set: &[GatheredPackage]| -> Vec<GatheredPackage> {
            set.iter()
                .filter(|p| !delivered.contains(&p.package.nevra()))
                .cloned()
                .collect()
        };
        GatherResult {
            binary: keep(&self.binary),
            source: keep(&self.source),
            debug: keep(&self.debug),
        }
    }
}

/// Best-provider choice for one candidate set
///
/// Returns the admitted packages; the first is the winner, any others are
/// `greedy=build` siblings.
pub fn select_best(
    universe: &Universe,
    candidates: &[PkgId],
    accepted: &BTreeSet<PkgId>,
    greedy: GreedyMethod,
    for_requirement: bool,
) -> Vec<PkgId> {
    let candidates = universe.latest_per_arch(candidates);
    if candidates.is_empty() {
        return Vec::new();
    }
    if greedy == GreedyMethod::All {
        return candidates;
    }

    let (native, multilib): (Vec<PkgId>, Vec<PkgId>) = candidates
        .iter()
        .copied()
        .filter(|id| universe.class(*id) != ArchClass::Foreign && universe.class(*id) != ArchClass::Source)
        .partition(|id| universe.is_native_family(*id));

    let in_accepted = |part: &[PkgId]| -> Vec<PkgId> {
        part.iter().copied().filter(|id| accepted.contains(id)).collect()
    };
    let native_accepted = in_accepted(&native);
    let multilib_accepted = in_accepted(&multilib);
    let (preferred, partition) = if !native_accepted.is_empty() {
        (native_accepted, &native)
    } else if !multilib_accepted.is_empty() {
        (multilib_accepted, &multilib)
    } else if !native.is_empty() {
        (native.clone(), &native)
    } else {
        (multilib.clone(), &multilib)
    };

    let base = universe.base_arch();
    let Some(winner) = preferred.iter().copied().min_by(|a, b| {
        let (pa, pb) = (universe.get(*a), universe.get(*b));
        pa.name
            .len()
            .cmp(&pb.name.len())
            .then_with(|| pa.name.cmp(&pb.name))
            .then_with(|| base.priority(&pa.arch).cmp(&base.priority(&pb.arch)))
            .then_with(|| a.cmp(b))
    }) else {
        return Vec::new();
    };

    let mut chosen = vec![winner];
    if greedy == GreedyMethod::Build && for_requirement {
        let srpm = universe.get(winner).sourcerpm.clone();
        chosen.extend(
            partition
                .iter()
                .copied()
                .filter(|id| *id != winner && universe.get(*id).sourcerpm == srpm),
        );
    }
    chosen
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Set {
    Binary,
    Source,
    Debug,
}

struct Gatherer<'a> {
    universe: &'a Universe,
    policy: &'a GatherPolicy,
    conditionals: BTreeMap<&'a str, Vec<&'a str>>,
    binary: BTreeSet<PkgId>,
    source: BTreeSet<PkgId>,
    debug: BTreeSet<PkgId>,
    flags: HashMap<PkgId, BTreeSet<Flag>>,
    providers: HashMap<Reldep, Vec<PkgId>>,
    added_by_fulltree: HashSet<PkgId>,
    done_conditional: HashSet<PkgId>,
    done_deps: HashSet<PkgId>,
    done_source_deps: HashSet<PkgId>,
    done_source: HashSet<PkgId>,
    done_debug: HashSet<PkgId>,
    done_fulltree: HashSet<PkgId>,
    done_langpack: HashSet<PkgId>,
    done_multilib: HashSet<PkgId>,
}

impl<'a> Gatherer<'a> {
    fn new(universe: &'a Universe, policy: &'a GatherPolicy, conditionals: &'a [Conditional]) -> Self {
        let mut by_trigger: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for c in conditionals {
            by_trigger.entry(c.trigger.as_str()).or_default().push(c.installed.as_str());
        }
        Self {
            universe,
            policy,
            conditionals: by_trigger,
            binary: BTreeSet::new(),
            source: BTreeSet::new(),
            debug: BTreeSet::new(),
            flags: HashMap::new(),
            providers: HashMap::new(),
            added_by_fulltree: HashSet::new(),
            done_conditional: HashSet::new(),
            done_deps: HashSet::new(),
            done_source_deps: HashSet::new(),
            done_source: HashSet::new(),
            done_debug: HashSet::new(),
            done_fulltree: HashSet::new(),
            done_langpack: HashSet::new(),
            done_multilib: HashSet::new(),
        }
    }

    fn is_lookaside_repo(&self, id: PkgId) -> bool {
        self.policy.lookaside_repos.contains(&self.universe.get(id).repo_id)
    }

    fn has_flag(&self, id: PkgId, flag: Flag) -> bool {
        self.flags.get(&id).is_some_and(|f| f.contains(&flag))
    }

    /// Admit into a set; flags only stamp on first admission
    fn admit(&mut self, set: Set, id: PkgId, flag: Option<Flag>) -> bool {
        if set == Set::Binary && self.universe.get(id).is_debug() {
            return false;
        }
        let target = match set {
            Set::Binary => &mut self.binary,
            Set::Source => &mut self.source,
            Set::Debug => &mut self.debug,
        };
        if !target.insert(id) {
            return false;
        }
        let lookaside = self.is_lookaside_repo(id);
        let flags = self.flags.entry(id).or_default();
        if let Some(flag) = flag {
            flags.insert(flag);
        }
        if lookaside {
            flags.insert(Flag::Lookaside);
        }
        debug!("Admitted {} {:?}", self.universe.get(id).nvra(), flags);
        true
    }

    fn pending(&self, set: Set, done: &HashSet<PkgId>) -> Vec<PkgId> {
        let source = match set {
            Set::Binary => &self.binary,
            Set::Source => &self.source,
            Set::Debug => &self.debug,
        };
        source.iter().copied().filter(|id| !done.contains(id)).collect()
    }

    fn add_initial(&mut self, patterns: &[String]) {
        for pattern in patterns.iter().filter(|p| !p.starts_with('-')) {
            let matched = self.universe.by_name_glob(pattern);
            if matched.is_empty() {
                debug!("No package matches input '{pattern}'");
                continue;
            }
            if pattern.ends_with(".+") {
                for id in self.universe.latest_per_arch(&matched) {
                    self.admit(Set::Binary, id, Some(Flag::Input));
                }
                continue;
            }
            let mut by_name: BTreeMap<&str, Vec<PkgId>> = BTreeMap::new();
            for id in &matched {
                by_name.entry(self.universe.get(*id).name.as_str()).or_default().push(*id);
            }
            for ids in by_name.into_values() {
                for id in select_best(self.universe, &ids, &self.binary, self.policy.greedy, false) {
                    self.admit(Set::Binary, id, Some(Flag::Input));
                }
            }
        }

        for entry in &self.policy.prepopulate {
            let matched = self.universe.by_name_glob(entry);
            for id in self.universe.latest_per_arch(&matched) {
                self.admit(Set::Binary, id, Some(Flag::Prepopulate));
            }
        }
    }

    fn stage_conditional(&mut self) -> bool {
        let mut added = false;
        for id in self.pending(Set::Binary, &self.done_conditional.clone()) {
            self.done_conditional.insert(id);
            let name = self.universe.get(id).name.clone();
            let Some(installs) = self.conditionals.get(name.as_str()).cloned() else {
                continue;
            };
            for install in installs {
                let candidates = self.universe.by_name_glob(install);
                for pick in select_best(self.universe, &candidates, &self.binary, self.policy.greedy, false) {
                    added |= self.admit(Set::Binary, pick, Some(Flag::Conditional));
                }
            }
        }
        added
    }

    fn providers(&mut self, req: &Reldep) -> Vec<PkgId> {
        if let Some(cached) = self.providers.get(req) {
            return cached.clone();
        }
        let found = self.universe.latest_per_arch(&self.universe.by_provides(req));
        self.providers.insert(req.clone(), found.clone());
        found
    }

    /// Resolve every requirement of `id`; returns whether anything was admitted
    fn resolve_requires(&mut self, id: PkgId, flag: Option<Flag>) -> bool {
        let mut added = false;
        let requires = self.universe.get(id).requires.clone();
        for req in requires.iter().filter(|r| !r.is_internal()) {
            let candidates = self.providers(req);
            if candidates.is_empty() {
                debug!("Unresolved requirement of {}: {}", self.universe.get(id).nvra(), req);
                continue;
            }
            if candidates.iter().any(|c| self.binary.contains(c)) && self.policy.greedy != GreedyMethod::All {
                continue;
            }
            let chosen = select_best(self.universe, &candidates, &self.binary, self.policy.greedy, true);
            for (i, pick) in chosen.into_iter().enumerate() {
                let pick_flag = if i == 0 { flag } else { Some(Flag::GreedyBuild) };
                added |= self.admit(Set::Binary, pick, pick_flag);
            }
        }
        added
    }

    fn stage_binary_deps(&mut self) -> bool {
        if !self.policy.resolve_deps {
            return false;
        }
        let mut added = false;
        for id in self.pending(Set::Binary, &self.done_deps.clone()) {
            self.done_deps.insert(id);
            added |= self.resolve_requires(id, None);
        }
        added
    }

    fn stage_source_deps(&mut self) -> bool {
        if !self.policy.resolve_deps || !self.policy.selfhosting {
            return false;
        }
        let mut added = false;
        for id in self.pending(Set::Source, &self.done_source_deps.clone()) {
            self.done_source_deps.insert(id);
            added |= self.resolve_requires(id, Some(Flag::SelfHosting));
        }
        added
    }

    fn propagate_lookaside(&mut self, from: PkgId, to: PkgId) {
        if self.has_flag(from, Flag::Lookaside) {
            self.flags.entry(to).or_default().insert(Flag::Lookaside);
        }
    }

    fn stage_source(&mut self) -> bool {
        let mut added = false;
        for id in self.pending(Set::Binary, &self.done_source.clone()) {
            self.done_source.insert(id);
            if let Some(src) = self.universe.source_of(id) {
                added |= self.admit(Set::Source, src, None);
                self.propagate_lookaside(id, src);
            }
        }
        added
    }

    fn stage_debug(&mut self) -> bool {
        let mut added = false;
        for id in self.pending(Set::Binary, &self.done_debug.clone()) {
            self.done_debug.insert(id);
            let pkg = self.universe.get(id);
            if pkg.is_noarch() {
                continue;
            }
            let Some(srpm) = pkg.sourcerpm.clone() else {
                continue;
            };
            let slice = if self.universe.is_multilib(id) {
                crate::pkgset::ArchSlice::DebugMultilib
            } else {
                crate::pkgset::ArchSlice::DebugNative
            };
            let debug: Vec<PkgId> = self
                .universe
                .built_from(&srpm)
                .iter()
                .copied()
                .filter(|d| self.universe.in_slice(*d, slice))
                .collect();
            for d in debug {
                added |= self.admit(Set::Debug, d, None);
                self.propagate_lookaside(id, d);
            }
        }
        added
    }

    fn stage_fulltree(&mut self) -> bool {
        if !self.policy.fulltree {
            return false;
        }
        let mut added = false;
        for id in self.pending(Set::Binary, &self.done_fulltree.clone()) {
            self.done_fulltree.insert(id);
            if self.added_by_fulltree.contains(&id) {
                continue;
            }
            let pkg = self.universe.get(id);
            let Some(srpm) = pkg.sourcerpm.clone() else {
                continue;
            };
            let excluded = crate::pkgset::split_srpm_filename(&srpm)
                .is_some_and(|(name, _, _)| self.policy.fulltree_excludes.contains(name));
            if excluded {
                continue;
            }
            let built: Vec<PkgId> = self
                .universe
                .built_from(&srpm)
                .iter()
                .copied()
                .filter(|s| !self.universe.get(*s).is_debug())
                .collect();
            let mut native = Vec::new();
            let mut multilib = Vec::new();
            let mut noarch = Vec::new();
            for sibling in self.universe.latest_per_arch(&built) {
                match self.universe.class(sibling) {
                    ArchClass::Native => native.push(sibling),
                    ArchClass::Multilib => multilib.push(sibling),
                    ArchClass::Noarch => noarch.push(sibling),
                    _ => {}
                }
            }
            // Multilib siblings only stand in when no native one was chosen
            let chosen = |class: ArchClass| {
                built
                    .iter()
                    .any(|s| self.universe.class(*s) == class && self.binary.contains(s))
            };
            let has_native = chosen(ArchClass::Native);
            let has_multilib = chosen(ArchClass::Multilib);
            let mut siblings = if !has_native && has_multilib { multilib } else { native };
            siblings.extend(noarch);
            siblings.sort_unstable();
            for sibling in siblings {
                if self.admit(Set::Binary, sibling, Some(Flag::Fulltree)) {
                    self.added_by_fulltree.insert(sibling);
                    added = true;
                }
            }
        }
        added
    }

    fn stage_langpack(&mut self) -> bool {
        if self.policy.langpacks.is_empty() {
            return false;
        }
        let mut added = false;
        for id in self.pending(Set::Binary, &self.done_langpack.clone()) {
            self.done_langpack.insert(id);
            let name = self.universe.get(id).name.clone();
            let patterns: Vec<String> = self
                .policy
                .langpacks
                .iter()
                .filter(|lp| lp.name == name)
                .map(|lp| lp.install.replace("%s", "*"))
                .collect();
            for pattern in patterns {
                let mut by_name: BTreeMap<String, Vec<PkgId>> = BTreeMap::new();
                for candidate in self.universe.by_name_glob(&pattern) {
                    let cname = &self.universe.get(candidate).name;
                    if cname.ends_with("-devel")
                        || cname.ends_with("-static")
                        || LANGPACK_EXCEPTIONS.contains(&cname.as_str())
                    {
                        continue;
                    }
                    by_name.entry(cname.clone()).or_default().push(candidate);
                }
                for ids in by_name.into_values() {
                    let best = select_best(self.universe, &ids, &self.binary, GreedyMethod::None, false);
                    if let Some(pick) = best.first() {
                        added |= self.admit(Set::Binary, *pick, Some(Flag::Langpack));
                    }
                }
            }
        }
        added
    }

    fn stage_multilib(&mut self) -> bool {
        if !self.policy.multilib.is_enabled() || !self.universe.base_arch().has_multilib() {
            return false;
        }
        let mut added = false;
        for id in self.pending(Set::Binary, &self.done_multilib.clone()) {
            self.done_multilib.insert(id);
            if self.universe.class(id) != ArchClass::Native {
                continue;
            }
            let pkg = self.universe.get(id);
            let base = self.universe.base_arch();
            let mut copies: Vec<PkgId> = self
                .universe
                .by_name(&pkg.name)
                .iter()
                .copied()
                .filter(|c| {
                    let other = self.universe.get(*c);
                    self.universe.is_multilib(*c)
                        && !other.is_debug()
                        && other.epoch == pkg.epoch
                        && other.version == pkg.version
                        && other.release == pkg.release
                })
                .filter(|c| self.policy.multilib.is_multilib(self.universe.get(*c)))
                .collect();
            copies.sort_by_key(|c| (base.priority(&self.universe.get(*c).arch), *c));
            if let Some(copy) = copies.first() {
                added |= self.admit(Set::Binary, *copy, Some(Flag::Multilib));
            }
        }
        added
    }

    fn run(&mut self) {
        let mut passes = 0usize;
        loop {
            passes += 1;
            let added = self.stage_conditional()
                || self.stage_binary_deps()
                || self.stage_source_deps()
                || self.stage_source()
                || self.stage_debug()
                || self.stage_fulltree()
                || self.stage_langpack()
                || self.stage_multilib();
            if !added {
                break;
            }
        }
        debug!("Gather converged after {passes} passes");
    }

    fn finish(self) -> GatherResult {
        let collect = |set: &BTreeSet<PkgId>| -> Vec<GatheredPackage> {
            set.iter()
                .map(|id| GatheredPackage {
                    package: self.universe.get(*id).clone(),
                    flags: self.flags.get(id).cloned().unwrap_or_default(),
                })
                .collect()
        };
        GatherResult {
            binary: collect(&self.binary),
            source: collect(&self.source),
            debug: collect(&self.debug),
        }
    }
}

/// Names (or globs) to exclude: input patterns with a leading `-`
fn exclude_patterns(patterns: &[String]) -> Vec<&str> {
    patterns.iter().filter_map(|p| p.strip_prefix('-')).collect()
}

/// Gather over `universe` from `patterns` and `conditionals`
pub fn gather(
    universe: &Universe,
    patterns: &[String],
    conditionals: &[Conditional],
    policy: &GatherPolicy,
) -> Result<GatherResult> {
    let excludes = exclude_patterns(patterns);
    let derived;
    let view = if excludes.is_empty() {
        universe
    } else {
        let excluded: HashSet<PkgId> = excludes
            .iter()
            .flat_map(|p| universe.by_name_glob_with_debug(p))
            .collect();
        let excluded: HashSet<String> = excluded.iter().map(|id| universe.get(*id).nevra()).collect();
        debug!("Excluding {} packages", excluded.len());
        derived = universe.without(|p| excluded.contains(&p.nevra()));
        &derived
    };

    let mut gatherer = Gatherer::new(view, policy, conditionals);
    gatherer.add_initial(patterns);
    gatherer.run();
    let result = gatherer.finish();
    info!(
        "Gathered {} binary, {} source, {} debug packages",
        result.binary.len(),
        result.source.len(),
        result.debug.len()
    );
    Ok(result)
}
