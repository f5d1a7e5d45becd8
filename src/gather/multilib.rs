// src/gather/multilib.rs

//! Multilib classifier: which foreign-arch packages ship next to native ones

use crate::config::MultilibMethod;
use crate::error::{Error, Result};
use crate::pkgset::PackageRecord;
use glob::Pattern;
use regex::Regex;
use std::sync::LazyLock;

static SONAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.*\.so\.\d+.*$").unwrap());

const DEVEL_BLACKLIST: &[&str] = &[
    "dmraid-devel",
    "kdeutils-devel",
    "mkinitrd-devel",
    "java-*-devel",
    "php-devel",
    "kernel-devel",
    "kernel-headers",
];

const DEVEL_WHITELIST: &[&str] = &["glibc-devel", "libstdc++-devel"];

const RUNTIME_BLACKLIST: &[&str] = &["tomcat-native", "php", "kernel", "kernel-*"];

const RUNTIME_WHITELIST: &[&str] = &[
    "libgnat",
    "wine",
    "lmms-vst",
    "nspluginwrapper",
    "libflashsupport",
    "valgrind",
    "perl-libs",
    "redhat-lsb",
    "yaboot",
];

fn compile(patterns: &[&str]) -> Vec<Pattern> {
    patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect()
}

fn compile_user(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(|e| Error::Parse(format!("invalid multilib pattern '{p}': {e}"))))
        .collect()
}

fn matches_any(patterns: &[Pattern], name: &str) -> bool {
    patterns.iter().any(|p| p.matches(name))
}

pub struct MultilibClassifier {
    methods: Vec<MultilibMethod>,
    blacklist: Vec<Pattern>,
    whitelist: Vec<Pattern>,
    devel_blacklist: Vec<Pattern>,
    devel_whitelist: Vec<Pattern>,
    runtime_blacklist: Vec<Pattern>,
    runtime_whitelist: Vec<Pattern>,
}

impl MultilibClassifier {
    pub fn new(methods: &[MultilibMethod], blacklist: &[String], whitelist: &[String]) -> Result<Self> {
        Ok(Self {
            methods: methods.to_vec(),
            blacklist: compile_user(blacklist)?,
            whitelist: compile_user(whitelist)?,
            devel_blacklist: compile(DEVEL_BLACKLIST),
            devel_whitelist: compile(DEVEL_WHITELIST),
            runtime_blacklist: compile(RUNTIME_BLACKLIST),
            runtime_whitelist: compile(RUNTIME_WHITELIST),
        })
    }

    /// Nothing is ever multilib
    pub fn disabled() -> Self {
        Self {
            methods: Vec::new(),
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            devel_blacklist: Vec::new(),
            devel_whitelist: Vec::new(),
            runtime_blacklist: Vec::new(),
            runtime_whitelist: Vec::new(),
        }
    }

    pub fn methods(&self) -> &[MultilibMethod] {
        &self.methods
    }

    pub fn is_enabled(&self) -> bool {
        self.methods.iter().any(|m| *m != MultilibMethod::None) || !self.whitelist.is_empty()
    }

    pub fn is_multilib(&self, pkg: &PackageRecord) -> bool {
        if matches_any(&self.blacklist, &pkg.name) {
            return false;
        }
        if matches_any(&self.whitelist, &pkg.name) {
            return true;
        }
        self.methods.iter().any(|m| self.method_holds(*m, pkg))
    }

    fn method_holds(&self, method: MultilibMethod, pkg: &PackageRecord) -> bool {
        match method {
            MultilibMethod::None => false,
            MultilibMethod::All => true,
            MultilibMethod::Devel => {
                if matches_any(&self.devel_blacklist, &pkg.name) {
                    return false;
                }
                if matches_any(&self.devel_whitelist, &pkg.name) {
                    return true;
                }
                let devel = |s: &str| s.contains("-devel") || s.contains("-static");
                pkg.name.ends_with("-devel")
                    || pkg.name.ends_with("-static")
                    || pkg.provides.iter().any(|p| devel(&p.name))
            }
            MultilibMethod::Runtime => {
                if matches_any(&self.runtime_blacklist, &pkg.name) {
                    return false;
                }
                if matches_any(&self.runtime_whitelist, &pkg.name) {
                    return true;
                }
                pkg.provides.iter().any(|p| SONAME.is_match(&p.name))
            }
        }
    }
}
