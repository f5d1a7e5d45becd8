// src/arch.rs

//! Architecture tables
//!
//! A compose is produced per *tree arch* (`x86_64`, `ppc64le`, ...). Each
//! tree arch accepts a family of *package arches*: the native ones, the
//! foreign multilib ones that are co-installable on it, and `noarch`.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const NOARCH: &str = "noarch";
pub const SRC: &str = "src";
pub const NOSRC: &str = "nosrc";

/// Classification of a package arch relative to a tree arch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchClass {
    Native,
    Multilib,
    Noarch,
    Source,
    /// Not installable on this tree arch at all
    Foreign,
}

/// Package arch families for one tree arch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeArch {
    name: String,
    native: &'static [&'static str],
    multilib: &'static [&'static str],
}

/// (tree arch, native package arches, multilib package arches)
const ARCH_TABLE: &[(&str, &[&str], &[&str])] = &[
    ("x86_64", &["x86_64"], &["athlon", "i686", "i586", "i486", "i386"]),
    ("i386", &["i686", "i586", "i486", "i386"], &[]),
    ("i686", &["i686", "i586", "i486", "i386"], &[]),
    ("aarch64", &["aarch64"], &[]),
    ("ppc64", &["ppc64"], &["ppc"]),
    ("ppc64le", &["ppc64le"], &[]),
    ("s390x", &["s390x"], &["s390"]),
    ("armhfp", &["armv7hnl", "armv7hl", "armv6hl"], &[]),
    ("riscv64", &["riscv64"], &[]),
];

impl TreeArch {
    /// Look up a tree arch; unknown arches are their own single native arch
    pub fn new(name: &str) -> Self {
        for (tree, native, multilib) in ARCH_TABLE {
            if *tree == name {
                return Self {
                    name: name.to_string(),
                    native,
                    multilib,
                };
            }
        }
        Self {
            name: name.to_string(),
            native: &[],
            multilib: &[],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Is this a tree arch we have a table entry for
    pub fn is_known(name: &str) -> bool {
        ARCH_TABLE.iter().any(|(tree, _, _)| *tree == name)
    }

    pub fn native_arches(&self) -> Vec<&str> {
        if self.native.is_empty() {
            vec![self.name.as_str()]
        } else {
            self.native.to_vec()
        }
    }

    pub fn multilib_arches(&self) -> &[&'static str] {
        self.multilib
    }

    pub fn has_multilib(&self) -> bool {
        !self.multilib.is_empty()
    }

    /// Preferred package arch for repository tooling (`i386` → `i686`)
    pub fn primary_arch(&self) -> &str {
        self.native.first().copied().unwrap_or(self.name.as_str())
    }

    /// Classify a package arch
    pub fn classify(&self, pkg_arch: &str) -> ArchClass {
        if pkg_arch == NOARCH {
            ArchClass::Noarch
        } else if pkg_arch == SRC || pkg_arch == NOSRC {
            ArchClass::Source
        } else if self.native_arches().contains(&pkg_arch) {
            ArchClass::Native
        } else if self.multilib.contains(&pkg_arch) {
            ArchClass::Multilib
        } else {
            ArchClass::Foreign
        }
    }

    /// Priority list: native arches, multilib arches, then noarch
    pub fn priority_list(&self) -> Vec<&str> {
        let mut list = self.native_arches();
        list.extend(self.multilib.iter().copied());
        list.push(NOARCH);
        list
    }

    /// Position of a package arch in the priority list (lower is better)
    pub fn priority(&self, pkg_arch: &str) -> usize {
        let list = self.priority_list();
        list.iter()
            .position(|a| *a == pkg_arch)
            .unwrap_or(list.len())
    }

    /// Whether the tree arch boots with isolinux and needs `isohybrid`
    pub fn is_x86(&self) -> bool {
        matches!(self.name.as_str(), "x86_64" | "i386" | "i686")
    }
}

impl fmt::Display for TreeArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Every package arch that appears in the tables
pub fn is_package_arch(arch: &str) -> bool {
    arch == NOARCH
        || arch == SRC
        || arch == NOSRC
        || ARCH_TABLE
            .iter()
            .any(|(_, native, multilib)| native.contains(&arch) || multilib.contains(&arch))
}

/// Split a `name.arch` pattern when the suffix is a known package arch
///
/// `glibc.i686` → (`glibc`, Some(`i686`)); `python3.12` → (`python3.12`, None)
pub fn split_name_arch(pattern: &str) -> (&str, Option<&str>) {
    if let Some((name, arch)) = pattern.rsplit_once('.') {
        if !name.is_empty() && is_package_arch(arch) {
            return (name, Some(arch));
        }
    }
    (pattern, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_x86_64() {
        let arch = TreeArch::new("x86_64");
        assert_eq!(arch.classify("x86_64"), ArchClass::Native);
        assert_eq!(arch.classify("i686"), ArchClass::Multilib);
        assert_eq!(arch.classify("noarch"), ArchClass::Noarch);
        assert_eq!(arch.classify("src"), ArchClass::Source);
        assert_eq!(arch.classify("aarch64"), ArchClass::Foreign);
    }

    #[test]
    fn test_priority_list_order() {
        let arch = TreeArch::new("x86_64");
        assert_eq!(
            arch.priority_list(),
            vec!["x86_64", "athlon", "i686", "i586", "i486", "i386", "noarch"]
        );
        assert!(arch.priority("x86_64") < arch.priority("i686"));
        assert!(arch.priority("i686") < arch.priority("noarch"));
    }

    #[test]
    fn test_unknown_tree_arch_is_self_native() {
        let arch = TreeArch::new("loongarch64");
        assert_eq!(arch.native_arches(), vec!["loongarch64"]);
        assert!(!arch.has_multilib());
    }

    #[test]
    fn test_i386_primary_arch() {
        assert_eq!(TreeArch::new("i386").primary_arch(), "i686");
        assert_eq!(TreeArch::new("x86_64").primary_arch(), "x86_64");
    }

    #[test]
    fn test_split_name_arch() {
        assert_eq!(split_name_arch("glibc.i686"), ("glibc", Some("i686")));
        assert_eq!(split_name_arch("python3.12"), ("python3.12", None));
        assert_eq!(split_name_arch("kernel"), ("kernel", None));
    }
}
