// src/metadata/rpms.rs

//! `rpms.json`: which package landed in which variant tree

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmEntry {
    /// Path relative to `compose/`
    pub path: String,
    pub sigkey: Option<String>,
    /// binary, source or debug
    pub category: String,
}

type BySource = BTreeMap<String, BTreeMap<String, RpmEntry>>;

/// variant → arch → source NEVRA → package NEVRA → entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmsManifest {
    rpms: BTreeMap<String, BTreeMap<String, BySource>>,
}

impl RpmsManifest {
    pub fn add(&mut self, variant: &str, arch: &str, srpm_nevra: &str, nevra: &str, entry: RpmEntry) {
        self.rpms
            .entry(variant.to_string())
            .or_default()
            .entry(arch.to_string())
            .or_default()
            .entry(srpm_nevra.to_string())
            .or_default()
            .insert(nevra.to_string(), entry);
    }

    pub fn merge(&mut self, other: RpmsManifest) {
        for (variant, arches) in other.rpms {
            for (arch, sources) in arches {
                for (srpm, packages) in sources {
                    for (nevra, entry) in packages {
                        self.add(&variant, &arch, &srpm, &nevra, entry);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rpms
            .values()
            .flat_map(|a| a.values())
            .flat_map(|s| s.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn payload(&self, compose_id: &str) -> serde_json::Value {
        serde_json::json!({
            "compose": {"id": compose_id},
            "rpms": self.rpms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_groups_by_source() {
        let mut manifest = RpmsManifest::default();
        let entry = |path: &str, category: &str| RpmEntry {
            path: path.to_string(),
            sigkey: None,
            category: category.to_string(),
        };
        manifest.add("Server", "x86_64", "bash-0:5.2-1.src", "bash-0:5.2-1.x86_64", entry("Server/x86_64/os/Packages/b/bash.rpm", "binary"));
        let mut other = RpmsManifest::default();
        other.add("Server", "x86_64", "bash-0:5.2-1.src", "bash-0:5.2-1.src", entry("Server/source/tree/Packages/b/bash.src.rpm", "source"));
        manifest.merge(other);

        assert_eq!(manifest.len(), 2);
        let payload = manifest.payload("F-40");
        assert_eq!(
            payload["rpms"]["Server"]["x86_64"]["bash-0:5.2-1.src"]["bash-0:5.2-1.src"]["category"],
            "source"
        );
    }
}
