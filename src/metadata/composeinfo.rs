// src/metadata/composeinfo.rs

//! `composeinfo.json`: compose identity, release and variant layout

use crate::compose::naming::ComposeIds;
use crate::compose::paths::{Paths, RepoKind};
use crate::variants::VariantTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeSection {
    pub id: String,
    pub date: String,
    pub respin: u32,
    #[serde(rename = "type")]
    pub compose_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSection {
    pub name: String,
    pub short: String,
    pub version: String,
    #[serde(rename = "type")]
    pub release_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_layered: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantInfo {
    pub id: String,
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub variant_type: String,
    pub arches: Vec<String>,
    /// category → arch → path relative to `compose/`
    pub paths: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeInfo {
    pub compose: ComposeSection,
    pub release: ReleaseSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_product: Option<ReleaseSection>,
    pub variants: BTreeMap<String, VariantInfo>,
}

impl ComposeInfo {
    pub fn new(
        ids: &ComposeIds,
        base_product_name: Option<&str>,
        tree: &VariantTree,
        is_final: bool,
    ) -> Self {
        let base_product = ids.ident.base_product.as_ref().map(|(short, version, kind)| ReleaseSection {
            name: base_product_name.unwrap_or(short).to_string(),
            short: short.clone(),
            version: version.clone(),
            release_type: kind.clone(),
            is_layered: None,
        });
        let variants = tree
            .all()
            .iter()
            .map(|v| {
                (
                    v.uid.clone(),
                    VariantInfo {
                        id: v.id.clone(),
                        uid: v.uid.clone(),
                        name: v.name.clone(),
                        variant_type: v.variant_type.to_string(),
                        arches: v.arches.iter().cloned().collect(),
                        paths: BTreeMap::new(),
                    },
                )
            })
            .collect();

        Self {
            compose: ComposeSection {
                id: ids.compose_id.clone(),
                date: ids.date.clone(),
                respin: ids.respin,
                compose_type: ids.compose_type.to_string(),
                label: ids.label.clone(),
                is_final,
            },
            release: ReleaseSection {
                name: ids.ident.release_name.clone(),
                short: ids.ident.release_short.clone(),
                version: ids.ident.release_version.clone(),
                release_type: ids.ident.release_type.clone(),
                is_layered: Some(base_product.is_some()),
            },
            base_product,
            variants,
        }
    }

    /// Record every published path that exists on disk
    pub fn fill_paths(&mut self, paths: &Paths) {
        for info in self.variants.values_mut() {
            let uid = info.uid.clone();
            for arch in info.arches.clone() {
                let mut candidates: Vec<(&str, std::path::PathBuf)> = Vec::new();
                for kind in RepoKind::all() {
                    let (tree_key, packages_key, repo_key) = match kind {
                        RepoKind::Binary => ("os_tree", "packages", "repository"),
                        RepoKind::Source => ("source_tree", "source_packages", "source_repository"),
                        RepoKind::Debug => ("debug_tree", "debug_packages", "debug_repository"),
                    };
                    let repo = paths.repository(&arch, &uid, kind);
                    candidates.push((tree_key, repo.clone()));
                    candidates.push((repo_key, repo.clone()));
                    candidates.push((packages_key, paths.packages_dir(&arch, &uid, kind)));
                }
                candidates.push(("isos", paths.iso_dir(&arch, &uid)));
                candidates.push(("source_isos", paths.iso_dir("src", &uid)));
                candidates.push(("images", paths.images_dir(&arch, &uid)));

                for (category, path) in candidates {
                    if !path.exists() {
                        continue;
                    }
                    let relative = paths.relative_to_compose(&path).display().to_string();
                    info.paths
                        .entry(category.to_string())
                        .or_default()
                        .insert(arch.clone(), relative);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::naming::{ComposeIdent, ComposeType};
    use crate::variants::{VariantFilter, tests::VARIANTS_XML};

    fn ids() -> ComposeIds {
        let ident = ComposeIdent {
            release_name: "Fedora".to_string(),
            release_short: "Fedora".to_string(),
            release_version: "40".to_string(),
            release_type: "ga".to_string(),
            base_product: None,
        };
        ComposeIds::new(ident, "20240101", ComposeType::Nightly, 1, None)
    }

    #[test]
    fn test_composeinfo_payload() {
        let tree = VariantTree::parse(VARIANTS_XML, &VariantFilter::default()).unwrap();
        let info = ComposeInfo::new(&ids(), None, &tree, false);
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["compose"]["id"], "Fedora-40-20240101.n.1");
        assert_eq!(value["compose"]["type"], "nightly");
        assert_eq!(value["release"]["is_layered"], false);
        assert!(value.get("base_product").is_none());
        assert_eq!(value["variants"]["Server-optional"]["type"], "optional");
    }

    #[test]
    fn test_fill_paths_only_existing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        std::fs::create_dir_all(paths.packages_dir("x86_64", "Client", RepoKind::Binary)).unwrap();

        let tree = VariantTree::parse(VARIANTS_XML, &VariantFilter::default()).unwrap();
        let mut info = ComposeInfo::new(&ids(), None, &tree, true);
        info.fill_paths(&paths);

        let client = &info.variants["Client"];
        assert_eq!(client.paths["os_tree"]["x86_64"], "Client/x86_64/os");
        assert_eq!(client.paths["packages"]["x86_64"], "Client/x86_64/os/Packages");
        assert!(!client.paths.contains_key("source_tree"));
        assert!(info.variants["Server"].paths.is_empty());
    }
}
