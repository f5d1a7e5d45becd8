// src/phases/extrafiles.rs

//! Extra files copied into os trees
//!
//! Each `extra_files` descriptor is exported into a staging directory,
//! then copied into the tree under its `target`. The tree gets an
//! `extra_files.json` listing what was added with checksums.

use super::{Phase, PhaseContext};
use crate::config::{ChecksumType, ScmSpec};
use crate::error::Result;
use crate::hash;
use crate::metadata;
use crate::scm;
use crate::tools::Requirement;
use crate::variants::Variant;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use walkdir::WalkDir;

pub const NAME: &str = "extrafiles";
pub const METADATA_FILE: &str = "extra_files.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtraFile {
    pub file: String,
    pub size: u64,
    pub checksums: BTreeMap<String, String>,
}

/// Every regular file below `dir`, relative to it, sorted
pub fn list_files(dir: &Path, checksums: &[ChecksumType]) -> Result<Vec<ExtraFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| crate::error::Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        files.push(ExtraFile {
            file: relative.display().to_string(),
            size: entry.metadata().map_err(|e| crate::error::Error::Io(e.into()))?.len(),
            checksums: hash::hash_file(entry.path(), checksums)?,
        });
    }
    Ok(files)
}

pub struct ExtrafilesPhase {
    ctx: Arc<PhaseContext>,
}

impl ExtrafilesPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    fn specs(&self) -> Vec<ScmSpec> {
        let compose = &self.ctx.compose;
        compose
            .conf
            .extra_files
            .iter()
            .flat_map(|(_, by_arch)| by_arch.values().flatten().cloned())
            .collect()
    }

    fn copy_files(&self, variant: &Variant, arch: &str) -> Result<()> {
        let compose = &self.ctx.compose;
        let specs = compose.conf_list(&compose.conf.extra_files, arch, Some(variant))?;
        if specs.is_empty() {
            return Ok(());
        }
        let staging = compose.paths.extra_files_dir(arch, &variant.uid);
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        let log = compose.log_file(arch, &format!("extra-files-{}", variant.uid))?;
        for spec in &specs {
            let target = spec.target().unwrap_or("").trim_start_matches('/');
            scm::fetch(spec, &staging.join(target), &log)?;
        }

        let os_tree = compose.paths.os_tree(arch, &variant.uid);
        scm::copy_tree(&staging, &os_tree)?;
        let files = list_files(&staging, &[ChecksumType::Sha256])?;
        info!("Copied {} extra files into {}.{}", files.len(), variant.uid, arch);
        metadata::write_document(
            &os_tree.join(METADATA_FILE),
            "extra_files",
            &serde_json::json!({ "data": files }),
        )
    }
}

impl Phase for ExtrafilesPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn is_configured(&self) -> bool {
        !self.ctx.compose.conf.extra_files.is_empty()
    }

    fn requirements(&self) -> Vec<Requirement> {
        let mut reqs: Vec<Requirement> = self
            .specs()
            .iter()
            .flat_map(|spec| scm::requirements(spec.kind()))
            .collect();
        reqs.dedup();
        reqs
    }

    fn start(&self) -> Result<()> {
        self.ctx
            .variant_arches()
            .par_iter()
            .try_for_each(|(variant, arch)| self.copy_files(variant, arch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::config_with;
    use crate::config::ScmTable;
    use crate::phases::tests::context_from;

    #[test]
    fn test_copies_into_targets_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("GPL"), "license").unwrap();
        std::fs::write(src.join("README"), "readme").unwrap();

        let mut conf = config_with("");
        conf.extra_files = vec![(
            "^Server$".to_string(),
            BTreeMap::from([(
                "*".to_string(),
                vec![
                    ScmSpec::Path(src.join("GPL").display().to_string()),
                    ScmSpec::Table(ScmTable {
                        scm: crate::config::ScmKind::File,
                        repo: None,
                        branch: None,
                        file: Some(crate::config::OneOrMany::One(src.join("README").display().to_string())),
                        dir: None,
                        command: None,
                        target: Some("/docs".to_string()),
                    }),
                ],
            )]),
        )];
        let ctx = context_from(&dir.path().join("composes"), conf);
        let phase = ExtrafilesPhase::new(Arc::clone(&ctx));
        assert!(phase.requirements().is_empty());
        phase.start().unwrap();

        let os = ctx.compose.paths.os_tree("x86_64", "Server");
        assert_eq!(std::fs::read_to_string(os.join("GPL")).unwrap(), "license");
        assert_eq!(std::fs::read_to_string(os.join("docs/README")).unwrap(), "readme");
        assert!(!ctx.compose.paths.os_tree("x86_64", "Server-optional").exists());

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(os.join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(doc["header"]["type"], "productmd.extra_files");
        let files: Vec<&str> = doc["payload"]["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["file"].as_str().unwrap())
            .collect();
        assert_eq!(files, vec!["GPL", "docs/README"]);
    }
}
