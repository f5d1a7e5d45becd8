// src/compose/paths.rs

//! Layout of a compose directory
//!
//! ```text
//! <topdir>/COMPOSE_ID, STATUS
//! <topdir>/work/{global,<arch>}/...     scratch and intermediate data
//! <topdir>/logs/{global,<arch>}/...     tool logs
//! <topdir>/compose/<Variant>/<arch>/os  published trees
//! <topdir>/compose/metadata/            productmd metadata
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};

pub const GLOBAL: &str = "global";

/// Which repository of a variant a package lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RepoKind {
    Binary,
    Source,
    Debug,
}

impl RepoKind {
    pub fn all() -> [RepoKind; 3] {
        [Self::Binary, Self::Source, Self::Debug]
    }

    /// Category name used in `rpms.json`
    pub fn category(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Source => "source",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    topdir: PathBuf,
}

fn ensure(path: PathBuf) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

impl Paths {
    pub fn new(topdir: impl Into<PathBuf>) -> Self {
        Self {
            topdir: topdir.into(),
        }
    }

    pub fn topdir(&self) -> &Path {
        &self.topdir
    }

    pub fn compose_id_file(&self) -> PathBuf {
        self.topdir.join("COMPOSE_ID")
    }

    pub fn status_file(&self) -> PathBuf {
        self.topdir.join("STATUS")
    }

    // Work tree

    pub fn work_dir(&self, arch: &str) -> PathBuf {
        self.topdir.join("work").join(arch)
    }

    pub fn work_global(&self) -> PathBuf {
        self.work_dir(GLOBAL)
    }

    pub fn ensure_work_dir(&self, arch: &str) -> std::io::Result<PathBuf> {
        ensure(self.work_dir(arch))
    }

    pub fn composeinfo_base(&self) -> PathBuf {
        self.work_global().join("composeinfo-base.json")
    }

    pub fn variants_file(&self) -> PathBuf {
        self.work_global().join("variants.xml")
    }

    /// `work/global/comps.xml`, or the per-arch copy
    pub fn comps(&self, arch: Option<&str>) -> PathBuf {
        self.work_dir(arch.unwrap_or(GLOBAL)).join("comps.xml")
    }

    /// Comps filtered for one variant, embedded into its repodata
    pub fn variant_comps(&self, arch: &str, uid: &str) -> PathBuf {
        self.work_dir(arch).join(format!("comps/comps-{uid}.{arch}.xml"))
    }

    pub fn comps_repo(&self, arch: &str) -> PathBuf {
        self.work_dir(arch).join("comps_repo")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.work_global().join("compose.lock")
    }

    pub fn package_list(&self, arch: &str, uid: &str) -> PathBuf {
        self.work_dir(arch)
            .join("package_list")
            .join(format!("{uid}.{arch}.conf"))
    }

    pub fn pkgset_file_list(&self, arch: &str) -> PathBuf {
        self.work_dir(arch).join(format!("package_list/pkgset.{arch}.conf"))
    }

    /// Repository over the whole package set of one arch
    pub fn pkgset_repo(&self, arch: &str) -> PathBuf {
        self.work_dir(arch).join("repo")
    }

    pub fn lookaside_repo(&self, arch: &str, uid: &str) -> PathBuf {
        self.work_dir(arch).join(format!("lookaside_repo/{uid}"))
    }

    pub fn buildinstall_dir(&self, arch: &str, uid: &str) -> PathBuf {
        self.work_dir(arch).join("buildinstall").join(uid)
    }

    pub fn extra_files_dir(&self, arch: &str, uid: &str) -> PathBuf {
        self.work_dir(arch).join(uid).join("extra-files")
    }

    pub fn iso_staging_dir(&self, arch: &str, name: &str) -> PathBuf {
        self.work_dir(arch).join("iso").join(name)
    }

    pub fn ostree_work_dir(&self, arch: &str, uid: &str, index: usize) -> PathBuf {
        self.work_dir(arch).join(uid).join(format!("ostree-{index}"))
    }

    pub fn ostree_installer_dir(&self, arch: &str, uid: &str) -> PathBuf {
        self.work_dir(arch).join(uid).join("ostree_installer")
    }

    pub fn productimg_dir(&self, arch: &str, uid: &str) -> PathBuf {
        self.work_dir(arch).join(uid).join("product_img")
    }

    pub fn koji_tasks_dir(&self, arch: &str) -> PathBuf {
        self.work_dir(arch).join("koji_tasks")
    }

    // Logs

    pub fn log_dir(&self, arch: &str) -> PathBuf {
        self.topdir.join("logs").join(arch)
    }

    /// Log file for one tool run; the directory is created
    pub fn log_file(&self, arch: &str, name: &str) -> std::io::Result<PathBuf> {
        Ok(ensure(self.log_dir(arch))?.join(format!("{name}.{arch}.log")))
    }

    pub fn global_log(&self) -> PathBuf {
        self.log_dir(GLOBAL).join("compose.global.log")
    }

    pub fn traceback_log(&self) -> PathBuf {
        self.log_dir(GLOBAL).join("traceback.log")
    }

    // Published tree

    pub fn compose_dir(&self) -> PathBuf {
        self.topdir.join("compose")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.compose_dir().join("metadata")
    }

    pub fn variant_dir(&self, uid: &str) -> PathBuf {
        self.compose_dir().join(uid)
    }

    pub fn os_tree(&self, arch: &str, uid: &str) -> PathBuf {
        self.variant_dir(uid).join(arch).join("os")
    }

    /// Root of the repository holding one kind of package
    pub fn repository(&self, arch: &str, uid: &str, kind: RepoKind) -> PathBuf {
        match kind {
            RepoKind::Binary => self.os_tree(arch, uid),
            RepoKind::Source => self.variant_dir(uid).join("source").join("tree"),
            RepoKind::Debug => self.variant_dir(uid).join(arch).join("debug").join("tree"),
        }
    }

    pub fn packages_dir(&self, arch: &str, uid: &str, kind: RepoKind) -> PathBuf {
        self.repository(arch, uid, kind).join("Packages")
    }

    pub fn iso_dir(&self, arch: &str, uid: &str) -> PathBuf {
        if arch == "src" {
            self.variant_dir(uid).join("source").join("iso")
        } else {
            self.variant_dir(uid).join(arch).join("iso")
        }
    }

    pub fn images_dir(&self, arch: &str, uid: &str) -> PathBuf {
        self.variant_dir(uid).join(arch).join("images")
    }

    pub fn ostree_repo_dir(&self, uid: &str) -> PathBuf {
        self.variant_dir(uid).join("ostree")
    }

    /// Path relative to `compose/`, as recorded in metadata
    pub fn relative_to_compose<'a>(&self, path: &'a Path) -> &'a Path {
        let base = self.compose_dir();
        path.strip_prefix(&base).unwrap_or(path)
    }
}
