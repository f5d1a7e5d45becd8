// src/compose/mod.rs

//! Compose context
//!
//! One [`Compose`] exists per run. It owns the validated configuration, the
//! identifiers, the directory layout and the variant tree, plus the few
//! structures phases append to concurrently (failed deliverables, images,
//! rpm manifest), each behind its own mutex.

pub mod naming;
pub mod overrides;
pub mod paths;
pub mod status;

pub use naming::{ComposeIdent, ComposeIds, ComposeType};
pub use paths::{Paths, RepoKind};
pub use status::{ComposeStatus, FailedDeliverables};

use crate::config::{ArchVariant, Config};
use crate::error::{Error, Result};
use crate::metadata::{ComposeInfo, Image, ImagesIndex, RpmsManifest};
use crate::notifier::{self, Notifier};
use crate::variants::{Variant, VariantTree};
use fs2::FileExt;
use serde_json::json;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing::{debug, error, info, warn};

/// Label milestones that imply a supported compose
const SUPPORTED_MILESTONES: &[&str] = &["RC", "Update", "SecurityFix"];

/// Run-level options that come from the command line
#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    pub compose_type: ComposeType,
    pub label: Option<String>,
    pub supported: bool,
    pub old_composes: Vec<PathBuf>,
    pub koji_event: Option<u64>,
    pub notification_scripts: Vec<String>,
    /// Override the compose date (`YYYYMMDD`)
    pub date: Option<String>,
    /// First respin to try
    pub respin: Option<u32>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Allocate `<target>/<compose_id>` exclusively
///
/// The respin is incremented until a directory can be created. Any error
/// other than "already exists" is fatal.
pub fn allocate_dir(
    target: &Path,
    ident: &ComposeIdent,
    date: &str,
    compose_type: ComposeType,
    respin: u32,
    label: Option<String>,
) -> Result<(ComposeIds, PathBuf)> {
    std::fs::create_dir_all(target)?;
    let mut respin = respin;
    loop {
        let ids = ComposeIds::new(ident.clone(), date, compose_type, respin, label.clone());
        let dir = target.join(&ids.compose_id);
        match std::fs::create_dir(&dir) {
            Ok(()) => return Ok((ids, dir)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} exists, trying respin {}", dir.display(), respin + 1);
                respin += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

pub struct Compose {
    pub conf: Config,
    pub ids: ComposeIds,
    pub paths: Paths,
    pub notifier: Notifier,
    pub supported: bool,
    pub old_composes: Vec<PathBuf>,
    pub koji_event: Option<u64>,
    /// Unix time the run started; used for tree timestamps
    pub started: i64,
    variants: OnceLock<VariantTree>,
    status: Mutex<Option<ComposeStatus>>,
    failed: Mutex<FailedDeliverables>,
    images: Mutex<ImagesIndex>,
    rpms: Mutex<RpmsManifest>,
    lock_file: Mutex<Option<File>>,
}

impl std::fmt::Debug for Compose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compose")
            .field("compose_id", &self.ids.compose_id)
            .field("topdir", &self.paths.topdir())
            .finish()
    }
}

impl Compose {
    /// Create a fresh compose directory inside `target`
    pub fn create(conf: Config, target: &Path, options: ComposeOptions) -> Result<Self> {
        let ident = ComposeIdent::from_config(&conf);
        let date = options
            .date
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d").to_string());
        let (ids, dir) = allocate_dir(
            target,
            &ident,
            &date,
            options.compose_type,
            options.respin.unwrap_or(0),
            options.label.clone(),
        )?;
        info!("Creating compose {} in {}", ids.compose_id, dir.display());

        let compose = Self::assemble(conf, ids, dir, options);
        std::fs::create_dir_all(compose.paths.work_global())?;
        std::fs::write(compose.paths.compose_id_file(), &compose.ids.compose_id)?;
        let base = ComposeInfo::new(
            &compose.ids,
            compose.conf.base_product_name.as_deref(),
            &VariantTree::default(),
            false,
        );
        crate::metadata::write_document(&compose.paths.composeinfo_base(), "composeinfo", &base)?;
        Ok(compose)
    }

    /// Re-open an existing compose directory
    pub fn open(conf: Config, dir: &Path, options: ComposeOptions) -> Result<Self> {
        let id_file = Paths::new(dir).compose_id_file();
        let compose_id = std::fs::read_to_string(&id_file)
            .map_err(|_| Error::NotFound(format!("{} is not a compose directory", dir.display())))?
            .trim()
            .to_string();

        let base: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(Paths::new(dir).composeinfo_base())?)?;
        let info: ComposeInfo = serde_json::from_value(base["payload"].clone())?;
        let compose_type = info
            .compose
            .compose_type
            .parse()
            .map_err(|_| Error::Parse(format!("unknown compose type '{}'", info.compose.compose_type)))?;
        let ids = ComposeIds::new(
            ComposeIdent::from_config(&conf),
            &info.compose.date,
            compose_type,
            info.compose.respin,
            info.compose.label.clone(),
        );
        if ids.compose_id != compose_id {
            return Err(Error::Parse(format!(
                "configuration produces compose id {} but {} holds {}",
                ids.compose_id,
                dir.display(),
                compose_id
            )));
        }
        info!("Reusing compose {} in {}", compose_id, dir.display());

        let compose = Self::assemble(conf, ids, dir.to_path_buf(), options);
        *lock(&compose.status) = status::read_status_file(&compose.paths.status_file())?;
        Ok(compose)
    }

    fn assemble(conf: Config, ids: ComposeIds, dir: PathBuf, options: ComposeOptions) -> Self {
        let mut supported = options.supported;
        if let Some(label) = &ids.label {
            let milestone = label.split('-').next().unwrap_or_default();
            if SUPPORTED_MILESTONES.contains(&milestone) {
                info!("Automatically setting 'supported' flag due to label: {}", label);
                supported = true;
            }
        }
        let notifier = Notifier::new(options.notification_scripts);
        notifier.set_compose(&ids.compose_id, &dir.display().to_string());

        Self {
            conf,
            ids,
            paths: Paths::new(dir),
            notifier,
            supported,
            old_composes: options.old_composes,
            koji_event: options.koji_event,
            started: chrono::Utc::now().timestamp(),
            variants: OnceLock::new(),
            status: Mutex::new(None),
            failed: Mutex::new(FailedDeliverables::default()),
            images: Mutex::new(ImagesIndex::default()),
            rpms: Mutex::new(RpmsManifest::default()),
            lock_file: Mutex::new(None),
        }
    }

    pub fn compose_id(&self) -> &str {
        &self.ids.compose_id
    }

    pub fn topdir(&self) -> &Path {
        self.paths.topdir()
    }

    /// Take the exclusive run lock on the compose directory
    pub fn lock(&self) -> Result<()> {
        let path = self.paths.lock_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Phase {
                phase: "init".to_string(),
                message: format!("compose directory {} is in use by another run", self.topdir().display()),
            }
        })?;
        *lock(&self.lock_file) = Some(file);
        Ok(())
    }

    pub fn set_variants(&self, tree: VariantTree) {
        if self.variants.set(tree).is_err() {
            warn!("Variant tree was already loaded; keeping the first one");
        }
    }

    /// Variant tree; empty until the init phase has read variants.xml
    pub fn variants(&self) -> &VariantTree {
        static EMPTY: OnceLock<VariantTree> = OnceLock::new();
        self.variants
            .get()
            .unwrap_or_else(|| EMPTY.get_or_init(VariantTree::default))
    }

    // Status

    pub fn get_status(&self) -> Option<ComposeStatus> {
        *lock(&self.status)
    }

    /// Write the status file
    ///
    /// Writing the current status is a no-op, a finished compose cannot be
    /// rewritten, and FINISHED becomes FINISHED_INCOMPLETE when any failable
    /// deliverable failed.
    pub fn write_status(&self, requested: ComposeStatus) -> Result<()> {
        let mut current = lock(&self.status);
        let mut next = requested;
        if next == ComposeStatus::Finished {
            let failed = lock(&self.failed);
            if !failed.is_empty() {
                for (variant, arch, deliverable) in failed.iter() {
                    let variant = if variant.is_empty() { "<global>" } else { variant };
                    warn!("Failed {} on variant {}, arch {}", deliverable, variant, arch);
                }
                next = ComposeStatus::FinishedIncomplete;
            }
        }

        let Some(next) = status::transition(*current, next)? else {
            return Ok(());
        };
        status::write_status_file(&self.paths.status_file(), next)?;
        *current = Some(next);
        drop(current);

        match next {
            ComposeStatus::Doomed | ComposeStatus::Terminated => {
                error!("Compose run failed: {}", next)
            }
            _ => info!("Compose status: {}", next),
        }
        self.notifier
            .send_async(notifier::STATUS_CHANGE, json!({"status": next.to_string()}));
        Ok(())
    }

    // Failable deliverables

    /// Whether `deliverable` may fail on (variant, arch); records it if so
    pub fn can_fail(&self, variant: Option<&Variant>, arch: &str, deliverable: &str) -> bool {
        let uid = variant.map(|v| v.uid.as_str()).unwrap_or("");
        let failable = match overrides::resolve_list(&self.conf.failable_deliverables, arch, uid) {
            Ok(list) => list,
            Err(e) => {
                warn!("Cannot evaluate failable_deliverables: {}", e);
                return false;
            }
        };
        if failable.iter().any(|d| d == deliverable) {
            lock(&self.failed).record(uid, arch, deliverable);
            true
        } else {
            false
        }
    }

    /// Run `f`, tolerating its failure when the deliverable is failable
    pub fn failable<T>(
        &self,
        variant: Option<&Variant>,
        arch: &str,
        deliverable: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<Option<T>> {
        self.failable_on(variant, arch, deliverable, &[], f)
    }

    /// [`failable`](Self::failable), also tolerating failure on the arches a
    /// config block lists as failable (`*` for every arch)
    pub fn failable_on<T>(
        &self,
        variant: Option<&Variant>,
        arch: &str,
        deliverable: &str,
        failable_arches: &[String],
        f: impl FnOnce() -> Result<T>,
    ) -> Result<Option<T>> {
        let e = match f() {
            Ok(value) => return Ok(Some(value)),
            Err(e) => e,
        };
        if failable_arches.iter().any(|a| a == "*" || a == arch) {
            let uid = variant.map(|v| v.uid.as_str()).unwrap_or("");
            lock(&self.failed).record(uid, arch, deliverable);
        } else if !self.can_fail(variant, arch, deliverable) {
            return Err(e);
        }
        let uid = variant.map(|v| v.uid.as_str()).unwrap_or("<global>");
        warn!(
            "[FAIL] {} (variant {}, arch {}) failed, but going on anyway: {}",
            deliverable, uid, arch, e
        );
        Ok(None)
    }

    pub fn failed_deliverables(&self) -> FailedDeliverables {
        lock(&self.failed).clone()
    }

    // Per-(variant, arch) options

    pub fn conf_list<T: Clone>(
        &self,
        option: &ArchVariant<Vec<T>>,
        arch: &str,
        variant: Option<&Variant>,
    ) -> Result<Vec<T>> {
        overrides::resolve_list(option, arch, variant.map(|v| v.uid.as_str()).unwrap_or(""))
    }

    pub fn conf_scalar<T: Clone>(
        &self,
        option: &ArchVariant<T>,
        arch: &str,
        variant: Option<&Variant>,
    ) -> Result<Option<T>> {
        overrides::resolve_scalar(option, arch, variant.map(|v| v.uid.as_str()).unwrap_or(""))
    }

    // Shared indexes

    pub fn add_image(&self, variant: &str, arch: &str, image: Image) {
        lock(&self.images).add(variant, arch, image);
    }

    pub fn with_images<R>(&self, f: impl FnOnce(&mut ImagesIndex) -> R) -> R {
        f(&mut lock(&self.images))
    }

    pub fn add_rpms(&self, manifest: RpmsManifest) {
        lock(&self.rpms).merge(manifest);
    }

    pub fn rpms(&self) -> RpmsManifest {
        lock(&self.rpms).clone()
    }

    // Naming

    pub fn image_name(
        &self,
        variant: &Variant,
        arch: &str,
        disc_type: &str,
        disc_num: Option<u32>,
        suffix: &str,
    ) -> Result<String> {
        let label = naming::image_variant_label(self.variants(), variant);
        self.ids.image_name(&self.conf.image_name_format, label, arch, disc_type, disc_num, suffix)
    }

    pub fn volume_id(&self, variant: &Variant, arch: &str, disc_type: &str) -> Result<String> {
        let formats = if self.conf.release_is_layered {
            &self.conf.image_volid_layered_product_formats
        } else {
            &self.conf.image_volid_formats
        };
        let label = naming::image_variant_label(self.variants(), variant);
        self.ids.volume_id(formats, label, arch, disc_type)
    }

    /// Log file under `logs/<arch>/`
    pub fn log_file(&self, arch: &str, name: &str) -> Result<PathBuf> {
        Ok(self.paths.log_file(arch, name)?)
    }

    /// Final composeinfo with the published paths
    pub fn composeinfo(&self, is_final: bool) -> ComposeInfo {
        let mut info = ComposeInfo::new(
            &self.ids,
            self.conf.base_product_name.as_deref(),
            self.variants(),
            is_final,
        );
        info.fill_paths(&self.paths);
        info
    }
}

impl Drop for Compose {
    fn drop(&mut self) {
        if let Some(file) = lock(&self.lock_file).take() {
            let _ = fs2::FileExt::unlock(&file);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::MINIMAL;
    use crate::config::parse_raw;

    pub(crate) fn config_with(extra: &str) -> Config {
        let text = format!("{extra}\n{MINIMAL}");
        Config::from_raw(&parse_raw(&text).unwrap()).unwrap().config
    }

    pub(crate) fn compose_in(dir: &Path, extra: &str) -> Compose {
        let options = ComposeOptions {
            date: Some("20240101".to_string()),
            ..ComposeOptions::default()
        };
        Compose::create(config_with(extra), dir, options).unwrap()
    }

    #[test]
    fn test_create_allocates_next_respin() {
        let dir = tempfile::tempdir().unwrap();
        let first = compose_in(dir.path(), "");
        let second = compose_in(dir.path(), "");
        assert_eq!(first.compose_id(), "Fedora-40-20240101.0");
        assert_eq!(second.compose_id(), "Fedora-40-20240101.1");
        assert_eq!(
            std::fs::read_to_string(second.paths.compose_id_file()).unwrap(),
            "Fedora-40-20240101.1"
        );
        assert!(second.paths.composeinfo_base().exists());
    }

    #[test]
    fn test_status_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let compose = compose_in(dir.path(), "");
        compose.write_status(ComposeStatus::Started).unwrap();
        compose.write_status(ComposeStatus::Started).unwrap();
        compose.write_status(ComposeStatus::Finished).unwrap();
        assert_eq!(compose.get_status(), Some(ComposeStatus::Finished));
        assert!(compose.write_status(ComposeStatus::Doomed).is_err());
        assert_eq!(
            std::fs::read_to_string(compose.paths.status_file()).unwrap(),
            "FINISHED\n"
        );
    }

    #[test]
    fn test_failable_turns_finished_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let compose = compose_in(
            dir.path(),
            "failable_deliverables = [[\"^.*$\", { \"*\" = [\"iso\"] }]]",
        );
        compose.write_status(ComposeStatus::Started).unwrap();
        assert!(!compose.can_fail(None, "x86_64", "live"));
        assert!(compose.can_fail(None, "x86_64", "iso"));
        compose.write_status(ComposeStatus::Finished).unwrap();
        assert_eq!(compose.get_status(), Some(ComposeStatus::FinishedIncomplete));
    }

    #[test]
    fn test_failable_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let compose = compose_in(
            dir.path(),
            "failable_deliverables = [[\"^.*$\", { \"x86_64\" = [\"ostree\"] }]]",
        );
        let tolerated: Result<Option<()>> =
            compose.failable(None, "x86_64", "ostree", || Err(Error::phase("ostree", "boom")));
        assert!(matches!(tolerated, Ok(None)));
        let fatal: Result<Option<()>> =
            compose.failable(None, "ppc64le", "ostree", || Err(Error::phase("ostree", "boom")));
        assert!(fatal.is_err());
    }

    #[test]
    fn test_block_failable_arches() {
        let dir = tempfile::tempdir().unwrap();
        let compose = compose_in(dir.path(), "");
        let listed = vec!["ppc64le".to_string()];
        let tolerated: Result<Option<()>> = compose.failable_on(None, "ppc64le", "live", &listed, || {
            Err(Error::phase("liveimages", "boom"))
        });
        assert!(matches!(tolerated, Ok(None)));
        assert!(!compose.failed_deliverables().is_empty());
        let fatal: Result<Option<()>> = compose.failable_on(None, "x86_64", "live", &listed, || {
            Err(Error::phase("liveimages", "boom"))
        });
        assert!(fatal.is_err());
    }

    #[test]
    fn test_open_existing_compose() {
        let dir = tempfile::tempdir().unwrap();
        let created = compose_in(dir.path(), "");
        created.write_status(ComposeStatus::Started).unwrap();
        let topdir = created.topdir().to_path_buf();
        drop(created);

        let reopened = Compose::open(config_with(""), &topdir, ComposeOptions::default()).unwrap();
        assert_eq!(reopened.compose_id(), "Fedora-40-20240101.0");
        assert_eq!(reopened.get_status(), Some(ComposeStatus::Started));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let compose = compose_in(dir.path(), "");
        compose.lock().unwrap();
        let other = Compose::open(config_with(""), compose.topdir(), ComposeOptions::default()).unwrap();
        assert!(other.lock().is_err());
    }
}
