// src/phases/driver.rs

//! The compose run
//!
//! Loads the variant tree, checks the host and every phase's configuration,
//! then runs the phases in their fixed order and publishes the compose
//! metadata. Any error that escapes a phase dooms the compose.

use super::weaver::Weaver;
use super::{
    buildinstall, createiso, createrepo, extra_isos, extrafiles, gather, image_build, image_checksum, init,
    liveimages, livemedia, osbs, ostree, ostree_installer, pkgset, productimg, run_phase, test, Phase,
    PhaseContext,
};
use crate::compose::{ComposeStatus, ComposeType};
use crate::error::{Error, Result};
use crate::hash;
use crate::metadata::{self, tree};
use crate::notifier;
use crate::scm;
use crate::tools::{self, Requirement};
use crate::variants::{Variant, VariantFilter, VariantTree};
use serde_json::json;
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Every phase of a run, built once and shared by the weavers
struct Phases {
    init: Arc<dyn Phase>,
    pkgset: Arc<dyn Phase>,
    buildinstall: Arc<dyn Phase>,
    gather: Arc<dyn Phase>,
    extrafiles: Arc<dyn Phase>,
    createrepo: Arc<dyn Phase>,
    ostree: Arc<dyn Phase>,
    ostree_installer: Arc<dyn Phase>,
    productimg: Arc<dyn Phase>,
    createiso: Arc<dyn Phase>,
    extra_isos: Arc<dyn Phase>,
    liveimages: Arc<dyn Phase>,
    image_build: Arc<dyn Phase>,
    livemedia: Arc<dyn Phase>,
    osbs: Arc<dyn Phase>,
    image_checksum: Arc<dyn Phase>,
    test: Arc<dyn Phase>,
}

impl Phases {
    fn new(ctx: &Arc<PhaseContext>) -> Self {
        let c = || Arc::clone(ctx);
        Self {
            init: Arc::new(init::InitPhase::new(c())),
            pkgset: Arc::new(pkgset::PkgsetPhase::new(c())),
            buildinstall: Arc::new(buildinstall::BuildinstallPhase::new(c())),
            gather: Arc::new(gather::GatherPhase::new(c())),
            extrafiles: Arc::new(extrafiles::ExtrafilesPhase::new(c())),
            createrepo: Arc::new(createrepo::CreaterepoPhase::new(c())),
            ostree: Arc::new(ostree::OstreePhase::new(c())),
            ostree_installer: Arc::new(ostree_installer::OstreeInstallerPhase::new(c())),
            productimg: Arc::new(productimg::ProductimgPhase::new(c())),
            createiso: Arc::new(createiso::CreateisoPhase::new(c())),
            extra_isos: Arc::new(extra_isos::ExtraIsosPhase::new(c())),
            liveimages: Arc::new(liveimages::LiveimagesPhase::new(c())),
            image_build: Arc::new(image_build::ImageBuildPhase::new(c())),
            livemedia: Arc::new(livemedia::LivemediaPhase::new(c())),
            osbs: Arc::new(osbs::OsbsPhase::new(c())),
            image_checksum: Arc::new(image_checksum::ImageChecksumPhase::new(c())),
            test: Arc::new(test::TestPhase::new(c())),
        }
    }

    /// In run order
    fn all(&self) -> Vec<&Arc<dyn Phase>> {
        vec![
            &self.init,
            &self.pkgset,
            &self.buildinstall,
            &self.gather,
            &self.extrafiles,
            &self.createrepo,
            &self.ostree,
            &self.ostree_installer,
            &self.productimg,
            &self.createiso,
            &self.extra_isos,
            &self.liveimages,
            &self.image_build,
            &self.livemedia,
            &self.osbs,
            &self.image_checksum,
            &self.test,
        ]
    }

    fn essentials(&self) -> Weaver {
        Weaver::new()
            .single(Arc::clone(&self.buildinstall))
            .group(vec![
                Arc::clone(&self.gather),
                Arc::clone(&self.extrafiles),
                Arc::clone(&self.createrepo),
            ])
            .group(vec![Arc::clone(&self.ostree), Arc::clone(&self.ostree_installer)])
    }

    fn images(&self) -> Weaver {
        Weaver::new().group(vec![
            Arc::clone(&self.createiso),
            Arc::clone(&self.extra_isos),
            Arc::clone(&self.liveimages),
            Arc::clone(&self.image_build),
            Arc::clone(&self.livemedia),
            Arc::clone(&self.osbs),
        ])
    }
}

/// Run the compose to the end and return its final status
///
/// On error the compose is marked DOOMED and the error chain is written to
/// the traceback log before the error is returned.
pub fn run(ctx: Arc<PhaseContext>) -> Result<ComposeStatus> {
    let compose = Arc::clone(&ctx.compose);
    compose.write_status(ComposeStatus::Started)?;

    match run_compose(&ctx) {
        Ok(()) => {
            compose.write_status(ComposeStatus::Finished)?;
            let status = compose.get_status().unwrap_or(ComposeStatus::Finished);
            compose.notifier.send(
                notifier::COMPOSE_FINISHED,
                json!({"status": status.to_string(), "location": compose.topdir().display().to_string()}),
            );
            compose.notifier.wait();
            info!("Compose finished: {}", compose.topdir().display());
            Ok(status)
        }
        Err(e) => {
            error!("Compose failed: {}", e);
            if let Err(write_err) = write_traceback(&ctx, &e) {
                error!("Cannot write traceback: {}", write_err);
            }
            if let Err(status_err) = compose.write_status(ComposeStatus::Doomed) {
                error!("Cannot record DOOMED status: {}", status_err);
            }
            compose.notifier.wait();
            Err(e)
        }
    }
}

fn run_compose(ctx: &Arc<PhaseContext>) -> Result<()> {
    let compose = &ctx.compose;
    load_variants(ctx)?;

    let phases = Phases::new(ctx);
    let active: Vec<&Arc<dyn Phase>> = phases.all().into_iter().filter(|p| !p.skip()).collect();
    debug!(
        "Active phases: {}",
        active.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
    );

    let errors: Vec<String> = active
        .iter()
        .flat_map(|p| p.validate().into_iter().map(move |e| format!("{}: {}", p.name(), e)))
        .collect();
    if !errors.is_empty() {
        for e in &errors {
            error!("{}", e);
        }
        return Err(Error::Config(errors));
    }

    if compose.conf.runroot {
        debug!("Skipping host tool check, commands run in runroot");
    } else {
        let requirements: Vec<Requirement> = active.iter().flat_map(|p| p.requirements()).collect();
        tools::check_tools(&requirements)?;
    }

    run_phase(phases.init.as_ref())?;
    run_phase(phases.pkgset.as_ref())?;
    phases.essentials().run()?;
    run_phase(phases.productimg.as_ref())?;
    write_tree_metadata(ctx)?;
    phases.images().run()?;
    run_phase(phases.image_checksum.as_ref())?;
    run_phase(phases.test.as_ref())?;

    write_compose_metadata(ctx)
}

/// Fetch variants.xml and install the filtered tree; a tree that is
/// already set is kept
fn load_variants(ctx: &PhaseContext) -> Result<()> {
    let compose = &ctx.compose;
    if !compose.variants().is_empty() {
        return Ok(());
    }
    let log = compose.log_file("global", "scm-variants")?;
    let fetched = scm::fetch_file(&compose.conf.variants_file, &compose.paths.work_global().join("variants"), &log)?;
    let target = compose.paths.variants_file();
    if fetched != target {
        std::fs::copy(&fetched, &target)?;
    }
    let filter = VariantFilter {
        tree_arches: compose.conf.tree_arches.clone(),
        tree_variants: compose.conf.tree_variants.clone(),
    };
    let tree = VariantTree::load(&target, &filter)?;
    if tree.is_empty() {
        return Err(Error::Config(vec!["no variants left after applying tree filters".to_string()]));
    }
    compose.set_variants(tree);
    Ok(())
}

fn tree_release(name: &str, short: &str, version: &str, release_type: &str) -> tree::TreeRelease {
    tree::TreeRelease {
        name: name.to_string(),
        short: short.to_string(),
        version: version.to_string(),
        release_type: release_type.to_string(),
    }
}

/// `.treeinfo` contents of one variant os tree
pub fn tree_info(ctx: &PhaseContext, variant: &Variant, arch: &str) -> Result<tree::TreeInfo> {
    let compose = &ctx.compose;
    let conf = &compose.conf;
    let os_tree = compose.paths.os_tree(arch, &variant.uid);

    let base_product = match (&conf.base_product_name, &conf.base_product_short, &conf.base_product_version) {
        (Some(name), Some(short), Some(version)) if conf.release_is_layered => {
            Some(tree_release(name, short, version, &conf.base_product_type))
        }
        _ => None,
    };

    let boot_images = ctx.state.boot_images(&variant.uid, arch);
    let mut checksums = Vec::new();
    for (_, path) in &boot_images {
        let file = os_tree.join(path);
        if file.is_file() {
            checksums.push((path.clone(), format!("sha256:{}", hash::sha256_file(&file)?)));
        }
    }
    let stage2 = ["images/install.img", "LiveOS/squashfs.img"]
        .iter()
        .find(|p| os_tree.join(p).is_file())
        .map(|p| p.to_string());

    Ok(tree::TreeInfo {
        release: tree_release(&conf.release_name, &conf.release_short, &conf.release_version, &conf.release_type),
        base_product,
        arch: arch.to_string(),
        variant_uid: variant.uid.clone(),
        variant_id: variant.id.clone(),
        variant_name: variant.name.clone(),
        variant_type: variant.variant_type.to_string(),
        timestamp: compose.started,
        images: boot_images
            .into_iter()
            .map(|(kind, path)| (arch.to_string(), kind, path))
            .collect(),
        checksums,
        stage2,
    })
}

/// `.treeinfo`, `.discinfo` and `media.repo` for every existing os tree
fn write_tree_metadata(ctx: &PhaseContext) -> Result<()> {
    let compose = &ctx.compose;
    let conf = &compose.conf;
    let description = conf
        .release_discinfo_description
        .clone()
        .unwrap_or_else(|| format!("{} {}", conf.release_name, conf.release_version));
    let media_name = format!("{} {}", conf.release_name, conf.release_version);

    for (variant, arch) in ctx.variant_arches() {
        let os_tree = compose.paths.os_tree(&arch, &variant.uid);
        if !os_tree.is_dir() {
            debug!("No os tree for {}.{}", variant.uid, arch);
            continue;
        }
        tree_info(ctx, &variant, &arch)?.write(&os_tree.join(".treeinfo"))?;
        tree::write_discinfo(&os_tree.join(".discinfo"), compose.started, &description, &arch)?;
        tree::write_media_repo(&os_tree.join("media.repo"), &media_name, compose.started)?;
    }
    Ok(())
}

/// composeinfo.json, images.json, rpms.json and modules.json
fn write_compose_metadata(ctx: &PhaseContext) -> Result<()> {
    let compose = &ctx.compose;
    let dir = compose.paths.metadata_dir();
    std::fs::create_dir_all(&dir)?;
    let id = compose.compose_id();

    let is_final = compose.ids.compose_type == ComposeType::Production;
    metadata::write_document(&dir.join("composeinfo.json"), "composeinfo", &compose.composeinfo(is_final))?;
    let images = compose.with_images(|index| index.payload(id));
    metadata::write_document(&dir.join("images.json"), "images", &images)?;
    metadata::write_document(&dir.join("rpms.json"), "rpms", &compose.rpms().payload(id))?;
    metadata::write_modules(&dir.join("modules.json"), id)?;
    info!("Wrote compose metadata to {}", dir.display());
    Ok(())
}

fn write_traceback(ctx: &PhaseContext, e: &Error) -> Result<()> {
    let path = ctx.compose.paths.traceback_log();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = format!("{e}\n");
    let mut source = StdError::source(e);
    while let Some(cause) = source {
        text.push_str(&format!("caused by: {cause}\n"));
        source = StdError::source(cause);
    }
    std::fs::write(path, text)?;
    Ok(())
}
