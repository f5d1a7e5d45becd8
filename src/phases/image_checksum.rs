// src/phases/image_checksum.rs

//! Checksums of every published image
//!
//! Digests are stored on the images index for `images.json` and written
//! out as `CHECKSUM` files in BSD tag format, one per image directory, or
//! one per image with `media_checksum_one_file`.

use super::{Phase, PhaseContext};
use crate::error::Result;
use crate::hash;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub const NAME: &str = "image_checksum";
pub const CHECKSUM_FILE: &str = "CHECKSUM";

pub struct ImageChecksumPhase {
    ctx: Arc<PhaseContext>,
}

impl ImageChecksumPhase {
    pub fn new(ctx: Arc<PhaseContext>) -> Self {
        Self { ctx }
    }

    /// Body of a checksum file for the given images
    fn render(images: &[(String, BTreeMap<String, String>)]) -> String {
        let mut out = String::new();
        for (file_name, checksums) in images {
            for (algorithm, digest) in checksums {
                out.push_str(&hash::checksum_line(algorithm, file_name, digest));
            }
        }
        out
    }
}

impl Phase for ImageChecksumPhase {
    fn name(&self) -> &'static str {
        NAME
    }

    fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    fn start(&self) -> Result<()> {
        let compose = &self.ctx.compose;
        let algorithms = &compose.conf.media_checksums;
        let compose_dir = compose.paths.compose_dir();

        let paths: Vec<String> = compose.with_images(|index| {
            let mut paths: Vec<String> = index.iter().map(|(_, _, image)| image.path.clone()).collect();
            paths.sort();
            paths.dedup();
            paths
        });
        if paths.is_empty() {
            debug!("No images to checksum");
            return Ok(());
        }

        let digests: BTreeMap<String, BTreeMap<String, String>> = paths
            .par_iter()
            .map(|path| Ok((path.clone(), hash::hash_file(&compose_dir.join(path), algorithms)?)))
            .collect::<Result<_>>()?;

        compose.with_images(|index| {
            for image in index.iter_mut() {
                if let Some(sums) = digests.get(&image.path) {
                    image.checksums = sums.clone();
                }
            }
        });

        let base = &compose.conf.media_checksum_base_filename;
        let mut by_dir: BTreeMap<PathBuf, Vec<(String, BTreeMap<String, String>)>> = BTreeMap::new();
        for (path, sums) in &digests {
            let full = compose_dir.join(path);
            let file_name = full
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if compose.conf.media_checksum_one_file {
                let target = full.with_file_name(format!("{file_name}.{CHECKSUM_FILE}"));
                std::fs::write(&target, Self::render(&[(file_name, sums.clone())]))?;
            } else if let Some(dir) = full.parent() {
                by_dir.entry(dir.to_path_buf()).or_default().push((file_name, sums.clone()));
            }
        }
        for (dir, images) in &by_dir {
            std::fs::write(dir.join(format!("{base}{CHECKSUM_FILE}")), Self::render(images))?;
        }
        info!("Checksummed {} images", digests.len());
        Ok(())
    }
}
