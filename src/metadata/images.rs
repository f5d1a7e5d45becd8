// src/metadata/images.rs

//! `images.json`: every image produced by the compose

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Path relative to `compose/`
    pub path: String,
    pub mtime: i64,
    pub size: u64,
    pub volume_id: Option<String>,
    /// dvd, boot, live, qcow2, docker, ...
    #[serde(rename = "type")]
    pub image_type: String,
    /// iso, qcow2, tar.gz, ...
    pub format: String,
    pub arch: String,
    pub disc_number: u32,
    pub disc_count: u32,
    pub checksums: BTreeMap<String, String>,
    pub implant_md5: Option<String>,
    pub bootable: bool,
    pub subvariant: String,
}

impl Image {
    /// Describe a file on disk; checksums are filled later
    pub fn from_file(
        file: &Path,
        relative: &str,
        image_type: &str,
        format: &str,
        arch: &str,
        subvariant: &str,
    ) -> std::io::Result<Self> {
        let meta = std::fs::metadata(file)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Ok(Self {
            path: relative.to_string(),
            mtime,
            size: meta.len(),
            volume_id: None,
            image_type: image_type.to_string(),
            format: format.to_string(),
            arch: arch.to_string(),
            disc_number: 1,
            disc_count: 1,
            checksums: BTreeMap::new(),
            implant_md5: None,
            bootable: false,
            subvariant: subvariant.to_string(),
        })
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// variant uid → arch → images
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagesIndex {
    images: BTreeMap<String, BTreeMap<String, Vec<Image>>>,
}

impl ImagesIndex {
    pub fn add(&mut self, variant: &str, arch: &str, image: Image) {
        self.images
            .entry(variant.to_string())
            .or_default()
            .entry(arch.to_string())
            .or_default()
            .push(image);
    }

    pub fn is_empty(&self) -> bool {
        self.images.values().all(|arches| arches.values().all(Vec::is_empty))
    }

    pub fn len(&self) -> usize {
        self.images
            .values()
            .flat_map(|arches| arches.values())
            .map(Vec::len)
            .sum()
    }

    /// (variant, arch, image) in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Image)> {
        self.images.iter().flat_map(|(variant, arches)| {
            arches.iter().flat_map(move |(arch, images)| {
                images.iter().map(move |i| (variant.as_str(), arch.as_str(), i))
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Image> {
        self.images
            .values_mut()
            .flat_map(|arches| arches.values_mut())
            .flat_map(|images| images.iter_mut())
    }

    /// Payload of `images.json`
    pub fn payload(&self, compose_id: &str) -> serde_json::Value {
        serde_json::json!({
            "compose": {"id": compose_id},
            "images": self.images,
        })
    }
}
