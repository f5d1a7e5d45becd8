// src/phases/koji_task.rs

//! Shared plumbing for phases that build images as koji tasks
//!
//! The task is submitted with `--wait`; its id comes from the CLI output.
//! Results are picked up from the task directories of the task and its
//! descendants under the koji top directory, then linked into the compose.

use super::gather::link_file;
use crate::compose::Compose;
use crate::error::{Error, Result};
use crate::metadata::Image;
use crate::tools::{self, koji, ToolCommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// File suffix → (image type, format) for image-build outputs
pub const IMAGE_FORMATS: &[(&str, &str, &str)] = &[
    (".qcow2", "qcow2", "qcow2"),
    (".raw.xz", "raw-xz", "raw.xz"),
    (".tar.xz", "docker", "tar.xz"),
    (".vagrant-libvirt.box", "vagrant-libvirt", "vagrant-libvirt.box"),
    (".vagrant-virtualbox.box", "vagrant-virtualbox", "vagrant-virtualbox.box"),
    (".vhd.xz", "vhd", "vhd.xz"),
    (".vmdk", "vmdk", "vmdk"),
    (".iso", "boot", "iso"),
];

/// A file produced by a task, with the arch it was built for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    pub arch: String,
    pub path: PathBuf,
}

/// Submit a task and wait for it; returns the task id
pub fn submit(compose: &Compose, cmd: &ToolCommand, log: &Path) -> Result<u64> {
    let output = tools::run_capture(cmd, log)?;
    let task_id = koji::parse_task_id(&output)
        .ok_or_else(|| Error::Parse(format!("no task id in koji output, see {}", log.display())))?;
    info!("koji task {} finished for {}", task_id, compose.compose_id());
    Ok(task_id)
}

/// (task id, arch) of the task and every descendant
///
/// `getTaskDescendents` returns `{"<id>": [{"id": .., "arch": ..}, ..]}`.
pub fn parse_descendents(json: &str, task_id: u64) -> Result<Vec<(u64, String)>> {
    let value: Value = serde_json::from_str(json)?;
    let mut found = vec![(task_id, "noarch".to_string())];
    if let Some(map) = value.as_object() {
        for tasks in map.values().filter_map(Value::as_array) {
            for task in tasks {
                let Some(id) = task.get("id").and_then(Value::as_u64) else {
                    continue;
                };
                let arch = task.get("arch").and_then(Value::as_str).unwrap_or("noarch");
                if id == task_id {
                    found[0].1 = arch.to_string();
                } else {
                    found.push((id, arch.to_string()));
                }
            }
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}

/// Files in the task directories whose names end with one of `suffixes`
pub fn collect(compose: &Compose, task_id: u64, suffixes: &[&str], log: &Path) -> Result<Vec<TaskOutput>> {
    let profile = compose.conf.koji_profile.as_deref();
    let json = tools::run_capture(&koji::task_descendents(profile, task_id), log)?;
    let topdir = Path::new(&compose.conf.koji_topdir);

    let mut outputs = Vec::new();
    for (id, arch) in parse_descendents(&json, task_id)? {
        let dir = koji::task_dir(topdir, id);
        if !dir.is_dir() {
            debug!("No output directory for task {}", id);
            continue;
        }
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_file() && suffixes.iter().any(|s| name.ends_with(s)) {
                outputs.push(TaskOutput {
                    arch: arch.clone(),
                    path: entry.path().to_path_buf(),
                });
            }
        }
    }
    Ok(outputs)
}

/// Link a task output into `dir` and record it in the images index
#[allow(clippy::too_many_arguments)]
pub fn publish(
    compose: &Compose,
    variant: &str,
    output: &TaskOutput,
    dir: &Path,
    image_type: &str,
    format: &str,
    subvariant: &str,
    bootable: bool,
) -> Result<Image> {
    let file_name = output
        .path
        .file_name()
        .ok_or_else(|| Error::Parse(format!("task output {} has no file name", output.path.display())))?;
    let dest = dir.join(file_name);
    link_file(&output.path, &dest, compose.conf.link_type)?;
    let relative = compose.paths.relative_to_compose(&dest).display().to_string();
    let mut image = Image::from_file(&dest, &relative, image_type, format, &output.arch, subvariant)?;
    image.bootable = bootable;
    compose.add_image(variant, &output.arch, image.clone());
    Ok(image)
}

/// Image type and format of an image-build output, from its file name
pub fn image_format(file_name: &str) -> Option<(&'static str, &'static str)> {
    IMAGE_FORMATS
        .iter()
        .find(|(suffix, _, _)| file_name.ends_with(suffix))
        .map(|(_, image_type, format)| (*image_type, *format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descendents() {
        let json = r#"{"100": [
            {"id": 100, "arch": "noarch", "method": "image"},
            {"id": 102, "arch": "x86_64", "method": "createImage"},
            {"id": 101, "arch": "aarch64", "method": "createImage"}
        ]}"#;
        assert_eq!(
            parse_descendents(json, 100).unwrap(),
            vec![
                (100, "noarch".to_string()),
                (101, "aarch64".to_string()),
                (102, "x86_64".to_string())
            ]
        );
        assert_eq!(parse_descendents("{}", 7).unwrap(), vec![(7, "noarch".to_string())]);
    }

    #[test]
    fn test_image_format() {
        assert_eq!(image_format("Fedora-Cloud-40.x86_64.qcow2"), Some(("qcow2", "qcow2")));
        assert_eq!(image_format("Fedora-Cloud-40.x86_64.raw.xz"), Some(("raw-xz", "raw.xz")));
        assert_eq!(image_format("x.vagrant-libvirt.box"), Some(("vagrant-libvirt", "vagrant-libvirt.box")));
        assert_eq!(image_format("build.log"), None);
    }
}
