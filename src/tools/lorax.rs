// src/tools/lorax.rs

//! `lorax` installer tree builds, for buildinstall and ostree installers

use super::{Requirement, ToolCommand};
use crate::config::LoraxOptions;
use std::path::{Path, PathBuf};

pub const LORAX: Requirement = Requirement::new("lorax", "lorax");

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoraxRun {
    pub product: String,
    pub version: String,
    pub release: String,
    pub sources: Vec<String>,
    pub variant: Option<String>,
    pub buildarch: String,
    pub volid: Option<String>,
    pub is_final: bool,
    pub options: LoraxOptions,
    /// Extra packages installed into the runtime image
    pub installpkgs: Vec<String>,
    pub logfile: Option<PathBuf>,
    pub output: PathBuf,
}

pub fn command(run: &LoraxRun) -> ToolCommand {
    let opts = &run.options;
    let mut cmd = ToolCommand::new(LORAX.tool)
        .opt("--product", &run.product)
        .opt("--version", opts.version.as_deref().unwrap_or(&run.version))
        .opt("--release", &run.release);
    for source in &run.sources {
        cmd = cmd.opt("--source", source);
    }
    if let Some(variant) = &run.variant {
        cmd = cmd.opt("--variant", variant);
    }
    cmd = cmd
        .opt("--buildarch", &run.buildarch)
        .opt_if(run.is_final, "--isfinal")
        .opt_if(opts.nomacboot, "--nomacboot")
        .opt_if(opts.noupgrade, "--noupgrade");
    if let Some(volid) = &run.volid {
        cmd = cmd.opt("--volid", volid);
    }
    if let Some(bugurl) = &opts.bugurl {
        cmd = cmd.opt("--bugurl", bugurl);
    }
    for pkg in &run.installpkgs {
        cmd = cmd.opt("--installpkgs", pkg);
    }
    for template in &opts.add_template {
        cmd = cmd.opt("--add-template", template);
    }
    for template in &opts.add_arch_template {
        cmd = cmd.opt("--add-arch-template", template);
    }
    for var in &opts.add_template_var {
        cmd = cmd.opt("--add-template-var", var);
    }
    for var in &opts.add_arch_template_var {
        cmd = cmd.opt("--add-arch-template-var", var);
    }
    if let Some(size) = opts.rootfs_size {
        cmd = cmd.opt("--rootfs-size", size);
    }
    if let Some(log) = &run.logfile {
        cmd = cmd.opt("--logfile", log.display());
    }
    cmd.path_arg(&run.output)
}

/// Files lorax leaves in the output tree that the compose records
pub fn boot_images(output: &Path) -> Vec<(String, String)> {
    [
        ("kernel", "images/pxeboot/vmlinuz"),
        ("initrd", "images/pxeboot/initrd.img"),
        ("boot.iso", "images/boot.iso"),
        ("efiboot.img", "images/efiboot.img"),
    ]
    .iter()
    .filter(|(_, rel)| output.join(rel).exists())
    .map(|(kind, rel)| (kind.to_string(), rel.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_flags() {
        let run = LoraxRun {
            product: "Fedora".to_string(),
            version: "40".to_string(),
            release: "40".to_string(),
            sources: vec!["file:///c/Server/x86_64/os".to_string()],
            variant: Some("Server".to_string()),
            buildarch: "x86_64".to_string(),
            volid: Some("Fedora-S-40-x86_64".to_string()),
            is_final: true,
            options: LoraxOptions {
                nomacboot: true,
                add_template: vec!["extra.tmpl".to_string()],
                rootfs_size: Some(3),
                ..LoraxOptions::default()
            },
            output: PathBuf::from("/w/buildinstall/Server"),
            ..LoraxRun::default()
        };
        let argv = command(&run).argv();
        assert_eq!(argv[0], "lorax");
        for expected in [
            "--product=Fedora",
            "--source=file:///c/Server/x86_64/os",
            "--variant=Server",
            "--isfinal",
            "--nomacboot",
            "--volid=Fedora-S-40-x86_64",
            "--add-template=extra.tmpl",
            "--rootfs-size=3",
        ] {
            assert!(argv.contains(&expected.to_string()), "missing {expected}");
        }
        assert!(!argv.contains(&"--noupgrade".to_string()));
        assert_eq!(argv.last().unwrap(), "/w/buildinstall/Server");
    }

    #[test]
    fn test_version_override() {
        let run = LoraxRun {
            version: "40".to_string(),
            options: LoraxOptions {
                version: Some("40.1".to_string()),
                ..LoraxOptions::default()
            },
            ..LoraxRun::default()
        };
        assert!(command(&run).argv().contains(&"--version=40.1".to_string()));
    }

    #[test]
    fn test_boot_images_only_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images/pxeboot")).unwrap();
        std::fs::write(dir.path().join("images/pxeboot/vmlinuz"), b"k").unwrap();
        assert_eq!(
            boot_images(dir.path()),
            vec![("kernel".to_string(), "images/pxeboot/vmlinuz".to_string())]
        );
    }
}
