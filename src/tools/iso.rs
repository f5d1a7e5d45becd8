// src/tools/iso.rs

//! ISO mastering: `genisoimage`/`xorrisofs`, `implantisomd5`, `isohybrid`

use super::{Requirement, ToolCommand};
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub const GENISOIMAGE: Requirement = Requirement::new("genisoimage", "genisoimage");
pub const XORRISOFS: Requirement = Requirement::new("xorrisofs", "xorriso");
pub const IMPLANTISOMD5: Requirement = Requirement::new("implantisomd5", "isomd5sum");
pub const ISOHYBRID: Requirement = Requirement::new("isohybrid", "syslinux");

/// Primary volume descriptor signature offset and value
const ISO9660_MAGIC_OFFSET: u64 = 0x8001;
const ISO9660_MAGIC: &[u8; 5] = b"CD001";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoOptions {
    pub output: PathBuf,
    pub volid: String,
    pub arch: String,
    pub bootable: bool,
    pub use_xorrisofs: bool,
    /// File with `iso-path=host-path` lines
    pub graft_points: PathBuf,
}

impl IsoOptions {
    pub fn mastering_tool(&self) -> Requirement {
        if self.use_xorrisofs { XORRISOFS } else { GENISOIMAGE }
    }
}

/// El Torito and platform boot arguments
pub fn boot_args(arch: &str) -> Vec<&'static str> {
    match arch {
        "x86_64" | "i386" | "i686" => vec![
            "-b",
            "isolinux/isolinux.bin",
            "-c",
            "isolinux/boot.cat",
            "-no-emul-boot",
            "-boot-load-size",
            "4",
            "-boot-info-table",
            "-eltorito-alt-boot",
            "-e",
            "images/efiboot.img",
            "-no-emul-boot",
        ],
        "aarch64" => vec!["-eltorito-alt-boot", "-e", "images/efiboot.img", "-no-emul-boot"],
        "ppc64le" | "ppc64" => vec!["-part", "-hfs", "-r", "-l", "-sysid", "PPC", "-chrp-boot"],
        "s390x" => vec!["-eltorito-boot", "images/cdboot.img", "-no-emul-boot"],
        _ => Vec::new(),
    }
}

pub fn mkisofs(opts: &IsoOptions) -> ToolCommand {
    let mut cmd = ToolCommand::new(opts.mastering_tool().tool)
        .args(["-v", "-V"])
        .arg(&opts.volid)
        .arg("-o")
        .path_arg(&opts.output)
        .args([
            "-J",
            "-joliet-long",
            "-rational-rock",
            "-input-charset",
            "utf-8",
            "-x",
            "./lost+found",
        ]);
    if !opts.use_xorrisofs {
        cmd = cmd.arg("-translation-table");
    }
    if opts.bootable {
        cmd = cmd.args(boot_args(&opts.arch));
    }
    cmd.args(["-graft-points", "-path-list"]).path_arg(&opts.graft_points)
}

pub fn implantisomd5(iso: &Path) -> ToolCommand {
    ToolCommand::new(IMPLANTISOMD5.tool)
        .arg("--supported-iso")
        .path_arg(iso)
}

pub fn isohybrid(iso: &Path, uefi: bool) -> ToolCommand {
    ToolCommand::new(ISOHYBRID.tool).opt_if(uefi, "--uefi").path_arg(iso)
}

/// Tools an ISO build needs on this arch
pub fn requirements(opts: &IsoOptions) -> Vec<Requirement> {
    let mut reqs = vec![opts.mastering_tool(), IMPLANTISOMD5];
    if opts.bootable && matches!(opts.arch.as_str(), "x86_64" | "i386" | "i686") {
        reqs.push(ISOHYBRID);
    }
    reqs
}

/// Render a graft-point list; sorted by ISO path
pub fn render_graft_points(entries: &BTreeMap<String, PathBuf>) -> String {
    entries
        .iter()
        .map(|(iso_path, host)| format!("{iso_path}={}\n", host.display()))
        .collect()
}

/// Graft points for every file below `tree`, keyed by path inside the ISO
pub fn tree_graft_points(tree: &Path) -> crate::error::Result<BTreeMap<String, PathBuf>> {
    let mut map = BTreeMap::new();
    for entry in walkdir::WalkDir::new(tree).follow_links(false) {
        let entry = entry.map_err(|e| crate::error::Error::Io(e.into()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(tree) {
            map.insert(rel.to_string_lossy().into_owned(), entry.path().to_path_buf());
        }
    }
    Ok(map)
}

/// Whether `path` carries an ISO9660 primary volume descriptor
pub fn has_iso9660_signature(path: &Path) -> std::io::Result<bool> {
    let mut file = std::fs::File::open(path)?;
    if file.metadata()?.len() < ISO9660_MAGIC_OFFSET + ISO9660_MAGIC.len() as u64 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(ISO9660_MAGIC_OFFSET))?;
    let mut magic = [0u8; 5];
    file.read_exact(&mut magic)?;
    Ok(&magic == ISO9660_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options(arch: &str, bootable: bool) -> IsoOptions {
        IsoOptions {
            output: PathBuf::from("/c/Server/x86_64/iso/f.iso"),
            volid: "Fedora-S-40-x86_64".to_string(),
            arch: arch.to_string(),
            bootable,
            use_xorrisofs: false,
            graft_points: PathBuf::from("/w/graft"),
        }
    }

    #[test]
    fn test_bootable_x86_iso() {
        let argv = mkisofs(&options("x86_64", true)).argv();
        assert_eq!(argv[0], "genisoimage");
        assert!(argv.contains(&"isolinux/isolinux.bin".to_string()));
        assert!(argv.contains(&"-translation-table".to_string()));
        assert_eq!(&argv[argv.len() - 3..], ["-graft-points", "-path-list", "/w/graft"]);
        assert_eq!(requirements(&options("x86_64", true)).len(), 3);
    }

    #[test]
    fn test_plain_xorriso_iso() {
        let mut opts = options("aarch64", false);
        opts.use_xorrisofs = true;
        let argv = mkisofs(&opts).argv();
        assert_eq!(argv[0], "xorrisofs");
        assert!(!argv.contains(&"-eltorito-alt-boot".to_string()));
        assert!(!argv.contains(&"-translation-table".to_string()));
        assert_eq!(requirements(&opts).len(), 2);
    }

    #[test]
    fn test_graft_points() {
        let mut entries = BTreeMap::new();
        entries.insert("Packages/b/bash.rpm".to_string(), PathBuf::from("/c/os/Packages/b/bash.rpm"));
        entries.insert(".discinfo".to_string(), PathBuf::from("/c/os/.discinfo"));
        assert_eq!(
            render_graft_points(&entries),
            ".discinfo=/c/os/.discinfo\nPackages/b/bash.rpm=/c/os/Packages/b/bash.rpm\n"
        );
    }

    #[test]
    fn test_tree_graft_points() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/f"), b"x").unwrap();
        let map = tree_graft_points(dir.path()).unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a/b/f"]);
    }

    #[test]
    fn test_iso9660_signature() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.iso");
        let mut file = std::fs::File::create(&good).unwrap();
        let mut data = vec![0u8; 0x8001];
        data.extend_from_slice(b"CD001");
        data.extend_from_slice(&[0u8; 16]);
        file.write_all(&data).unwrap();
        assert!(has_iso9660_signature(&good).unwrap());

        let bad = dir.path().join("bad.iso");
        std::fs::write(&bad, b"short").unwrap();
        assert!(!has_iso9660_signature(&bad).unwrap());
    }
}
