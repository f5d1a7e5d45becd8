// src/tools/squashfs.rs

//! `mksquashfs` images, used for product.img

use super::{Requirement, ToolCommand};
use std::path::Path;

pub const MKSQUASHFS: Requirement = Requirement::new("mksquashfs", "squashfs-tools");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquashfsOptions {
    pub compression: String,
    pub block_size: String,
}

impl Default for SquashfsOptions {
    fn default() -> Self {
        Self {
            compression: "xz".to_string(),
            block_size: "1M".to_string(),
        }
    }
}

/// Pack `source` into `output`, replacing any existing image
pub fn command(source: &Path, output: &Path, opts: &SquashfsOptions) -> ToolCommand {
    ToolCommand::new(MKSQUASHFS.tool)
        .path_arg(source)
        .path_arg(output)
        .arg("-noappend")
        .args(["-comp", opts.compression.as_str()])
        .args(["-b", opts.block_size.as_str()])
        .arg("-no-xattrs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command() {
        let cmd = command(Path::new("/w/product"), Path::new("/c/images/product.img"), &SquashfsOptions::default());
        assert_eq!(
            cmd.argv(),
            vec![
                "mksquashfs",
                "/w/product",
                "/c/images/product.img",
                "-noappend",
                "-comp",
                "xz",
                "-b",
                "1M",
                "-no-xattrs"
            ]
        );
    }
}
