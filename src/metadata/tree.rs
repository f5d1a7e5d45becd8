// src/metadata/tree.rs

//! Per-tree metadata: `.treeinfo`, `.discinfo` and `media.repo`

use crate::error::Result;
use std::fmt::Write as _;
use std::path::Path;

/// Release identity as printed in tree metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRelease {
    pub name: String,
    pub short: String,
    pub version: String,
    pub release_type: String,
}

/// Contents of one `.treeinfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeInfo {
    pub release: TreeRelease,
    pub base_product: Option<TreeRelease>,
    pub arch: String,
    pub variant_uid: String,
    pub variant_id: String,
    pub variant_name: String,
    pub variant_type: String,
    pub timestamp: i64,
    /// (platform, image kind, path relative to the tree)
    pub images: Vec<(String, String, String)>,
    /// (path relative to the tree, `sha256:<hex>`)
    pub checksums: Vec<(String, String)>,
    /// Installer runtime image relative to the tree
    pub stage2: Option<String>,
}

impl TreeInfo {
    /// Render in the productmd 1.2 INI layout
    pub fn render(&self) -> String {
        let mut out = String::new();
        let section = |out: &mut String, name: &str, items: &[(&str, String)]| {
            let _ = writeln!(out, "[{name}]");
            for (key, value) in items {
                let _ = writeln!(out, "{key} = {value}");
            }
            out.push('\n');
        };

        section(
            &mut out,
            "header",
            &[("type", "productmd.treeinfo".to_string()), ("version", "1.2".to_string())],
        );
        let layered = self.base_product.is_some();
        section(
            &mut out,
            "release",
            &[
                ("is_layered", layered.to_string()),
                ("name", self.release.name.clone()),
                ("short", self.release.short.clone()),
                ("type", self.release.release_type.clone()),
                ("version", self.release.version.clone()),
            ],
        );
        if let Some(base) = &self.base_product {
            section(
                &mut out,
                "base_product",
                &[
                    ("name", base.name.clone()),
                    ("short", base.short.clone()),
                    ("type", base.release_type.clone()),
                    ("version", base.version.clone()),
                ],
            );
        }

        let platforms: Vec<String> = {
            let mut p: Vec<String> = self.images.iter().map(|(p, _, _)| p.clone()).collect();
            p.sort();
            p.dedup();
            if p.is_empty() {
                vec![self.arch.clone()]
            } else {
                p
            }
        };
        section(
            &mut out,
            "tree",
            &[
                ("arch", self.arch.clone()),
                ("build_timestamp", self.timestamp.to_string()),
                ("platforms", platforms.join(",")),
                ("variants", self.variant_uid.clone()),
            ],
        );
        section(
            &mut out,
            "general",
            &[
                ("arch", self.arch.clone()),
                ("family", self.release.name.clone()),
                ("name", format!("{} {}", self.release.name, self.release.version)),
                ("packagedir", "Packages".to_string()),
                ("platforms", platforms.join(",")),
                ("repository", ".".to_string()),
                ("timestamp", self.timestamp.to_string()),
                ("variant", self.variant_uid.clone()),
                ("version", self.release.version.clone()),
            ],
        );
        section(
            &mut out,
            &format!("variant-{}", self.variant_uid),
            &[
                ("id", self.variant_id.clone()),
                ("name", self.variant_name.clone()),
                ("packages", "Packages".to_string()),
                ("repository", ".".to_string()),
                ("type", self.variant_type.clone()),
                ("uid", self.variant_uid.clone()),
            ],
        );

        let mut platforms_seen: Vec<&str> = self.images.iter().map(|(p, _, _)| p.as_str()).collect();
        platforms_seen.sort();
        platforms_seen.dedup();
        for platform in platforms_seen {
            let items: Vec<(&str, String)> = self
                .images
                .iter()
                .filter(|(p, _, _)| p == platform)
                .map(|(_, kind, path)| (kind.as_str(), path.clone()))
                .collect();
            section(&mut out, &format!("images-{platform}"), &items);
        }
        if let Some(stage2) = &self.stage2 {
            section(&mut out, "stage2", &[("mainimage", stage2.clone())]);
        }
        if !self.checksums.is_empty() {
            let items: Vec<(&str, String)> = self
                .checksums
                .iter()
                .map(|(path, sum)| (path.as_str(), sum.clone()))
                .collect();
            section(&mut out, "checksums", &items);
        }

        while out.ends_with("\n\n") {
            out.pop();
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_file(path, &self.render())
    }
}

fn write_file(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

/// `.discinfo`: timestamp, description, arch, disc numbers
pub fn render_discinfo(timestamp: i64, description: &str, arch: &str, discs: Option<&[u32]>) -> String {
    let discs = match discs {
        Some(numbers) if !numbers.is_empty() => numbers
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(","),
        _ => "ALL".to_string(),
    };
    format!("{timestamp}.000000\n{description}\n{arch}\n{discs}\n")
}

pub fn write_discinfo(path: &Path, timestamp: i64, description: &str, arch: &str) -> Result<()> {
    write_file(path, &render_discinfo(timestamp, description, arch, None))
}

/// `media.repo` for installation media
pub fn render_media_repo(name: &str, timestamp: i64) -> String {
    format!(
        "[InstallMedia]\nname={name}\nmediaid={timestamp}.000000\nmetadata_expire=-1\ngpgcheck=0\ncost=500\n"
    )
}

pub fn write_media_repo(path: &Path, name: &str, timestamp: i64) -> Result<()> {
    write_file(path, &render_media_repo(name, timestamp))
}
