// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use distro_compose::pkgset::Reldep;
use distro_compose::{Config, PackageRecord, TreeArch, Universe};

/// Build a package record from `name-version-release.arch`
///
/// Source packages (`.src`) carry no sourcerpm.
pub fn pkg(nvra: &str, srpm: &str, provides: &[&str], requires: &[&str]) -> PackageRecord {
    let (nvr, arch) = nvra.rsplit_once('.').unwrap();
    let (nv, release) = nvr.rsplit_once('-').unwrap();
    let (name, version) = nv.rsplit_once('-').unwrap();
    PackageRecord {
        name: name.to_string(),
        epoch: 0,
        version: version.to_string(),
        release: release.to_string(),
        arch: arch.to_string(),
        sourcerpm: if arch == "src" { None } else { Some(srpm.to_string()) },
        provides: provides.iter().map(|p| Reldep::parse(p).unwrap()).collect(),
        requires: requires.iter().map(|r| Reldep::parse(r).unwrap()).collect(),
        files: Vec::new(),
        repo_id: "pool".to_string(),
        location: format!("/srv/pool/{nvra}.rpm"),
        sigkey: None,
    }
}

/// Universe for an x86_64 tree
pub fn universe(records: Vec<PackageRecord>) -> Universe {
    Universe::new(TreeArch::new("x86_64"), records)
}

pub fn patterns(p: &[&str]) -> Vec<String> {
    p.iter().map(|s| s.to_string()).collect()
}

/// A small pool shaped like a real distribution: binaries, their source
/// packages, debuginfo and an i686 multilib slice.
pub fn pool() -> Vec<PackageRecord> {
    vec![
        pkg("bash-5.2-1.x86_64", "bash-5.2-1.src.rpm", &["bash", "/bin/sh"], &["glibc", "libtinfo.so.6"]),
        pkg("bash-doc-5.2-1.noarch", "bash-5.2-1.src.rpm", &[], &["bash"]),
        pkg("bash-debuginfo-5.2-1.x86_64", "bash-5.2-1.src.rpm", &[], &[]),
        pkg("bash-5.2-1.src", "", &[], &["ncurses-devel"]),
        pkg("glibc-2.39-1.x86_64", "glibc-2.39-1.src.rpm", &["libc.so.6"], &[]),
        pkg("glibc-2.39-1.i686", "glibc-2.39-1.src.rpm", &["libc.so.6"], &[]),
        pkg("glibc-debuginfo-2.39-1.x86_64", "glibc-2.39-1.src.rpm", &[], &[]),
        pkg("glibc-debuginfo-2.39-1.i686", "glibc-2.39-1.src.rpm", &[], &[]),
        pkg("glibc-2.39-1.src", "", &[], &[]),
        pkg("ncurses-libs-6.4-1.x86_64", "ncurses-6.4-1.src.rpm", &["libtinfo.so.6"], &["glibc"]),
        pkg("ncurses-libs-6.4-1.i686", "ncurses-6.4-1.src.rpm", &["libtinfo.so.6"], &["glibc"]),
        pkg("ncurses-devel-6.4-1.x86_64", "ncurses-6.4-1.src.rpm", &[], &["ncurses-libs"]),
        pkg("ncurses-6.4-1.src", "", &[], &[]),
        pkg("vim-9.1-1.x86_64", "vim-9.1-1.src.rpm", &[], &["ncurses-libs"]),
        pkg("vim-9.1-1.src", "", &[], &[]),
    ]
}

/// Configuration text every compose needs, with `extra` keys in front
pub fn config_text(extra: &str) -> String {
    format!(
        r#"{extra}
release_name = "Fedora"
release_short = "Fedora"
release_version = "40"
variants_file = "/srv/compose/variants.xml"
sigkeys = [""]
runroot = false
pkgset_source = "repos"
gather_source = "none"
gather_method = "deps"

[pkgset_repos]
x86_64 = ["/srv/repos/x86_64"]
"#
    )
}

pub fn config(extra: &str) -> Config {
    let raw = distro_compose::config::parse_raw(&config_text(extra)).unwrap();
    Config::from_raw(&raw).unwrap().config
}
