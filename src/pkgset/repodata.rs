// src/pkgset/repodata.rs

//! Yum repository reader
//!
//! Reads `repodata/repomd.xml`, locates the `primary` metadata and parses
//! it into [`PackageRecord`]s. The primary file may be gzip, xz or zstd
//! compressed, or plain XML.

use super::{PackageRecord, Reldep};
use crate::error::{Error, Result};
use crate::version::{DepFlag, RpmVersion};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl Compression {
    fn from_extension(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Self::Gzip,
            Some("xz") => Self::Xz,
            Some("zst") | Some("zstd") => Self::Zstd,
            _ => Self::None,
        }
    }

    /// Detect from magic bytes: gzip `1f 8b`, xz `fd 37 7a 58 5a 00`, zstd `28 b5 2f fd`
    fn from_magic(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Self::Xz
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::None
        }
    }
}

/// Read a possibly compressed metadata file to a string
fn read_metadata(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    let mut format = Compression::from_extension(path);
    if format == Compression::None {
        format = Compression::from_magic(&data);
    }
    let mut reader: Box<dyn Read + '_> = match format {
        Compression::None => Box::new(data.as_slice()),
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(data.as_slice())),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(data.as_slice())),
        Compression::Zstd => Box::new(zstd::Decoder::new(data.as_slice())?),
    };
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| Error::Parse(format!("failed to decompress {}: {e}", path.display())))?;
    Ok(text)
}

/// Local directory of a repository given as a path or `file://` URL
pub fn repo_dir(location: &str) -> Result<PathBuf> {
    if let Some(path) = location.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if location.contains("://") {
        return Err(Error::Parse(format!(
            "repository '{location}' is not a local directory"
        )));
    }
    Ok(PathBuf::from(location))
}

/// Location of the primary metadata listed in `repomd.xml`
pub fn primary_location(repomd: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(repomd);
    reader.trim_text(true);
    let mut in_primary = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"data" => {
                in_primary = attribute(&e, b"type")?.as_deref() == Some("primary");
            }
            Event::Empty(e) | Event::Start(e) if in_primary && e.local_name().as_ref() == b"location" => {
                return attribute(&e, b"href");
            }
            Event::End(e) if e.local_name().as_ref() == b"data" => in_primary = false,
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

/// Load every package of the repository in `dir`
pub fn load_repo(dir: &Path, repo_id: &str) -> Result<Vec<PackageRecord>> {
    let repomd_path = dir.join("repodata").join("repomd.xml");
    let repomd = std::fs::read_to_string(&repomd_path)
        .map_err(|e| Error::NotFound(format!("{}: {e}", repomd_path.display())))?;
    let href = primary_location(&repomd)?.ok_or_else(|| {
        Error::Parse(format!("{} lists no primary metadata", repomd_path.display()))
    })?;
    let primary_path = dir.join(&href);
    debug!("Reading {}", primary_path.display());
    let records = parse_primary(&read_metadata(&primary_path)?, dir, repo_id)?;
    info!("Loaded {} packages from {} ({})", records.len(), dir.display(), repo_id);
    Ok(records)
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// `<rpm:entry name flags epoch ver rel/>`
fn entry(e: &BytesStart<'_>) -> Result<Option<Reldep>> {
    let Some(name) = attribute(e, b"name")? else {
        return Ok(None);
    };
    let flag = attribute(e, b"flags")?.as_deref().and_then(DepFlag::parse);
    let ver = attribute(e, b"ver")?;
    match (flag, ver) {
        (Some(flag), Some(ver)) => {
            let epoch = attribute(e, b"epoch")?
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let rel = attribute(e, b"rel")?;
            Ok(Some(Reldep::versioned(name, flag, RpmVersion::new(epoch, ver, rel))))
        }
        _ => Ok(Some(Reldep::unversioned(name))),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DepList {
    None,
    Provides,
    Requires,
    Other,
}

/// Parse `primary.xml`; locations are resolved against `base`
pub fn parse_primary(xml: &str, base: &Path, repo_id: &str) -> Result<Vec<PackageRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<PackageRecord> = None;
    let mut deps = DepList::None;
    let mut element: Vec<u8> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let is_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"package" if !is_empty => {
                        current = Some(PackageRecord {
                            name: String::new(),
                            epoch: 0,
                            version: String::new(),
                            release: String::new(),
                            arch: String::new(),
                            sourcerpm: None,
                            provides: Vec::new(),
                            requires: Vec::new(),
                            files: Vec::new(),
                            repo_id: repo_id.to_string(),
                            location: String::new(),
                            sigkey: None,
                        });
                    }
                    b"version" => {
                        if let Some(pkg) = current.as_mut() {
                            pkg.epoch = attribute(&e, b"epoch")?
                                .and_then(|s| s.parse().ok())
                                .unwrap_or(0);
                            pkg.version = attribute(&e, b"ver")?.unwrap_or_default();
                            pkg.release = attribute(&e, b"rel")?.unwrap_or_default();
                        }
                    }
                    b"location" => {
                        if let (Some(pkg), Some(href)) = (current.as_mut(), attribute(&e, b"href")?) {
                            pkg.location = base.join(href).to_string_lossy().into_owned();
                        }
                    }
                    b"provides" if !is_empty => deps = DepList::Provides,
                    b"requires" if !is_empty => deps = DepList::Requires,
                    b"conflicts" | b"obsoletes" | b"recommends" | b"suggests" | b"supplements"
                    | b"enhances"
                        if !is_empty =>
                    {
                        deps = DepList::Other
                    }
                    b"entry" => {
                        if let (Some(pkg), Some(dep)) = (current.as_mut(), entry(&e)?) {
                            match deps {
                                DepList::Provides => pkg.provides.push(dep),
                                DepList::Requires if !dep.is_internal() => pkg.requires.push(dep),
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
                element = if is_empty { Vec::new() } else { local };
            }
            Event::Text(t) => {
                if let Some(pkg) = current.as_mut() {
                    let text = t.unescape()?.trim().to_string();
                    match element.as_slice() {
                        b"name" => pkg.name = text,
                        b"arch" => pkg.arch = text,
                        b"sourcerpm" if !text.is_empty() => pkg.sourcerpm = Some(text),
                        b"file" => pkg.files.push(text),
                        _ => {}
                    }
                }
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"package" => {
                        if let Some(mut pkg) = current.take() {
                            if pkg.is_source() {
                                pkg.sourcerpm = None;
                            }
                            pkg.requires.sort_by_key(|r| r.to_string());
                            pkg.requires.dedup();
                            records.push(pkg);
                        }
                    }
                    b"provides" | b"requires" | b"conflicts" | b"obsoletes" | b"recommends"
                    | b"suggests" | b"supplements" | b"enhances" => deps = DepList::None,
                    _ => {}
                }
                element.clear();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs::File;

    pub(crate) const PRIMARY_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="2">
<package type="rpm">
  <name>bash</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="5.2" rel="1.fc40"/>
  <location href="Packages/b/bash-5.2-1.fc40.x86_64.rpm"/>
  <format>
    <rpm:sourcerpm>bash-5.2-1.fc40.src.rpm</rpm:sourcerpm>
    <rpm:provides>
      <rpm:entry name="bash" flags="EQ" epoch="0" ver="5.2" rel="1.fc40"/>
      <rpm:entry name="/bin/sh"/>
    </rpm:provides>
    <rpm:requires>
      <rpm:entry name="rpmlib(CompressedFileNames)" flags="LE" epoch="0" ver="3.0.4" rel="1"/>
      <rpm:entry name="glibc" flags="GE" epoch="0" ver="2.38"/>
      <rpm:entry name="/usr/bin/sh"/>
    </rpm:requires>
    <rpm:conflicts>
      <rpm:entry name="oldbash"/>
    </rpm:conflicts>
    <file>/usr/bin/bash</file>
  </format>
</package>
<package type="rpm">
  <name>bash</name>
  <arch>src</arch>
  <version epoch="0" ver="5.2" rel="1.fc40"/>
  <location href="Packages/b/bash-5.2-1.fc40.src.rpm"/>
  <format>
    <rpm:sourcerpm/>
    <rpm:requires>
      <rpm:entry name="gcc"/>
    </rpm:requires>
  </format>
</package>
</metadata>
"#;

    pub(crate) const REPOMD_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <revision>1700000000</revision>
  <data type="filelists"><location href="repodata/filelists.xml.gz"/></data>
  <data type="primary"><location href="repodata/primary.xml"/></data>
</repomd>
"#;

    /// Write a plain-text repository with the given primary metadata
    pub(crate) fn write_repo(dir: &Path, primary: &str) {
        std::fs::create_dir_all(dir.join("repodata")).unwrap();
        std::fs::write(dir.join("repodata/repomd.xml"), REPOMD_XML).unwrap();
        std::fs::write(dir.join("repodata/primary.xml"), primary).unwrap();
    }

    #[test]
    fn test_primary_location() {
        assert_eq!(
            primary_location(REPOMD_XML).unwrap().as_deref(),
            Some("repodata/primary.xml")
        );
        assert_eq!(primary_location("<repomd/>").unwrap(), None);
    }

    #[test]
    fn test_parse_primary() {
        let records = parse_primary(PRIMARY_XML, Path::new("/repo"), "base").unwrap();
        assert_eq!(records.len(), 2);

        let bash = &records[0];
        assert_eq!(bash.nvra(), "bash-5.2-1.fc40.x86_64");
        assert_eq!(bash.sourcerpm.as_deref(), Some("bash-5.2-1.fc40.src.rpm"));
        assert_eq!(bash.location, "/repo/Packages/b/bash-5.2-1.fc40.x86_64.rpm");
        assert_eq!(bash.provides.len(), 2);
        let requires: Vec<String> = bash.requires.iter().map(|r| r.to_string()).collect();
        assert_eq!(requires, vec!["/usr/bin/sh", "glibc >= 2.38"]);
        assert_eq!(bash.files, vec!["/usr/bin/bash"]);
        assert_eq!(bash.repo_id, "base");

        let src = &records[1];
        assert!(src.is_source());
        assert_eq!(src.sourcerpm, None);
        assert_eq!(src.requires.len(), 1);
    }

    #[test]
    fn test_load_repo_plain_and_gzip() {
        let dir = tempfile::tempdir().unwrap();
        write_repo(dir.path(), PRIMARY_XML);
        assert_eq!(load_repo(dir.path(), "base").unwrap().len(), 2);

        let gz_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(gz_dir.path().join("repodata")).unwrap();
        std::fs::write(
            gz_dir.path().join("repodata/repomd.xml"),
            REPOMD_XML.replace("repodata/primary.xml", "repodata/primary.xml.gz"),
        )
        .unwrap();
        let file = File::create(gz_dir.path().join("repodata/primary.xml.gz")).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, PRIMARY_XML.as_bytes()).unwrap();
        encoder.finish().unwrap();
        assert_eq!(load_repo(gz_dir.path(), "base").unwrap().len(), 2);
    }

    #[test]
    fn test_missing_repomd_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_repo(dir.path(), "x"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_repo_dir() {
        assert_eq!(repo_dir("file:///srv/repo").unwrap(), PathBuf::from("/srv/repo"));
        assert_eq!(repo_dir("/srv/repo").unwrap(), PathBuf::from("/srv/repo"));
        assert!(repo_dir("https://example.com/repo").is_err());
    }

    #[test]
    fn test_compression_magic() {
        assert_eq!(Compression::from_magic(&[0x1f, 0x8b, 0]), Compression::Gzip);
        assert_eq!(Compression::from_magic(&[0x28, 0xb5, 0x2f, 0xfd]), Compression::Zstd);
        assert_eq!(Compression::from_magic(b"<?xml"), Compression::None);
    }
}
