// src/metadata/mod.rs

//! productmd-compatible compose metadata
//!
//! JSON documents share the header `{"type": "productmd.<kind>",
//! "version": "1.2"}`. Tree metadata (`.treeinfo`, `.discinfo`,
//! `media.repo`) is written by [`tree`].

pub mod composeinfo;
pub mod images;
pub mod rpms;
pub mod tree;

pub use composeinfo::ComposeInfo;
pub use images::{Image, ImagesIndex};
pub use rpms::RpmsManifest;

use crate::error::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

pub const METADATA_VERSION: &str = "1.2";

/// Wrap a payload with the productmd header
pub fn document<T: Serialize>(kind: &str, payload: &T) -> Result<Value> {
    Ok(json!({
        "header": {
            "type": format!("productmd.{kind}"),
            "version": METADATA_VERSION,
        },
        "payload": serde_json::to_value(payload)?,
    }))
}

/// Write a productmd JSON document, creating parent directories
pub fn write_document<T: Serialize>(path: &Path, kind: &str, payload: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(&document(kind, payload)?)?;
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

/// Module metadata index; module builds are not composed
pub fn write_modules(path: &Path, compose_id: &str) -> Result<()> {
    write_document(
        path,
        "modules",
        &json!({
            "compose": {"id": compose_id},
            "modules": {},
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_header() {
        let doc = document("images", &json!({"images": {}})).unwrap();
        assert_eq!(doc["header"]["type"], json!("productmd.images"));
        assert_eq!(doc["header"]["version"], json!("1.2"));
        assert_eq!(doc["payload"]["images"], json!({}));
    }

    #[test]
    fn test_write_document_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compose/metadata/modules.json");
        write_modules(&path, "X-1-20240101.0").unwrap();
        let back: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["payload"]["compose"]["id"], json!("X-1-20240101.0"));
    }
}
