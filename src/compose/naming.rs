// src/compose/naming.rs

//! Compose identifiers and image names

use crate::config::Config;
use crate::error::{Error, Result};
use crate::variants::{Variant, VariantTree, VariantType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};

/// Longest volume id ISO9660 accepts
pub const MAX_VOLID_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ComposeType {
    #[default]
    Production,
    Nightly,
    Test,
    Ci,
}

impl ComposeType {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Production => "",
            Self::Nightly => ".n",
            Self::Test => ".t",
            Self::Ci => ".ci",
        }
    }
}

/// Release identity a compose id is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeIdent {
    pub release_name: String,
    pub release_short: String,
    pub release_version: String,
    pub release_type: String,
    /// (short, version, type) of the base product for layered releases
    pub base_product: Option<(String, String, String)>,
}

fn release_type_suffix(release_type: &str) -> String {
    if release_type.eq_ignore_ascii_case("ga") {
        String::new()
    } else {
        format!("-{}", release_type.to_lowercase())
    }
}

impl ComposeIdent {
    pub fn from_config(config: &Config) -> Self {
        let base_product = if config.release_is_layered {
            match (&config.base_product_short, &config.base_product_version) {
                (Some(short), Some(version)) => Some((
                    short.clone(),
                    version.clone(),
                    config.base_product_type.clone(),
                )),
                _ => None,
            }
        } else {
            None
        };
        Self {
            release_name: config.release_name.clone(),
            release_short: config.release_short.clone(),
            release_version: config.release_version.clone(),
            release_type: config.release_type.clone(),
            base_product,
        }
    }

    /// `short-version[-base_short-base_version][-type]-DATE[suffix].RESPIN`
    pub fn compose_id(&self, date: &str, compose_type: ComposeType, respin: u32) -> String {
        let mut id = format!("{}-{}", self.release_short, self.release_version);
        if let Some((short, version, base_type)) = &self.base_product {
            id.push_str(&format!("-{short}-{version}{}", release_type_suffix(base_type)));
        }
        id.push_str(&release_type_suffix(&self.release_type));
        id.push_str(&format!("-{date}{}.{respin}", compose_type.suffix()));
        id
    }

    pub fn release_major_version(&self) -> &str {
        self.release_version
            .split('.')
            .next()
            .unwrap_or(&self.release_version)
    }
}

/// Validate a compose label such as `Beta-1.2` or `RC-1.0`
pub fn validate_label(label: &str) -> Result<()> {
    let pattern = Regex::new(r"^[A-Z][A-Za-z]*-\d+(\.\d+)*$")?;
    if pattern.is_match(label) {
        Ok(())
    } else {
        Err(Error::Parse(format!(
            "invalid compose label '{label}', expected e.g. 'Beta-1.0' or 'RC-1.2'"
        )))
    }
}

/// Major number of a label (`RC-1.2` → `1`)
pub fn label_major_version(label: &str) -> Option<&str> {
    let (_, version) = label.split_once('-')?;
    version.split('.').next()
}

/// Everything that identifies one compose run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeIds {
    pub ident: ComposeIdent,
    pub date: String,
    pub respin: u32,
    pub compose_type: ComposeType,
    pub label: Option<String>,
    pub compose_id: String,
}

impl ComposeIds {
    pub fn new(
        ident: ComposeIdent,
        date: &str,
        compose_type: ComposeType,
        respin: u32,
        label: Option<String>,
    ) -> Self {
        let compose_id = ident.compose_id(date, compose_type, respin);
        Self {
            ident,
            date: date.to_string(),
            respin,
            compose_type,
            label,
            compose_id,
        }
    }

    fn common_keys(&self) -> BTreeMap<&'static str, String> {
        let label = self.label.clone().unwrap_or_default();
        let mut keys = BTreeMap::new();
        keys.insert("compose_id", self.compose_id.clone());
        keys.insert("release_short", self.ident.release_short.clone());
        keys.insert("version", self.ident.release_version.clone());
        keys.insert("date", self.date.clone());
        keys.insert("respin", self.respin.to_string());
        keys.insert("type", self.compose_type.to_string());
        keys.insert("type_suffix", self.compose_type.suffix().to_string());
        keys.insert(
            "label_major_version",
            label_major_version(&label).unwrap_or_default().to_string(),
        );
        keys.insert("label", label);
        keys
    }

    /// Render an image file name
    pub fn image_name(
        &self,
        format: &str,
        variant: &str,
        arch: &str,
        disc_type: &str,
        disc_num: Option<u32>,
        suffix: &str,
    ) -> Result<String> {
        let mut keys = self.common_keys();
        keys.insert("variant", variant.to_string());
        keys.insert("arch", display_arch(arch).to_string());
        keys.insert("disc_type", disc_type.to_string());
        keys.insert("disc_num", disc_num.map(|n| n.to_string()).unwrap_or_default());
        keys.insert("suffix", suffix.to_string());
        substitute(format, &keys)
    }

    /// First volume id format that renders within 32 characters
    ///
    /// When none fits, the last rendering is truncated.
    pub fn volume_id(
        &self,
        formats: &[String],
        variant: &str,
        arch: &str,
        disc_type: &str,
    ) -> Result<String> {
        let mut keys = self.common_keys();
        keys.insert("variant", variant.to_string());
        keys.insert("arch", display_arch(arch).to_string());
        keys.insert("disc_type", disc_type.to_string());
        let (base_short, base_version) = match &self.ident.base_product {
            Some((short, version, _)) => (short.clone(), version.clone()),
            None => (String::new(), String::new()),
        };
        keys.insert("base_product_short", base_short);
        keys.insert("base_product_version", base_version);

        let mut last = String::new();
        for format in formats {
            let volid = substitute(format, &keys)?;
            if volid.chars().count() <= MAX_VOLID_LEN {
                return Ok(volid);
            }
            last = volid;
        }
        Ok(last.chars().take(MAX_VOLID_LEN).collect())
    }
}

/// `src` is spelled `source` in file names
pub fn display_arch(arch: &str) -> &str {
    if arch == "src" { "source" } else { arch }
}

/// Variant label used in image names; layered products use their parent
pub fn image_variant_label<'a>(tree: &'a VariantTree, variant: &'a Variant) -> &'a str {
    if variant.variant_type == VariantType::LayeredProduct {
        if let Some(parent) = tree.parent(variant) {
            return &parent.uid;
        }
    }
    &variant.uid
}

/// Replace `{key}` placeholders; `{{` and `}}` are literal braces
///
/// A `{` never closed is kept as text. Only an unknown key is an error.
pub fn substitute(format: &str, keys: &BTreeMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    out.push('{');
                    out.push_str(&key);
                    break;
                }
                match keys.get(key.as_str()) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(Error::MissingFormatKey {
                            format: format.to_string(),
                            key,
                        })
                    }
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}
