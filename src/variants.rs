// src/variants.rs

//! Variant tree
//!
//! Variants are read from a `variants.xml` document and stored in an arena.
//! A child refers to its parent by index; the arena owns every variant. The
//! uid of a root variant is its id, a child's uid is `parent.uid-id`.

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum VariantType {
    Variant,
    Optional,
    Addon,
    LayeredProduct,
}

/// Comps group reference with optional per-variant tweaks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: String,
    pub default: Option<bool>,
    pub uservisible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub uid: String,
    pub id: String,
    pub name: String,
    pub variant_type: VariantType,
    pub arches: BTreeSet<String>,
    pub groups: Vec<GroupRef>,
    pub environments: Vec<String>,
    pub modules: Vec<String>,
    /// Arena index of the parent
    pub parent: Option<usize>,
    /// Arena indices of the children, in document order
    pub children: Vec<usize>,
}

impl Variant {
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Packages of optional variants and addons are trimmed against the parent
    pub fn is_child_content(&self) -> bool {
        matches!(self.variant_type, VariantType::Optional | VariantType::Addon)
    }
}

/// Parsed variant before it is placed into the arena
#[derive(Debug, Default)]
struct RawVariant {
    id: String,
    name: String,
    variant_type: Option<VariantType>,
    arches: BTreeSet<String>,
    groups: Vec<GroupRef>,
    environments: Vec<String>,
    modules: Vec<String>,
    children: Vec<RawVariant>,
}

/// Arena of variants in document order (parents before their children)
#[derive(Debug, Clone, Default)]
pub struct VariantTree {
    variants: Vec<Variant>,
}

/// Filters applied when building the tree
#[derive(Debug, Clone, Default)]
pub struct VariantFilter {
    /// Keep only these arches; empty keeps all
    pub tree_arches: Vec<String>,
    /// Keep only these top-level variant uids; empty keeps all
    pub tree_variants: Vec<String>,
}

impl VariantTree {
    pub fn load(path: &Path, filter: &VariantFilter) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let tree = Self::parse(&text, filter)?;
        info!(
            "Loaded {} variants from {}",
            tree.variants.len(),
            path.display()
        );
        Ok(tree)
    }

    pub fn parse(xml: &str, filter: &VariantFilter) -> Result<Self> {
        let roots = parse_document(xml)?;
        let mut tree = Self::default();
        for root in roots {
            tree.insert(root, None, filter);
        }
        Ok(tree)
    }

    fn insert(&mut self, mut raw: RawVariant, parent: Option<usize>, filter: &VariantFilter) {
        let Some(variant_type) = raw.variant_type else {
            return;
        };
        let uid = match parent {
            Some(p) => format!("{}-{}", self.variants[p].uid, raw.id),
            None => raw.id.clone(),
        };

        if raw.arches.is_empty() {
            if let Some(p) = parent {
                raw.arches = self.variants[p].arches.clone();
            }
        }
        if let Some(p) = parent {
            let parent_arches = &self.variants[p].arches;
            raw.arches.retain(|a| parent_arches.contains(a));
        }
        if !filter.tree_arches.is_empty() {
            raw.arches.retain(|a| filter.tree_arches.contains(a));
        }

        if raw.arches.is_empty() {
            debug!("Dropping variant {} without arches", uid);
            return;
        }
        if parent.is_none()
            && !filter.tree_variants.is_empty()
            && !filter.tree_variants.contains(&uid)
        {
            debug!("Dropping variant {} not listed in tree_variants", uid);
            return;
        }

        let index = self.variants.len();
        self.variants.push(Variant {
            uid,
            id: raw.id,
            name: raw.name,
            variant_type,
            arches: raw.arches,
            groups: raw.groups,
            environments: raw.environments,
            modules: raw.modules,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.variants[p].children.push(index);
        }
        for child in std::mem::take(&mut raw.children) {
            self.insert(child, Some(index), filter);
        }
    }

    pub fn all(&self) -> &[Variant] {
        &self.variants
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Variant> {
        self.variants.get(index)
    }

    pub fn by_uid(&self, uid: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.uid == uid)
    }

    pub fn index_of(&self, uid: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.uid == uid)
    }

    pub fn parent(&self, variant: &Variant) -> Option<&Variant> {
        variant.parent.and_then(|p| self.variants.get(p))
    }

    pub fn children(&self, variant: &Variant) -> impl Iterator<Item = &Variant> {
        variant.children.iter().filter_map(|c| self.variants.get(*c))
    }

    pub fn top_level(&self) -> impl Iterator<Item = &Variant> {
        self.variants.iter().filter(|v| v.is_top_level())
    }

    /// Union of all variant arches
    pub fn arches(&self) -> BTreeSet<String> {
        self.variants
            .iter()
            .flat_map(|v| v.arches.iter().cloned())
            .collect()
    }

    /// (variant, arch) pairs in tree order
    pub fn variant_arches(&self) -> Vec<(&Variant, &str)> {
        self.variants
            .iter()
            .flat_map(|v| v.arches.iter().map(move |a| (v, a.as_str())))
            .collect()
    }
}

fn attributes(element: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_document(xml: &str) -> Result<Vec<RawVariant>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut roots = Vec::new();
    let mut stack: Vec<RawVariant> = Vec::new();
    let mut text_target: Option<String> = None;
    let mut pending_group: Option<GroupRef> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match tag.as_str() {
                    "variant" => {
                        let mut raw = RawVariant::default();
                        for (key, value) in attributes(&e)? {
                            match key.as_str() {
                                "id" => raw.id = value,
                                "name" => raw.name = value,
                                "type" => {
                                    raw.variant_type = Some(value.parse().map_err(|_| {
                                        Error::Parse(format!("unknown variant type '{value}'"))
                                    })?)
                                }
                                _ => {}
                            }
                        }
                        if raw.id.is_empty() {
                            return Err(Error::Parse("variant without id".to_string()));
                        }
                        stack.push(raw);
                    }
                    "group" => {
                        let mut group = GroupRef {
                            id: String::new(),
                            default: None,
                            uservisible: None,
                        };
                        for (key, value) in attributes(&e)? {
                            match key.as_str() {
                                "default" => group.default = parse_bool(&value),
                                "uservisible" => group.uservisible = parse_bool(&value),
                                _ => {}
                            }
                        }
                        pending_group = Some(group);
                        text_target = Some(tag);
                    }
                    "arch" | "environment" | "module" => text_target = Some(tag),
                    _ => {}
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?.trim().to_string();
                if let (Some(target), Some(current)) = (text_target.as_deref(), stack.last_mut()) {
                    match target {
                        "arch" => {
                            current.arches.insert(text);
                        }
                        "environment" => current.environments.push(text),
                        "module" => current.modules.push(text),
                        "group" => {
                            if let Some(mut group) = pending_group.take() {
                                group.id = text;
                                current.groups.push(group);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"variant" => {
                    let Some(done) = stack.pop() else {
                        return Err(Error::Parse("unbalanced </variant>".to_string()));
                    };
                    if done.variant_type.is_none() {
                        return Err(Error::Parse(format!("variant '{}' has no type", done.id)));
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => roots.push(done),
                    }
                }
                b"arch" | b"group" | b"environment" | b"module" => {
                    text_target = None;
                    pending_group = None;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(roots)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const VARIANTS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<variants>
  <variant id="Server" name="Server" type="variant">
    <arches><arch>x86_64</arch><arch>ppc64le</arch></arches>
    <groups>
      <group default="true">core</group>
      <group uservisible="false">server-extras</group>
    </groups>
    <environments><environment>server-env</environment></environments>
    <variants>
      <variant id="optional" name="optional" type="optional">
        <groups><group>optional-tools</group></groups>
      </variant>
      <variant id="HA" name="High Availability" type="addon">
        <arches><arch>x86_64</arch></arches>
      </variant>
    </variants>
  </variant>
  <variant id="Client" name="Client" type="variant">
    <arches><arch>x86_64</arch></arches>
  </variant>
</variants>
"#;

    #[test]
    fn test_parse_tree() {
        let tree = VariantTree::parse(VARIANTS_XML, &VariantFilter::default()).unwrap();
        let uids: Vec<&str> = tree.all().iter().map(|v| v.uid.as_str()).collect();
        assert_eq!(uids, vec!["Server", "Server-optional", "Server-HA", "Client"]);

        let optional = tree.by_uid("Server-optional").unwrap();
        assert_eq!(optional.variant_type, VariantType::Optional);
        assert_eq!(tree.parent(optional).unwrap().uid, "Server");
        assert_eq!(optional.arches.len(), 2);

        let server = tree.by_uid("Server").unwrap();
        assert_eq!(server.groups[0].default, Some(true));
        assert_eq!(server.groups[1].uservisible, Some(false));
        assert_eq!(tree.children(server).count(), 2);
    }

    #[test]
    fn test_arch_filter_drops_empty_variants() {
        let filter = VariantFilter {
            tree_arches: vec!["ppc64le".to_string()],
            tree_variants: Vec::new(),
        };
        let tree = VariantTree::parse(VARIANTS_XML, &filter).unwrap();
        let uids: Vec<&str> = tree.all().iter().map(|v| v.uid.as_str()).collect();
        assert_eq!(uids, vec!["Server", "Server-optional"]);
    }

    #[test]
    fn test_variant_filter_drops_children() {
        let filter = VariantFilter {
            tree_arches: Vec::new(),
            tree_variants: vec!["Client".to_string()],
        };
        let tree = VariantTree::parse(VARIANTS_XML, &filter).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.by_uid("Server-optional").is_none());
    }

    #[test]
    fn test_unknown_type_is_error() {
        let xml = r#"<variants><variant id="X" name="X" type="nope"></variant></variants>"#;
        assert!(VariantTree::parse(xml, &VariantFilter::default()).is_err());
    }
}
