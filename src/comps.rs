// src/comps.rs

//! Comps groups, environments and langpacks
//!
//! Only the parts of the comps format the compose consumes are modelled:
//! group package lists (with conditional requests and arch restrictions),
//! environments and langpack patterns. The writer emits the same subset,
//! which is what createrepo embeds into the repodata.

use crate::error::{Error, Result};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PackageReqType {
    Mandatory,
    Default,
    Optional,
    Conditional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReq {
    pub name: String,
    pub req_type: PackageReqType,
    /// Trigger package for conditional requests
    pub requires: Option<String>,
    /// Arch restriction, a comma or space separated list
    pub arch: Option<String>,
}

impl PackageReq {
    fn applies_to(&self, arch: &str) -> bool {
        match &self.arch {
            None => true,
            Some(list) => list
                .split(|c: char| c == ',' || c.is_whitespace())
                .any(|a| a == arch),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: String,
    pub default: bool,
    pub uservisible: bool,
    pub packages: Vec<PackageReq>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub groups: Vec<String>,
    pub options: Vec<String>,
}

/// `<match name="firefox" install="firefox-langpack-%s"/>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Langpack {
    pub name: String,
    pub install: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Comps {
    pub groups: Vec<Group>,
    pub environments: Vec<Environment>,
    pub langpacks: Vec<Langpack>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Group,
    Environment,
    GroupList,
    OptionList,
}

impl Comps {
    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut comps = Comps::default();
        let mut section = Section::None;
        let mut group = Group::default();
        let mut environment = Environment::default();
        let mut pending_req: Option<PackageReq> = None;
        let mut element = String::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    element = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if e
                        .try_get_attribute("xml:lang")
                        .map_err(quick_xml::Error::from)?
                        .is_some()
                    {
                        // Translations are not carried.
                        element.clear();
                    }
                    match element.as_str() {
                        "group" => {
                            section = Section::Group;
                            group = Group {
                                uservisible: true,
                                ..Group::default()
                            };
                        }
                        "environment" => {
                            section = Section::Environment;
                            environment = Environment::default();
                        }
                        "grouplist" => section = Section::GroupList,
                        "optionlist" => section = Section::OptionList,
                        "packagereq" => pending_req = Some(package_req(&e)?),
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    if e.name().as_ref() == b"match" {
                        let mut name = None;
                        let mut install = None;
                        for attr in e.attributes() {
                            let attr = attr.map_err(quick_xml::Error::from)?;
                            let value = attr.unescape_value()?.into_owned();
                            match attr.key.as_ref() {
                                b"name" => name = Some(value),
                                b"install" => install = Some(value),
                                _ => {}
                            }
                        }
                        if let (Some(name), Some(install)) = (name, install) {
                            comps.langpacks.push(Langpack { name, install });
                        }
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape()?.trim().to_string();
                    match (section, element.as_str()) {
                        (Section::Group, "id") => group.id = text,
                        (Section::Group, "name") => group.name = text,
                        (Section::Group, "description") => group.description = text,
                        (Section::Group, "default") => group.default = text == "true",
                        (Section::Group, "uservisible") => group.uservisible = text == "true",
                        (Section::Group, "packagereq") => {
                            if let Some(mut req) = pending_req.take() {
                                req.name = text;
                                group.packages.push(req);
                            }
                        }
                        (Section::Environment, "id") => environment.id = text,
                        (Section::Environment, "name") => environment.name = text,
                        (Section::Environment, "description") => environment.description = text,
                        (Section::GroupList, "groupid") => environment.groups.push(text),
                        (Section::OptionList, "groupid") => environment.options.push(text),
                        _ => {}
                    }
                }
                Event::End(e) => {
                    match e.name().as_ref() {
                        b"group" => {
                            comps.groups.push(std::mem::take(&mut group));
                            section = Section::None;
                        }
                        b"environment" => {
                            comps.environments.push(std::mem::take(&mut environment));
                            section = Section::None;
                        }
                        b"grouplist" | b"optionlist" => section = Section::Environment,
                        _ => {}
                    }
                    element.clear();
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(comps)
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn environment(&self, id: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.id == id)
    }

    /// Drop package requests restricted to other arches
    pub fn filter_arch(&self, arch: &str) -> Comps {
        let mut out = self.clone();
        for group in &mut out.groups {
            group.packages.retain(|p| p.applies_to(arch));
        }
        out
    }

    /// Keep only the listed groups and the environments that reference them
    pub fn filter_groups(&self, keep: &BTreeSet<String>) -> Comps {
        let mut out = self.clone();
        out.groups.retain(|g| keep.contains(&g.id));
        for env in &mut out.environments {
            env.groups.retain(|g| keep.contains(g));
            env.options.retain(|g| keep.contains(g));
        }
        out.environments.retain(|e| !e.groups.is_empty());
        out
    }

    /// Mandatory and default package names of the given groups
    pub fn group_packages(&self, groups: &[String]) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for id in groups {
            let group = self
                .group(id)
                .ok_or_else(|| Error::NotFound(format!("comps group '{id}'")))?;
            names.extend(
                group
                    .packages
                    .iter()
                    .filter(|p| matches!(p.req_type, PackageReqType::Mandatory | PackageReqType::Default))
                    .map(|p| p.name.clone()),
            );
        }
        Ok(names)
    }

    /// Conditional requests of the given groups as (trigger, package) pairs
    pub fn conditional_packages(&self, groups: &[String]) -> Vec<(String, String)> {
        groups
            .iter()
            .filter_map(|id| self.group(id))
            .flat_map(|g| g.packages.iter())
            .filter(|p| p.req_type == PackageReqType::Conditional)
            .filter_map(|p| p.requires.clone().map(|trigger| (trigger, p.name.clone())))
            .collect()
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<!DOCTYPE comps PUBLIC \"-//Red Hat, Inc.//DTD Comps info//EN\" \"comps.dtd\">\n");
        out.push_str("<comps>\n");
        for group in &self.groups {
            out.push_str("  <group>\n");
            let _ = writeln!(out, "    <id>{}</id>", escape(&group.id));
            let _ = writeln!(out, "    <name>{}</name>", escape(&group.name));
            let _ = writeln!(out, "    <description>{}</description>", escape(&group.description));
            let _ = writeln!(out, "    <default>{}</default>", group.default);
            let _ = writeln!(out, "    <uservisible>{}</uservisible>", group.uservisible);
            out.push_str("    <packagelist>\n");
            for req in &group.packages {
                let _ = write!(out, "      <packagereq type=\"{}\"", req.req_type);
                if let Some(requires) = &req.requires {
                    let _ = write!(out, " requires=\"{}\"", escape(requires));
                }
                let _ = writeln!(out, ">{}</packagereq>", escape(&req.name));
            }
            out.push_str("    </packagelist>\n");
            out.push_str("  </group>\n");
        }
        for env in &self.environments {
            out.push_str("  <environment>\n");
            let _ = writeln!(out, "    <id>{}</id>", escape(&env.id));
            let _ = writeln!(out, "    <name>{}</name>", escape(&env.name));
            let _ = writeln!(out, "    <description>{}</description>", escape(&env.description));
            out.push_str("    <grouplist>\n");
            for id in &env.groups {
                let _ = writeln!(out, "      <groupid>{}</groupid>", escape(id));
            }
            out.push_str("    </grouplist>\n");
            out.push_str("    <optionlist>\n");
            for id in &env.options {
                let _ = writeln!(out, "      <groupid>{}</groupid>", escape(id));
            }
            out.push_str("    </optionlist>\n");
            out.push_str("  </environment>\n");
        }
        if !self.langpacks.is_empty() {
            out.push_str("  <langpacks>\n");
            for lp in &self.langpacks {
                let _ = writeln!(
                    out,
                    "    <match name=\"{}\" install=\"{}\"/>",
                    escape(&lp.name),
                    escape(&lp.install)
                );
            }
            out.push_str("  </langpacks>\n");
        }
        out.push_str("</comps>\n");
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_xml())?;
        Ok(())
    }
}

fn package_req(element: &BytesStart<'_>) -> Result<PackageReq> {
    let mut req = PackageReq {
        name: String::new(),
        req_type: PackageReqType::Mandatory,
        requires: None,
        arch: None,
    };
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            b"type" => {
                req.req_type = value
                    .parse()
                    .map_err(|_| Error::Parse(format!("unknown packagereq type '{value}'")))?
            }
            b"requires" => req.requires = Some(value),
            b"arch" => req.arch = Some(value),
            _ => {}
        }
    }
    Ok(req)
}
