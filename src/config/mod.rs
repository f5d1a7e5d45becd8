// src/config/mod.rs

//! Compose configuration
//!
//! Configuration files are TOML. They are converted into a JSON value,
//! validated against the schema (which fills defaults and rewrites
//! deprecated spellings), and only then deserialized into [`Config`].
//! Downstream code never sees the raw document.

pub mod rules;
pub mod schema;
pub mod validate;

pub use validate::{validate, Validation};

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// `[[variant-uid-regex, {arch-or-"*" = value}], ...]`
pub type ArchVariant<T> = Vec<(String, BTreeMap<String, T>)>;

/// `[[variant-uid-regex, item-or-items], ...]`
pub type VariantItems<T> = Vec<(String, OneOrMany<T>)>;

/// A single value or a list of them
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Self::One(item) => std::slice::from_ref(item).iter(),
            Self::Many(items) => items.iter(),
        }
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScmKind {
    File,
    Cvs,
    Git,
    Rpm,
}

/// Where to fetch a file or directory from
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScmSpec {
    /// Plain local path
    Path(String),
    Table(ScmTable),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScmTable {
    pub scm: ScmKind,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub file: Option<OneOrMany<String>>,
    pub dir: Option<OneOrMany<String>>,
    /// Build command run inside a git clone before extraction
    pub command: Option<String>,
    /// Destination inside the output tree (extra files only)
    pub target: Option<String>,
}

impl ScmSpec {
    pub fn kind(&self) -> ScmKind {
        match self {
            Self::Path(_) => ScmKind::File,
            Self::Table(t) => t.scm,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Path(_) => None,
            Self::Table(t) => t.target.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PkgsetSource {
    Koji,
    Repos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GatherSource {
    Module,
    Json,
    Comps,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GatherMethod {
    Deps,
    Nodeps,
}

/// `gather_method`: one method, or a mapping of variant-uid regex to method
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GatherMethodSpec {
    Global(GatherMethod),
    PerVariant(BTreeMap<String, GatherMethod>),
}

impl GatherMethodSpec {
    /// Method for a variant; unmatched variants resolve dependencies
    pub fn for_variant(&self, uid: &str) -> Result<GatherMethod> {
        match self {
            Self::Global(method) => Ok(*method),
            Self::PerVariant(map) => {
                for (pattern, method) in map {
                    if regex::Regex::new(&format!("^(?:{pattern})$"))?.is_match(uid) {
                        return Ok(*method);
                    }
                }
                Ok(GatherMethod::Deps)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GreedyMethod {
    #[default]
    None,
    All,
    Build,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MultilibMethod {
    None,
    All,
    Devel,
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LinkType {
    Hardlink,
    Copy,
    Symlink,
    AbspathSymlink,
    #[default]
    HardlinkOrCopy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChecksumType {
    Md5,
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RepoclosureStrictness {
    Off,
    Lenient,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct LoraxOptions {
    pub bugurl: Option<String>,
    #[serde(default = "yes")]
    pub nomacboot: bool,
    #[serde(default = "yes")]
    pub noupgrade: bool,
    #[serde(default)]
    pub add_template: Vec<String>,
    #[serde(default)]
    pub add_arch_template: Vec<String>,
    #[serde(default)]
    pub add_template_var: Vec<String>,
    #[serde(default)]
    pub add_arch_template_var: Vec<String>,
    pub rootfs_size: Option<u64>,
    pub version: Option<String>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtraIsoConfig {
    pub include_variants: Vec<String>,
    pub filename: Option<String>,
    pub volid: Option<OneOrMany<String>>,
    #[serde(default)]
    pub extra_files: Vec<ScmSpec>,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(default)]
    pub failable_arches: Vec<String>,
    #[serde(default)]
    pub skip_src: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiveImageConfig {
    pub kickstart: String,
    pub ksurl: Option<String>,
    pub name: Option<String>,
    pub subvariant: Option<String>,
    pub version: Option<String>,
    pub target: Option<String>,
    #[serde(rename = "type", default = "live")]
    pub image_type: String,
    pub specfile: Option<String>,
    #[serde(default)]
    pub scratch: bool,
    #[serde(default)]
    pub sign: bool,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(default)]
    pub repo: OneOrMany<String>,
}

fn live() -> String {
    "live".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageBuildConfig {
    #[serde(rename = "image-build")]
    pub image_build: ImageBuildTask,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageBuildTask {
    pub format: Vec<String>,
    pub kickstart: String,
    pub ksurl: Option<String>,
    pub distro: String,
    pub name: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub target: Option<String>,
    pub disk_size: Option<u64>,
    #[serde(default)]
    pub arches: Vec<String>,
    pub subvariant: Option<String>,
    /// Arches on which a failure is tolerated
    #[serde(default)]
    pub failable: Vec<String>,
    pub install_tree_from: Option<String>,
    #[serde(default)]
    pub repo: OneOrMany<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiveMediaConfig {
    pub name: String,
    pub kickstart: String,
    pub ksurl: Option<String>,
    pub title: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub target: Option<String>,
    #[serde(default)]
    pub arches: Vec<String>,
    pub subvariant: Option<String>,
    pub install_tree_from: Option<String>,
    #[serde(default)]
    pub scratch: bool,
    #[serde(default)]
    pub repo: OneOrMany<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OsbsConfig {
    pub url: String,
    pub target: String,
    pub git_branch: String,
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub scratch: bool,
    #[serde(default)]
    pub repo: OneOrMany<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OstreeConfig {
    pub treefile: String,
    pub config_url: String,
    pub config_branch: Option<String>,
    pub ostree_repo: String,
    #[serde(default)]
    pub repo: OneOrMany<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(default)]
    pub force_new_commit: bool,
    #[serde(default)]
    pub update_summary: bool,
    #[serde(default)]
    pub failable: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct OstreeInstallerConfig {
    #[serde(default)]
    pub repo: OneOrMany<String>,
    pub release: Option<String>,
    #[serde(default)]
    pub installpkgs: Vec<String>,
    #[serde(default)]
    pub add_template: Vec<String>,
    #[serde(default)]
    pub add_template_var: Vec<String>,
    #[serde(default)]
    pub add_arch_template: Vec<String>,
    #[serde(default)]
    pub add_arch_template_var: Vec<String>,
    pub rootfs_size: Option<u64>,
    pub template_repo: Option<String>,
    pub template_branch: Option<String>,
    #[serde(default)]
    pub arches: Vec<String>,
    #[serde(default)]
    pub failable: Vec<String>,
}

/// Canonical, validated compose configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub release_name: String,
    pub release_short: String,
    pub release_version: String,
    pub release_type: String,
    pub release_is_layered: bool,
    pub release_discinfo_description: Option<String>,
    pub base_product_name: Option<String>,
    pub base_product_short: Option<String>,
    pub base_product_version: Option<String>,
    pub base_product_type: String,

    pub variants_file: ScmSpec,
    pub comps_file: Option<ScmSpec>,
    /// Signing keys in preference order; an empty string means unsigned
    pub sigkeys: Vec<String>,
    #[serde(default)]
    pub tree_arches: Vec<String>,
    #[serde(default)]
    pub tree_variants: Vec<String>,
    #[serde(default)]
    pub failable_deliverables: ArchVariant<Vec<String>>,
    #[serde(default)]
    pub translate_paths: Vec<(String, String)>,
    #[serde(default)]
    pub link_type: LinkType,
    #[serde(default)]
    pub hashed_directories: bool,

    pub runroot: bool,
    pub runroot_tag: Option<String>,
    pub runroot_channel: Option<String>,
    pub runroot_method: Option<String>,
    pub koji_profile: Option<String>,

    pub pkgset_source: PkgsetSource,
    #[serde(default)]
    pub pkgset_repos: BTreeMap<String, OneOrMany<String>>,
    pub pkgset_koji_tag: Option<OneOrMany<String>>,
    #[serde(default = "yes")]
    pub pkgset_koji_inherit: bool,
    pub koji_topdir: String,

    pub gather_method: GatherMethodSpec,
    pub gather_source: GatherSource,
    pub gather_source_mapping: Option<String>,
    #[serde(default)]
    pub gather_fulltree: bool,
    #[serde(default)]
    pub gather_selfhosting: bool,
    #[serde(default)]
    pub greedy_method: GreedyMethod,
    pub gather_backend: String,
    #[serde(default)]
    pub gather_lookaside_repos: ArchVariant<Vec<String>>,
    #[serde(default)]
    pub gather_prepopulate: ArchVariant<Vec<String>>,
    #[serde(default)]
    pub multilib: ArchVariant<Vec<MultilibMethod>>,
    #[serde(default)]
    pub multilib_blacklist: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub multilib_whitelist: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub additional_packages: ArchVariant<Vec<String>>,
    #[serde(default)]
    pub filter_packages: ArchVariant<Vec<String>>,
    #[serde(default)]
    pub fulltree_excludes: Vec<String>,
    #[serde(default = "yes")]
    pub check_deps: bool,

    #[serde(default = "yes")]
    pub createrepo_c: bool,
    pub createrepo_checksum: String,
    pub createrepo_num_threads: Option<usize>,
    #[serde(default)]
    pub createrepo_database: bool,
    #[serde(default)]
    pub createrepo_deltas: bool,

    #[serde(default)]
    pub bootable: bool,
    pub buildinstall_method: Option<String>,
    #[serde(default)]
    pub buildinstall_skip: ArchVariant<bool>,
    #[serde(default)]
    pub lorax_options: VariantItems<LoraxOptions>,
    #[serde(default)]
    pub productimg: bool,
    pub productimg_install_class: Option<ScmSpec>,

    #[serde(default)]
    pub extra_files: ArchVariant<Vec<ScmSpec>>,

    #[serde(default)]
    pub createiso_skip: ArchVariant<bool>,
    #[serde(default)]
    pub createiso_use_xorrisofs: bool,
    #[serde(default)]
    pub extra_isos: VariantItems<ExtraIsoConfig>,
    pub image_name_format: String,
    pub image_volid_formats: Vec<String>,
    pub image_volid_layered_product_formats: Vec<String>,

    #[serde(default)]
    pub live_images: VariantItems<LiveImageConfig>,
    #[serde(default)]
    pub image_build: VariantItems<ImageBuildConfig>,
    #[serde(default)]
    pub live_media: VariantItems<LiveMediaConfig>,
    #[serde(default)]
    pub osbs: VariantItems<OsbsConfig>,
    #[serde(default)]
    pub ostree: VariantItems<OstreeConfig>,
    #[serde(default)]
    pub ostree_installer: VariantItems<OstreeInstallerConfig>,

    pub media_checksums: Vec<ChecksumType>,
    #[serde(default)]
    pub media_checksum_one_file: bool,
    #[serde(default)]
    pub media_checksum_base_filename: String,
    #[serde(default)]
    pub repoclosure_strictness: ArchVariant<RepoclosureStrictness>,
}

/// A validated configuration plus the warnings produced while validating
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub warnings: Vec<String>,
    /// Canonical instance, kept for the composeinfo snapshot
    pub canonical: Value,
}

/// Read a TOML configuration file into a JSON value
pub fn read_raw(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)?;
    parse_raw(&text)
}

/// Parse TOML text into a JSON value
pub fn parse_raw(text: &str) -> Result<Value> {
    let document: toml::Value = toml::from_str(text)?;
    Ok(serde_json::to_value(document)?)
}

impl Config {
    /// Validate a raw instance and build the typed configuration
    ///
    /// Any validation error is fatal and every message is returned.
    pub fn from_raw(raw: &Value) -> Result<LoadedConfig> {
        let validation = validate(raw);
        if !validation.is_ok() {
            return Err(Error::Config(validation.errors));
        }
        let config: Config = serde_json::from_value(validation.canonical.clone())?;
        debug!(
            "Configuration for {} {} validated with {} warnings",
            config.release_short,
            config.release_version,
            validation.warnings.len()
        );
        Ok(LoadedConfig {
            config,
            warnings: validation.warnings,
            canonical: validation.canonical,
        })
    }

    pub fn load(path: &Path) -> Result<LoadedConfig> {
        Self::from_raw(&read_raw(path)?)
    }

    /// Major part of the release version (`40.1` → `40`)
    pub fn release_major_version(&self) -> &str {
        self.release_version
            .split('.')
            .next()
            .unwrap_or(&self.release_version)
    }

    /// Number of createrepo workers
    pub fn createrepo_threads(&self) -> usize {
        self.createrepo_num_threads
            .unwrap_or_else(rayon::current_num_threads)
    }

    /// Rewrite a local path into a URL using `translate_paths`
    pub fn translate_path(&self, path: &str) -> String {
        for (prefix, replacement) in &self.translate_paths {
            let prefix = prefix.trim_end_matches('/');
            if let Some(rest) = path.strip_prefix(prefix) {
                if rest.is_empty() || rest.starts_with('/') {
                    return format!("{}{rest}", replacement.trim_end_matches('/'));
                }
            }
        }
        path.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MINIMAL: &str = r#"
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
"#;

    #[test]
    fn test_minimal_config_loads() {
        let loaded = Config::from_raw(&parse_raw(MINIMAL).unwrap()).unwrap();
        let config = loaded.config;
        assert_eq!(config.release_type, "ga");
        assert_eq!(config.pkgset_source, PkgsetSource::Repos);
        assert_eq!(config.gather_method, GatherMethodSpec::Global(GatherMethod::Deps));
        assert_eq!(config.link_type, LinkType::HardlinkOrCopy);
        assert_eq!(config.koji_topdir, "/mnt/koji");
        assert_eq!(config.media_checksums, vec![ChecksumType::Md5, ChecksumType::Sha256]);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn test_missing_required_is_error() {
        let raw = parse_raw("release_name = \"Fedora\"").unwrap();
        match Config::from_raw(&raw) {
            Err(Error::Config(errors)) => assert!(errors.len() >= 5),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_aliased_product_name() {
        let text = MINIMAL.replace("release_name", "product_name");
        let loaded = Config::from_raw(&parse_raw(&text).unwrap()).unwrap();
        assert_eq!(loaded.config.release_name, "Fedora");
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_per_variant_gather_method() {
        let spec: GatherMethodSpec =
            serde_json::from_value(serde_json::json!({"^Server$": "nodeps"})).unwrap();
        assert_eq!(spec.for_variant("Server").unwrap(), GatherMethod::Nodeps);
        assert_eq!(spec.for_variant("Server-optional").unwrap(), GatherMethod::Deps);
    }

    #[test]
    fn test_translate_path() {
        let mut raw = parse_raw(MINIMAL).unwrap();
        raw["translate_paths"] = serde_json::json!([["/mnt/koji", "https://kojipkgs.example.org"]]);
        let config = Config::from_raw(&raw).unwrap().config;
        assert_eq!(
            config.translate_path("/mnt/koji/compose/x"),
            "https://kojipkgs.example.org/compose/x"
        );
        assert_eq!(config.translate_path("/srv/other"), "/srv/other");
    }

    #[test]
    fn test_major_version() {
        let text = MINIMAL.replace("\"40\"", "\"40.1\"");
        let config = Config::from_raw(&parse_raw(&text).unwrap()).unwrap().config;
        assert_eq!(config.release_major_version(), "40");
    }
}
