// src/config/schema.rs

//! Schema tree for compose configuration
//!
//! The schema is plain data: every node carries its type plus the
//! annotations the validator acts on (`default`, `alias`, `append`,
//! `deprecated`, `enum`). Properties keep declaration order, which is also
//! the order used when suggesting a known key for a misspelled one.

use serde_json::{json, Value};

/// How an object treats keys that are not declared properties
#[derive(Debug, Clone)]
pub enum Additional {
    /// Unknown keys are validation errors
    Forbid,
    /// Unknown keys are warnings (top level of the configuration)
    Warn,
    /// Unknown keys must match this schema
    Schema(Box<Schema>),
    Allow,
}

/// Type of a schema node
#[derive(Debug, Clone)]
pub enum Kind {
    Any,
    String,
    Boolean,
    Number,
    Integer,
    /// A string that compiles as a regular expression
    Regex,
    Array(Box<Schema>),
    /// Fixed-length positional array
    Tuple(Vec<Schema>),
    Object {
        properties: Vec<(String, Schema)>,
        additional: Additional,
        required: Vec<String>,
    },
    AnyOf(Vec<Schema>),
}

/// One node of the schema tree
#[derive(Debug, Clone)]
pub struct Schema {
    pub kind: Kind,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    /// Deprecated spelling of this property
    pub alias: Option<String>,
    /// Deprecated properties whose values are concatenated into this list
    pub append: Vec<String>,
    /// Reason the property is deprecated; it is dropped during validation
    pub deprecated: Option<String>,
}

impl Schema {
    fn of(kind: Kind) -> Self {
        Self {
            kind,
            default: None,
            enum_values: None,
            alias: None,
            append: Vec::new(),
            deprecated: None,
        }
    }

    pub fn any() -> Self {
        Self::of(Kind::Any)
    }

    pub fn string() -> Self {
        Self::of(Kind::String)
    }

    pub fn boolean() -> Self {
        Self::of(Kind::Boolean)
    }

    pub fn number() -> Self {
        Self::of(Kind::Number)
    }

    pub fn integer() -> Self {
        Self::of(Kind::Integer)
    }

    pub fn regex() -> Self {
        Self::of(Kind::Regex)
    }

    pub fn array(items: Schema) -> Self {
        Self::of(Kind::Array(Box::new(items)))
    }

    pub fn tuple(items: Vec<Schema>) -> Self {
        Self::of(Kind::Tuple(items))
    }

    pub fn any_of(branches: Vec<Schema>) -> Self {
        Self::of(Kind::AnyOf(branches))
    }

    /// Closed object: unknown keys are errors
    pub fn object(properties: Vec<(&str, Schema)>) -> Self {
        Self::of(Kind::Object {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            additional: Additional::Forbid,
            required: Vec::new(),
        })
    }

    /// Mapping with arbitrary keys whose values all match `values`
    pub fn map(values: Schema) -> Self {
        Self::of(Kind::Object {
            properties: Vec::new(),
            additional: Additional::Schema(Box::new(values)),
            required: Vec::new(),
        })
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn enum_of(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| json!(v)).collect());
        self
    }

    pub fn alias(mut self, name: &str) -> Self {
        self.alias = Some(name.to_string());
        self
    }

    pub fn append(mut self, names: &[&str]) -> Self {
        self.append = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn deprecated(mut self, reason: &str) -> Self {
        self.deprecated = Some(reason.to_string());
        self
    }

    pub fn required(mut self, names: &[&str]) -> Self {
        if let Kind::Object { required, .. } = &mut self.kind {
            *required = names.iter().map(|n| n.to_string()).collect();
        }
        self
    }

    pub fn additional(mut self, mode: Additional) -> Self {
        if let Kind::Object { additional, .. } = &mut self.kind {
            *additional = mode;
        }
        self
    }

    /// Look up a declared property
    pub fn property(&self, name: &str) -> Option<&Schema> {
        match &self.kind {
            Kind::Object { properties, .. } => properties
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, s)| s),
            _ => None,
        }
    }

    /// Declared property names in declaration order
    pub fn property_names(&self) -> Vec<&str> {
        match &self.kind {
            Kind::Object { properties, .. } => properties.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

/// `[[variant-uid-regex, {arch-or-"*" = value}], ...]`
pub fn arch_variant(value: Schema) -> Schema {
    Schema::array(Schema::tuple(vec![Schema::regex(), Schema::map(value)])).default(json!([]))
}

/// `[[variant-uid-regex, item-or-list-of-items], ...]`
pub fn variant_items(item: Schema) -> Schema {
    Schema::array(Schema::tuple(vec![
        Schema::regex(),
        Schema::any_of(vec![item.clone(), Schema::array(item)]),
    ]))
    .default(json!([]))
}

pub fn strings() -> Schema {
    Schema::array(Schema::string())
}

pub fn string_or_strings() -> Schema {
    Schema::any_of(vec![Schema::string(), strings()])
}

/// SCM descriptor: a plain path, or a table naming the backend
pub fn scm_dict() -> Schema {
    Schema::any_of(vec![
        Schema::string(),
        Schema::object(vec![
            ("scm", Schema::string().enum_of(&["file", "cvs", "git", "rpm"])),
            ("repo", Schema::string()),
            ("branch", Schema::string()),
            ("file", string_or_strings()),
            ("dir", string_or_strings()),
            ("command", Schema::string()),
            ("target", Schema::string()),
        ])
        .required(&["scm"]),
    ])
}

fn repo_list() -> Schema {
    string_or_strings()
}

fn live_image_item() -> Schema {
    Schema::object(vec![
        ("kickstart", Schema::string()),
        ("ksurl", Schema::string()),
        ("name", Schema::string()),
        ("subvariant", Schema::string()),
        ("version", Schema::string()),
        ("target", Schema::string()),
        ("type", Schema::string().enum_of(&["live", "appliance"]).default(json!("live"))),
        ("specfile", Schema::string()),
        ("scratch", Schema::boolean().default(json!(false))),
        ("sign", Schema::boolean().default(json!(false))),
        ("arches", strings()),
        ("repo", repo_list().append(&["repo_from", "additional_repos"])),
    ])
    .required(&["kickstart"])
}

fn image_build_item() -> Schema {
    Schema::object(vec![(
        "image-build",
        Schema::object(vec![
            ("format", Schema::array(Schema::string())),
            ("kickstart", Schema::string()),
            ("ksurl", Schema::string()),
            ("distro", Schema::string()),
            ("name", Schema::string()),
            ("version", Schema::string()),
            ("release", Schema::string()),
            ("target", Schema::string()),
            ("disk_size", Schema::integer()),
            ("arches", strings()),
            ("subvariant", Schema::string()),
            ("failable", strings()),
            ("install_tree_from", Schema::string()),
            ("repo", repo_list().append(&["repo_from"])),
        ])
        .required(&["format", "kickstart", "distro"]),
    )])
    .required(&["image-build"])
}

fn live_media_item() -> Schema {
    Schema::object(vec![
        ("name", Schema::string()),
        ("kickstart", Schema::string()),
        ("ksurl", Schema::string()),
        ("title", Schema::string()),
        ("version", Schema::string()),
        ("release", Schema::string()),
        ("target", Schema::string()),
        ("arches", strings()),
        ("subvariant", Schema::string()),
        ("install_tree_from", Schema::string()),
        ("scratch", Schema::boolean().default(json!(false))),
        ("repo", repo_list().append(&["repo_from"])),
    ])
    .required(&["name", "kickstart"])
}

fn osbs_item() -> Schema {
    Schema::object(vec![
        ("url", Schema::string()),
        ("target", Schema::string()),
        ("git_branch", Schema::string()),
        ("name", Schema::string()),
        ("version", Schema::string()),
        ("scratch", Schema::boolean().default(json!(false))),
        ("repo", repo_list()),
    ])
    .required(&["url", "target", "git_branch"])
}

fn ostree_item() -> Schema {
    Schema::object(vec![
        ("treefile", Schema::string()),
        ("config_url", Schema::string()),
        ("config_branch", Schema::string()),
        ("ostree_repo", Schema::string()),
        ("repo", repo_list()),
        ("version", Schema::string()),
        ("arches", strings()),
        ("force_new_commit", Schema::boolean().default(json!(false))),
        ("update_summary", Schema::boolean().default(json!(false))),
        ("failable", strings()),
    ])
    .required(&["treefile", "config_url", "ostree_repo"])
}

fn ostree_installer_item() -> Schema {
    Schema::object(vec![
        ("repo", repo_list()),
        ("release", Schema::string()),
        ("installpkgs", strings()),
        ("add_template", strings()),
        ("add_template_var", strings()),
        ("add_arch_template", strings()),
        ("add_arch_template_var", strings()),
        ("rootfs_size", Schema::integer()),
        ("template_repo", Schema::string()),
        ("template_branch", Schema::string()),
        ("arches", strings()),
        ("failable", strings()),
    ])
}

fn extra_iso_item() -> Schema {
    Schema::object(vec![
        ("include_variants", strings()),
        ("filename", Schema::string()),
        ("volid", string_or_strings()),
        ("extra_files", Schema::array(scm_dict())),
        ("arches", strings()),
        ("failable_arches", strings()),
        ("skip_src", Schema::boolean().default(json!(false))),
    ])
    .required(&["include_variants"])
}

fn lorax_item() -> Schema {
    Schema::object(vec![
        ("bugurl", Schema::string()),
        ("nomacboot", Schema::boolean().default(json!(true))),
        ("noupgrade", Schema::boolean().default(json!(true))),
        ("add_template", strings()),
        ("add_arch_template", strings()),
        ("add_template_var", strings()),
        ("add_arch_template_var", strings()),
        ("rootfs_size", Schema::integer()),
        ("version", Schema::string()),
    ])
}

/// The full compose configuration schema
pub fn compose_schema() -> Schema {
    Schema::object(vec![
        // Release identity
        ("release_name", Schema::string().alias("product_name")),
        ("release_short", Schema::string().alias("product_short")),
        ("release_version", Schema::string().alias("product_version")),
        (
            "release_type",
            Schema::string()
                .enum_of(&["fast", "ga", "updates", "updates-testing", "eus", "aus", "els", "tus", "e4s"])
                .default(json!("ga")),
        ),
        (
            "release_is_layered",
            Schema::boolean().default(json!(false)).alias("product_is_layered"),
        ),
        ("release_discinfo_description", Schema::string()),
        ("base_product_name", Schema::string()),
        ("base_product_short", Schema::string()),
        ("base_product_version", Schema::string()),
        (
            "base_product_type",
            Schema::string()
                .enum_of(&["fast", "ga", "updates", "updates-testing", "eus", "aus", "els", "tus", "e4s"])
                .default(json!("ga")),
        ),
        // Inputs
        ("variants_file", scm_dict()),
        ("comps_file", scm_dict()),
        ("sigkeys", strings()),
        ("tree_arches", strings().default(json!([]))),
        ("tree_variants", strings().default(json!([]))),
        ("failable_deliverables", arch_variant(strings())),
        ("translate_paths", Schema::array(Schema::tuple(vec![Schema::string(), Schema::string()])).default(json!([]))),
        (
            "link_type",
            Schema::string()
                .enum_of(&["hardlink", "copy", "symlink", "abspath-symlink", "hardlink-or-copy"])
                .default(json!("hardlink-or-copy")),
        ),
        ("hashed_directories", Schema::boolean().default(json!(false))),
        // Runroot
        ("runroot", Schema::boolean()),
        ("runroot_tag", Schema::string()),
        ("runroot_channel", Schema::string()),
        ("runroot_method", Schema::string().enum_of(&["koji"])),
        ("koji_profile", Schema::string()),
        // Package set
        ("pkgset_source", Schema::string().enum_of(&["koji", "repos"])),
        ("pkgset_repos", Schema::map(string_or_strings())),
        ("pkgset_koji_tag", string_or_strings()),
        ("pkgset_koji_inherit", Schema::boolean().default(json!(true))),
        ("koji_topdir", Schema::string().default(json!("/mnt/koji"))),
        // Gather
        (
            "gather_method",
            Schema::any_of(vec![
                Schema::string().enum_of(&["deps", "nodeps"]),
                Schema::map(Schema::string().enum_of(&["deps", "nodeps"])),
            ]),
        ),
        ("gather_source", Schema::string().enum_of(&["module", "json", "comps", "none"])),
        ("gather_source_mapping", Schema::string()),
        ("gather_fulltree", Schema::boolean().default(json!(false))),
        ("gather_selfhosting", Schema::boolean().default(json!(false))),
        (
            "greedy_method",
            Schema::string().enum_of(&["none", "all", "build"]).default(json!("none")),
        ),
        (
            "gather_backend",
            Schema::string().enum_of(&["dnf", "yum"]).default(json!("dnf")),
        ),
        ("gather_lookaside_repos", arch_variant(strings())),
        ("gather_prepopulate", arch_variant(strings())),
        (
            "gather_profiler",
            Schema::boolean().deprecated("profiling of the gather phase is not supported"),
        ),
        (
            "multilib",
            arch_variant(Schema::array(
                Schema::string().enum_of(&["none", "all", "devel", "runtime"]),
            )),
        ),
        ("multilib_blacklist", Schema::map(strings()).default(json!({}))),
        ("multilib_whitelist", Schema::map(strings()).default(json!({}))),
        ("additional_packages", arch_variant(strings())),
        ("filter_packages", arch_variant(strings())),
        ("fulltree_excludes", strings().default(json!([]))),
        ("check_deps", Schema::boolean().default(json!(true))),
        // Createrepo
        ("createrepo_c", Schema::boolean().default(json!(true))),
        (
            "createrepo_checksum",
            Schema::string().enum_of(&["sha256", "sha512", "sha"]).default(json!("sha256")),
        ),
        ("createrepo_num_threads", Schema::integer()),
        ("createrepo_database", Schema::boolean().default(json!(false))),
        ("createrepo_deltas", Schema::boolean().default(json!(false))),
        // Buildinstall and installer trees
        ("bootable", Schema::boolean().default(json!(false))),
        ("buildinstall_method", Schema::string().enum_of(&["lorax"])),
        ("buildinstall_skip", arch_variant(Schema::boolean())),
        ("lorax_options", variant_items(lorax_item())),
        ("productimg", Schema::boolean().default(json!(false))),
        ("productimg_install_class", scm_dict()),
        (
            "iso_hfs_ppc64le_compatible",
            Schema::boolean().deprecated("the option no longer has any effect"),
        ),
        // Extra files
        ("extra_files", arch_variant(Schema::array(scm_dict()))),
        // ISOs
        ("createiso_skip", arch_variant(Schema::boolean())),
        ("createiso_use_xorrisofs", Schema::boolean().default(json!(false))),
        ("extra_isos", variant_items(extra_iso_item())),
        (
            "image_name_format",
            Schema::string().default(json!(
                "{release_short}-{variant}-{version}-{arch}-{disc_type}{disc_num}{suffix}"
            )),
        ),
        (
            "image_volid_formats",
            strings().default(json!([
                "{release_short}-{version} {variant}.{arch}",
                "{release_short}-{version} {arch}"
            ])),
        ),
        (
            "image_volid_layered_product_formats",
            strings().default(json!([
                "{release_short}-{version} {base_product_short}-{base_product_version} {variant}.{arch}",
                "{release_short}-{version} {base_product_short}-{base_product_version} {arch}"
            ])),
        ),
        // Koji-built images
        ("live_images", variant_items(live_image_item())),
        ("image_build", variant_items(image_build_item())),
        ("live_media", variant_items(live_media_item())),
        ("osbs", variant_items(osbs_item())),
        // OSTree
        ("ostree", variant_items(ostree_item())),
        ("ostree_installer", variant_items(ostree_installer_item())),
        // Checksums and tests
        (
            "media_checksums",
            Schema::array(Schema::string().enum_of(&["md5", "sha256", "sha512"]))
                .default(json!(["md5", "sha256"])),
        ),
        ("media_checksum_one_file", Schema::boolean().default(json!(false))),
        ("media_checksum_base_filename", Schema::string().default(json!(""))),
        (
            "repoclosure_strictness",
            arch_variant(Schema::string().enum_of(&["off", "lenient", "fatal"])),
        ),
    ])
    .required(&[
        "release_name",
        "release_short",
        "release_version",
        "variants_file",
        "sigkeys",
        "runroot",
        "pkgset_source",
        "gather_source",
        "gather_method",
    ])
    .additional(Additional::Warn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_declares_required_keys() {
        let schema = compose_schema();
        for key in ["release_name", "sigkeys", "gather_method", "pkgset_source"] {
            assert!(schema.property(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_property_names_keep_declaration_order() {
        let schema = compose_schema();
        let names = schema.property_names();
        assert_eq!(names[0], "release_name");
        assert_eq!(names[1], "release_short");
    }

    #[test]
    fn test_arch_variant_defaults_to_empty_list() {
        let node = arch_variant(strings());
        assert_eq!(node.default, Some(json!([])));
    }
}
