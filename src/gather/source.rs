// src/gather/source.rs

//! Gather inputs for one (variant, arch)
//!
//! The configured gather source contributes the initial package names and
//! conditional requests; per-variant options add packages, filter others
//! out and shape the [`GatherPolicy`].

use super::{Conditional, GatherPolicy, MultilibClassifier};
use crate::comps::{Comps, Langpack};
use crate::compose::Compose;
use crate::config::{GatherMethod, GatherSource};
use crate::error::{Error, Result};
use crate::variants::Variant;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Patterns, conditionals and langpacks for one gather run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatherInput {
    pub patterns: Vec<String>,
    pub conditionals: Vec<Conditional>,
    pub langpacks: Vec<Langpack>,
}

/// Group ids a variant pulls from comps, including its environments' groups
pub fn variant_groups(comps: &Comps, variant: &Variant) -> Vec<String> {
    let mut groups: Vec<String> = variant.groups.iter().map(|g| g.id.clone()).collect();
    for env in &variant.environments {
        if let Some(env) = comps.environment(env) {
            groups.extend(env.groups.iter().cloned());
        }
    }
    let mut seen = std::collections::HashSet::new();
    groups.retain(|g| seen.insert(g.clone()));
    groups
}

/// Input from the variant's comps groups
pub fn from_comps(comps: &Comps, variant: &Variant) -> Result<GatherInput> {
    let groups = variant_groups(comps, variant);
    Ok(GatherInput {
        patterns: comps.group_packages(&groups)?,
        conditionals: comps
            .conditional_packages(&groups)
            .into_iter()
            .map(|(trigger, installed)| Conditional { trigger, installed })
            .collect(),
        langpacks: comps.langpacks.clone(),
    })
}

/// Package names from a JSON mapping of variant uid → arch → names
pub fn from_json_mapping(mapping: &Value, uid: &str, arch: &str) -> Result<Vec<String>> {
    let Some(entry) = mapping.get(uid).and_then(|v| v.get(arch)) else {
        return Ok(Vec::new());
    };
    let names = entry
        .as_array()
        .ok_or_else(|| Error::Parse(format!("gather mapping for {uid}.{arch} is not a list")))?;
    names
        .iter()
        .map(|n| {
            n.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::Parse(format!("gather mapping for {uid}.{arch} holds a non-string")))
        })
        .collect()
}

pub fn load_json_mapping(path: &Path) -> Result<Value> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

/// Everything the gather source and per-variant options contribute
pub fn gather_input(
    compose: &Compose,
    variant: &Variant,
    arch: &str,
    comps: Option<&Comps>,
    mapping: Option<&Value>,
) -> Result<GatherInput> {
    let conf = &compose.conf;
    let mut input = match conf.gather_source {
        GatherSource::Comps => match comps {
            Some(comps) => from_comps(comps, variant)?,
            None => return Err(Error::NotFound(format!("comps for {}.{arch}", variant.uid))),
        },
        GatherSource::Json => {
            let mapping = mapping.ok_or_else(|| Error::NotFound("gather_source_mapping".to_string()))?;
            GatherInput {
                patterns: from_json_mapping(mapping, &variant.uid, arch)?,
                ..GatherInput::default()
            }
        }
        GatherSource::Module | GatherSource::None => GatherInput::default(),
    };
    if conf.gather_source != GatherSource::Comps {
        if let Some(comps) = comps {
            input.langpacks = comps.langpacks.clone();
        }
    }

    input
        .patterns
        .extend(compose.conf_list(&conf.additional_packages, arch, Some(variant))?);
    input.patterns.extend(
        compose
            .conf_list(&conf.filter_packages, arch, Some(variant))?
            .into_iter()
            .map(|p| format!("-{p}")),
    );
    debug!(
        "Gather input for {}.{}: {} patterns, {} conditionals",
        variant.uid,
        arch,
        input.patterns.len(),
        input.conditionals.len()
    );
    Ok(input)
}

/// Repo ids given to the lookaside repositories of a (variant, arch)
pub fn lookaside_repo_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("lookaside-{i}")).collect()
}

fn arch_list(map: &BTreeMap<String, Vec<String>>, arch: &str) -> Vec<String> {
    map.get("*")
        .into_iter()
        .chain(map.get(arch))
        .flatten()
        .cloned()
        .collect()
}

/// Gather policy for a (variant, arch)
pub fn policy(compose: &Compose, variant: &Variant, arch: &str, langpacks: Vec<Langpack>) -> Result<GatherPolicy> {
    let conf = &compose.conf;
    let methods = compose.conf_list(&conf.multilib, arch, Some(variant))?;
    let multilib = MultilibClassifier::new(
        &methods,
        &arch_list(&conf.multilib_blacklist, arch),
        &arch_list(&conf.multilib_whitelist, arch),
    )?;
    let lookaside = compose.conf_list(&conf.gather_lookaside_repos, arch, Some(variant))?;
    Ok(GatherPolicy {
        resolve_deps: conf.gather_method.for_variant(&variant.uid)? == GatherMethod::Deps,
        selfhosting: conf.gather_selfhosting,
        fulltree: conf.gather_fulltree,
        greedy: conf.greedy_method,
        multilib,
        langpacks,
        lookaside_repos: lookaside_repo_ids(lookaside.len()).into_iter().collect(),
        prepopulate: compose.conf_list(&conf.gather_prepopulate, arch, Some(variant))?,
        fulltree_excludes: conf.fulltree_excludes.iter().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comps::Comps;
    use crate::compose::tests::compose_in;
    use crate::config::GreedyMethod;
    use crate::variants::{VariantFilter, VariantTree};
    use serde_json::json;

    const COMPS: &str = r#"<?xml version="1.0"?>
<comps>
  <group>
    <id>core</id>
    <name>Core</name>
    <packagelist>
      <packagereq type="mandatory">bash</packagereq>
      <packagereq type="default">vim</packagereq>
      <packagereq type="optional">emacs</packagereq>
      <packagereq type="conditional" requires="gtk3">gtk3-immodule</packagereq>
    </packagelist>
  </group>
  <group>
    <id>web</id>
    <name>Web</name>
    <packagelist>
      <packagereq type="mandatory">httpd</packagereq>
    </packagelist>
  </group>
  <environment>
    <id>server</id>
    <name>Server</name>
    <grouplist><groupid>web</groupid></grouplist>
  </environment>
  <langpacks>
    <match name="firefox" install="firefox-langpack-%s"/>
  </langpacks>
</comps>
"#;

    const VARIANTS: &str = r#"<variants>
  <variant id="Server" name="Server" type="variant">
    <arches><arch>x86_64</arch></arches>
    <groups><group>core</group></groups>
    <environments><environment>server</environment></environments>
  </variant>
</variants>
"#;

    fn server() -> Variant {
        let tree = VariantTree::parse(VARIANTS, &VariantFilter::default()).unwrap();
        tree.by_uid("Server").unwrap().clone()
    }

    #[test]
    fn test_comps_input() {
        let comps = Comps::parse(COMPS).unwrap();
        let input = from_comps(&comps, &server()).unwrap();
        assert_eq!(input.patterns, vec!["bash", "vim", "httpd"]);
        assert_eq!(
            input.conditionals,
            vec![Conditional {
                trigger: "gtk3".to_string(),
                installed: "gtk3-immodule".to_string()
            }]
        );
        assert_eq!(input.langpacks.len(), 1);
    }

    #[test]
    fn test_json_mapping() {
        let mapping = json!({"Server": {"x86_64": ["bash", "kernel"]}});
        assert_eq!(from_json_mapping(&mapping, "Server", "x86_64").unwrap(), vec!["bash", "kernel"]);
        assert!(from_json_mapping(&mapping, "Server", "s390x").unwrap().is_empty());
        assert!(from_json_mapping(&json!({"Server": {"x86_64": "bash"}}), "Server", "x86_64").is_err());
    }

    #[test]
    fn test_additional_and_filtered_packages() {
        let dir = tempfile::tempdir().unwrap();
        let compose = compose_in(
            dir.path(),
            r#"
additional_packages = [["^Server$", { "*" = ["tmux"] }]]
filter_packages = [["^Server$", { "x86_64" = ["emacs*"] }]]
greedy_method = "build"
"#,
        );
        let variant = server();
        let input = gather_input(&compose, &variant, "x86_64", None, None).unwrap();
        assert_eq!(input.patterns, vec!["tmux", "-emacs*"]);

        let policy = policy(&compose, &variant, "x86_64", input.langpacks).unwrap();
        assert!(policy.resolve_deps);
        assert_eq!(policy.greedy, GreedyMethod::Build);
        assert!(!policy.multilib.is_enabled());
    }

    #[test]
    fn test_lookaside_ids() {
        assert_eq!(lookaside_repo_ids(2), vec!["lookaside-0", "lookaside-1"]);
    }
}
