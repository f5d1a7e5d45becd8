// src/compose/overrides.rs

//! Per-(variant, arch) option resolution
//!
//! Arch-variant options are ordered `(variant-uid-regex, {arch -> value})`
//! pairs. Every pair whose regex fully matches the variant uid contributes,
//! in declaration order, its value for the exact arch or else its `*` value.

use crate::config::{ArchVariant, VariantItems};
use crate::error::Result;
use regex::Regex;

fn full_match(pattern: &str, uid: &str) -> Result<bool> {
    Ok(Regex::new(&format!("^(?:{pattern})$"))?.is_match(uid))
}

/// Values of every matching pair, in declaration order
pub fn resolve<'a, T>(option: &'a ArchVariant<T>, arch: &str, uid: &str) -> Result<Vec<&'a T>> {
    let mut found = Vec::new();
    for (pattern, by_arch) in option {
        if !full_match(pattern, uid)? {
            continue;
        }
        if let Some(value) = by_arch.get(arch).or_else(|| by_arch.get("*")) {
            found.push(value);
        }
    }
    Ok(found)
}

/// Flattened list for list-valued options
pub fn resolve_list<T: Clone>(option: &ArchVariant<Vec<T>>, arch: &str, uid: &str) -> Result<Vec<T>> {
    Ok(resolve(option, arch, uid)?
        .into_iter()
        .flat_map(|values| values.iter().cloned())
        .collect())
}

/// Last match for scalar-valued options
pub fn resolve_scalar<T: Clone>(option: &ArchVariant<T>, arch: &str, uid: &str) -> Result<Option<T>> {
    Ok(resolve(option, arch, uid)?.into_iter().last().cloned())
}

/// Items from `(variant-uid-regex, item-or-items)` settings matching a variant
pub fn variant_items<'a, T>(option: &'a VariantItems<T>, uid: &str) -> Result<Vec<&'a T>> {
    let mut found = Vec::new();
    for (pattern, items) in option {
        if full_match(pattern, uid)? {
            found.extend(items.iter());
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OneOrMany;
    use std::collections::BTreeMap;

    fn option() -> ArchVariant<Vec<String>> {
        let entry = |pairs: &[(&str, &[&str])]| -> BTreeMap<String, Vec<String>> {
            pairs
                .iter()
                .map(|(arch, v)| (arch.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect()
        };
        vec![
            ("^.*$".to_string(), entry(&[("*", &["all"])])),
            ("^Server$".to_string(), entry(&[("x86_64", &["server-x86"]), ("*", &["server-any"])])),
            ("^Client$".to_string(), entry(&[("*", &["client"])])),
        ]
    }

    #[test]
    fn test_exact_arch_preferred_over_star() {
        let values = resolve_list(&option(), "x86_64", "Server").unwrap();
        assert_eq!(values, vec!["all", "server-x86"]);
    }

    #[test]
    fn test_star_fallback() {
        let values = resolve_list(&option(), "ppc64le", "Server").unwrap();
        assert_eq!(values, vec!["all", "server-any"]);
    }

    #[test]
    fn test_star_arch_collects_star_arms() {
        let values = resolve_list(&option(), "*", "Client").unwrap();
        assert_eq!(values, vec!["all", "client"]);
    }

    #[test]
    fn test_regex_must_match_fully() {
        let values = resolve_list(&option(), "x86_64", "Server-optional").unwrap();
        assert_eq!(values, vec!["all"]);
    }

    #[test]
    fn test_scalar_takes_last() {
        let mut by_arch = BTreeMap::new();
        by_arch.insert("*".to_string(), true);
        let mut other = BTreeMap::new();
        other.insert("*".to_string(), false);
        let option = vec![("^.*$".to_string(), by_arch), ("^Server$".to_string(), other)];
        assert_eq!(resolve_scalar(&option, "x86_64", "Server").unwrap(), Some(false));
        assert_eq!(resolve_scalar(&option, "x86_64", "Client").unwrap(), Some(true));
    }

    #[test]
    fn test_variant_items_flatten() {
        let option: VariantItems<u32> = vec![
            ("^Server$".to_string(), OneOrMany::One(1)),
            (".*".to_string(), OneOrMany::Many(vec![2, 3])),
        ];
        let items: Vec<u32> = variant_items(&option, "Server").unwrap().into_iter().copied().collect();
        assert_eq!(items, vec![1, 2, 3]);
    }
}
