// tests/config_validation.rs

//! Configuration validation tests: defaults, aliases, cross-option rules and
//! the canonical form.

mod common;

use common::config_text;
use distro_compose::config::{parse_raw, validate};
use distro_compose::{Config, Error};
use serde_json::json;

fn replaced(from: &str, to: &str) -> String {
    let text = config_text("");
    assert!(text.contains(from), "{from} not in base config");
    text.replace(from, to)
}

#[test]
fn test_minimal_config_is_valid() {
    let result = validate(&parse_raw(&config_text("")).unwrap());
    assert!(result.is_ok(), "{:?}", result.errors);
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    assert_eq!(result.canonical["release_type"], json!("ga"));
    assert!(result.defaulted.contains("release_type"));
    assert!(!result.defaulted.contains("release_name"));
}

#[test]
fn test_canonical_form_is_stable() {
    let text = replaced("release_name = \"Fedora\"", "product_name = \"Fedora\"");
    let text = format!("gather_profiler = true\nunknown_option = 1\n{text}");
    let first = validate(&parse_raw(&text).unwrap());
    assert!(first.is_ok(), "{:?}", first.errors);

    let second = validate(&first.canonical);
    assert!(second.is_ok(), "{:?}", second.errors);
    assert_eq!(first.canonical, second.canonical);

    let third = validate(&second.canonical);
    assert_eq!(second.canonical, third.canonical);
}

#[test]
fn test_alias_and_deprecated_options() {
    let text = replaced("release_name = \"Fedora\"", "product_name = \"Fedora\"");
    let text = format!("gather_profiler = true\n{text}");
    let result = validate(&parse_raw(&text).unwrap());
    assert!(result.is_ok(), "{:?}", result.errors);
    assert_eq!(result.canonical["release_name"], json!("Fedora"));
    assert!(result.canonical.get("product_name").is_none());
    assert!(result.canonical.get("gather_profiler").is_none());
    assert_eq!(result.warnings.len(), 2);
    assert!(result.warnings.iter().any(|w| w.contains("'product_name' is deprecated")));
    assert!(result.warnings.iter().any(|w| w.contains("'gather_profiler' is deprecated")));
}

#[test]
fn test_unknown_option_suggests_a_name() {
    let result = validate(&parse_raw(&config_text("relase_type = \"ga\"")).unwrap());
    assert!(result.is_ok());
    assert_eq!(
        result.warnings,
        vec!["WARNING: Unrecognized config option: relase_type. Did you mean release_type?"]
    );
}

#[test]
fn test_required_by_rule() {
    let text = replaced("gather_source = \"none\"", "gather_source = \"comps\"");
    let result = validate(&parse_raw(&text).unwrap());
    assert_eq!(
        result.errors,
        vec!["Config option gather_source=comps requires comps_file which is not set."]
    );

    let text = replaced("runroot = false", "runroot = true");
    let result = validate(&parse_raw(&text).unwrap());
    assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
    assert!(result.errors.iter().all(|e| e.starts_with("Config option runroot=true requires")));
}

#[test]
fn test_conflict_by_rule() {
    let result = validate(&parse_raw(&config_text("pkgset_koji_tag = \"f40\"")).unwrap());
    assert_eq!(
        result.errors,
        vec!["Config option pkgset_koji_tag conflicts with pkgset_source=repos."]
    );

    let result = validate(&parse_raw(&config_text("comps_file = \"comps.xml\"")).unwrap());
    assert_eq!(
        result.errors,
        vec!["Config option comps_file conflicts with gather_source=none."]
    );
}

#[test]
fn test_type_errors_are_collected() {
    let text = replaced("release_version = \"40\"", "release_version = 40");
    let text = format!("createrepo_checksum = \"crc32\"\n{text}");
    let result = validate(&parse_raw(&text).unwrap());
    assert_eq!(result.errors.len(), 2, "{:?}", result.errors);
    assert!(result.errors.iter().any(|e| e.contains("is not of type 'string'")));
    assert!(result.errors.iter().any(|e| e.contains("is not one of")));
}

#[test]
fn test_from_raw_reports_every_error() {
    let text = replaced("gather_source = \"none\"", "gather_source = \"comps\"");
    let text = format!("pkgset_koji_tag = \"f40\"\n{text}");
    match Config::from_raw(&parse_raw(&text).unwrap()) {
        Err(Error::Config(errors)) => assert_eq!(errors.len(), 2, "{errors:?}"),
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compose.toml");
    std::fs::write(&path, config_text("gather_profiler = false")).unwrap();
    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.config.release_short, "Fedora");
    assert_eq!(loaded.config.release_major_version(), "40");
    assert_eq!(loaded.warnings.len(), 1);
}
