// tests/gather.rs

//! Gather tests: dependency closure, provider choice, fulltree, multilib and
//! the properties every gather result keeps.

mod common;

use common::{patterns, pkg, pool, universe};
use distro_compose::config::{GreedyMethod, MultilibMethod};
use distro_compose::gather::{gather, Flag, GatherPolicy, GatherResult, MultilibClassifier};
use std::collections::{BTreeSet, HashSet};

fn runtime_policy() -> GatherPolicy {
    GatherPolicy {
        multilib: MultilibClassifier::new(&[MultilibMethod::Runtime], &[], &[]).unwrap(),
        ..GatherPolicy::default()
    }
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn test_empty_gather() {
    let u = universe(Vec::new());
    let result = gather(&u, &[], &[], &GatherPolicy::default()).unwrap();
    assert!(result.is_empty());
    assert!(result.flags().is_empty());
}

#[test]
fn test_single_package() {
    let u = universe(vec![pkg("A-1-1.x86_64", "A-1-1.src.rpm", &[], &[])]);
    let result = gather(&u, &patterns(&["A"]), &[], &GatherPolicy::default()).unwrap();
    assert_eq!(result.binary_nvras(), vec!["A-1-1.x86_64"]);
    assert!(result.source.is_empty());
    assert!(result.debug.is_empty());
    assert_eq!(result.flags()["A-1-1.x86_64"], BTreeSet::from([Flag::Input]));
}

#[test]
fn test_shortest_provider_wins() {
    let u = universe(vec![
        pkg("A-1-1.x86_64", "A-1-1.src.rpm", &[], &["foo"]),
        pkg("Bee-1-1.x86_64", "Bee-1-1.src.rpm", &["foo"], &[]),
        pkg("B-1-1.x86_64", "B-1-1.src.rpm", &["foo"], &[]),
        pkg("C-1-1.x86_64", "C-1-1.src.rpm", &["foo"], &[]),
        pkg("C-1-1.i686", "C-1-1.src.rpm", &["foo"], &[]),
    ]);
    let result = gather(&u, &patterns(&["A"]), &[], &GatherPolicy::default()).unwrap();
    assert_eq!(sorted(result.binary_nvras()), vec!["A-1-1.x86_64", "B-1-1.x86_64"]);
    assert!(result.flags()["B-1-1.x86_64"].is_empty());
}

#[test]
fn test_multilib_provider_only_without_native() {
    let u = universe(vec![
        pkg("A-1-1.x86_64", "A-1-1.src.rpm", &[], &["foo"]),
        pkg("C-1-1.i686", "C-1-1.src.rpm", &["foo"], &[]),
    ]);
    let result = gather(&u, &patterns(&["A"]), &[], &GatherPolicy::default()).unwrap();
    assert_eq!(sorted(result.binary_nvras()), vec!["A-1-1.x86_64", "C-1-1.i686"]);
}

#[test]
fn test_fulltree_pulls_siblings() {
    let u = universe(vec![
        pkg("A-1-1.x86_64", "a-1-1.src.rpm", &[], &[]),
        pkg("A-doc-1-1.x86_64", "a-1-1.src.rpm", &[], &[]),
        pkg("A-devel-1-1.x86_64", "a-1-1.src.rpm", &[], &[]),
        pkg("unrelated-1-1.x86_64", "u-1-1.src.rpm", &[], &[]),
    ]);
    let policy = GatherPolicy {
        fulltree: true,
        ..GatherPolicy::default()
    };
    let result = gather(&u, &patterns(&["A"]), &[], &policy).unwrap();
    assert_eq!(
        sorted(result.binary_nvras()),
        vec!["A-1-1.x86_64", "A-devel-1-1.x86_64", "A-doc-1-1.x86_64"]
    );
    let flags = result.flags();
    assert_eq!(flags["A-1-1.x86_64"], BTreeSet::from([Flag::Input]));
    assert_eq!(flags["A-doc-1-1.x86_64"], BTreeSet::from([Flag::Fulltree]));
    assert_eq!(flags["A-devel-1-1.x86_64"], BTreeSet::from([Flag::Fulltree]));
}

#[test]
fn test_fulltree_keeps_native_siblings_beside_multilib_copy() {
    let records = vec![
        pkg("A-1-1.x86_64", "a-1-1.src.rpm", &["libA.so.1"], &[]),
        pkg("A-1-1.i686", "a-1-1.src.rpm", &["libA.so.1"], &[]),
        pkg("A-doc-1-1.x86_64", "a-1-1.src.rpm", &[], &[]),
        pkg("A-doc-1-1.i686", "a-1-1.src.rpm", &[], &[]),
    ];
    let u = universe(records);
    let policy = GatherPolicy {
        fulltree: true,
        ..runtime_policy()
    };
    let result = gather(&u, &patterns(&["A"]), &[], &policy).unwrap();
    assert_eq!(
        sorted(result.binary_nvras()),
        vec!["A-1-1.i686", "A-1-1.x86_64", "A-doc-1-1.x86_64"]
    );
    let flags = result.flags();
    assert_eq!(flags["A-1-1.i686"], BTreeSet::from([Flag::Multilib]));
    assert_eq!(flags["A-doc-1-1.x86_64"], BTreeSet::from([Flag::Fulltree]));
    check_invariants(&result);

    // With only the multilib build chosen, its multilib siblings follow
    let result = gather(&u, &patterns(&["A.+"]), &[], &policy).unwrap();
    assert_eq!(sorted(result.binary_nvras()), vec!["A-1-1.i686", "A-doc-1-1.i686"]);
    assert_eq!(result.flags()["A-doc-1-1.i686"], BTreeSet::from([Flag::Fulltree]));
}

#[test]
fn test_fulltree_excludes_skip_source_package() {
    let u = universe(vec![
        pkg("A-1-1.x86_64", "a-1-1.src.rpm", &[], &[]),
        pkg("A-doc-1-1.noarch", "a-1-1.src.rpm", &[], &[]),
        pkg("B-1-1.x86_64", "b-1-1.src.rpm", &[], &[]),
        pkg("B-doc-1-1.noarch", "b-1-1.src.rpm", &[], &[]),
    ]);
    let policy = GatherPolicy {
        fulltree: true,
        fulltree_excludes: BTreeSet::from(["a".to_string()]),
        ..GatherPolicy::default()
    };
    let result = gather(&u, &patterns(&["A", "B"]), &[], &policy).unwrap();
    assert_eq!(
        sorted(result.binary_nvras()),
        vec!["A-1-1.x86_64", "B-1-1.x86_64", "B-doc-1-1.noarch"]
    );
    assert_eq!(result.flags()["B-doc-1-1.noarch"], BTreeSet::from([Flag::Fulltree]));
}

#[test]
fn test_greedy_build_pulls_same_build_providers() {
    let u = universe(vec![
        pkg("A-1-1.x86_64", "a-1-1.src.rpm", &[], &["foo"]),
        pkg("foo-libs-1-1.x86_64", "foo-1-1.src.rpm", &["foo"], &[]),
        pkg("foo-compat-1-1.x86_64", "foo-1-1.src.rpm", &["foo"], &[]),
        pkg("foo-debuginfo-1-1.x86_64", "foo-1-1.src.rpm", &["foo"], &[]),
        pkg("zzz-foo-provider-1-1.x86_64", "zzz-1-1.src.rpm", &["foo"], &[]),
    ]);
    let greedy = GatherPolicy {
        greedy: GreedyMethod::Build,
        ..GatherPolicy::default()
    };
    let result = gather(&u, &patterns(&["A"]), &[], &greedy).unwrap();
    assert_eq!(
        sorted(result.binary_nvras()),
        vec!["A-1-1.x86_64", "foo-compat-1-1.x86_64", "foo-libs-1-1.x86_64"]
    );
    let flags = result.flags();
    assert!(flags["foo-libs-1-1.x86_64"].is_empty());
    assert_eq!(flags["foo-compat-1-1.x86_64"], BTreeSet::from([Flag::GreedyBuild]));
    assert_eq!(result.debug_nvras(), vec!["foo-debuginfo-1-1.x86_64"]);
    check_invariants(&result);

    let plain = gather(&u, &patterns(&["A"]), &[], &GatherPolicy::default()).unwrap();
    assert_eq!(
        sorted(plain.binary_nvras()),
        vec!["A-1-1.x86_64", "foo-libs-1-1.x86_64"]
    );
}

#[test]
fn test_glob_input_sends_debuginfo_to_debug_only() {
    let u = universe(vec![
        pkg("foo-1-1.x86_64", "foo-1-1.src.rpm", &[], &[]),
        pkg("foo-debuginfo-1-1.x86_64", "foo-1-1.src.rpm", &[], &[]),
        pkg("foo-debugsource-1-1.x86_64", "foo-1-1.src.rpm", &[], &[]),
        pkg("foo-1-1.src", "", &[], &[]),
    ]);
    let result = gather(&u, &patterns(&["foo*"]), &[], &GatherPolicy::default()).unwrap();
    assert_eq!(result.binary_nvras(), vec!["foo-1-1.x86_64"]);
    assert_eq!(
        sorted(result.debug_nvras()),
        vec!["foo-debuginfo-1-1.x86_64", "foo-debugsource-1-1.x86_64"]
    );
    assert_eq!(result.source_nvras(), vec!["foo-1-1.src"]);
    check_invariants(&result);

    let policy = GatherPolicy {
        prepopulate: vec!["foo-debuginfo.x86_64".to_string()],
        ..GatherPolicy::default()
    };
    let result = gather(&u, &patterns(&["foo"]), &[], &policy).unwrap();
    assert_eq!(result.binary_nvras(), vec!["foo-1-1.x86_64"]);
    check_invariants(&result);
}

#[test]
fn test_multilib_runtime_copy() {
    let u = universe(vec![
        pkg("libfoo-1-1.x86_64", "libfoo-1-1.src.rpm", &["libfoo.so.1"], &[]),
        pkg("libfoo-1-1.i686", "libfoo-1-1.src.rpm", &["libfoo.so.1"], &[]),
        pkg("unrelated-1-1.x86_64", "unrelated-1-1.src.rpm", &[], &[]),
    ]);
    let result = gather(&u, &patterns(&["libfoo"]), &[], &runtime_policy()).unwrap();
    assert_eq!(sorted(result.binary_nvras()), vec!["libfoo-1-1.i686", "libfoo-1-1.x86_64"]);
    let flags = result.flags();
    assert_eq!(flags["libfoo-1-1.i686"], BTreeSet::from([Flag::Multilib]));
    assert_eq!(flags["libfoo-1-1.x86_64"], BTreeSet::from([Flag::Input]));
}

#[test]
fn test_multilib_disabled_keeps_native_only() {
    let u = universe(vec![
        pkg("libfoo-1-1.x86_64", "libfoo-1-1.src.rpm", &["libfoo.so.1"], &[]),
        pkg("libfoo-1-1.i686", "libfoo-1-1.src.rpm", &["libfoo.so.1"], &[]),
    ]);
    let result = gather(&u, &patterns(&["libfoo"]), &[], &GatherPolicy::default()).unwrap();
    assert_eq!(result.binary_nvras(), vec!["libfoo-1-1.x86_64"]);
}

#[test]
fn test_excluded_pattern_never_gathered() {
    let u = universe(pool());
    let result = gather(&u, &patterns(&["vim", "-ncurses-libs"]), &[], &GatherPolicy::default()).unwrap();
    assert_eq!(result.binary_nvras(), vec!["vim-9.1-1.x86_64"]);
}

fn check_invariants(result: &GatherResult) {
    let binary_srpms: HashSet<String> = result
        .binary
        .iter()
        .filter_map(|p| p.package.sourcerpm.clone())
        .collect();

    for debug in &result.debug {
        let srpm = debug.package.sourcerpm.clone().unwrap();
        assert!(binary_srpms.contains(&srpm), "{} has no binary", debug.package.nvra());
    }
    for source in &result.source {
        let file = format!("{}.rpm", source.package.nvra());
        assert!(binary_srpms.contains(&file), "{file} built nothing gathered");
    }

    let binary: HashSet<String> = result.binary_nvras().into_iter().collect();
    for other in result.source_nvras().iter().chain(&result.debug_nvras()) {
        assert!(!binary.contains(other), "{other} is both binary and source/debug");
    }

    for lookaside in result.binary.iter().filter(|p| p.is_lookaside()) {
        let srpm = lookaside.package.sourcerpm.clone().unwrap();
        for attached in result.source.iter().chain(&result.debug) {
            let same_build = attached.package.sourcerpm.as_deref() == Some(srpm.as_str())
                || format!("{}.rpm", attached.package.nvra()) == srpm;
            if same_build {
                assert!(attached.is_lookaside(), "{} lost the lookaside flag", attached.package.nvra());
            }
        }
    }
}

#[test]
fn test_result_invariants() {
    let mut records = pool();
    for record in records.iter_mut().filter(|r| r.name.starts_with("glibc")) {
        record.repo_id = "lookaside-0".to_string();
    }
    let u = universe(records);
    let policy = GatherPolicy {
        lookaside_repos: BTreeSet::from(["lookaside-0".to_string()]),
        ..runtime_policy()
    };
    let input = patterns(&["bash", "vim"]);

    let result = gather(&u, &input, &[], &policy).unwrap();
    assert!(result.binary_nvras().contains(&"glibc-2.39-1.x86_64".to_string()));
    assert!(result.binary_nvras().contains(&"ncurses-libs-6.4-1.x86_64".to_string()));
    assert!(result.source_nvras().contains(&"bash-5.2-1.src".to_string()));
    assert!(result.debug_nvras().contains(&"bash-debuginfo-5.2-1.x86_64".to_string()));
    assert!(result.flags()["glibc-2.39-1.x86_64"].contains(&Flag::Lookaside));
    check_invariants(&result);

    let again = gather(&u, &input, &[], &policy).unwrap();
    assert_eq!(result, again);
}

#[test]
fn test_selfhosting_invariants() {
    let u = universe(pool());
    let policy = GatherPolicy {
        selfhosting: true,
        ..GatherPolicy::default()
    };
    let result = gather(&u, &patterns(&["bash"]), &[], &policy).unwrap();
    assert!(result.binary_nvras().contains(&"ncurses-devel-6.4-1.x86_64".to_string()));
    check_invariants(&result);
}
