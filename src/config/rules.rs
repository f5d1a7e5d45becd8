// src/config/rules.rs

//! Cross-option dependency and conflict rules
//!
//! Each rule names a trigger option and lists, per predicate on the
//! trigger's value, the options that must be set and the options that must
//! not be set. A dependency that exists only because a default filled it in
//! counts as unset; a conflicting option set to its default is tolerated.

use super::schema::Schema;
use serde_json::Value;
use std::collections::BTreeSet;

/// Predicate over a trigger option's value
#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    Equals(&'static str),
    NotEquals(&'static str),
    Truthy,
    Falsy,
}

impl Predicate {
    pub fn holds(&self, value: &Value) -> bool {
        match self {
            Self::Equals(expected) => value.as_str() == Some(*expected),
            Self::NotEquals(expected) => value.as_str() != Some(*expected),
            Self::Truthy => truthy(value),
            Self::Falsy => !truthy(value),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// One row of the rule table
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub trigger: &'static str,
    pub requires: &'static [(Predicate, &'static [&'static str])],
    pub conflicts: &'static [(Predicate, &'static [&'static str])],
}

/// Rule table for the compose configuration
pub const RULES: &[Rule] = &[
    Rule {
        trigger: "gather_source",
        requires: &[
            (Predicate::Equals("comps"), &["comps_file"]),
            (Predicate::Equals("json"), &["gather_source_mapping"]),
        ],
        conflicts: &[(Predicate::NotEquals("comps"), &["comps_file"])],
    },
    Rule {
        trigger: "bootable",
        requires: &[(Predicate::Truthy, &["buildinstall_method"])],
        conflicts: &[(Predicate::Falsy, &["buildinstall_method"])],
    },
    Rule {
        trigger: "release_is_layered",
        requires: &[(
            Predicate::Truthy,
            &["base_product_name", "base_product_short", "base_product_version"],
        )],
        conflicts: &[(
            Predicate::Falsy,
            &["base_product_name", "base_product_short", "base_product_version"],
        )],
    },
    Rule {
        trigger: "runroot",
        requires: &[(
            Predicate::Truthy,
            &["koji_profile", "runroot_tag", "runroot_channel"],
        )],
        conflicts: &[(
            Predicate::Falsy,
            &["runroot_tag", "runroot_channel", "runroot_method"],
        )],
    },
    Rule {
        trigger: "pkgset_source",
        requires: &[
            (Predicate::Equals("koji"), &["pkgset_koji_tag", "koji_profile"]),
            (Predicate::Equals("repos"), &["pkgset_repos"]),
        ],
        conflicts: &[
            (Predicate::Equals("koji"), &["pkgset_repos"]),
            (
                Predicate::Equals("repos"),
                &["pkgset_koji_tag", "pkgset_koji_inherit"],
            ),
        ],
    },
    Rule {
        trigger: "productimg",
        requires: &[(Predicate::Truthy, &["productimg_install_class"])],
        conflicts: &[],
    },
];

/// Evaluate every rule against a canonical instance
pub fn check_rules(
    rules: &[Rule],
    schema: &Schema,
    instance: &Value,
    defaulted: &BTreeSet<String>,
) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(obj) = instance.as_object() else {
        return errors;
    };

    for rule in rules {
        let Some(value) = obj.get(rule.trigger) else {
            continue;
        };
        let shown = display(value);

        for (predicate, deps) in rule.requires {
            if !predicate.holds(value) {
                continue;
            }
            for dep in deps.iter() {
                if !obj.contains_key(*dep) || defaulted.contains(*dep) {
                    errors.push(format!(
                        "Config option {}={shown} requires {dep} which is not set.",
                        rule.trigger
                    ));
                }
            }
        }

        for (predicate, deps) in rule.conflicts {
            if !predicate.holds(value) {
                continue;
            }
            for dep in deps.iter() {
                let Some(set) = obj.get(*dep) else {
                    continue;
                };
                let default = schema.property(dep).and_then(|p| p.default.as_ref());
                if default != Some(set) {
                    errors.push(format!(
                        "Config option {dep} conflicts with {}={shown}.",
                        rule.trigger
                    ));
                }
            }
        }
    }

    errors
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::compose_schema;
    use serde_json::json;

    #[test]
    fn test_predicates() {
        assert!(Predicate::Truthy.holds(&json!(true)));
        assert!(Predicate::Falsy.holds(&json!(false)));
        assert!(Predicate::Falsy.holds(&json!("")));
        assert!(Predicate::Equals("comps").holds(&json!("comps")));
        assert!(Predicate::NotEquals("comps").holds(&json!("json")));
    }

    #[test]
    fn test_requires_ignores_defaulted_keys() {
        let schema = compose_schema();
        let instance = json!({"pkgset_source": "koji", "pkgset_koji_tag": "f40", "koji_profile": "koji"});
        assert!(check_rules(RULES, &schema, &instance, &BTreeSet::new()).is_empty());

        let defaulted: BTreeSet<String> = ["koji_profile".to_string()].into();
        let errors = check_rules(RULES, &schema, &instance, &defaulted);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("requires koji_profile"));
    }

    #[test]
    fn test_conflict_tolerates_default_value() {
        let schema = compose_schema();
        let instance = json!({"pkgset_source": "repos", "pkgset_repos": {}, "pkgset_koji_inherit": true});
        assert!(check_rules(RULES, &schema, &instance, &BTreeSet::new()).is_empty());

        let instance = json!({"pkgset_source": "repos", "pkgset_repos": {}, "pkgset_koji_inherit": false});
        let errors = check_rules(RULES, &schema, &instance, &BTreeSet::new());
        assert_eq!(errors, vec!["Config option pkgset_koji_inherit conflicts with pkgset_source=repos.".to_string()]);
    }

    #[test]
    fn test_bootable_requires_method() {
        let schema = compose_schema();
        let errors = check_rules(RULES, &schema, &json!({"bootable": true}), &BTreeSet::new());
        assert_eq!(errors.len(), 1);
        let errors = check_rules(
            RULES,
            &schema,
            &json!({"bootable": false, "buildinstall_method": "lorax"}),
            &BTreeSet::new(),
        );
        assert_eq!(errors.len(), 1);
    }
}
