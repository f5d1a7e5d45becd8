// src/config/validate.rs

//! Schema-driven validation of a raw configuration value
//!
//! Validation never fails outright: it returns every error and warning it
//! found together with the canonical instance (defaults filled in, aliases
//! renamed, appended options merged, deprecated options removed). Running
//! it again on the canonical instance yields the same instance.

use super::rules::{check_rules, Rule, RULES};
use super::schema::{compose_schema, Additional, Kind, Schema};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Result of validating one configuration
#[derive(Debug, Clone)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub canonical: Value,
    /// Top-level keys that exist only because a default was inserted
    pub defaulted: BTreeSet<String>,
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate against the compose schema and the cross-option rule table
pub fn validate(raw: &Value) -> Validation {
    validate_with(&compose_schema(), RULES, raw)
}

/// Validate against an arbitrary schema and rule table
pub fn validate_with(schema: &Schema, rules: &[Rule], raw: &Value) -> Validation {
    let mut canonical = raw.clone();
    let mut walker = Walker::default();
    walker.check(schema, &mut canonical, "", true);

    let mut errors = walker.errors;
    if canonical.is_object() {
        errors.extend(check_rules(rules, schema, &canonical, &walker.defaulted));
    }

    Validation {
        errors,
        warnings: walker.warnings,
        canonical,
        defaulted: walker.defaulted,
    }
}

#[derive(Default)]
struct Walker {
    errors: Vec<String>,
    warnings: Vec<String>,
    defaulted: BTreeSet<String>,
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn describe(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

impl Walker {
    fn error(&mut self, path: &str, message: impl std::fmt::Display) {
        self.errors
            .push(format!("Failed validation in {}: {message}", describe(path)));
    }

    fn check(&mut self, schema: &Schema, value: &mut Value, path: &str, top: bool) {
        match &schema.kind {
            Kind::Any => {}
            Kind::String => {
                if !value.is_string() {
                    self.error(path, format!("{value} is not of type 'string'"));
                    return;
                }
            }
            Kind::Boolean => {
                if !value.is_boolean() {
                    self.error(path, format!("{value} is not of type 'boolean'"));
                    return;
                }
            }
            Kind::Number => {
                if !value.is_number() {
                    self.error(path, format!("{value} is not of type 'number'"));
                    return;
                }
            }
            Kind::Integer => {
                if !(value.is_i64() || value.is_u64()) {
                    self.error(path, format!("{value} is not of type 'integer'"));
                    return;
                }
            }
            Kind::Regex => match value.as_str() {
                Some(pattern) => {
                    if let Err(e) = regex::Regex::new(pattern) {
                        self.error(path, format!("incorrect regular expression: {e}"));
                        return;
                    }
                }
                None => {
                    self.error(path, format!("{value} is not of type 'regex'"));
                    return;
                }
            },
            Kind::Array(items) => {
                let Some(list) = value.as_array_mut() else {
                    self.error(path, format!("{value} is not of type 'array'"));
                    return;
                };
                for (i, item) in list.iter_mut().enumerate() {
                    self.check(items, item, &join(path, &i.to_string()), false);
                }
            }
            Kind::Tuple(items) => {
                let Some(list) = value.as_array_mut() else {
                    self.error(path, format!("{value} is not of type 'array'"));
                    return;
                };
                if list.len() != items.len() {
                    self.error(
                        path,
                        format!("expected {} items, found {}", items.len(), list.len()),
                    );
                    return;
                }
                for (i, (item, sub)) in list.iter_mut().zip(items).enumerate() {
                    self.check(sub, item, &join(path, &i.to_string()), false);
                }
            }
            Kind::Object {
                properties,
                additional,
                required,
            } => {
                let Some(obj) = value.as_object_mut() else {
                    self.error(path, format!("{value} is not of type 'object'"));
                    return;
                };
                self.check_object(obj, properties, additional, required, path, top);
            }
            Kind::AnyOf(branches) => {
                self.check_any_of(branches, value, path);
                return;
            }
        }

        if let Some(allowed) = &schema.enum_values {
            if !allowed.contains(value) {
                let names: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                self.error(path, format!("{value} is not one of [{}]", names.join(", ")));
            }
        }
    }

    fn check_any_of(&mut self, branches: &[Schema], value: &mut Value, path: &str) {
        for branch in branches {
            let mut candidate = value.clone();
            let mut trial = Walker::default();
            trial.check(branch, &mut candidate, path, false);
            if trial.errors.is_empty() {
                *value = candidate;
                self.warnings.extend(trial.warnings);
                return;
            }
        }
        self.error(path, format!("{value} is not valid under any of the given schemas"));
    }

    fn check_object(
        &mut self,
        obj: &mut Map<String, Value>,
        properties: &[(String, Schema)],
        additional: &Additional,
        required: &[String],
        path: &str,
        top: bool,
    ) {
        for (key, sub) in properties {
            let here = join(path, key);

            if let Some(alias) = &sub.alias {
                if let Some(aliased) = obj.remove(alias) {
                    if obj.contains_key(key) {
                        self.error(
                            &here,
                            format!("Only one of '{alias}' and '{key}' may be set"),
                        );
                        obj.insert(alias.clone(), aliased);
                    } else {
                        self.warnings.push(format!(
                            "WARNING: Config option '{alias}' is deprecated and now an alias to '{key}', please use '{key}' instead."
                        ));
                        obj.insert(key.clone(), aliased);
                    }
                }
            }

            for source in &sub.append {
                let Some(extra) = obj.remove(source) else {
                    continue;
                };
                self.warnings.push(format!(
                    "WARNING: Config option '{source}' is deprecated, its value will be appended to option '{key}'."
                ));
                let extra = match extra {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                let target = obj.entry(key.clone()).or_insert_with(|| Value::Array(Vec::new()));
                if !target.is_array() {
                    let single = target.take();
                    *target = Value::Array(vec![single]);
                }
                if let Value::Array(items) = target {
                    items.extend(extra);
                }
            }

            if !obj.contains_key(key) {
                if let Some(default) = &sub.default {
                    obj.insert(key.clone(), default.clone());
                    if top {
                        self.defaulted.insert(key.clone());
                    }
                }
            }

            if let Some(reason) = &sub.deprecated {
                if obj.remove(key).is_some() {
                    self.warnings.push(format!(
                        "WARNING: Config option '{key}' is deprecated and has no effect: {reason}."
                    ));
                }
                continue;
            }

            if let Some(item) = obj.get_mut(key) {
                self.check(sub, item, &here, false);
            }
        }

        let known: Vec<&str> = properties.iter().map(|(k, _)| k.as_str()).collect();
        let unknown: Vec<String> = obj
            .keys()
            .filter(|k| !known.contains(&k.as_str()))
            .cloned()
            .collect();
        for key in unknown {
            match additional {
                Additional::Allow => {}
                Additional::Forbid => {
                    self.error(path, format!("Unrecognized option '{key}'"))
                }
                Additional::Warn => {
                    let mut message = format!("WARNING: Unrecognized config option: {key}.");
                    if let Some(suggestion) = suggest(&key, &known) {
                        message.push_str(&format!(" Did you mean {suggestion}?"));
                    }
                    self.warnings.push(message);
                }
                Additional::Schema(values) => {
                    let here = join(path, &key);
                    if let Some(item) = obj.get_mut(&key) {
                        self.check(values, item, &here, false);
                    }
                }
            }
        }

        for key in required {
            if !obj.contains_key(key) {
                self.error(path, format!("'{key}' is a required property"));
            }
        }
    }
}

/// Closest known key within ⌊|key|/2⌋ edits; ties go to the earliest key
pub fn suggest<'a>(key: &str, known: &[&'a str]) -> Option<&'a str> {
    let limit = key.chars().count() / 2;
    let mut best: Option<(&'a str, usize)> = None;
    for candidate in known {
        let distance = edit_distance(key, candidate);
        if distance > limit {
            continue;
        }
        match best {
            Some((_, d)) if d <= distance => {}
            _ => best = Some((candidate, distance)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Levenshtein edit distance
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0usize; b_chars.len() + 1];
    for (i, ca) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b_chars.len()]
}
