// src/schema/compare.rs
// Structural schema comparison with breaking-change classification

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Closed set of change kinds a schema comparison can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaChangeKind {
    PropertyAdded,
    PropertyRemoved,
    TypeChanged,
    ConstraintChanged,
    RequiredChanged,
    EnumChanged,
}

impl fmt::Display for SchemaChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaChangeKind::PropertyAdded => "property_added",
            SchemaChangeKind::PropertyRemoved => "property_removed",
            SchemaChangeKind::TypeChanged => "type_changed",
            SchemaChangeKind::ConstraintChanged => "constraint_changed",
            SchemaChangeKind::RequiredChanged => "required_changed",
            SchemaChangeKind::EnumChanged => "enum_changed",
        };
        f.write_str(s)
    }
}

/// One observed difference between two schemas.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchemaChange {
    pub kind: SchemaChangeKind,
    /// Dotted property path within the schema, empty for the root.
    pub path: String,
    pub description: String,
    pub breaking: bool,
}

/// Policy knobs for the comparison. Defaults follow the standing policy:
/// optional additions and enum additions are not breaking.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompareOptions {
    pub optional_add_breaking: bool,
    pub enum_add_breaking: bool,
}

/// Compare two schemas and enumerate every change, recursively over nested
/// object properties and array item schemas.
pub fn compare_schemas(old: &Value, new: &Value, options: CompareOptions) -> Vec<SchemaChange> {
    let mut changes = Vec::new();
    compare_node(old, new, "", options, &mut changes);
    changes
}

fn compare_node(
    old: &Value,
    new: &Value,
    path: &str,
    options: CompareOptions,
    changes: &mut Vec<SchemaChange>,
) {
    compare_type(old, new, path, changes);
    compare_properties(old, new, path, options, changes);
    compare_required(old, new, path, changes);
    compare_enum(old, new, path, options, changes);
    compare_constraints(old, new, path, changes);
    compare_variants(old, new, path, changes);

    // Array item schemas
    if let (Some(old_items), Some(new_items)) = (old.get("items"), new.get("items")) {
        let child = join_path(path, "[]");
        compare_node(old_items, new_items, &child, options, changes);
    }
}

fn compare_type(old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    let old_type = old.get("type").and_then(|v| v.as_str());
    let new_type = new.get("type").and_then(|v| v.as_str());
    if let (Some(old_type), Some(new_type)) = (old_type, new_type)
        && old_type != new_type
    {
        changes.push(SchemaChange {
            kind: SchemaChangeKind::TypeChanged,
            path: path.to_string(),
            description: format!("type changed from {} to {}", old_type, new_type),
            breaking: true,
        });
    }
}

fn compare_properties(
    old: &Value,
    new: &Value,
    path: &str,
    options: CompareOptions,
    changes: &mut Vec<SchemaChange>,
) {
    let old_props = old.get("properties").and_then(|v| v.as_object());
    let new_props = new.get("properties").and_then(|v| v.as_object());
    let (Some(old_props), Some(new_props)) = (old_props, new_props) else {
        return;
    };

    let new_required = required_set(new);

    for (name, new_schema) in new_props {
        match old_props.get(name) {
            None => {
                let required = new_required.contains(name.as_str());
                changes.push(SchemaChange {
                    kind: SchemaChangeKind::PropertyAdded,
                    path: join_path(path, name),
                    description: format!(
                        "{} property '{}' added",
                        if required { "required" } else { "optional" },
                        name
                    ),
                    // A required addition also surfaces as required_changed,
                    // which carries the breaking verdict.
                    breaking: !required && options.optional_add_breaking,
                });
            }
            Some(old_schema) => {
                compare_node(old_schema, new_schema, &join_path(path, name), options, changes);
            }
        }
    }

    for name in old_props.keys() {
        if !new_props.contains_key(name) {
            changes.push(SchemaChange {
                kind: SchemaChangeKind::PropertyRemoved,
                path: join_path(path, name),
                description: format!("property '{}' removed", name),
                breaking: true,
            });
        }
    }
}

fn compare_required(old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    let old_required = required_set(old);
    let new_required = required_set(new);
    if old_required == new_required {
        return;
    }

    let added: Vec<&str> = new_required.difference(&old_required).copied().collect();
    let removed: Vec<&str> = old_required.difference(&new_required).copied().collect();

    if !added.is_empty() {
        changes.push(SchemaChange {
            kind: SchemaChangeKind::RequiredChanged,
            path: path.to_string(),
            description: format!("now required: {}", added.join(", ")),
            breaking: true,
        });
    }
    if !removed.is_empty() {
        changes.push(SchemaChange {
            kind: SchemaChangeKind::RequiredChanged,
            path: path.to_string(),
            description: format!("no longer required: {}", removed.join(", ")),
            breaking: false,
        });
    }
}

fn compare_enum(
    old: &Value,
    new: &Value,
    path: &str,
    options: CompareOptions,
    changes: &mut Vec<SchemaChange>,
) {
    let old_values = enum_set(old);
    let new_values = enum_set(new);
    let (Some(old_values), Some(new_values)) = (old_values, new_values) else {
        return;
    };
    if old_values == new_values {
        return;
    }

    let removed: Vec<String> = old_values.difference(&new_values).cloned().collect();
    let added: Vec<String> = new_values.difference(&old_values).cloned().collect();

    if !removed.is_empty() {
        changes.push(SchemaChange {
            kind: SchemaChangeKind::EnumChanged,
            path: path.to_string(),
            description: format!("enum values removed: {}", removed.join(", ")),
            breaking: true,
        });
    }
    if !added.is_empty() {
        changes.push(SchemaChange {
            kind: SchemaChangeKind::EnumChanged,
            path: path.to_string(),
            description: format!("enum values added: {}", added.join(", ")),
            breaking: options.enum_add_breaking,
        });
    }
}

/// Numeric/length bound tightening is breaking; loosening is not.
/// `additionalProperties` flipping true→false and `dependentRequired`
/// expanding are breaking.
fn compare_constraints(old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    compare_bound(old, new, path, "minimum", BoundDirection::LowerRaised, changes);
    compare_bound(old, new, path, "maximum", BoundDirection::UpperLowered, changes);
    compare_bound(old, new, path, "minLength", BoundDirection::LowerRaised, changes);
    compare_bound(old, new, path, "maxLength", BoundDirection::UpperLowered, changes);

    let old_additional = additional_properties(old);
    let new_additional = additional_properties(new);
    if old_additional != new_additional {
        let breaking = old_additional && !new_additional;
        changes.push(SchemaChange {
            kind: SchemaChangeKind::ConstraintChanged,
            path: path.to_string(),
            description: format!(
                "additionalProperties changed from {} to {}",
                old_additional, new_additional
            ),
            breaking,
        });
    }

    let old_dependent = dependent_required(old);
    let new_dependent = dependent_required(new);
    if old_dependent != new_dependent {
        let expanded = new_dependent.difference(&old_dependent).next().is_some();
        changes.push(SchemaChange {
            kind: SchemaChangeKind::ConstraintChanged,
            path: path.to_string(),
            description: "dependentRequired constraints changed".to_string(),
            breaking: expanded,
        });
    }
}

enum BoundDirection {
    /// Breaking when the bound increases (minimum, minLength).
    LowerRaised,
    /// Breaking when the bound decreases (maximum, maxLength).
    UpperLowered,
}

fn compare_bound(
    old: &Value,
    new: &Value,
    path: &str,
    key: &str,
    direction: BoundDirection,
    changes: &mut Vec<SchemaChange>,
) {
    let old_bound = old.get(key).and_then(|v| v.as_f64());
    let new_bound = new.get(key).and_then(|v| v.as_f64());
    match (old_bound, new_bound) {
        (Some(old_bound), Some(new_bound)) if old_bound != new_bound => {
            let breaking = match direction {
                BoundDirection::LowerRaised => new_bound > old_bound,
                BoundDirection::UpperLowered => new_bound < old_bound,
            };
            changes.push(SchemaChange {
                kind: SchemaChangeKind::ConstraintChanged,
                path: path.to_string(),
                description: format!("{} changed from {} to {}", key, old_bound, new_bound),
                breaking,
            });
        }
        (None, Some(new_bound)) => {
            // A bound appearing from nothing is a tightening.
            changes.push(SchemaChange {
                kind: SchemaChangeKind::ConstraintChanged,
                path: path.to_string(),
                description: format!("{} constraint added: {}", key, new_bound),
                breaking: true,
            });
        }
        (Some(old_bound), None) => {
            changes.push(SchemaChange {
                kind: SchemaChangeKind::ConstraintChanged,
                path: path.to_string(),
                description: format!("{} constraint removed (was {})", key, old_bound),
                breaking: false,
            });
        }
        _ => {}
    }
}

/// A branch added to a oneOf/anyOf variant set is breaking; removal is a
/// non-breaking narrowing from the caller's point of view.
fn compare_variants(old: &Value, new: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    for key in ["oneOf", "anyOf"] {
        let old_count = old.get(key).and_then(|v| v.as_array()).map(Vec::len);
        let new_count = new.get(key).and_then(|v| v.as_array()).map(Vec::len);
        if let (Some(old_count), Some(new_count)) = (old_count, new_count)
            && old_count != new_count
        {
            changes.push(SchemaChange {
                kind: SchemaChangeKind::ConstraintChanged,
                path: path.to_string(),
                description: format!(
                    "{} variant count changed from {} to {}",
                    key, old_count, new_count
                ),
                breaking: new_count > old_count,
            });
        }
    }
}

fn required_set(schema: &Value) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default()
}

fn enum_set(schema: &Value) -> Option<BTreeSet<String>> {
    schema
        .get("enum")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().map(|v| v.to_string()).collect())
}

fn additional_properties(schema: &Value) -> bool {
    // Absent means true per JSON Schema.
    schema
        .get("additionalProperties")
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

fn dependent_required(schema: &Value) -> BTreeSet<String> {
    schema
        .get("dependentRequired")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .flat_map(|(key, deps)| {
                    deps.as_array()
                        .into_iter()
                        .flatten()
                        .filter_map(|d| d.as_str())
                        .map(move |d| format!("{}:{}", key, d))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn join_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}
