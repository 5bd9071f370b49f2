//! Tool-parameter schema shapes and the diff classification C8 relies on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub type_name: String,
    pub required: bool,
}

/// A flat map of field name to its spec. Real tool schemas are nested JSON
/// Schema documents; the compatibility guard only needs the top-level shape
/// to classify additions, removals, and type changes (spec.md §4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaShape {
    pub fields: HashMap<String, FieldSpec>,
}

impl SchemaShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, type_name: impl Into<String>, required: bool) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                type_name: type_name.into(),
                required,
            },
        );
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldChange {
    AddedRequired(String),
    AddedOptional(String),
    RemovedRequired(String),
    RemovedOptional(String),
    TypeChanged { field: String, from: String, to: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaSeverity {
    Patch,
    Minor,
    Major,
    Breaking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub changes: Vec<FieldChange>,
    pub severity: SchemaSeverity,
}

impl SchemaDiff {
    /// Compare `from` to `to` per spec.md §4.8: a required addition/removal
    /// or a type change is `BREAKING`; more than two additions/removals
    /// (with no breaking change) is `MAJOR`; any change at all is `MINOR`;
    /// no change is `PATCH`.
    pub fn compute(from: &SchemaShape, to: &SchemaShape) -> Self {
        let mut changes = Vec::new();

        for (name, spec) in &to.fields {
            if !from.fields.contains_key(name) {
                changes.push(if spec.required {
                    FieldChange::AddedRequired(name.clone())
                } else {
                    FieldChange::AddedOptional(name.clone())
                });
            }
        }

        for (name, spec) in &from.fields {
            match to.fields.get(name) {
                None => changes.push(if spec.required {
                    FieldChange::RemovedRequired(name.clone())
                } else {
                    FieldChange::RemovedOptional(name.clone())
                }),
                Some(new_spec) if new_spec.type_name != spec.type_name => {
                    changes.push(FieldChange::TypeChanged {
                        field: name.clone(),
                        from: spec.type_name.clone(),
                        to: new_spec.type_name.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        let has_breaking = changes.iter().any(|c| {
            matches!(
                c,
                FieldChange::AddedRequired(_)
                    | FieldChange::RemovedRequired(_)
                    | FieldChange::TypeChanged { .. }
            )
        });
        let add_remove_count = changes
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    FieldChange::AddedRequired(_)
                        | FieldChange::AddedOptional(_)
                        | FieldChange::RemovedRequired(_)
                        | FieldChange::RemovedOptional(_)
                )
            })
            .count();

        let severity = if has_breaking {
            SchemaSeverity::Breaking
        } else if add_remove_count > 2 {
            SchemaSeverity::Major
        } else if !changes.is_empty() {
            SchemaSeverity::Minor
        } else {
            SchemaSeverity::Patch
        };

        Self { changes, severity }
    }

    pub fn is_breaking(&self) -> bool {
        self.severity == SchemaSeverity::Breaking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_shapes_are_patch() {
        let shape = SchemaShape::new().with_field("pickup", "string", true);
        let diff = SchemaDiff::compute(&shape, &shape);
        assert_eq!(diff.severity, SchemaSeverity::Patch);
        assert!(diff.changes.is_empty());
    }

    #[test]
    fn new_required_field_is_breaking() {
        let from = SchemaShape::new().with_field("pickup", "string", true);
        let to = from.clone().with_field("dropoff", "string", true);
        let diff = SchemaDiff::compute(&from, &to);
        assert!(diff.is_breaking());
    }

    #[test]
    fn type_change_is_breaking() {
        let from = SchemaShape::new().with_field("seats", "integer", true);
        let to = SchemaShape::new().with_field("seats", "string", true);
        let diff = SchemaDiff::compute(&from, &to);
        assert!(diff.is_breaking());
    }

    #[test]
    fn many_optional_additions_without_breaking_is_major() {
        let from = SchemaShape::new();
        let to = SchemaShape::new()
            .with_field("a", "string", false)
            .with_field("b", "string", false)
            .with_field("c", "string", false);
        let diff = SchemaDiff::compute(&from, &to);
        assert_eq!(diff.severity, SchemaSeverity::Major);
    }

    #[test]
    fn single_optional_addition_is_minor() {
        let from = SchemaShape::new();
        let to = SchemaShape::new().with_field("a", "string", false);
        let diff = SchemaDiff::compute(&from, &to);
        assert_eq!(diff.severity, SchemaSeverity::Minor);
    }
}
