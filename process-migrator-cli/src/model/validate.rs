//! Structural validation of a process model snapshot
//!
//! Validation never mutates and never decides fatality; it returns the full
//! list of issues and lets the caller decide what to do with them.

use std::collections::HashSet;

use super::{ProcessModel, WorkItemTypeModel};

/// A single validation finding, tied to the work item type it was found on
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub work_item_type: String,
    pub kind: IssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    DuplicateFieldReferenceName,
    DuplicateStateName,
    DefaultValueNotInPicklist,
    RuleReferencesUnknownField,
}

/// Check a process model for structural problems
pub fn validate(model: &ProcessModel) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for wit in &model.work_item_types {
        validate_work_item_type(wit, &mut issues);
    }

    issues
}

fn validate_work_item_type(wit: &WorkItemTypeModel, issues: &mut Vec<ValidationIssue>) {
    // Field reference names must be unique within a type
    let mut seen_fields: HashSet<&str> = HashSet::new();
    for field in &wit.fields {
        if !seen_fields.insert(field.reference_name.as_str()) {
            issues.push(ValidationIssue {
                work_item_type: wit.reference_name.clone(),
                kind: IssueKind::DuplicateFieldReferenceName,
                detail: format!("duplicate field reference name '{}'", field.reference_name),
            });
        }
    }

    // State names must be unique within a type
    let mut seen_states: HashSet<&str> = HashSet::new();
    for state in &wit.states {
        if !seen_states.insert(state.name.as_str()) {
            issues.push(ValidationIssue {
                work_item_type: wit.reference_name.clone(),
                kind: IssueKind::DuplicateStateName,
                detail: format!("duplicate state name '{}'", state.name),
            });
        }
    }

    // A picklist default must be one of the allowed values
    for field in &wit.fields {
        if let Some(default) = &field.default_value {
            if field.is_picklist() && !field.allowed_values.iter().any(|v| v == default) {
                issues.push(ValidationIssue {
                    work_item_type: wit.reference_name.clone(),
                    kind: IssueKind::DefaultValueNotInPicklist,
                    detail: format!(
                        "default value '{}' for field '{}' is not an allowed value",
                        default, field.reference_name
                    ),
                });
            }
        }
    }

    // Rule conditions/actions may only reference fields declared on this type
    let declared: HashSet<&str> = wit
        .fields
        .iter()
        .map(|f| f.reference_name.as_str())
        .collect();

    for rule in &wit.rules {
        let referenced = rule
            .conditions
            .iter()
            .filter_map(|c| c.field.as_deref())
            .chain(rule.actions.iter().filter_map(|a| a.target_field.as_deref()));

        for field_ref in referenced {
            if !declared.contains(field_ref) {
                issues.push(ValidationIssue {
                    work_item_type: wit.reference_name.clone(),
                    kind: IssueKind::RuleReferencesUnknownField,
                    detail: format!(
                        "rule '{}' references field '{}' not declared on this type",
                        rule.id, field_ref
                    ),
                });
            }
        }
    }
}
