//! Field/state diff logic between two process snapshots
//!
//! This module provides functions to:
//! - Compare a matched work item type pair field-by-field and state-by-state
//! - Categorize fields as create, update, picklist-addition, or conflict
//! - Surface destructive picklist edits and state category mismatches as
//!   blocking conflicts instead of operations
//!
//! All functions are pure; nothing here touches the network.

use std::collections::HashMap;

use crate::model::{FieldDef, StateCategory, StateDef, WorkItemTypeModel};

/// Plan options that influence how conflicts are resolved
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Allow destructive picklist edits (removals / replacements)
    pub overwrite_picklist: bool,
    /// Accept matched states whose categories differ; the category itself
    /// is still never changed
    pub tolerate_state_category_mismatch: bool,
}

/// A blocking plan-time conflict. Conflicted entities produce no operations.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffConflict {
    /// Destructive picklist edit without `overwrite_picklist`
    Picklist {
        type_ref: String,
        field_ref: String,
        removed_values: Vec<String>,
    },
    /// Matched states disagree on workflow category
    StateCategory {
        type_ref: String,
        state_name: String,
        source_category: StateCategory,
        target_category: StateCategory,
    },
}

/// Diff of one matched work item type pair
#[derive(Debug, Clone, Default)]
pub struct WorkItemTypeDiff {
    pub type_ref: String,
    /// Display metadata (name, description, color, icon, disabled) differs
    pub metadata_changed: bool,
    pub fields_to_create: Vec<FieldDef>,
    pub fields_to_update: Vec<FieldDef>,
    /// Picklist fields with new values to add (additive, safe)
    pub picklist_additions: Vec<PicklistAddition>,
    /// Picklist fields to replace wholesale (requires overwrite_picklist)
    pub picklist_overwrites: Vec<FieldDef>,
    pub states_to_create: Vec<StateDef>,
    pub states_to_update: Vec<StateDef>,
    pub conflicts: Vec<DiffConflict>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PicklistAddition {
    pub field: FieldDef,
    pub new_values: Vec<String>,
}

/// Compare a source work item type against its matched target counterpart
pub fn diff_work_item_type(
    source: &WorkItemTypeModel,
    target: &WorkItemTypeModel,
    options: &PlanOptions,
) -> WorkItemTypeDiff {
    let mut diff = WorkItemTypeDiff {
        type_ref: source.reference_name.clone(),
        ..Default::default()
    };

    diff.metadata_changed = source.name != target.name
        || source.description != target.description
        || source.color != target.color
        || source.icon != target.icon
        || source.is_disabled != target.is_disabled;

    diff_fields(source, target, options, &mut diff);
    diff_states(source, target, options, &mut diff);

    diff
}

fn diff_fields(
    source: &WorkItemTypeModel,
    target: &WorkItemTypeModel,
    options: &PlanOptions,
    diff: &mut WorkItemTypeDiff,
) {
    let target_map: HashMap<&str, &FieldDef> = target
        .fields
        .iter()
        .map(|f| (f.reference_name.as_str(), f))
        .collect();

    for source_field in &source.fields {
        let Some(target_field) = target_map.get(source_field.reference_name.as_str()) else {
            diff.fields_to_create.push(source_field.clone());
            continue;
        };

        if source_field.is_picklist() || target_field.is_picklist() {
            match diff_picklist(source_field, target_field, options) {
                PicklistOutcome::Unchanged => {}
                PicklistOutcome::Add(new_values) => {
                    diff.picklist_additions.push(PicklistAddition {
                        field: source_field.clone(),
                        new_values,
                    });
                }
                PicklistOutcome::Overwrite => {
                    diff.picklist_overwrites.push(source_field.clone());
                }
                PicklistOutcome::Conflict(removed_values) => {
                    // Conflicted fields are omitted from the plan entirely
                    diff.conflicts.push(DiffConflict::Picklist {
                        type_ref: source.reference_name.clone(),
                        field_ref: source_field.reference_name.clone(),
                        removed_values,
                    });
                    continue;
                }
            }
        }

        if field_metadata_differs(source_field, target_field) {
            diff.fields_to_update.push(source_field.clone());
        }
    }
}

enum PicklistOutcome {
    Unchanged,
    /// New values to append, in source declaration order
    Add(Vec<String>),
    Overwrite,
    /// Values present on target but missing from source
    Conflict(Vec<String>),
}

fn diff_picklist(
    source: &FieldDef,
    target: &FieldDef,
    options: &PlanOptions,
) -> PicklistOutcome {
    let removed: Vec<String> = target
        .allowed_values
        .iter()
        .filter(|v| !source.allowed_values.contains(v))
        .cloned()
        .collect();

    if !removed.is_empty() {
        if options.overwrite_picklist {
            // The overwrite carries the full source list, additions included
            return PicklistOutcome::Overwrite;
        }
        return PicklistOutcome::Conflict(removed);
    }

    let added: Vec<String> = source
        .allowed_values
        .iter()
        .filter(|v| !target.allowed_values.contains(v))
        .cloned()
        .collect();

    if added.is_empty() {
        PicklistOutcome::Unchanged
    } else {
        PicklistOutcome::Add(added)
    }
}

fn field_metadata_differs(source: &FieldDef, target: &FieldDef) -> bool {
    source.name != target.name
        || source.required != target.required
        || source.default_value != target.default_value
}

fn diff_states(
    source: &WorkItemTypeModel,
    target: &WorkItemTypeModel,
    options: &PlanOptions,
    diff: &mut WorkItemTypeDiff,
) {
    let target_map: HashMap<&str, &StateDef> =
        target.states.iter().map(|s| (s.name.as_str(), s)).collect();

    for source_state in &source.states {
        let Some(target_state) = target_map.get(source_state.name.as_str()) else {
            diff.states_to_create.push(source_state.clone());
            continue;
        };

        if source_state.state_category != target_state.state_category {
            if !options.tolerate_state_category_mismatch {
                diff.conflicts.push(DiffConflict::StateCategory {
                    type_ref: source.reference_name.clone(),
                    state_name: source_state.name.clone(),
                    source_category: source_state.state_category,
                    target_category: target_state.state_category,
                });
                continue;
            }
            // Tolerated: keep the target's category, update display only
            let mut update = source_state.clone();
            update.state_category = target_state.state_category;
            if update.color != target_state.color || update.order != target_state.order {
                diff.states_to_update.push(update);
            }
            continue;
        }

        if source_state.color != target_state.color || source_state.order != target_state.order {
            diff.states_to_update.push(source_state.clone());
        }
    }
}
