//! Migration plan builder
//!
//! Converts a source snapshot (and optionally a target snapshot) into an
//! ordered list of operations. Ordering respects dependencies:
//! - A work item type is created before any field/state/rule/layout
//!   operation on it
//! - A field is created before any rule that references it
//!
//! Equal-priority operations keep source declaration order, so planning the
//! same inputs twice yields the same sequence. The builder is a pure
//! function of two snapshots plus options; it never talks to the network.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{FieldDef, LayoutGroup, ProcessModel, RuleDef, StateDef, WorkItemTypeModel};

use super::diff::{DiffConflict, PlanOptions, diff_work_item_type};

pub type OperationId = u32;

/// A single planned operation against the target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Operation {
    CreateWorkItemType {
        type_ref: String,
        name: String,
        description: Option<String>,
        color: Option<String>,
        icon: Option<String>,
        is_disabled: bool,
    },
    UpdateWorkItemType {
        type_ref: String,
        name: String,
        description: Option<String>,
        color: Option<String>,
        icon: Option<String>,
        is_disabled: bool,
    },
    CreateField {
        type_ref: String,
        field: FieldDef,
    },
    UpdateField {
        type_ref: String,
        field: FieldDef,
    },
    AddPicklistValue {
        type_ref: String,
        field_ref: String,
        value: String,
    },
    OverwritePicklist {
        type_ref: String,
        field_ref: String,
        values: Vec<String>,
    },
    CreateState {
        type_ref: String,
        state: StateDef,
    },
    UpdateState {
        type_ref: String,
        state: StateDef,
    },
    ImportRule {
        type_ref: String,
        rule: RuleDef,
    },
    ImportFormLayout {
        type_ref: String,
        page_id: String,
        group: LayoutGroup,
    },
}

/// Operation kind, used for outcome reporting and failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CreateWorkItemType,
    UpdateWorkItemType,
    CreateField,
    UpdateField,
    AddPicklistValue,
    OverwritePicklist,
    CreateState,
    UpdateState,
    ImportRule,
    ImportFormLayout,
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CreateWorkItemType => "Create work item type",
            Self::UpdateWorkItemType => "Update work item type",
            Self::CreateField => "Create field",
            Self::UpdateField => "Update field",
            Self::AddPicklistValue => "Add picklist value",
            Self::OverwritePicklist => "Overwrite picklist",
            Self::CreateState => "Create state",
            Self::UpdateState => "Update state",
            Self::ImportRule => "Import rule",
            Self::ImportFormLayout => "Import form layout",
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Self::CreateWorkItemType | Self::CreateField | Self::CreateState
        )
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateWorkItemType { .. } => OperationKind::CreateWorkItemType,
            Self::UpdateWorkItemType { .. } => OperationKind::UpdateWorkItemType,
            Self::CreateField { .. } => OperationKind::CreateField,
            Self::UpdateField { .. } => OperationKind::UpdateField,
            Self::AddPicklistValue { .. } => OperationKind::AddPicklistValue,
            Self::OverwritePicklist { .. } => OperationKind::OverwritePicklist,
            Self::CreateState { .. } => OperationKind::CreateState,
            Self::UpdateState { .. } => OperationKind::UpdateState,
            Self::ImportRule { .. } => OperationKind::ImportRule,
            Self::ImportFormLayout { .. } => OperationKind::ImportFormLayout,
        }
    }

    /// Work item type this operation targets
    pub fn type_ref(&self) -> &str {
        match self {
            Self::CreateWorkItemType { type_ref, .. }
            | Self::UpdateWorkItemType { type_ref, .. }
            | Self::CreateField { type_ref, .. }
            | Self::UpdateField { type_ref, .. }
            | Self::AddPicklistValue { type_ref, .. }
            | Self::OverwritePicklist { type_ref, .. }
            | Self::CreateState { type_ref, .. }
            | Self::UpdateState { type_ref, .. }
            | Self::ImportRule { type_ref, .. }
            | Self::ImportFormLayout { type_ref, .. } => type_ref,
        }
    }

    /// Human-readable description for progress reporting
    pub fn describe(&self) -> String {
        match self {
            Self::CreateWorkItemType { name, .. } => format!("Create work item type '{}'", name),
            Self::UpdateWorkItemType { name, .. } => format!("Update work item type '{}'", name),
            Self::CreateField { field, .. } => format!("Create field '{}'", field.reference_name),
            Self::UpdateField { field, .. } => format!("Update field '{}'", field.reference_name),
            Self::AddPicklistValue { field_ref, value, .. } => {
                format!("Add picklist value '{}' to '{}'", value, field_ref)
            }
            Self::OverwritePicklist { field_ref, .. } => {
                format!("Overwrite picklist for '{}'", field_ref)
            }
            Self::CreateState { state, .. } => format!("Create state '{}'", state.name),
            Self::UpdateState { state, .. } => format!("Update state '{}'", state.name),
            Self::ImportRule { rule, .. } => format!("Import rule '{}'", rule.id),
            Self::ImportFormLayout { group, .. } => {
                format!("Import form group '{}'", group.label)
            }
        }
    }
}

/// An operation plus its position in the dependency graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedOperation {
    pub id: OperationId,
    pub operation: Operation,
    pub depends_on: Vec<OperationId>,
}

/// Blocking plan-time issues, surfaced before any write happens
pub type PlanIssue = DiffConflict;

/// Ordered, dependency-respecting operation sequence. Immutable once built;
/// execution records outcomes separately and never mutates the plan.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    pub operations: Vec<PlannedOperation>,
    pub issues: Vec<PlanIssue>,
}

impl MigrationPlan {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn has_blocking_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Operation counts per kind, for summaries
    pub fn kind_counts(&self) -> HashMap<OperationKind, usize> {
        let mut counts = HashMap::new();
        for op in &self.operations {
            *counts.entry(op.operation.kind()).or_insert(0) += 1;
        }
        counts
    }
}

/// Build a migration plan from a source snapshot and an optional target
/// snapshot. A `None` target means the target process does not exist yet,
/// so everything becomes a `Create*` operation.
pub fn build_plan(
    source: &ProcessModel,
    target: Option<&ProcessModel>,
    options: &PlanOptions,
) -> MigrationPlan {
    let mut builder = PlanBuilder::default();

    let target_map: HashMap<&str, &WorkItemTypeModel> = target
        .map(|t| {
            t.work_item_types
                .iter()
                .map(|w| (w.reference_name.as_str(), w))
                .collect()
        })
        .unwrap_or_default();

    for wit in &source.work_item_types {
        match target_map.get(wit.reference_name.as_str()) {
            None => builder.plan_create_type(wit),
            Some(target_wit) => builder.plan_matched_type(wit, target_wit, options),
        }
    }

    MigrationPlan {
        operations: topological_sort(builder.operations),
        issues: builder.issues,
    }
}

#[derive(Default)]
struct PlanBuilder {
    operations: Vec<PlannedOperation>,
    issues: Vec<PlanIssue>,
    next_id: OperationId,
}

impl PlanBuilder {
    fn push(&mut self, operation: Operation, depends_on: Vec<OperationId>) -> OperationId {
        let id = self.next_id;
        self.next_id += 1;
        self.operations.push(PlannedOperation {
            id,
            operation,
            depends_on,
        });
        id
    }

    /// No counterpart on target: create the type and cascade to all children
    fn plan_create_type(&mut self, wit: &WorkItemTypeModel) {
        let type_op = self.push(
            Operation::CreateWorkItemType {
                type_ref: wit.reference_name.clone(),
                name: wit.name.clone(),
                description: wit.description.clone(),
                color: wit.color.clone(),
                icon: wit.icon.clone(),
                is_disabled: wit.is_disabled,
            },
            vec![],
        );

        let mut field_ops: HashMap<&str, OperationId> = HashMap::new();
        for field in &wit.fields {
            let id = self.push(
                Operation::CreateField {
                    type_ref: wit.reference_name.clone(),
                    field: field.clone(),
                },
                vec![type_op],
            );
            field_ops.insert(field.reference_name.as_str(), id);
        }

        for state in &wit.states {
            self.push(
                Operation::CreateState {
                    type_ref: wit.reference_name.clone(),
                    state: state.clone(),
                },
                vec![type_op],
            );
        }

        for rule in &wit.rules {
            let deps = rule_dependencies(rule, &field_ops, type_op);
            self.push(
                Operation::ImportRule {
                    type_ref: wit.reference_name.clone(),
                    rule: rule.clone(),
                },
                deps,
            );
        }

        self.plan_layout(wit, Some(type_op));
    }

    /// Matched pair: only the differences become operations
    fn plan_matched_type(
        &mut self,
        source: &WorkItemTypeModel,
        target: &WorkItemTypeModel,
        options: &PlanOptions,
    ) {
        let diff = diff_work_item_type(source, target, options);
        self.issues.extend(diff.conflicts);

        if diff.metadata_changed {
            self.push(
                Operation::UpdateWorkItemType {
                    type_ref: source.reference_name.clone(),
                    name: source.name.clone(),
                    description: source.description.clone(),
                    color: source.color.clone(),
                    icon: source.icon.clone(),
                    is_disabled: source.is_disabled,
                },
                vec![],
            );
        }

        let mut field_ops: HashMap<&str, OperationId> = HashMap::new();
        for field in &diff.fields_to_create {
            let id = self.push(
                Operation::CreateField {
                    type_ref: source.reference_name.clone(),
                    field: field.clone(),
                },
                vec![],
            );
            field_ops.insert(field.reference_name.as_str(), id);
        }

        for field in &diff.fields_to_update {
            self.push(
                Operation::UpdateField {
                    type_ref: source.reference_name.clone(),
                    field: field.clone(),
                },
                vec![],
            );
        }

        for addition in &diff.picklist_additions {
            for value in &addition.new_values {
                self.push(
                    Operation::AddPicklistValue {
                        type_ref: source.reference_name.clone(),
                        field_ref: addition.field.reference_name.clone(),
                        value: value.clone(),
                    },
                    vec![],
                );
            }
        }

        for field in &diff.picklist_overwrites {
            self.push(
                Operation::OverwritePicklist {
                    type_ref: source.reference_name.clone(),
                    field_ref: field.reference_name.clone(),
                    values: field.allowed_values.clone(),
                },
                vec![],
            );
        }

        for state in &diff.states_to_create {
            self.push(
                Operation::CreateState {
                    type_ref: source.reference_name.clone(),
                    state: state.clone(),
                },
                vec![],
            );
        }

        for state in &diff.states_to_update {
            self.push(
                Operation::UpdateState {
                    type_ref: source.reference_name.clone(),
                    state: state.clone(),
                },
                vec![],
            );
        }

        // Rules and layout always re-import; failure handling is the
        // writer's concern
        for rule in &source.rules {
            let mut deps: Vec<OperationId> = rule_field_refs(rule)
                .into_iter()
                .filter_map(|f| field_ops.get(f).copied())
                .collect();
            deps.sort_unstable();
            deps.dedup();
            self.push(
                Operation::ImportRule {
                    type_ref: source.reference_name.clone(),
                    rule: rule.clone(),
                },
                deps,
            );
        }

        self.plan_layout(source, None);
    }

    fn plan_layout(&mut self, wit: &WorkItemTypeModel, type_op: Option<OperationId>) {
        let Some(layout) = &wit.layout else { return };
        let deps: Vec<OperationId> = type_op.into_iter().collect();

        for page in &layout.pages {
            for group in &page.groups {
                self.push(
                    Operation::ImportFormLayout {
                        type_ref: wit.reference_name.clone(),
                        page_id: page.id.clone(),
                        group: group.clone(),
                    },
                    deps.clone(),
                );
            }
        }
    }
}

fn rule_field_refs(rule: &RuleDef) -> Vec<&str> {
    rule.conditions
        .iter()
        .filter_map(|c| c.field.as_deref())
        .chain(rule.actions.iter().filter_map(|a| a.target_field.as_deref()))
        .collect()
}

fn rule_dependencies(
    rule: &RuleDef,
    field_ops: &HashMap<&str, OperationId>,
    type_op: OperationId,
) -> Vec<OperationId> {
    let mut deps = vec![type_op];
    for field_ref in rule_field_refs(rule) {
        if let Some(id) = field_ops.get(field_ref) {
            deps.push(*id);
        }
    }
    deps.sort_unstable();
    deps.dedup();
    deps
}

/// Kahn's algorithm with a min-heap on operation id, so ties resolve to
/// declaration order and the result is deterministic
fn topological_sort(operations: Vec<PlannedOperation>) -> Vec<PlannedOperation> {
    let ids: HashSet<OperationId> = operations.iter().map(|op| op.id).collect();

    let mut in_degree: HashMap<OperationId, usize> = HashMap::new();
    let mut dependents: HashMap<OperationId, Vec<OperationId>> = HashMap::new();
    for op in &operations {
        let deps: Vec<OperationId> = op
            .depends_on
            .iter()
            .copied()
            .filter(|d| ids.contains(d))
            .collect();
        in_degree.insert(op.id, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(op.id);
        }
    }

    let mut by_id: HashMap<OperationId, PlannedOperation> =
        operations.into_iter().map(|op| (op.id, op)).collect();

    let mut ready: BinaryHeap<Reverse<OperationId>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();

    let mut sorted = Vec::with_capacity(by_id.len());
    while let Some(Reverse(id)) = ready.pop() {
        if let Some(op) = by_id.remove(&id) {
            sorted.push(op);
        }
        if let Some(deps) = dependents.get(&id) {
            for dependent in deps {
                if let Some(count) = in_degree.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(*dependent));
                    }
                }
            }
        }
    }

    // Construction only ever points depends_on at earlier ids, so the graph
    // is acyclic by construction
    debug_assert!(by_id.is_empty(), "cycle in plan dependencies");
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        FieldType, FormLayout, LayoutPage, RuleAction, StateCategory,
    };

    fn make_field(reference_name: &str) -> FieldDef {
        FieldDef {
            reference_name: reference_name.to_string(),
            name: reference_name.to_string(),
            field_type: FieldType::String,
            required: false,
            default_value: None,
            allowed_values: vec![],
        }
    }

    fn make_picklist(reference_name: &str, values: &[&str]) -> FieldDef {
        FieldDef {
            field_type: FieldType::PicklistString,
            allowed_values: values.iter().map(|v| v.to_string()).collect(),
            ..make_field(reference_name)
        }
    }

    fn make_state(name: &str) -> StateDef {
        StateDef {
            name: name.to_string(),
            state_category: StateCategory::Proposed,
            color: None,
            order: 0,
        }
    }

    fn make_rule(id: &str, target_field: &str) -> RuleDef {
        RuleDef {
            id: id.to_string(),
            conditions: vec![],
            actions: vec![RuleAction {
                action_type: "setDefaultValue".to_string(),
                target_field: Some(target_field.to_string()),
                value: None,
            }],
            is_disabled: false,
        }
    }

    fn make_layout(groups: usize) -> FormLayout {
        FormLayout {
            pages: vec![LayoutPage {
                id: "page1".to_string(),
                label: "Details".to_string(),
                page_type: None,
                groups: (0..groups)
                    .map(|i| LayoutGroup {
                        id: format!("g{}", i),
                        label: format!("Group {}", i),
                        controls: vec![],
                    })
                    .collect(),
            }],
        }
    }

    fn make_wit(reference_name: &str) -> WorkItemTypeModel {
        WorkItemTypeModel {
            name: reference_name.to_string(),
            reference_name: reference_name.to_string(),
            description: None,
            color: None,
            icon: None,
            is_disabled: false,
            fields: vec![],
            states: vec![],
            rules: vec![],
            layout: None,
        }
    }

    fn make_process(work_item_types: Vec<WorkItemTypeModel>) -> ProcessModel {
        ProcessModel {
            id: "proc-1".to_string(),
            name: "Test".to_string(),
            description: None,
            reference_process_id: None,
            work_item_types,
        }
    }

    #[test]
    fn test_no_target_is_all_creates_with_exact_count() {
        let mut wit = make_wit("Custom.Bug");
        wit.fields = vec![make_field("System.Title"), make_field("Custom.Repro")];
        wit.states = vec![make_state("New"), make_state("Done")];
        wit.rules = vec![make_rule("r1", "Custom.Repro")];
        wit.layout = Some(make_layout(2));
        let source = make_process(vec![wit]);

        let plan = build_plan(&source, None, &PlanOptions::default());

        // 1 type + 2 fields + 2 states + 1 rule + 2 layout items
        assert_eq!(plan.len(), 8);
        assert!(plan.issues.is_empty());
        for op in &plan.operations {
            let kind = op.operation.kind();
            assert!(
                kind.is_create()
                    || matches!(kind, OperationKind::ImportRule | OperationKind::ImportFormLayout),
                "unexpected kind in no-target plan: {:?}",
                kind
            );
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let mut wit = make_wit("Custom.Bug");
        wit.fields = vec![make_field("B.Field"), make_field("A.Field")];
        wit.states = vec![make_state("New")];
        wit.rules = vec![make_rule("r1", "A.Field")];
        let source = make_process(vec![wit]);

        let first = build_plan(&source, None, &PlanOptions::default());
        let second = build_plan(&source, None, &PlanOptions::default());

        assert_eq!(first.operations, second.operations);
    }

    #[test]
    fn test_type_created_before_children() {
        let mut wit = make_wit("Custom.Bug");
        wit.fields = vec![make_field("System.Title")];
        wit.states = vec![make_state("New")];
        let source = make_process(vec![wit]);

        let plan = build_plan(&source, None, &PlanOptions::default());

        let type_pos = plan
            .operations
            .iter()
            .position(|op| op.operation.kind() == OperationKind::CreateWorkItemType)
            .unwrap();
        for (pos, op) in plan.operations.iter().enumerate() {
            if op.operation.kind() != OperationKind::CreateWorkItemType {
                assert!(type_pos < pos);
            }
        }
    }

    #[test]
    fn test_rule_ordered_after_referenced_field() {
        let mut wit = make_wit("Custom.Bug");
        wit.fields = vec![make_field("Custom.Assignee")];
        wit.rules = vec![make_rule("r1", "Custom.Assignee")];
        let source = make_process(vec![wit]);

        let plan = build_plan(&source, None, &PlanOptions::default());

        let field_pos = plan
            .operations
            .iter()
            .position(|op| op.operation.kind() == OperationKind::CreateField)
            .unwrap();
        let rule_pos = plan
            .operations
            .iter()
            .position(|op| op.operation.kind() == OperationKind::ImportRule)
            .unwrap();
        assert!(field_pos < rule_pos);

        // And the dependency is recorded explicitly
        let field_id = plan.operations[field_pos].id;
        assert!(plan.operations[rule_pos].depends_on.contains(&field_id));
    }

    #[test]
    fn test_additive_picklist_single_add_no_conflict() {
        let mut source_wit = make_wit("Custom.Bug");
        source_wit.fields = vec![make_picklist("Custom.Sev", &["A", "B", "C"])];
        let mut target_wit = make_wit("Custom.Bug");
        target_wit.fields = vec![make_picklist("Custom.Sev", &["A", "B"])];

        let source = make_process(vec![source_wit]);
        let target = make_process(vec![target_wit]);

        let plan = build_plan(&source, Some(&target), &PlanOptions::default());

        assert_eq!(plan.len(), 1);
        assert!(plan.issues.is_empty());
        match &plan.operations[0].operation {
            Operation::AddPicklistValue { value, .. } => assert_eq!(value, "C"),
            other => panic!("expected AddPicklistValue, got {:?}", other),
        }
    }

    #[test]
    fn test_destructive_picklist_yields_conflict_and_no_ops() {
        let mut source_wit = make_wit("Custom.Bug");
        source_wit.fields = vec![make_picklist("Custom.Sev", &["A"])];
        let mut target_wit = make_wit("Custom.Bug");
        target_wit.fields = vec![make_picklist("Custom.Sev", &["A", "B"])];

        let source = make_process(vec![source_wit]);
        let target = make_process(vec![target_wit]);

        let plan = build_plan(&source, Some(&target), &PlanOptions::default());

        assert!(plan.is_empty());
        assert_eq!(plan.issues.len(), 1);
        assert!(matches!(plan.issues[0], DiffConflict::Picklist { .. }));
    }

    #[test]
    fn test_matched_type_rules_reimported_unconditionally() {
        let mut source_wit = make_wit("Custom.Bug");
        source_wit.rules = vec![make_rule("r1", "System.Title")];
        let target_wit = make_wit("Custom.Bug");

        let source = make_process(vec![source_wit]);
        let target = make_process(vec![target_wit]);

        let plan = build_plan(&source, Some(&target), &PlanOptions::default());

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.operations[0].operation.kind(), OperationKind::ImportRule);
    }

    #[test]
    fn test_unmatched_source_type_cascades() {
        let mut new_wit = make_wit("Custom.Epic");
        new_wit.fields = vec![make_field("System.Title")];
        let existing = make_wit("Custom.Bug");

        let source = make_process(vec![existing.clone(), new_wit]);
        let target = make_process(vec![existing]);

        let plan = build_plan(&source, Some(&target), &PlanOptions::default());

        // Matched Bug contributes nothing; new Epic gets type + field
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.operations[0].operation.kind(),
            OperationKind::CreateWorkItemType
        );
        assert_eq!(plan.operations[0].operation.type_ref(), "Custom.Epic");
    }

    #[test]
    fn test_kind_counts() {
        let mut wit = make_wit("Custom.Bug");
        wit.fields = vec![make_field("a"), make_field("b")];
        let source = make_process(vec![wit]);

        let plan = build_plan(&source, None, &PlanOptions::default());
        let counts = plan.kind_counts();

        assert_eq!(counts[&OperationKind::CreateWorkItemType], 1);
        assert_eq!(counts[&OperationKind::CreateField], 2);
    }
}
