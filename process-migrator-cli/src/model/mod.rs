//! In-memory process definition models
//!
//! A `ProcessModel` is a read-only snapshot of a work item process: its
//! work item types, their fields, states, rules, and form layout. Snapshots
//! are built once by the reader and never mutated; planning and applying
//! only read them. The same types serialize to the export document format.

pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use validate::{ValidationIssue, validate};

/// Complete process definition snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessModel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The system process this one inherits from (e.g. Agile, Scrum)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_process_id: Option<String>,
    pub work_item_types: Vec<WorkItemTypeModel>,
}

/// A single work item type (e.g. "Bug") with its fields, states, rules
/// and form layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemTypeModel {
    pub name: String,
    /// Platform-stable identity key, unique within a process. Work item
    /// types match across systems iff reference names match, never by
    /// display name.
    pub reference_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub states: Vec<StateDef>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<FormLayout>,
}

/// Field definition on a work item type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Platform-assigned stable identity (e.g. "System.Title"), the natural
    /// key for matching fields across systems
    pub reference_name: String,
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Picklist values. Additions are safe; removals are destructive and
    /// require explicit permission at plan time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
}

impl FieldDef {
    /// Whether this field constrains its value to a predefined set
    pub fn is_picklist(&self) -> bool {
        !self.allowed_values.is_empty()
            || matches!(self.field_type, FieldType::PicklistString | FieldType::PicklistInteger)
    }
}

/// Field data types in the process REST API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Double,
    Boolean,
    DateTime,
    PlainText,
    Html,
    TreePath,
    Identity,
    PicklistString,
    PicklistInteger,
    Other(String),
}

/// Workflow state definition
///
/// States have no durable cross-system id; `name` is the only matching
/// key. A category mismatch between matched states is an explicit conflict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateDef {
    pub name: String,
    pub state_category: StateCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub order: i32,
}

/// Workflow state categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StateCategory {
    Proposed,
    InProgress,
    Resolved,
    Completed,
    Removed,
}

impl StateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "Proposed",
            Self::InProgress => "InProgress",
            Self::Resolved => "Resolved",
            Self::Completed => "Completed",
            Self::Removed => "Removed",
        }
    }
}

/// Work item rule definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleDef {
    pub id: String,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
    #[serde(default)]
    pub is_disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub condition_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Rule action. `value` may reference an identity (e.g. "set field to
/// current user") which can fail to resolve on the target system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Form layout: pages of groups of control contributions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormLayout {
    #[serde(default)]
    pub pages: Vec<LayoutPage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPage {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub page_type: Option<String>,
    #[serde(default)]
    pub groups: Vec<LayoutGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutGroup {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub controls: Vec<LayoutControl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutControl {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    /// Whether this control is an extension contribution rather than a
    /// plain field control
    #[serde(default)]
    pub is_contribution: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl FormLayout {
    /// Count of importable layout items (one per group)
    pub fn item_count(&self) -> usize {
        self.pages.iter().map(|p| p.groups.len()).sum()
    }
}

impl WorkItemTypeModel {
    /// Total children this type contributes to a from-scratch plan
    pub fn child_count(&self) -> usize {
        self.fields.len()
            + self.states.len()
            + self.rules.len()
            + self.layout.as_ref().map(|l| l.item_count()).unwrap_or(0)
    }
}
