//! Wire models for the work item process REST API
//!
//! These mirror the JSON shapes returned by the `_apis/work/processes`
//! endpoints and convert into the engine's `model` types. Conversions are
//! lossy only for properties the engine does not migrate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{
    FieldDef, FieldType, FormLayout, LayoutControl, LayoutGroup, LayoutPage, RuleAction,
    RuleCondition, RuleDef, StateCategory, StateDef, WorkItemTypeModel,
};

/// Standard list envelope used by the REST API
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    pub value: Vec<T>,
}

/// Process summary from the process list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    #[serde(alias = "typeId")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_process_type_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemTypeResponse {
    /// Some API versions return `referenceName`, older ones only `id`
    #[serde(default)]
    pub reference_name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
}

impl WorkItemTypeResponse {
    /// Reference name with the id fallback the original clients use
    pub fn reference(&self) -> String {
        self.reference_name
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Build an (initially childless) model; fields/states/rules/layout are
    /// attached by the reader
    pub fn into_model(self) -> WorkItemTypeModel {
        let reference_name = self.reference();
        WorkItemTypeModel {
            name: self.name,
            reference_name,
            description: self.description,
            color: self.color,
            icon: self.icon,
            is_disabled: self.is_disabled,
            fields: Vec::new(),
            states: Vec::new(),
            rules: Vec::new(),
            layout: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldResponse {
    pub reference_name: String,
    pub name: String,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    /// Present for picklist fields when the list is expanded
    #[serde(default)]
    pub allowed_values: Vec<Value>,
}

impl FieldResponse {
    pub fn into_model(self) -> FieldDef {
        let field_type = parse_field_type(self.r#type.as_deref());
        FieldDef {
            reference_name: self.reference_name,
            name: self.name,
            field_type,
            required: self.required,
            default_value: self.default_value.map(value_to_string),
            allowed_values: self.allowed_values.into_iter().map(value_to_string).collect(),
        }
    }
}

/// Map the API's type string onto `FieldType`
pub fn parse_field_type(raw: Option<&str>) -> FieldType {
    match raw {
        Some("string") | Some("String") => FieldType::String,
        Some("integer") | Some("Integer") => FieldType::Integer,
        Some("double") | Some("Double") => FieldType::Double,
        Some("boolean") | Some("Boolean") => FieldType::Boolean,
        Some("dateTime") | Some("DateTime") => FieldType::DateTime,
        Some("plainText") | Some("PlainText") => FieldType::PlainText,
        Some("html") | Some("Html") => FieldType::Html,
        Some("treePath") | Some("TreePath") => FieldType::TreePath,
        Some("identity") | Some("Identity") => FieldType::Identity,
        Some("picklistString") | Some("PicklistString") => FieldType::PicklistString,
        Some("picklistInteger") | Some("PicklistInteger") => FieldType::PicklistInteger,
        Some(other) => FieldType::Other(other.to_string()),
        None => FieldType::Other("unknown".to_string()),
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub state_category: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub order: i32,
}

impl StateResponse {
    pub fn into_model(self) -> StateDef {
        StateDef {
            name: self.name,
            state_category: parse_state_category(&self.state_category),
            color: self.color,
            order: self.order,
        }
    }
}

/// Unknown categories degrade to Proposed rather than failing the read;
/// the diff surfaces any resulting mismatch as a conflict anyway
pub fn parse_state_category(raw: &str) -> StateCategory {
    match raw {
        "InProgress" => StateCategory::InProgress,
        "Resolved" => StateCategory::Resolved,
        "Completed" => StateCategory::Completed,
        "Removed" => StateCategory::Removed,
        _ => StateCategory::Proposed,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResponse {
    pub id: String,
    #[serde(default)]
    pub conditions: Vec<RuleConditionResponse>,
    #[serde(default)]
    pub actions: Vec<RuleActionResponse>,
    #[serde(default)]
    pub is_disabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConditionResponse {
    pub condition_type: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleActionResponse {
    pub action_type: String,
    #[serde(default)]
    pub target_field: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl RuleResponse {
    pub fn into_model(self) -> RuleDef {
        RuleDef {
            id: self.id,
            conditions: self
                .conditions
                .into_iter()
                .map(|c| RuleCondition {
                    condition_type: c.condition_type,
                    field: c.field,
                    value: c.value,
                })
                .collect(),
            actions: self
                .actions
                .into_iter()
                .map(|a| RuleAction {
                    action_type: a.action_type,
                    target_field: a.target_field,
                    value: a.value,
                })
                .collect(),
            is_disabled: self.is_disabled,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResponse {
    #[serde(default)]
    pub pages: Vec<LayoutPageResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPageResponse {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub page_type: Option<String>,
    #[serde(default)]
    pub sections: Vec<LayoutSectionResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSectionResponse {
    #[serde(default)]
    pub groups: Vec<LayoutGroupResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutGroupResponse {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub controls: Vec<LayoutControlResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutControlResponse {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub control_type: Option<String>,
    #[serde(default)]
    pub is_contribution: bool,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl LayoutResponse {
    pub fn into_model(self) -> FormLayout {
        FormLayout {
            pages: self
                .pages
                .into_iter()
                .map(|p| LayoutPage {
                    id: p.id,
                    label: p.label,
                    page_type: p.page_type,
                    // Sections are positional; the migrator only needs the
                    // groups, flattened in section order
                    groups: p
                        .sections
                        .into_iter()
                        .flat_map(|s| s.groups)
                        .map(|g| LayoutGroup {
                            id: g.id,
                            label: g.label,
                            controls: g
                                .controls
                                .into_iter()
                                .map(|c| LayoutControl {
                                    id: c.id,
                                    label: c.label,
                                    control_type: c.control_type,
                                    is_contribution: c.is_contribution,
                                    metadata: c.metadata,
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
