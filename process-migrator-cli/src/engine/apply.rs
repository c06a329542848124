//! Plan execution against a target system
//!
//! Operations run strictly in plan order, one attempt each. Failure policy
//! per operation:
//! - Identity-resolution failures on rule/form-contribution import or field
//!   default values may be downgraded to a skip when the matching
//!   continue-on option is set
//! - Form layout imports are bypassed outright when
//!   `skip_import_form_contributions` is set
//! - Everything else is fatal: remaining operations are marked skipped and
//!   the run aborts
//!
//! Cancellation is cooperative: the flag is checked between operations,
//! never mid-operation, so an in-flight write always completes before the
//! run stops.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::api::ProcessClient;
use crate::error::{EngineResult, MigrationError};
use crate::model::{FieldDef, StateDef};

use super::plan::{MigrationPlan, Operation, OperationId, OperationKind, PlannedOperation};

/// Options controlling the writer's failure policy
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub continue_on_rule_import_failure: bool,
    pub continue_on_identity_default_value_failure: bool,
    pub skip_import_form_contributions: bool,
}

/// Shared cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Per-operation execution outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Applied,
    Skipped,
    Failed,
}

/// Record of one operation's execution. The plan itself is never mutated;
/// outcomes are the only thing execution produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub description: String,
    pub outcome: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    fn applied(op: &PlannedOperation) -> Self {
        Self {
            operation_id: op.id,
            kind: op.operation.kind(),
            description: op.operation.describe(),
            outcome: OutcomeKind::Applied,
            error: None,
        }
    }

    fn skipped(op: &PlannedOperation, reason: impl Into<String>) -> Self {
        Self {
            operation_id: op.id,
            kind: op.operation.kind(),
            description: op.operation.describe(),
            outcome: OutcomeKind::Skipped,
            error: Some(reason.into()),
        }
    }

    fn bypassed(op: &PlannedOperation) -> Self {
        Self {
            operation_id: op.id,
            kind: op.operation.kind(),
            description: op.operation.describe(),
            outcome: OutcomeKind::Skipped,
            error: None,
        }
    }

    fn failed(op: &PlannedOperation, error: &MigrationError) -> Self {
        Self {
            operation_id: op.id,
            kind: op.operation.kind(),
            description: op.operation.describe(),
            outcome: OutcomeKind::Failed,
            error: Some(error.to_string()),
        }
    }

    /// A skip caused by a tolerated failure (as opposed to a deliberate
    /// bypass or abort cascade)
    pub fn is_tolerated_failure(&self) -> bool {
        self.outcome == OutcomeKind::Skipped && self.error.is_some()
    }
}

/// Anything a plan can be applied against. One method per invocation; the
/// writer never retries.
#[async_trait]
pub trait ProcessTarget: Send + Sync {
    async fn apply_operation(&self, operation: &Operation) -> EngineResult<()>;
}

/// Execute a plan in order, recording one outcome per operation.
/// `on_applied` fires after each attempted operation with
/// (operation, completed, total) for progress reporting.
pub async fn apply_plan<F>(
    plan: &MigrationPlan,
    target: &dyn ProcessTarget,
    options: &ApplyOptions,
    cancel: &CancelFlag,
    mut on_applied: F,
) -> Vec<OperationOutcome>
where
    F: FnMut(&PlannedOperation, usize, usize),
{
    let total = plan.len();
    let mut outcomes: Vec<OperationOutcome> = Vec::with_capacity(total);
    let mut abort = false;
    let mut cancelled = false;

    for (index, planned) in plan.operations.iter().enumerate() {
        if abort {
            outcomes.push(OperationOutcome::skipped(planned, "aborted by prior failure"));
            continue;
        }
        if cancelled || cancel.is_cancelled() {
            cancelled = true;
            outcomes.push(OperationOutcome::skipped(planned, "cancelled"));
            continue;
        }

        if options.skip_import_form_contributions
            && planned.operation.kind() == OperationKind::ImportFormLayout
        {
            debug!("bypassing form contribution import: {}", planned.operation.describe());
            outcomes.push(OperationOutcome::bypassed(planned));
            on_applied(planned, index + 1, total);
            continue;
        }

        match target.apply_operation(&planned.operation).await {
            Ok(()) => {
                debug!("applied: {}", planned.operation.describe());
                outcomes.push(OperationOutcome::applied(planned));
            }
            Err(error) if is_tolerated(&error, planned.operation.kind(), options) => {
                warn!(
                    "skipping after tolerated failure: {}: {}",
                    planned.operation.describe(),
                    error
                );
                outcomes.push(OperationOutcome::skipped(planned, error.to_string()));
            }
            Err(error) => {
                warn!("fatal failure: {}: {}", planned.operation.describe(), error);
                outcomes.push(OperationOutcome::failed(planned, &error));
                abort = true;
            }
        }

        on_applied(planned, index + 1, total);
    }

    outcomes
}

fn is_tolerated(error: &MigrationError, kind: OperationKind, options: &ApplyOptions) -> bool {
    if !error.is_tolerable() {
        return false;
    }
    match kind {
        // Form contribution import failures follow the rule failure policy
        OperationKind::ImportRule | OperationKind::ImportFormLayout => {
            options.continue_on_rule_import_failure
        }
        OperationKind::CreateField | OperationKind::UpdateField => {
            options.continue_on_identity_default_value_failure
        }
        _ => false,
    }
}

/// Live API target: translates operations into REST calls against one
/// target process
pub struct ApiTarget {
    client: ProcessClient,
    process_id: String,
    /// State name → id per work item type, resolved lazily for updates
    state_ids: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl ApiTarget {
    pub fn new(client: ProcessClient, process_id: String) -> Self {
        Self {
            client,
            process_id,
            state_ids: Mutex::new(HashMap::new()),
        }
    }

    async fn state_id(&self, type_ref: &str, state_name: &str) -> EngineResult<String> {
        let mut cache = self.state_ids.lock().await;
        if !cache.contains_key(type_ref) {
            let states = self.client.get_states(&self.process_id, type_ref).await?;
            let by_name = states
                .into_iter()
                .filter_map(|s| s.id.clone().map(|id| (s.name, id)))
                .collect();
            cache.insert(type_ref.to_string(), by_name);
        }

        cache
            .get(type_ref)
            .and_then(|m| m.get(state_name))
            .cloned()
            .ok_or_else(|| MigrationError::Write {
                operation: "update state".to_string(),
                message: format!("state '{}' not found on target type '{}'", state_name, type_ref),
            })
    }

    async fn picklist_id(&self, type_ref: &str, field_ref: &str) -> EngineResult<String> {
        self.client
            .get_field_picklist_id(&self.process_id, type_ref, field_ref)
            .await?
            .ok_or_else(|| MigrationError::Write {
                operation: "picklist".to_string(),
                message: format!("field '{}' has no picklist on target", field_ref),
            })
    }
}

fn field_payload(field: &FieldDef) -> Value {
    json!({
        "referenceName": field.reference_name,
        "name": field.name,
        "required": field.required,
        "defaultValue": field.default_value,
        "allowedValues": field.allowed_values,
    })
}

fn state_payload(state: &StateDef) -> Value {
    json!({
        "name": state.name,
        "stateCategory": state.state_category.as_str(),
        "color": state.color,
        "order": state.order,
    })
}

#[async_trait]
impl ProcessTarget for ApiTarget {
    async fn apply_operation(&self, operation: &Operation) -> EngineResult<()> {
        match operation {
            Operation::CreateWorkItemType {
                name,
                description,
                color,
                icon,
                is_disabled,
                ..
            } => {
                let payload = json!({
                    "name": name,
                    "description": description,
                    "color": color,
                    "icon": icon,
                    "isDisabled": is_disabled,
                });
                self.client
                    .create_work_item_type(&self.process_id, &payload)
                    .await?;
            }
            Operation::UpdateWorkItemType {
                type_ref,
                name,
                description,
                color,
                icon,
                is_disabled,
            } => {
                let payload = json!({
                    "name": name,
                    "description": description,
                    "color": color,
                    "icon": icon,
                    "isDisabled": is_disabled,
                });
                self.client
                    .update_work_item_type(&self.process_id, type_ref, &payload)
                    .await?;
            }
            Operation::CreateField { type_ref, field } => {
                self.client
                    .create_field(&self.process_id, type_ref, &field_payload(field))
                    .await?;
            }
            Operation::UpdateField { type_ref, field } => {
                self.client
                    .update_field(
                        &self.process_id,
                        type_ref,
                        &field.reference_name,
                        &field_payload(field),
                    )
                    .await?;
            }
            Operation::AddPicklistValue {
                type_ref,
                field_ref,
                value,
            } => {
                let list_id = self.picklist_id(type_ref, field_ref).await?;
                let mut items = self.client.get_picklist_items(&list_id).await?;
                if !items.contains(value) {
                    items.push(value.clone());
                }
                let payload = json!({ "items": items });
                self.client.add_picklist_value(&list_id, &payload).await?;
            }
            Operation::OverwritePicklist {
                type_ref,
                field_ref,
                values,
            } => {
                let list_id = self.picklist_id(type_ref, field_ref).await?;
                let payload = json!({ "items": values });
                self.client.overwrite_picklist(&list_id, &payload).await?;
            }
            Operation::CreateState { type_ref, state } => {
                self.client
                    .create_state(&self.process_id, type_ref, &state_payload(state))
                    .await?;
            }
            Operation::UpdateState { type_ref, state } => {
                let state_id = self.state_id(type_ref, &state.name).await?;
                self.client
                    .update_state(&self.process_id, type_ref, &state_id, &state_payload(state))
                    .await?;
            }
            Operation::ImportRule { type_ref, rule } => {
                let payload = serde_json::to_value(rule).map_err(|e| MigrationError::Write {
                    operation: "import rule".to_string(),
                    message: e.to_string(),
                })?;
                self.client
                    .import_rule(&self.process_id, type_ref, &payload)
                    .await?;
            }
            Operation::ImportFormLayout {
                type_ref,
                page_id,
                group,
            } => {
                let payload = serde_json::to_value(group).map_err(|e| MigrationError::Write {
                    operation: "import form layout".to_string(),
                    message: e.to_string(),
                })?;
                self.client
                    .import_form_group(&self.process_id, type_ref, page_id, &payload)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldType, StateCategory};
    use std::sync::atomic::AtomicUsize;

    /// Scripted fake: fails the nth (1-based) operation with a fixed error
    struct FakeTarget {
        calls: AtomicUsize,
        fail_at: Option<usize>,
        error: Option<MigrationError>,
    }

    impl FakeTarget {
        fn succeeding() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_at: None,
                error: None,
            }
        }

        fn failing_at(n: usize, error: MigrationError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_at: Some(n),
                error: Some(error),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProcessTarget for FakeTarget {
        async fn apply_operation(&self, _operation: &Operation) -> EngineResult<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_at == Some(n) {
                return Err(self.error.clone().unwrap());
            }
            Ok(())
        }
    }

    fn make_plan(kinds: &[OperationKind]) -> MigrationPlan {
        let operations = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                let type_ref = "Custom.Bug".to_string();
                let operation = match kind {
                    OperationKind::CreateField => Operation::CreateField {
                        type_ref,
                        field: FieldDef {
                            reference_name: format!("Custom.Field{}", i),
                            name: format!("Field {}", i),
                            field_type: FieldType::String,
                            required: false,
                            default_value: None,
                            allowed_values: vec![],
                        },
                    },
                    OperationKind::ImportRule => Operation::ImportRule {
                        type_ref,
                        rule: crate::model::RuleDef {
                            id: format!("rule-{}", i),
                            conditions: vec![],
                            actions: vec![],
                            is_disabled: false,
                        },
                    },
                    OperationKind::CreateState => Operation::CreateState {
                        type_ref,
                        state: StateDef {
                            name: format!("State {}", i),
                            state_category: StateCategory::Proposed,
                            color: None,
                            order: i as i32,
                        },
                    },
                    OperationKind::ImportFormLayout => Operation::ImportFormLayout {
                        type_ref,
                        page_id: "page1".to_string(),
                        group: crate::model::LayoutGroup {
                            id: format!("g{}", i),
                            label: format!("Group {}", i),
                            controls: vec![],
                        },
                    },
                    other => panic!("unsupported kind in test helper: {:?}", other),
                };
                PlannedOperation {
                    id: i as OperationId,
                    operation,
                    depends_on: vec![],
                }
            })
            .collect();

        MigrationPlan {
            operations,
            issues: vec![],
        }
    }

    fn outcomes_of(results: &[OperationOutcome]) -> Vec<OutcomeKind> {
        results.iter().map(|o| o.outcome).collect()
    }

    #[tokio::test]
    async fn test_all_applied() {
        let plan = make_plan(&[OperationKind::CreateField; 3]);
        let target = FakeTarget::succeeding();

        let outcomes = apply_plan(
            &plan,
            &target,
            &ApplyOptions::default(),
            &CancelFlag::new(),
            |_, _, _| {},
        )
        .await;

        assert_eq!(outcomes_of(&outcomes), vec![OutcomeKind::Applied; 3]);
    }

    #[tokio::test]
    async fn test_abort_on_fatal_marks_remainder_skipped() {
        let plan = make_plan(&[OperationKind::CreateField; 5]);
        let target = FakeTarget::failing_at(
            3,
            MigrationError::Write {
                operation: "create field".to_string(),
                message: "403 Forbidden".to_string(),
            },
        );

        let outcomes = apply_plan(
            &plan,
            &target,
            &ApplyOptions::default(),
            &CancelFlag::new(),
            |_, _, _| {},
        )
        .await;

        assert_eq!(
            outcomes_of(&outcomes),
            vec![
                OutcomeKind::Applied,
                OutcomeKind::Applied,
                OutcomeKind::Failed,
                OutcomeKind::Skipped,
                OutcomeKind::Skipped,
            ]
        );
        // Aborted operations were never attempted
        assert_eq!(target.call_count(), 3);
        assert_eq!(outcomes[3].error.as_deref(), Some("aborted by prior failure"));
    }

    #[tokio::test]
    async fn test_tolerated_identity_failure_continues() {
        let plan = make_plan(&[
            OperationKind::CreateField,
            OperationKind::CreateField,
            OperationKind::ImportRule,
            OperationKind::CreateField,
            OperationKind::CreateField,
        ]);
        let target = FakeTarget::failing_at(
            3,
            MigrationError::IdentityResolution {
                operation: "import rule".to_string(),
                message: "identity not found".to_string(),
            },
        );
        let options = ApplyOptions {
            continue_on_rule_import_failure: true,
            ..Default::default()
        };

        let outcomes =
            apply_plan(&plan, &target, &options, &CancelFlag::new(), |_, _, _| {}).await;

        assert_eq!(
            outcomes_of(&outcomes),
            vec![
                OutcomeKind::Applied,
                OutcomeKind::Applied,
                OutcomeKind::Skipped,
                OutcomeKind::Applied,
                OutcomeKind::Applied,
            ]
        );
        assert!(outcomes[2].is_tolerated_failure());
    }

    #[tokio::test]
    async fn test_form_contribution_identity_failure_tolerated_like_rule() {
        let plan = make_plan(&[
            OperationKind::CreateField,
            OperationKind::ImportFormLayout,
            OperationKind::CreateField,
        ]);
        let target = FakeTarget::failing_at(
            2,
            MigrationError::IdentityResolution {
                operation: "import form layout".to_string(),
                message: "identity not found".to_string(),
            },
        );
        let options = ApplyOptions {
            continue_on_rule_import_failure: true,
            ..Default::default()
        };

        let outcomes =
            apply_plan(&plan, &target, &options, &CancelFlag::new(), |_, _, _| {}).await;

        assert_eq!(
            outcomes_of(&outcomes),
            vec![OutcomeKind::Applied, OutcomeKind::Skipped, OutcomeKind::Applied]
        );
        assert!(outcomes[1].is_tolerated_failure());
    }

    #[tokio::test]
    async fn test_identity_failure_without_option_is_fatal() {
        let plan = make_plan(&[OperationKind::ImportRule; 3]);
        let target = FakeTarget::failing_at(
            1,
            MigrationError::IdentityResolution {
                operation: "import rule".to_string(),
                message: "identity not found".to_string(),
            },
        );

        let outcomes = apply_plan(
            &plan,
            &target,
            &ApplyOptions::default(),
            &CancelFlag::new(),
            |_, _, _| {},
        )
        .await;

        assert_eq!(
            outcomes_of(&outcomes),
            vec![OutcomeKind::Failed, OutcomeKind::Skipped, OutcomeKind::Skipped]
        );
    }

    #[tokio::test]
    async fn test_identity_failure_on_rule_not_covered_by_field_option() {
        let plan = make_plan(&[OperationKind::ImportRule]);
        let target = FakeTarget::failing_at(
            1,
            MigrationError::IdentityResolution {
                operation: "import rule".to_string(),
                message: "identity not found".to_string(),
            },
        );
        let options = ApplyOptions {
            continue_on_identity_default_value_failure: true,
            ..Default::default()
        };

        let outcomes =
            apply_plan(&plan, &target, &options, &CancelFlag::new(), |_, _, _| {}).await;

        assert_eq!(outcomes_of(&outcomes), vec![OutcomeKind::Failed]);
    }

    #[tokio::test]
    async fn test_form_contributions_bypassed_not_attempted() {
        let plan = make_plan(&[
            OperationKind::CreateField,
            OperationKind::ImportFormLayout,
            OperationKind::CreateField,
        ]);
        let target = FakeTarget::succeeding();
        let options = ApplyOptions {
            skip_import_form_contributions: true,
            ..Default::default()
        };

        let outcomes =
            apply_plan(&plan, &target, &options, &CancelFlag::new(), |_, _, _| {}).await;

        assert_eq!(
            outcomes_of(&outcomes),
            vec![OutcomeKind::Applied, OutcomeKind::Skipped, OutcomeKind::Applied]
        );
        // Deliberate bypass, not a tolerated failure
        assert!(!outcomes[1].is_tolerated_failure());
        assert_eq!(target.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_between_operations() {
        let plan = make_plan(&[OperationKind::CreateField; 4]);
        let target = FakeTarget::succeeding();
        let cancel = CancelFlag::new();

        let cancel_for_callback = cancel.clone();
        let outcomes = apply_plan(
            &plan,
            &target,
            &ApplyOptions::default(),
            &cancel,
            move |_, completed, _| {
                if completed == 2 {
                    cancel_for_callback.cancel();
                }
            },
        )
        .await;

        assert_eq!(
            outcomes_of(&outcomes),
            vec![
                OutcomeKind::Applied,
                OutcomeKind::Applied,
                OutcomeKind::Skipped,
                OutcomeKind::Skipped,
            ]
        );
        assert_eq!(target.call_count(), 2);
        assert_eq!(outcomes[2].error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_progress_callback_counts() {
        let plan = make_plan(&[OperationKind::CreateState; 2]);
        let target = FakeTarget::succeeding();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let mut seen = Vec::new();
        runtime.block_on(async {
            apply_plan(
                &plan,
                &target,
                &ApplyOptions::default(),
                &CancelFlag::new(),
                |_, completed, total| seen.push((completed, total)),
            )
            .await
        });

        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }
}
