//! Migration orchestrator
//!
//! Drives reader → plan builder → writer for the three run modes and owns
//! the run lifecycle: phase transitions, progress/log events, cooperative
//! cancellation, and the terminal `RunResult`. At most one run may be
//! active per engine instance; the run handle is occupied atomically at
//! start and released when the run ends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ProcessClient;
use crate::config::{MigrationConfig, MigrationOptions, Mode};
use crate::error::{EngineResult, MigrationError};
use crate::model::{ProcessModel, validate};

use super::apply::{ApiTarget, ApplyOptions, CancelFlag, OperationOutcome, apply_plan};
use super::diff::PlanOptions;
use super::events::{EventLevel, EventPublisher, MigrationEvent};
use super::plan::{MigrationPlan, build_plan};
use super::reader;

/// Pipeline phases, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ReadingSource,
    ReadingTarget,
    Planning,
    Applying,
}

impl Phase {
    pub fn description(&self) -> &'static str {
        match self {
            Self::ReadingSource => "Reading source process",
            Self::ReadingTarget => "Reading target process",
            Self::Planning => "Building migration plan",
            Self::Applying => "Applying operations",
        }
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Immutable record of one run, created when the run ends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub id: String,
    pub mode: Mode,
    pub status: RunStatus,
    pub source_url: String,
    pub target_url: String,
    pub source_process_name: String,
    pub target_process_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub operation_outcomes: Vec<OperationOutcome>,
}

impl RunResult {
    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// The migration engine. One instance supports one active run at a time;
/// subscribe to events before calling `run`.
pub struct MigrationEngine {
    events: EventPublisher,
    cancel: CancelFlag,
    running: Arc<AtomicBool>,
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the run handle when the run ends, whatever the outcome
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MigrationEngine {
    pub fn new() -> Self {
        Self {
            events: EventPublisher::default(),
            cancel: CancelFlag::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MigrationEvent> {
        self.events.subscribe()
    }

    /// Cancellation flag for this engine. Cancelling takes effect between
    /// operations and between phases, never mid-operation.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run a migration. Fails fast with `Config` before any I/O on an
    /// invalid mode/config combination, and with `AlreadyRunning` if a run
    /// is active on this engine. Pipeline failures do not return `Err`;
    /// they end up in the `RunResult`.
    pub async fn run(&self, mode: Mode, config: &MigrationConfig) -> EngineResult<RunResult> {
        config.validate(mode)?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MigrationError::AlreadyRunning);
        }
        let _guard = RunGuard(self.running.clone());

        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        self.events.log(
            EventLevel::Info,
            format!("Starting {} operation...", mode.as_str()),
        );

        let outcome = match mode {
            Mode::Export => self.run_export(config).await.map(|_| Vec::new()),
            Mode::Import | Mode::Migrate => self.run_against_target(mode, config).await,
        };

        let completed_at = Utc::now();
        let (status, error, operation_outcomes) = match outcome {
            Ok(outcomes) => {
                let status = if self.cancel.is_cancelled() {
                    RunStatus::Cancelled
                } else {
                    status_from_outcomes(&outcomes)
                };
                (status, None, outcomes)
            }
            Err(MigrationError::Cancelled) => (RunStatus::Cancelled, None, Vec::new()),
            Err(e) => (RunStatus::Failed, Some(e.to_string()), Vec::new()),
        };

        match status {
            RunStatus::Success => {
                self.events.complete(true, None);
            }
            RunStatus::Partial => {
                self.events.log(
                    EventLevel::Warning,
                    "Run completed with skipped operations",
                );
                self.events.complete(true, None);
            }
            RunStatus::Cancelled => {
                self.events.log(EventLevel::Warning, "Migration cancelled by user");
                self.events.complete(false, Some("cancelled".to_string()));
            }
            RunStatus::Failed => {
                if let Some(message) = &error {
                    self.events.log(EventLevel::Error, message.clone());
                }
                self.events.complete(false, error.clone());
            }
        }

        Ok(RunResult {
            id: run_id,
            mode,
            status,
            source_url: config.source_account_url.clone().unwrap_or_default(),
            target_url: config.target_account_url.clone().unwrap_or_default(),
            source_process_name: config.source_process_name.clone().unwrap_or_default(),
            target_process_name: config
                .effective_target_process_name()
                .unwrap_or_default()
                .to_string(),
            started_at,
            completed_at,
            error,
            operation_outcomes,
        })
    }

    /// Export: source account → process definition file
    async fn run_export(&self, config: &MigrationConfig) -> EngineResult<()> {
        let total = 3;
        self.phase(Phase::ReadingSource, 1, total);
        let client = source_client(config);
        let source = reader::read_from_api(
            &client,
            config.source_process_name.as_deref().unwrap_or_default(),
        )
        .await?;
        self.check_cancelled()?;
        self.log_validation(&source);

        self.events.progress("Writing process definition file", 2, total);
        let path = export_path(config)?;
        reader::write_to_file(path, &source)?;
        info!("exported process '{}' to {}", source.name, path.display());

        self.events.progress("Complete", total, total);
        Ok(())
    }

    /// Import and migrate share everything but where the source snapshot
    /// comes from
    async fn run_against_target(
        &self,
        mode: Mode,
        config: &MigrationConfig,
    ) -> EngineResult<Vec<OperationOutcome>> {
        let total = 4;

        self.phase(Phase::ReadingSource, 1, total);
        let source = match mode {
            Mode::Import => reader::read_from_file(export_path(config)?)?,
            _ => {
                let client = source_client(config);
                reader::read_from_api(
                    &client,
                    config.source_process_name.as_deref().unwrap_or_default(),
                )
                .await?
            }
        };
        self.check_cancelled()?;
        self.log_validation(&source);

        self.phase(Phase::ReadingTarget, 2, total);
        let client = target_client(config);
        let target_name = config
            .effective_target_process_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| source.name.clone());

        let target_process_id;
        let target_snapshot: Option<ProcessModel>;
        match reader::find_process(&client, &target_name).await? {
            Some(info) => {
                target_process_id = info.id.clone();
                target_snapshot = Some(reader::read_process(&client, info).await?);
            }
            None => {
                // Target process does not exist yet: create it, then plan
                // everything as creates
                self.events.log(
                    EventLevel::Info,
                    format!("Target process '{}' not found, creating it", target_name),
                );
                let created = client
                    .create_process(
                        &target_name,
                        source.description.as_deref(),
                        source.reference_process_id.as_deref().ok_or_else(|| {
                            MigrationError::Write {
                                operation: "create process".to_string(),
                                message: "source model has no reference process id".to_string(),
                            }
                        })?,
                    )
                    .await?;
                target_process_id = created.id;
                target_snapshot = None;
            }
        }
        self.check_cancelled()?;

        self.phase(Phase::Planning, 3, total);
        let plan = build_plan(&source, target_snapshot.as_ref(), &plan_options(&config.options));
        self.report_plan(&plan)?;

        self.phase(Phase::Applying, 4, total);
        let target = ApiTarget::new(client, target_process_id);
        let events = self.events.clone();
        let outcomes = apply_plan(
            &plan,
            &target,
            &apply_options(&config.options),
            &self.cancel,
            |op, completed, op_total| {
                events.progress(op.operation.describe(), completed, op_total);
            },
        )
        .await;

        Ok(outcomes)
    }

    /// Blocking plan issues stop the run before any write
    fn report_plan(&self, plan: &MigrationPlan) -> EngineResult<()> {
        self.events.log(
            EventLevel::Info,
            format!("Plan contains {} operations", plan.len()),
        );
        for (kind, count) in plan.kind_counts() {
            self.events.log(
                EventLevel::Verbose,
                format!("  {}: {}", kind.label(), count),
            );
        }

        if plan.has_blocking_issues() {
            for issue in &plan.issues {
                warn!("blocking plan issue: {:?}", issue);
                self.events.log(EventLevel::Error, format!("{:?}", issue));
            }
            return Err(MigrationError::Write {
                operation: "plan".to_string(),
                message: format!(
                    "{} blocking conflict(s) found; resolve them or adjust options",
                    plan.issues.len()
                ),
            });
        }

        Ok(())
    }

    fn log_validation(&self, model: &ProcessModel) {
        self.events.log(
            EventLevel::Verbose,
            format!(
                "Read process '{}': {} work item types, {} child items",
                model.name,
                model.work_item_types.len(),
                model
                    .work_item_types
                    .iter()
                    .map(|w| w.child_count())
                    .sum::<usize>(),
            ),
        );
        for issue in validate(model) {
            self.events.log(
                EventLevel::Warning,
                format!("[{}] {}", issue.work_item_type, issue.detail),
            );
        }
    }

    fn phase(&self, phase: Phase, step: usize, total: usize) {
        info!("phase: {}", phase.description());
        self.events.progress(phase.description(), step, total);
    }

    fn check_cancelled(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            Err(MigrationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn export_path(config: &MigrationConfig) -> EngineResult<&std::path::Path> {
    config
        .export_file_path
        .as_deref()
        .ok_or_else(|| MigrationError::Config("exportFilePath is not set".to_string()))
}

fn source_client(config: &MigrationConfig) -> ProcessClient {
    ProcessClient::new(
        config.source_account_url.as_deref().unwrap_or_default(),
        config.source_account_token.as_deref().unwrap_or_default(),
    )
}

fn target_client(config: &MigrationConfig) -> ProcessClient {
    ProcessClient::new(
        config.target_account_url.as_deref().unwrap_or_default(),
        config.target_account_token.as_deref().unwrap_or_default(),
    )
}

fn plan_options(options: &MigrationOptions) -> PlanOptions {
    PlanOptions {
        overwrite_picklist: options.overwrite_picklist,
        tolerate_state_category_mismatch: options.tolerate_state_category_mismatch,
    }
}

fn apply_options(options: &MigrationOptions) -> ApplyOptions {
    ApplyOptions {
        continue_on_rule_import_failure: options.continue_on_rule_import_failure,
        continue_on_identity_default_value_failure: options
            .continue_on_identity_default_value_failure,
        skip_import_form_contributions: options.skip_import_form_contributions,
    }
}

/// Success only when nothing failed; tolerated skips demote to partial
fn status_from_outcomes(outcomes: &[OperationOutcome]) -> RunStatus {
    use super::apply::OutcomeKind;

    if outcomes.iter().any(|o| o.outcome == OutcomeKind::Failed) {
        RunStatus::Failed
    } else if outcomes.iter().any(|o| o.is_tolerated_failure()) {
        RunStatus::Partial
    } else {
        RunStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::apply::OutcomeKind;
    use crate::engine::plan::OperationKind;

    fn make_outcome(outcome: OutcomeKind, error: Option<&str>) -> OperationOutcome {
        OperationOutcome {
            operation_id: 0,
            kind: OperationKind::CreateField,
            description: "Create field 'x'".to_string(),
            outcome,
            error: error.map(|e| e.to_string()),
        }
    }

    #[test]
    fn test_status_success_when_all_applied() {
        let outcomes = vec![make_outcome(OutcomeKind::Applied, None); 3];
        assert_eq!(status_from_outcomes(&outcomes), RunStatus::Success);
    }

    #[test]
    fn test_status_partial_on_tolerated_skip() {
        let outcomes = vec![
            make_outcome(OutcomeKind::Applied, None),
            make_outcome(OutcomeKind::Skipped, Some("identity not found")),
        ];
        assert_eq!(status_from_outcomes(&outcomes), RunStatus::Partial);
    }

    #[test]
    fn test_status_failed_on_any_failure() {
        let outcomes = vec![
            make_outcome(OutcomeKind::Applied, None),
            make_outcome(OutcomeKind::Failed, Some("boom")),
            make_outcome(OutcomeKind::Skipped, Some("aborted by prior failure")),
        ];
        assert_eq!(status_from_outcomes(&outcomes), RunStatus::Failed);
    }

    #[test]
    fn test_deliberate_bypass_does_not_demote_success() {
        let outcomes = vec![
            make_outcome(OutcomeKind::Applied, None),
            // Bypassed form contribution: skipped without error
            make_outcome(OutcomeKind::Skipped, None),
        ];
        assert_eq!(status_from_outcomes(&outcomes), RunStatus::Success);
    }

    #[tokio::test]
    async fn test_run_fails_fast_on_invalid_config() {
        let engine = MigrationEngine::new();
        let config = MigrationConfig::default();

        let err = engine.run(Mode::Migrate, &config).await.unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[tokio::test]
    async fn test_second_concurrent_run_rejected() {
        let engine = MigrationEngine::new();

        // Occupy the handle as a running migration would
        assert!(
            engine
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        );

        let mut config = MigrationConfig::default();
        config.source_account_url = Some("https://dev.azure.com/org".to_string());
        config.source_account_token = Some("pat".to_string());
        config.source_process_name = Some("Agile Copy".to_string());
        config.export_file_path = Some(std::path::PathBuf::from("/tmp/out.json"));

        let err = engine.run(Mode::Export, &config).await.unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyRunning));
    }

    #[test]
    fn test_run_result_duration() {
        let started_at = Utc::now();
        let result = RunResult {
            id: "run-1".to_string(),
            mode: Mode::Migrate,
            status: RunStatus::Success,
            source_url: String::new(),
            target_url: String::new(),
            source_process_name: String::new(),
            target_process_name: String::new(),
            started_at,
            completed_at: started_at + chrono::Duration::milliseconds(1500),
            error: None,
            operation_outcomes: vec![],
        };

        assert_eq!(result.duration_ms(), 1500);
    }
}
