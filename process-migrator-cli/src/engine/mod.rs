//! The process migration engine
//!
//! A single sequential pipeline per invocation: read a source snapshot,
//! optionally read the target, diff into an ordered operation plan, apply
//! in plan order. No intra-run parallelism beyond the reader's independent
//! per-type sub-fetches.

pub mod apply;
pub mod diff;
pub mod events;
pub mod orchestrator;
pub mod plan;
pub mod reader;

pub use apply::{ApplyOptions, CancelFlag, OperationOutcome, OutcomeKind, ProcessTarget, apply_plan};
pub use diff::{DiffConflict, PlanOptions, diff_work_item_type};
pub use events::{EventLevel, EventPublisher, MigrationEvent};
pub use orchestrator::{MigrationEngine, Phase, RunResult, RunStatus};
pub use plan::{MigrationPlan, Operation, OperationKind, PlannedOperation, build_plan};
