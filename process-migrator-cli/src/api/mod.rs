//! Work item process REST API module
//!
//! Thin, typed surface over the `_apis/work/processes` endpoint family:
//! listing processes, fetching process/field/state/rule/layout definitions,
//! and the mutating equivalents used by the target writer.

pub mod client;
pub mod models;

pub use client::ProcessClient;
pub use models::{
    FieldResponse, LayoutResponse, ListResponse, ProcessInfo, RuleResponse, StateResponse,
    WorkItemTypeResponse, parse_field_type, parse_state_category,
};
