//! Source reader: builds a self-contained process snapshot
//!
//! Reads either a live account (REST) or an exported file. A live read
//! fetches every work item type's fields, states, rules, and layout as
//! independent concurrent requests; each sub-fetch fails soft. One broken
//! endpoint degrades that one type's collection to empty with a warning
//! instead of blocking the whole scan.

use std::path::Path;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use crate::api::{ProcessClient, ProcessInfo};
use crate::error::{EngineResult, MigrationError};
use crate::model::ProcessModel;

/// Upper bound on work item types scanned at once; each type issues four
/// requests of its own
const TYPE_FETCH_CONCURRENCY: usize = 4;

/// Find a process by display name, case-insensitively
pub async fn find_process(
    client: &ProcessClient,
    process_name: &str,
) -> EngineResult<Option<ProcessInfo>> {
    let processes = client.list_processes().await?;
    Ok(processes
        .into_iter()
        .find(|p| p.name.eq_ignore_ascii_case(process_name)))
}

/// Read a full process snapshot from a live account, resolving the process
/// by name first
pub async fn read_from_api(
    client: &ProcessClient,
    process_name: &str,
) -> EngineResult<ProcessModel> {
    let info = find_process(client, process_name)
        .await?
        .ok_or_else(|| MigrationError::NotFound {
            resource: format!("process '{}'", process_name),
        })?;

    read_process(client, info).await
}

/// Read a full snapshot of an already-resolved process
pub async fn read_process(
    client: &ProcessClient,
    info: ProcessInfo,
) -> EngineResult<ProcessModel> {
    // The list endpoint returns a summary; the detail endpoint carries the
    // parent process type id needed to recreate the process elsewhere
    let info = match client.get_process(&info.id).await {
        Ok(detail) => detail,
        Err(e) => {
            warn!("failed to get process detail for {}: {}", info.id, e);
            info
        }
    };

    info!("reading process '{}' ({})", info.name, info.id);

    let type_responses = client.get_work_item_types(&info.id).await?;
    debug!("{} work item types to scan", type_responses.len());

    // Per-type sub-fetches have no ordering dependency on each other;
    // `buffered` keeps the bound without reordering the types
    let fetches = type_responses.into_iter().map(|wit| {
        let process_id = info.id.clone();
        async move {
            let type_ref = wit.reference();
            let mut model = wit.into_model();

            let (fields, states, rules, layout) = tokio::join!(
                client.get_fields(&process_id, &type_ref),
                client.get_states(&process_id, &type_ref),
                client.get_rules(&process_id, &type_ref),
                client.get_layout(&process_id, &type_ref),
            );

            match fields {
                Ok(fields) => model.fields = fields.into_iter().map(|f| f.into_model()).collect(),
                Err(e) => warn!("failed to get fields for {}: {}", type_ref, e),
            }
            match states {
                Ok(states) => model.states = states.into_iter().map(|s| s.into_model()).collect(),
                Err(e) => warn!("failed to get states for {}: {}", type_ref, e),
            }
            match rules {
                Ok(rules) => model.rules = rules.into_iter().map(|r| r.into_model()).collect(),
                Err(e) => warn!("failed to get rules for {}: {}", type_ref, e),
            }
            match layout {
                Ok(layout) => model.layout = Some(layout.into_model()),
                Err(e) => warn!("failed to get layout for {}: {}", type_ref, e),
            }

            model
        }
    });

    let work_item_types = stream::iter(fetches)
        .buffered(TYPE_FETCH_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

    Ok(ProcessModel {
        id: info.id,
        name: info.name,
        description: info.description,
        reference_process_id: info.parent_process_type_id,
        work_item_types,
    })
}

/// Read a snapshot from an exported process definition file
pub fn read_from_file(path: &Path) -> EngineResult<ProcessModel> {
    if !path.exists() {
        return Err(MigrationError::NotFound {
            resource: format!("file '{}'", path.display()),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| MigrationError::Fetch {
        url: path.display().to_string(),
        message: e.to_string(),
    })?;

    serde_json::from_str(&content).map_err(|e| MigrationError::Fetch {
        url: path.display().to_string(),
        message: format!("invalid process definition: {}", e),
    })
}

/// Serialize a snapshot to a process definition file (export mode)
pub fn write_to_file(path: &Path, model: &ProcessModel) -> EngineResult<()> {
    let content = serde_json::to_string_pretty(model).map_err(|e| MigrationError::Write {
        operation: "export".to_string(),
        message: e.to_string(),
    })?;

    std::fs::write(path, content).map_err(|e| MigrationError::Write {
        operation: "export".to_string(),
        message: format!("{}: {}", path.display(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        FieldDef, FieldType, StateCategory, StateDef, WorkItemTypeModel,
    };
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_model() -> ProcessModel {
        ProcessModel {
            id: "proc-1".to_string(),
            name: "Agile Copy".to_string(),
            description: Some("exported".to_string()),
            reference_process_id: Some("adcc42ab-9882-485e-a3ed-7678f01f66bc".to_string()),
            work_item_types: vec![WorkItemTypeModel {
                name: "Bug".to_string(),
                reference_name: "Custom.Bug".to_string(),
                description: None,
                color: Some("CC293D".to_string()),
                icon: Some("icon_insect".to_string()),
                is_disabled: false,
                fields: vec![FieldDef {
                    reference_name: "Custom.Severity".to_string(),
                    name: "Severity".to_string(),
                    field_type: FieldType::PicklistString,
                    required: true,
                    default_value: Some("Low".to_string()),
                    allowed_values: vec!["Low".to_string(), "High".to_string()],
                }],
                states: vec![StateDef {
                    name: "New".to_string(),
                    state_category: StateCategory::Proposed,
                    color: Some("b2b2b2".to_string()),
                    order: 1,
                }],
                rules: vec![],
                layout: None,
            }],
        }
    }

    #[test]
    fn test_round_trip_export_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process.json");
        let model = make_model();

        write_to_file(&path, &model).unwrap();
        let restored = read_from_file(&path).unwrap();

        assert_eq!(restored, model);
    }

    #[tokio::test]
    async fn test_resolved_process_reused_without_second_listing() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_apis/work/processes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"typeId": "proc-1", "name": "Agile Copy"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "typeId": "proc-1",
                "name": "Agile Copy",
                "parentProcessTypeId": "parent-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1/workitemtypes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(&server)
            .await;

        let client = ProcessClient::new(&server.uri(), "pat");
        let info = find_process(&client, "agile copy").await.unwrap().unwrap();
        let model = read_process(&client, info).await.unwrap();

        assert_eq!(model.id, "proc-1");
        assert_eq!(model.reference_process_id.as_deref(), Some("parent-1"));
        // The `.expect(1)` on the list mock fails the test on server drop if
        // reading the snapshot listed processes a second time
    }

    #[tokio::test]
    async fn test_live_read_preserves_type_declaration_order() {
        let server = MockServer::start().await;
        let refs: Vec<String> = (0..6).map(|i| format!("Custom.Type{}", i)).collect();
        let types: Vec<serde_json::Value> = refs
            .iter()
            .map(|r| json!({"referenceName": r, "name": r}))
            .collect();

        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "typeId": "proc-1",
                "name": "Agile Copy"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1/workitemtypes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": types})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("/workitemtypes/[^/]+/fields$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("/workitemtypes/[^/]+/states$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("/workitemtypes/[^/]+/rules$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("/workitemtypes/[^/]+/layout$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pages": []})))
            .mount(&server)
            .await;

        let client = ProcessClient::new(&server.uri(), "pat");
        let info = ProcessInfo {
            id: "proc-1".to_string(),
            name: "Agile Copy".to_string(),
            description: None,
            parent_process_type_id: None,
        };
        let model = read_process(&client, info).await.unwrap();

        // More types than the fetch bound; order must still match the list
        let got: Vec<&str> = model
            .work_item_types
            .iter()
            .map(|w| w.reference_name.as_str())
            .collect();
        assert_eq!(got, refs.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_broken_sub_fetch_degrades_to_empty() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "typeId": "proc-1",
                "name": "Agile Copy"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1/workitemtypes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"referenceName": "Custom.Bug", "name": "Bug"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1/workitemtypes/Custom.Bug/fields"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1/workitemtypes/Custom.Bug/states"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"name": "New", "stateCategory": "Proposed"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1/workitemtypes/Custom.Bug/rules"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_apis/work/processes/proc-1/workitemtypes/Custom.Bug/layout"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pages": []})))
            .mount(&server)
            .await;

        let client = ProcessClient::new(&server.uri(), "pat");
        let info = ProcessInfo {
            id: "proc-1".to_string(),
            name: "Agile Copy".to_string(),
            description: None,
            parent_process_type_id: None,
        };
        let model = read_process(&client, info).await.unwrap();

        // The broken fields endpoint degrades to empty; siblings still load
        assert!(model.work_item_types[0].fields.is_empty());
        assert_eq!(model.work_item_types[0].states.len(), 1);
        assert_eq!(model.work_item_types[0].states[0].name, "New");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = read_from_file(Path::new("/nonexistent/process.json")).unwrap_err();
        assert!(matches!(err, MigrationError::NotFound { .. }));
    }

    #[test]
    fn test_malformed_file_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = read_from_file(&path).unwrap_err();
        assert!(matches!(err, MigrationError::Fetch { .. }));
    }
}
