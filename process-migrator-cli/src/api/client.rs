//! HTTP client for the work item process REST API
//!
//! Authenticates with a personal access token (basic auth, blank username)
//! and speaks to the `_apis/work/processes` endpoint family. Read calls
//! return wire models from [`super::models`]; write calls take serde_json
//! payloads built by the planner.

use log::debug;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{Value, json};

use super::models::{
    FieldResponse, LayoutResponse, ListResponse, ProcessInfo, RuleResponse, StateResponse,
    WorkItemTypeResponse,
};
use crate::error::{EngineResult, MigrationError};

const API_VERSION: &str = "7.1";
/// Picklist endpoints shipped behind a preview flag longer than the rest
const LISTS_API_VERSION: &str = "7.1-preview.1";

/// Client for one account (organization) URL + PAT pair
#[derive(Debug, Clone)]
pub struct ProcessClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ProcessClient {
    pub fn new(account_url: &str, token: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: account_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn processes_url(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("{}/_apis/work/processes", self.base_url)
        } else {
            format!("{}/_apis/work/processes/{}", self.base_url, suffix)
        }
    }

    fn wit_url(&self, process_id: &str, type_ref: &str, suffix: &str) -> String {
        let type_ref = urlencoding::encode(type_ref);
        if suffix.is_empty() {
            self.processes_url(&format!("{}/workitemtypes/{}", process_id, type_ref))
        } else {
            self.processes_url(&format!("{}/workitemtypes/{}/{}", process_id, type_ref, suffix))
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> EngineResult<Response> {
        debug!("{} {}", method, url);

        let mut request = self
            .http
            .request(method, url)
            .basic_auth("", Some(&self.token))
            .query(&[("api-version", api_version)]);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| MigrationError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(response)
    }

    /// Check status and deserialize, mapping HTTP errors onto the engine
    /// taxonomy: 404 → NotFound, 401/403 → auth Fetch, rest → Fetch
    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        api_version: &str,
    ) -> EngineResult<T> {
        let response = self.send(Method::GET, url, api_version, None).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(MigrationError::NotFound {
                resource: url.to_string(),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(MigrationError::Fetch {
                url: url.to_string(),
                message: format!("authentication failed ({})", status),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MigrationError::Fetch {
                url: url.to_string(),
                message: format!("{}: {}", status, truncate(&body, 200)),
            });
        }

        response.json::<T>().await.map_err(|e| MigrationError::Fetch {
            url: url.to_string(),
            message: format!("invalid response body: {}", e),
        })
    }

    /// Execute a mutating call, classifying failures for the writer's
    /// failure policy
    async fn write_json(
        &self,
        method: Method,
        url: &str,
        api_version: &str,
        operation: &str,
        body: &Value,
    ) -> EngineResult<Value> {
        let response = self.send(method, url, api_version, Some(body)).await?;
        let status = response.status();

        if status.is_success() {
            // Some endpoints (e.g. picklist value add) return empty bodies
            return Ok(response.json::<Value>().await.unwrap_or(Value::Null));
        }

        let body_text = response.text().await.unwrap_or_default();
        if is_identity_resolution_failure(status, &body_text) {
            return Err(MigrationError::IdentityResolution {
                operation: operation.to_string(),
                message: truncate(&body_text, 300).to_string(),
            });
        }

        Err(MigrationError::Write {
            operation: operation.to_string(),
            message: format!("{}: {}", status, truncate(&body_text, 300)),
        })
    }

    // === Read surface ===

    pub async fn list_processes(&self) -> EngineResult<Vec<ProcessInfo>> {
        let url = self.processes_url("");
        let list: ListResponse<ProcessInfo> = self.read_json(&url, API_VERSION).await?;
        Ok(list.value)
    }

    pub async fn get_process(&self, process_id: &str) -> EngineResult<ProcessInfo> {
        let url = self.processes_url(process_id);
        self.read_json(&url, API_VERSION).await
    }

    pub async fn get_work_item_types(
        &self,
        process_id: &str,
    ) -> EngineResult<Vec<WorkItemTypeResponse>> {
        let url = self.processes_url(&format!("{}/workitemtypes", process_id));
        let list: ListResponse<WorkItemTypeResponse> = self.read_json(&url, API_VERSION).await?;
        Ok(list.value)
    }

    pub async fn get_fields(
        &self,
        process_id: &str,
        type_ref: &str,
    ) -> EngineResult<Vec<FieldResponse>> {
        let url = self.wit_url(process_id, type_ref, "fields");
        let list: ListResponse<FieldResponse> = self.read_json(&url, API_VERSION).await?;
        Ok(list.value)
    }

    pub async fn get_states(
        &self,
        process_id: &str,
        type_ref: &str,
    ) -> EngineResult<Vec<StateResponse>> {
        let url = self.wit_url(process_id, type_ref, "states");
        let list: ListResponse<StateResponse> = self.read_json(&url, API_VERSION).await?;
        Ok(list.value)
    }

    pub async fn get_rules(
        &self,
        process_id: &str,
        type_ref: &str,
    ) -> EngineResult<Vec<RuleResponse>> {
        let url = self.wit_url(process_id, type_ref, "rules");
        let list: ListResponse<RuleResponse> = self.read_json(&url, API_VERSION).await?;
        Ok(list.value)
    }

    /// Picklist id backing a field, if the target field is list-bound
    pub async fn get_field_picklist_id(
        &self,
        process_id: &str,
        type_ref: &str,
        field_ref: &str,
    ) -> EngineResult<Option<String>> {
        let url = self.wit_url(
            process_id,
            type_ref,
            &format!("fields/{}", urlencoding::encode(field_ref)),
        );
        let value: Value = self.read_json(&url, API_VERSION).await?;
        Ok(value
            .get("picklistId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    /// Current values of a picklist, in list order
    pub async fn get_picklist_items(&self, list_id: &str) -> EngineResult<Vec<String>> {
        let url = format!("{}/_apis/work/processes/lists/{}", self.base_url, list_id);
        let value: Value = self.read_json(&url, LISTS_API_VERSION).await?;
        Ok(value
            .get("items")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn get_layout(
        &self,
        process_id: &str,
        type_ref: &str,
    ) -> EngineResult<LayoutResponse> {
        let url = self.wit_url(process_id, type_ref, "layout");
        self.read_json(&url, API_VERSION).await
    }

    // === Write surface ===

    pub async fn create_process(
        &self,
        name: &str,
        description: Option<&str>,
        reference_process_id: &str,
    ) -> EngineResult<ProcessInfo> {
        let url = self.processes_url("");
        let body = json!({
            "name": name,
            "description": description,
            "parentProcessTypeId": reference_process_id,
        });
        let value = self
            .write_json(Method::POST, &url, API_VERSION, "create process", &body)
            .await?;
        serde_json::from_value(value).map_err(|e| MigrationError::Write {
            operation: "create process".to_string(),
            message: format!("invalid response body: {}", e),
        })
    }

    pub async fn create_work_item_type(
        &self,
        process_id: &str,
        payload: &Value,
    ) -> EngineResult<Value> {
        let url = self.processes_url(&format!("{}/workitemtypes", process_id));
        self.write_json(Method::POST, &url, API_VERSION, "create work item type", payload)
            .await
    }

    pub async fn update_work_item_type(
        &self,
        process_id: &str,
        type_ref: &str,
        payload: &Value,
    ) -> EngineResult<Value> {
        let url = self.wit_url(process_id, type_ref, "");
        self.write_json(Method::PATCH, &url, API_VERSION, "update work item type", payload)
            .await
    }

    pub async fn create_field(
        &self,
        process_id: &str,
        type_ref: &str,
        payload: &Value,
    ) -> EngineResult<Value> {
        let url = self.wit_url(process_id, type_ref, "fields");
        self.write_json(Method::POST, &url, API_VERSION, "create field", payload)
            .await
    }

    pub async fn update_field(
        &self,
        process_id: &str,
        type_ref: &str,
        field_ref: &str,
        payload: &Value,
    ) -> EngineResult<Value> {
        let url = self.wit_url(
            process_id,
            type_ref,
            &format!("fields/{}", urlencoding::encode(field_ref)),
        );
        self.write_json(Method::PATCH, &url, API_VERSION, "update field", payload)
            .await
    }

    pub async fn add_picklist_value(
        &self,
        list_id: &str,
        payload: &Value,
    ) -> EngineResult<Value> {
        let url = format!("{}/_apis/work/processes/lists/{}", self.base_url, list_id);
        self.write_json(
            Method::PUT,
            &url,
            LISTS_API_VERSION,
            "add picklist value",
            payload,
        )
        .await
    }

    pub async fn overwrite_picklist(&self, list_id: &str, payload: &Value) -> EngineResult<Value> {
        let url = format!("{}/_apis/work/processes/lists/{}", self.base_url, list_id);
        self.write_json(
            Method::PUT,
            &url,
            LISTS_API_VERSION,
            "overwrite picklist",
            payload,
        )
        .await
    }

    pub async fn create_state(
        &self,
        process_id: &str,
        type_ref: &str,
        payload: &Value,
    ) -> EngineResult<Value> {
        let url = self.wit_url(process_id, type_ref, "states");
        self.write_json(Method::POST, &url, API_VERSION, "create state", payload)
            .await
    }

    pub async fn update_state(
        &self,
        process_id: &str,
        type_ref: &str,
        state_id: &str,
        payload: &Value,
    ) -> EngineResult<Value> {
        let url = self.wit_url(process_id, type_ref, &format!("states/{}", state_id));
        self.write_json(Method::PATCH, &url, API_VERSION, "update state", payload)
            .await
    }

    pub async fn import_rule(
        &self,
        process_id: &str,
        type_ref: &str,
        payload: &Value,
    ) -> EngineResult<Value> {
        let url = self.wit_url(process_id, type_ref, "rules");
        self.write_json(Method::POST, &url, API_VERSION, "import rule", payload)
            .await
    }

    pub async fn import_form_group(
        &self,
        process_id: &str,
        type_ref: &str,
        page_id: &str,
        payload: &Value,
    ) -> EngineResult<Value> {
        let url = self.wit_url(
            process_id,
            type_ref,
            &format!("layout/pages/{}/sections/Section1/groups", page_id),
        );
        self.write_json(Method::POST, &url, API_VERSION, "import form layout", payload)
            .await
    }
}

/// Identity-not-found failures come back as 400s with a recognizable error
/// payload; everything else stays a generic write failure
fn is_identity_resolution_failure(status: StatusCode, body: &str) -> bool {
    if status != StatusCode::BAD_REQUEST {
        return false;
    }
    body.contains("TF402000")
        || body.contains("IdentityNotFoundException")
        || body.to_ascii_lowercase().contains("could not resolve identity")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
