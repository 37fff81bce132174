use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::config::JiraSettings;
use crate::domain::ticket::{TicketKey, TicketRecord};
use crate::error::{AppError, AppResult};
use crate::infra::{basic_auth, ensure_success, http_client, transport_error};
use crate::services::IssueTrackerService;

const SERVICE: &str = "Jira";

pub struct JiraClient {
    http: Client,
    base_url: Option<String>,
    email: Option<String>,
    token: Option<String>,
}

impl JiraClient {
    pub fn new(settings: &JiraSettings, timeout: Duration) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(Self {
            http: http_client(timeout, headers)?,
            base_url: settings.base_url.clone(),
            email: settings.email.clone(),
            token: settings.token.clone(),
        })
    }

    fn api_details(&self) -> AppResult<(&str, &str, &str)> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| AppError::Configuration("Jira base URL not configured".to_string()))?;
        let email = self
            .email
            .as_deref()
            .ok_or_else(|| AppError::Configuration("Jira email not configured".to_string()))?;
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| AppError::Configuration("Jira API token not configured".to_string()))?;
        Ok((base_url, email, token))
    }

    fn issue_endpoint(base_url: &str, key: &TicketKey) -> String {
        format!("{}/rest/api/2/issue/{}", base_url.trim_end_matches('/'), key)
    }

    fn browse_url(base_url: &str, key: &TicketKey) -> String {
        format!("{}/browse/{}", base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl IssueTrackerService for JiraClient {
    #[instrument(skip_all, fields(key = %key))]
    async fn fetch_ticket(&self, key: &TicketKey) -> AppResult<TicketRecord> {
        let (base_url, email, token) = self.api_details()?;

        let response = self
            .http
            .get(Self::issue_endpoint(base_url, key))
            .header(AUTHORIZATION, basic_auth(email, token))
            .send()
            .await
            .map_err(|err| transport_error(SERVICE, err, AppError::IssueTracker))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::Input(format!(
                "ticket {key} does not exist or is not visible to {email}"
            )));
        }
        let response = ensure_success(SERVICE, response, AppError::IssueTracker).await?;
        let payload: JiraIssueResponse = response.json().await.map_err(|err| {
            AppError::IssueTracker(format!("failed to parse Jira response: {err}"))
        })?;

        let record = payload.into_record(key, Self::browse_url(base_url, key));
        debug!(
            summary = %record.summary,
            description_chars = record.description.chars().count(),
            custom_fields = record.custom_fields.len(),
            "ticket fetched"
        );
        Ok(record)
    }
}

#[derive(Deserialize)]
struct JiraIssueResponse {
    fields: Map<String, Value>,
}

impl JiraIssueResponse {
    fn into_record(self, key: &TicketKey, url: String) -> TicketRecord {
        let text = |name: &str| {
            self.fields
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let custom_fields = self
            .fields
            .iter()
            .filter(|(name, _)| name.starts_with("customfield_"))
            .filter_map(|(name, value)| field_text(value).map(|text| (name.clone(), text)))
            .collect::<BTreeMap<_, _>>();

        TicketRecord {
            key: key.clone(),
            summary: text("summary"),
            description: text("description"),
            custom_fields,
            url: Some(url),
        }
    }
}

/// Plain strings, select options (`{"value": ..}`) and single-URL objects.
fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Object(object) => ["value", "url", "name"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .map(|text| text.trim().to_string()),
        _ => None,
    }
}
