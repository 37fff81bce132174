use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::JiraSettings;
use crate::error::{AppError, AppResult};
use crate::infra::{basic_auth, ensure_success, http_client, transport_error};
use crate::services::ReferenceDocument;

const SERVICE: &str = "Confluence";

static PAGE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/pages/(\d+)").expect("PAGE_PATH_RE regex should compile"));
static BLOCK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(p|div|br|li|tr|h[1-6]|pre|table)\b[^>]*>")
        .expect("BLOCK_TAG_RE regex should compile")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("TAG_RE regex should compile"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("BLANK_LINES_RE regex should compile"));

/// Reads wiki pages with the same Atlassian credentials used for Jira.
pub struct ConfluenceClient {
    http: Client,
    email: Option<String>,
    token: Option<String>,
}

impl ConfluenceClient {
    pub fn new(settings: &JiraSettings, timeout: Duration) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(Self {
            http: http_client(timeout, headers)?,
            email: settings.email.clone(),
            token: settings.token.clone(),
        })
    }

    #[instrument(skip(self))]
    pub async fn fetch_page(&self, url: &str) -> AppResult<ReferenceDocument> {
        let (email, token) = match (self.email.as_deref(), self.token.as_deref()) {
            (Some(email), Some(token)) => (email, token),
            _ => {
                return Err(AppError::Configuration(
                    "Atlassian credentials are required to read wiki pages".to_string(),
                ));
            }
        };
        let (origin, page_id) = page_location(url)
            .ok_or_else(|| AppError::SourceHost(format!("no page id in wiki URL: {url}")))?;

        let response = self
            .http
            .get(format!("{origin}/wiki/rest/api/content/{page_id}"))
            .query(&[("expand", "body.view,title")])
            .header(AUTHORIZATION, basic_auth(email, token))
            .send()
            .await
            .map_err(|err| transport_error(SERVICE, err, AppError::SourceHost))?;
        let response = ensure_success(SERVICE, response, AppError::SourceHost).await?;
        let page: ContentResponse = response.json().await.map_err(|err| {
            AppError::SourceHost(format!("failed to parse Confluence response: {err}"))
        })?;

        let text = strip_html(&page.body.view.value);
        debug!(page_id = %page_id, chars = text.chars().count(), "wiki page fetched");
        Ok(ReferenceDocument {
            title: page.title,
            text,
        })
    }
}

/// Site origin and page id from either `/pages/<id>/...` or `?pageId=<id>`.
fn page_location(raw: &str) -> Option<(String, String)> {
    let url = Url::parse(raw).ok()?;
    let origin = url.origin().ascii_serialization();
    if let Some(captures) = PAGE_PATH_RE.captures(url.path()) {
        return Some((origin, captures[1].to_string()));
    }
    url.query_pairs()
        .find(|(name, value)| name == "pageId" && value.chars().all(|c| c.is_ascii_digit()))
        .filter(|(_, value)| !value.is_empty())
        .map(|(_, value)| (origin, value.into_owned()))
}

/// Flattens rendered page HTML into plain text with one block per line.
pub fn strip_html(html: &str) -> String {
    let text = BLOCK_TAG_RE.replace_all(html, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_LINES_RE.replace_all(&text, "\n\n").trim().to_string()
}

#[derive(Deserialize)]
struct ContentResponse {
    title: String,
    body: ContentBody,
}

#[derive(Deserialize)]
struct ContentBody {
    view: ContentView,
}

#[derive(Deserialize)]
struct ContentView {
    value: String,
}
