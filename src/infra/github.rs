use std::fmt::Write as _;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::GitHubSettings;
use crate::domain::repository::RepositorySlug;
use crate::domain::run::PullRequest;
use crate::error::{AppError, AppResult};
use crate::infra::{ensure_success, http_client, transport_error};
use crate::services::{PullRequestRequest, PullRequestService, ReferenceDocument};

const SERVICE: &str = "GitHub";

static PULL_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://github\.com/([^/\s]+)/([^/\s]+)/pull/(\d+)")
        .expect("PULL_URL_RE regex should compile")
});

pub struct GitHubClient {
    http: Client,
    api_url: String,
    has_token: bool,
    files_limit: usize,
}

impl GitHubClient {
    pub fn new(settings: &GitHubSettings, timeout: Duration, files_limit: usize) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        if let Some(token) = settings.token.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|_| AppError::Configuration("GitHub token is not a valid header".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(Self {
            http: http_client(timeout, headers)?,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            has_token: settings.token.is_some(),
            files_limit,
        })
    }

    /// Title, author, state and body of a pull request plus its changed files.
    #[instrument(skip(self))]
    pub async fn fetch_pull_request(&self, url: &str) -> AppResult<ReferenceDocument> {
        let (slug, number) = parse_pull_url(url)
            .ok_or_else(|| AppError::SourceHost(format!("unsupported pull request URL: {url}")))?;
        let base = format!("{}/repos/{slug}/pulls/{number}", self.api_url);

        let pull: PullResponse = self.get_json(&base, &[]).await?;
        let per_page = self.files_limit.clamp(1, 100).to_string();
        let files: Vec<PullFile> = self
            .get_json(&format!("{base}/files"), &[("per_page", per_page.as_str())])
            .await?;
        debug!(files = files.len(), "pull request fetched");

        Ok(ReferenceDocument {
            title: format!("{slug}#{number} {}", pull.title),
            text: render_pull_request(&pull, &files, self.files_limit),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> AppResult<T> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|err| transport_error(SERVICE, err, AppError::SourceHost))?;
        let response = ensure_success(SERVICE, response, AppError::SourceHost).await?;
        response
            .json()
            .await
            .map_err(|err| AppError::SourceHost(format!("failed to parse GitHub response: {err}")))
    }
}

#[async_trait]
impl PullRequestService for GitHubClient {
    #[instrument(skip_all, fields(repository = %repository, head = %request.head))]
    async fn open_pull_request(
        &self,
        repository: &RepositorySlug,
        request: &PullRequestRequest,
    ) -> AppResult<PullRequest> {
        if !self.has_token {
            return Err(AppError::Configuration(
                "GitHub token not configured; cannot open a pull request".to_string(),
            ));
        }
        let response = self
            .http
            .post(format!("{}/repos/{repository}/pulls", self.api_url))
            .json(&CreatePullRequest {
                title: &request.title,
                body: &request.body,
                head: &request.head,
                base: &request.base,
            })
            .send()
            .await
            .map_err(|err| AppError::Publish(format!("pull request creation failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let hint = if status == StatusCode::UNPROCESSABLE_ENTITY {
                " (a pull request for this branch may already exist)"
            } else {
                ""
            };
            return Err(AppError::Publish(format!(
                "GitHub rejected the pull request with {status}{hint}: {}",
                body.trim()
            )));
        }

        let created: CreatedPullRequest = response.json().await.map_err(|err| {
            AppError::Publish(format!("failed to parse pull request response: {err}"))
        })?;
        Ok(PullRequest {
            number: created.number,
            url: created.html_url,
        })
    }
}

fn parse_pull_url(url: &str) -> Option<(RepositorySlug, u64)> {
    let captures = PULL_URL_RE.captures(url)?;
    let slug = RepositorySlug {
        owner: captures[1].to_string(),
        name: captures[2].to_string(),
    };
    Some((slug, captures[3].parse().ok()?))
}

fn render_pull_request(pull: &PullResponse, files: &[PullFile], limit: usize) -> String {
    let author = pull
        .user
        .as_ref()
        .map(|user| user.login.as_str())
        .unwrap_or("unknown");
    let mut text = format!(
        "Title: {}\nAuthor: {author}\nState: {}\nURL: {}\n\nBody:\n{}\n",
        pull.title,
        pull.state,
        pull.html_url,
        pull.body.as_deref().unwrap_or_default().trim()
    );
    for file in files.iter().take(limit) {
        let _ = write!(
            text,
            "\n--- {} ({}, +{}/-{}) ---\n{}\n",
            file.filename,
            file.status,
            file.additions,
            file.deletions,
            file.patch.as_deref().unwrap_or_default()
        );
    }
    text
}

#[derive(Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Deserialize)]
struct CreatedPullRequest {
    number: u64,
    html_url: String,
}

#[derive(Deserialize)]
struct PullResponse {
    title: String,
    state: String,
    html_url: String,
    body: Option<String>,
    user: Option<PullUser>,
}

#[derive(Deserialize)]
struct PullUser {
    login: String,
}

#[derive(Deserialize)]
struct PullFile {
    filename: String,
    status: String,
    additions: u64,
    deletions: u64,
    patch: Option<String>,
}
