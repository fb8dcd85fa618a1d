//! GitLab REST v4 client.
//!
//! One client type serves two roles: the feature tracker (issues and their
//! notes) and repository content (tree listing and raw files). Requests carry
//! a `PRIVATE-TOKEN` header; list endpoints are followed page by page through
//! the `x-next-page` header.

use crate::error::AppError;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Page size requested from list endpoints (GitLab's maximum).
const PER_PAGE: &str = "100";

/// Connection settings for one GitLab instance.
#[derive(Debug, Clone)]
pub struct GitLabClientConfig {
    /// Instance root, e.g. `https://gitlab.example.com`.
    pub base_url: String,

    /// Personal or project access token.
    pub token: String,

    /// Whole-request timeout enforced by the HTTP client.
    pub timeout_secs: u64,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    pub id: i64,
    pub name: String,
}

/// An issue, as far as feature sync cares.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabIssue {
    pub iid: i64,
    pub title: String,
    pub description: Option<String>,
    /// `opened` or `closed`.
    pub state: String,
    pub labels: Vec<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabNote {
    pub id: i64,
    pub body: String,
    pub author: GitLabUser,
    pub created_at: String,
    /// Notes GitLab writes itself ("changed the description", label events).
    pub system: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabTreeEntry {
    /// `blob` for files, `tree` for directories.
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

impl GitLabTreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// Body for creating or editing an issue. Unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssuePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Comma-separated. Replaces every label on the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,

    /// `close` or `reopen`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_event: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct TreeQuery<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
    recursive: bool,
}

/// `group/project` as a single URL path segment.
fn encode_project(project: &str) -> String {
    urlencoding::encode(project).into_owned()
}

fn header_number<T: std::str::FromStr>(response: &Response, name: impl header::AsHeaderName) -> Option<T> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Pull a readable reason out of an error body. GitLab uses `message` or
/// `error`, and `message` is sometimes an object of field errors.
fn body_reason(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let reason = value.get("message").or_else(|| value.get("error"))?;
    Some(
        reason
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| reason.to_string()),
    )
}

/// Classify a failed response.
fn api_error(status: StatusCode, retry_after_secs: Option<u64>, body: &str, endpoint: &str) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED => AppError::authentication("GitLab rejected the access token"),
        StatusCode::NOT_FOUND => AppError::not_found_with_id("GitLab resource", endpoint),
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited { retry_after_secs },
        StatusCode::FORBIDDEN => {
            AppError::tracker_api_full("Token lacks access to this resource", status.as_u16(), endpoint)
        }
        _ => {
            let message = body_reason(body)
                .unwrap_or_else(|| format!("GitLab answered {}: {}", status.as_u16(), body.trim()));
            AppError::tracker_api_full(message, status.as_u16(), endpoint)
        }
    }
}

impl GitLabClient {
    pub fn new(config: GitLabClientConfig) -> Result<Self, AppError> {
        let token = header::HeaderValue::from_str(&config.token)
            .map_err(|_| AppError::authentication("Access token contains invalid characters"))?;

        let mut headers = header::HeaderMap::new();
        headers.insert("PRIVATE-TOKEN", token);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v4{}", self.base_url, endpoint)
    }

    /// Send and turn any non-2xx answer into an error.
    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response, AppError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = header_number(&response, header::RETRY_AFTER);
        let body = response.text().await.unwrap_or_default();
        Err(api_error(status, retry_after, &body, endpoint))
    }

    async fn decode<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T, AppError> {
        response
            .json::<T>()
            .await
            .map_err(|e| AppError::internal(format!("Unexpected GitLab response from {}: {}", endpoint, e)))
    }

    /// Every page of a list endpoint, concatenated.
    async fn list_all<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &impl Serialize,
    ) -> Result<Vec<T>, AppError> {
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let request = self
                .http
                .get(self.url(endpoint))
                .query(query)
                .query(&[("page", page.to_string().as_str()), ("per_page", PER_PAGE)]);
            let response = self.send(request, endpoint).await?;
            let next: Option<u32> = header_number(&response, "x-next-page");

            items.extend(Self::decode::<Vec<T>>(response, endpoint).await?);

            match next {
                Some(next) if next > page => page = next,
                _ => return Ok(items),
            }
        }
    }

    pub async fn get_issue(&self, project: &str, iid: i64) -> Result<GitLabIssue, AppError> {
        let endpoint = format!("/projects/{}/issues/{}", encode_project(project), iid);
        let response = self.send(self.http.get(self.url(&endpoint)), &endpoint).await?;
        Self::decode(response, &endpoint).await
    }

    pub async fn create_issue(&self, project: &str, payload: &IssuePayload) -> Result<GitLabIssue, AppError> {
        let endpoint = format!("/projects/{}/issues", encode_project(project));
        let request = self.http.post(self.url(&endpoint)).json(payload);
        let response = self.send(request, &endpoint).await?;
        Self::decode(response, &endpoint).await
    }

    pub async fn update_issue(
        &self,
        project: &str,
        iid: i64,
        payload: &IssuePayload,
    ) -> Result<GitLabIssue, AppError> {
        let endpoint = format!("/projects/{}/issues/{}", encode_project(project), iid);
        let request = self.http.put(self.url(&endpoint)).json(payload);
        let response = self.send(request, &endpoint).await?;
        Self::decode(response, &endpoint).await
    }

    /// Notes on an issue, oldest first. Includes system notes.
    pub async fn list_issue_notes(&self, project: &str, iid: i64) -> Result<Vec<GitLabNote>, AppError> {
        let endpoint = format!("/projects/{}/issues/{}/notes", encode_project(project), iid);
        self.list_all(&endpoint, &[("sort", "asc"), ("order_by", "created_at")])
            .await
    }

    /// Recursive listing of `path` (or the whole repository) at `git_ref`.
    pub async fn list_repository_tree(
        &self,
        project: &str,
        path: Option<&str>,
        git_ref: &str,
    ) -> Result<Vec<GitLabTreeEntry>, AppError> {
        let endpoint = format!("/projects/{}/repository/tree", encode_project(project));
        let query = TreeQuery {
            git_ref,
            path,
            recursive: true,
        };
        self.list_all(&endpoint, &query).await
    }

    /// Raw bytes of one file at `git_ref`.
    pub async fn get_file_content_bytes(
        &self,
        project: &str,
        file_path: &str,
        git_ref: &str,
    ) -> Result<Vec<u8>, AppError> {
        let endpoint = format!(
            "/projects/{}/repository/files/{}/raw",
            encode_project(project),
            urlencoding::encode(file_path)
        );
        let request = self.http.get(self.url(&endpoint)).query(&[("ref", git_ref)]);
        let response = self.send(request, &endpoint).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::network(format!("Reading {} failed: {}", file_path, e)))?;
        Ok(bytes.to_vec())
    }
}
