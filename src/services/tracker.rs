//! Work-item tracker seam.
//!
//! The sync engine only talks to [`WorkItemTracker`]. [`GitLabTracker`]
//! maps feature requests onto issues of one GitLab project: status and
//! priority travel as scoped labels (`status::planned`, `priority::high`).

use crate::error::AppError;
use crate::models::comment::ExternalComment;
use crate::models::feature_request::FeatureFields;
use crate::services::gitlab_client::{GitLabClient, GitLabIssue, IssuePayload};
use crate::services::retry::{with_retry, RetryPolicy};
use crate::time::{now_millis, parse_iso_millis};
use async_trait::async_trait;

/// A work item as read from the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub external_id: String,
    pub fields: FeatureFields,
    /// Last modification on the tracker (Unix ms).
    pub updated_at: i64,
}

/// Operations the sync engine needs from the tracker.
#[async_trait]
pub trait WorkItemTracker: Send + Sync {
    async fn get_work_item(&self, external_id: &str) -> Result<WorkItem, AppError>;

    async fn list_comments(&self, external_id: &str) -> Result<Vec<ExternalComment>, AppError>;

    async fn update_work_item(&self, external_id: &str, fields: &FeatureFields) -> Result<(), AppError>;

    /// Create a work item and return its external id.
    async fn create_work_item(&self, fields: &FeatureFields) -> Result<String, AppError>;
}

const STATUS_PREFIX: &str = "status::";
const PRIORITY_PREFIX: &str = "priority::";

/// Statuses that close the issue.
const CLOSED_STATUSES: &[&str] = &["closed", "done", "completed", "rejected"];

/// GitLab issues as the tracker.
#[derive(Debug, Clone)]
pub struct GitLabTracker {
    client: GitLabClient,
    project: String,
    retry: RetryPolicy,
}

impl GitLabTracker {
    pub fn new(client: GitLabClient, project: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            project: project.into(),
            retry,
        }
    }

    fn parse_iid(external_id: &str) -> Result<i64, AppError> {
        external_id.parse::<i64>().map_err(|_| {
            AppError::validation_field(
                format!("'{}' is not a GitLab issue iid", external_id),
                "external_id",
            )
        })
    }

    async fn fetch_issue(&self, iid: i64) -> Result<GitLabIssue, AppError> {
        with_retry(&self.retry, "get_issue", || self.client.get_issue(&self.project, iid)).await
    }
}

/// Read feature fields off an issue.
fn issue_fields(issue: &GitLabIssue) -> FeatureFields {
    let scoped = |prefix: &str| {
        issue
            .labels
            .iter()
            .find_map(|l| l.strip_prefix(prefix))
            .map(str::to_string)
    };

    let status = scoped(STATUS_PREFIX).unwrap_or_else(|| {
        if issue.state == "closed" {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    });

    FeatureFields {
        title: issue.title.clone(),
        description: issue.description.clone().unwrap_or_default(),
        status,
        priority: scoped(PRIORITY_PREFIX).unwrap_or_else(|| "medium".to_string()),
    }
}

/// Label list for `fields`, keeping unrelated labels already on the issue.
fn merged_labels(existing: &[String], fields: &FeatureFields) -> String {
    let mut labels: Vec<String> = existing
        .iter()
        .filter(|l| !l.starts_with(STATUS_PREFIX) && !l.starts_with(PRIORITY_PREFIX))
        .cloned()
        .collect();
    labels.push(format!("{}{}", STATUS_PREFIX, fields.status));
    labels.push(format!("{}{}", PRIORITY_PREFIX, fields.priority));
    labels.join(",")
}

fn state_event_for(current_state: Option<&str>, status: &str) -> Option<String> {
    let wants_closed = CLOSED_STATUSES.contains(&status);
    match (current_state, wants_closed) {
        (Some("opened") | None, true) => Some("close".to_string()),
        (Some("closed"), false) => Some("reopen".to_string()),
        _ => None,
    }
}

#[async_trait]
impl WorkItemTracker for GitLabTracker {
    async fn get_work_item(&self, external_id: &str) -> Result<WorkItem, AppError> {
        let iid = Self::parse_iid(external_id)?;
        let issue = self.fetch_issue(iid).await?;
        let updated_at = parse_iso_millis(&issue.updated_at).ok_or_else(|| {
            AppError::tracker_api(format!("Issue {} has unparseable updated_at", iid))
        })?;

        Ok(WorkItem {
            external_id: external_id.to_string(),
            fields: issue_fields(&issue),
            updated_at,
        })
    }

    async fn list_comments(&self, external_id: &str) -> Result<Vec<ExternalComment>, AppError> {
        let iid = Self::parse_iid(external_id)?;
        let notes = with_retry(&self.retry, "list_issue_notes", || {
            self.client.list_issue_notes(&self.project, iid)
        })
        .await?;

        let imported_at = now_millis();
        Ok(notes
            .into_iter()
            .filter(|n| !n.system)
            .map(|n| {
                let created_at = parse_iso_millis(&n.created_at).unwrap_or_else(|| {
                    log::warn!(
                        "[comments] Note {} on issue {} has unparseable created_at '{}'; using import time",
                        n.id,
                        iid,
                        n.created_at
                    );
                    imported_at
                });
                ExternalComment {
                    external_comment_id: n.id.to_string(),
                    author_id: Some(n.author.id),
                    author_name: Some(n.author.name),
                    body: n.body,
                    created_at,
                }
            })
            .collect())
    }

    async fn update_work_item(&self, external_id: &str, fields: &FeatureFields) -> Result<(), AppError> {
        let iid = Self::parse_iid(external_id)?;
        let current = self.fetch_issue(iid).await?;

        let payload = IssuePayload {
            title: Some(fields.title.clone()),
            description: Some(fields.description.clone()),
            labels: Some(merged_labels(&current.labels, fields)),
            state_event: state_event_for(Some(current.state.as_str()), &fields.status),
        };

        with_retry(&self.retry, "update_issue", || {
            self.client.update_issue(&self.project, iid, &payload)
        })
        .await?;

        Ok(())
    }

    /// GitLab cannot create a closed issue, so a closed status takes a second
    /// call. The issue exists once the first call returns: a failed close is
    /// only logged, and the status label still carries the status until the
    /// next push closes it.
    async fn create_work_item(&self, fields: &FeatureFields) -> Result<String, AppError> {
        let payload = IssuePayload {
            title: Some(fields.title.clone()),
            description: Some(fields.description.clone()),
            labels: Some(merged_labels(&[], fields)),
            state_event: None,
        };

        // Not retried: a create that timed out may still have landed.
        let issue = self.client.create_issue(&self.project, &payload).await?;

        if state_event_for(None, &fields.status).is_some() {
            let close = IssuePayload {
                state_event: Some("close".to_string()),
                ..Default::default()
            };
            let closed = with_retry(&self.retry, "update_issue", || {
                self.client.update_issue(&self.project, issue.iid, &close)
            })
            .await;
            if let Err(e) = closed {
                log::warn!("[feature-sync] Created issue {} but could not close it: {}", issue.iid, e);
            }
        }

        Ok(issue.iid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(labels: &[&str], state: &str) -> GitLabIssue {
        GitLabIssue {
            iid: 12,
            title: "Dark mode".to_string(),
            description: None,
            state: state.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            updated_at: "2024-01-02T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_issue_fields_from_scoped_labels() {
        let fields = issue_fields(&issue(&["ux", "status::planned", "priority::high"], "opened"));
        assert_eq!(fields.status, "planned");
        assert_eq!(fields.priority, "high");
        assert_eq!(fields.description, "");
    }

    #[test]
    fn test_issue_fields_defaults_follow_state() {
        let fields = issue_fields(&issue(&[], "closed"));
        assert_eq!(fields.status, "closed");
        assert_eq!(fields.priority, "medium");
    }

    #[test]
    fn test_merged_labels_replaces_scoped_only() {
        let existing = vec!["ux".to_string(), "status::open".to_string(), "priority::low".to_string()];
        let fields = FeatureFields {
            title: "t".to_string(),
            description: String::new(),
            status: "planned".to_string(),
            priority: "high".to_string(),
        };
        assert_eq!(merged_labels(&existing, &fields), "ux,status::planned,priority::high");
    }

    #[test]
    fn test_state_event() {
        assert_eq!(state_event_for(Some("opened"), "done").as_deref(), Some("close"));
        assert_eq!(state_event_for(Some("closed"), "open").as_deref(), Some("reopen"));
        assert_eq!(state_event_for(Some("opened"), "planned"), None);
        assert_eq!(state_event_for(None, "open"), None);
    }

    #[test]
    fn test_parse_iid_rejects_non_numeric() {
        assert_eq!(GitLabTracker::parse_iid("17").unwrap(), 17);
        assert!(matches!(
            GitLabTracker::parse_iid("abc"),
            Err(AppError::Validation { .. })
        ));
    }
}
