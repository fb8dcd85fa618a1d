//! Application configuration.
//!
//! Loaded once at start-up from a JSON file. Every section has defaults so a
//! minimal file only names the tracker and the API token; secrets may come
//! from the environment instead.

use crate::error::AppError;
use crate::models::NewRepository;
use crate::services::gitlab_client::GitLabClientConfig;
use crate::services::retry::RetryPolicy;
use crate::services::worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "roadmap-sync.json";

/// Overrides `tracker.token`.
pub const TRACKER_TOKEN_ENV: &str = "ROADMAP_SYNC_TRACKER_TOKEN";

/// Overrides `server.api_token`.
pub const API_TOKEN_ENV: &str = "ROADMAP_SYNC_API_TOKEN";

/// GitLab project that holds the feature-request work items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub base_url: String,
    pub token: String,
    /// Project id or full path (`group/roadmap`).
    pub project: String,
    pub timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            project: String::new(),
            timeout_secs: 30,
        }
    }
}

/// GitLab instance that serves repository content. Falls back to the
/// tracker's instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub api_token: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            api_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub sync: WorkerConfig,
    pub retry: RetryPolicy,
    pub tracker: TrackerConfig,
    pub content: ContentConfig,
    pub server: ServerConfig,
    /// Seeded (upserted by name) at start-up.
    pub repositories: Vec<NewRepository>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("roadmap-sync.db"),
            sync: WorkerConfig::default(),
            retry: RetryPolicy::default(),
            tracker: TrackerConfig::default(),
            content: ContentConfig::default(),
            server: ServerConfig::default(),
            repositories: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Read and parse a settings file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
            .map_err(|e| AppError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw).map_err(|e| AppError::config(format!("Invalid settings: {}", e)))
    }

    /// Apply secret overrides. `lookup` is `std::env::var(..).ok()` in the
    /// binary.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(TRACKER_TOKEN_ENV).filter(|t| !t.trim().is_empty()) {
            self.tracker.token = token;
        }
        if let Some(token) = lookup(API_TOKEN_ENV).filter(|t| !t.trim().is_empty()) {
            self.server.api_token = token;
        }
    }

    /// Reject settings the process cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        let required = [
            ("tracker.base_url", &self.tracker.base_url),
            ("tracker.token", &self.tracker.token),
            ("tracker.project", &self.tracker.project),
            ("server.api_token", &self.server.api_token),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(AppError::config(format!("Missing required settings: {}", missing.join(", "))));
        }

        if self.retry.max_attempts == 0 {
            return Err(AppError::config("retry.max_attempts must be at least 1"));
        }

        let mut names = std::collections::HashSet::new();
        for repo in &self.repositories {
            if repo.name.trim().is_empty() {
                return Err(AppError::config("Repository entries need a name"));
            }
            if !names.insert(repo.name.as_str()) {
                return Err(AppError::config(format!("Repository '{}' is listed twice", repo.name)));
            }
        }

        Ok(())
    }

    pub fn tracker_client_config(&self) -> GitLabClientConfig {
        GitLabClientConfig {
            base_url: self.tracker.base_url.clone(),
            token: self.tracker.token.clone(),
            timeout_secs: self.tracker.timeout_secs,
        }
    }

    /// Client settings for repository content, if any repository reads from
    /// GitLab.
    pub fn content_client_config(&self) -> Option<GitLabClientConfig> {
        if !self.repositories.iter().any(|r| r.source_project.is_some()) {
            return None;
        }

        Some(GitLabClientConfig {
            base_url: self
                .content
                .base_url
                .clone()
                .unwrap_or_else(|| self.tracker.base_url.clone()),
            token: self
                .content
                .token
                .clone()
                .unwrap_or_else(|| self.tracker.token.clone()),
            timeout_secs: self.tracker.timeout_secs,
        })
    }
}
