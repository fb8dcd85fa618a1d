//! roadmap-sync: keeps a product roadmap's content and feature requests in
//! step with their sources.
//!
//! Markdown repositories are imported into a local SQLite store, feature
//! requests are synced both ways with a GitLab project, and a background
//! worker drives both on an interval. A small HTTP API lets an operator
//! control the worker and resolve conflicts.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod time;
