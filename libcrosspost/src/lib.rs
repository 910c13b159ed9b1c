//! Crosspost - publish one post to many social providers
//!
//! This library implements the publishing pipeline: quota and media checks
//! at submission, concurrent per-provider uploads and publishing with
//! retries, per-provider status tracking, and exactly-once outcome
//! notifications by email and live event stream. Deferred work (scheduled
//! posts, media cleanup, subscription expiry) arrives through signed
//! triggers.

pub mod api;
pub mod billing;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod logging;
pub mod media;
pub mod notify;
pub mod orchestrator;
pub mod providers;
pub mod quota;
pub mod retry;
pub mod scheduling;
pub mod service;
pub mod storage;
pub mod tracker;
pub mod trigger;
pub mod types;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{CrosspostError, Result};
pub use orchestrator::{PublishOrchestrator, PublishReport};
pub use service::CrosspostService;
pub use types::{
    MediaAsset, Notification, OutcomeStatus, PlanTier, Post, PostStatus, ProviderOutcome,
};
