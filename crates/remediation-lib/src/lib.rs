//! Remediation library for the serving platform operator upgrade
//!
//! This crate provides the core functionality for:
//! - Exporter schema classification and migration of orchestrator resources
//! - Readiness probe patching of service deployments
//! - Scheduled metric backup and restore over the service REST API
//! - Detection and resolution of GPU contention deadlocks between pods
//! - Pre-upgrade checks across all of the above

pub mod auth;
pub mod cluster;
pub mod deadlock;
pub mod error;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod preflight;
pub mod probe;
pub mod schema;
pub mod summary;
pub mod wait;

pub use error::{RemediationError, Result};
pub use models::*;
pub use observability::RunLogger;
pub use summary::{BatchSummary, ItemOutcome, OutcomeStatus};
pub use wait::{poll_until, WaitOutcome, WaitPolicy};
