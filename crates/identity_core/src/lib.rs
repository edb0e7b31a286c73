//! Customer identity resolution over fragmented contact records.
//! This crate is the single source of truth for identity-group invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod resolve;
pub mod service;

pub use config::{load_config, parse_config, ConfigError, CoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LogDestination};
pub use model::contact::{Contact, ContactId, ContactUpdate, Link, LinkPrecedence, NewContact};
pub use model::identify::{ContactSummary, IdentifyRequest, IdentifyResponse};
pub use repo::contact_repo::{ContactStore, RepoError, RepoResult, SqliteContactRepository};
pub use resolve::IntegrityViolation;
pub use service::identify_service::{IdentifyError, IdentifyService, Resolution, RetryPolicy};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
