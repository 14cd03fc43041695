//! Persistence context for car records.
//! This crate declares the `Cars` collection and everything needed to read
//! and write it against SQLite.

pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod options;
pub mod repo;

pub use context::{CarDbContext, CarSet, ContextError, ContextResult, EntityState};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::car::{Car, CarAttributes, CarId, CarValidationError};
pub use options::{ConflictPolicy, ContextOptions, OptionsError, Provider};
pub use repo::car_repo::{
    AttributeFilter, CarQuery, CarRepository, RepoError, RepoResult, SqliteCarRepository,
};

/// Minimal health-check API for host wiring checks.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
