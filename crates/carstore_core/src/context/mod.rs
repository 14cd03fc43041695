//! Persistence context for car records.
//!
//! # Responsibility
//! - Declare the single `Cars` collection exposed to application code.
//! - Hold the externally supplied options for the context lifetime.
//! - Commit a unit of work atomically through the car repository.
//!
//! # Invariants
//! - Exactly one collection, `Cars`, is declared.
//! - Each context owns its own connection and change tracker; contexts never
//!   share tracked state and must not be shared across units of work.
//! - A failed `save_changes` leaves the store and the tracker untouched.

mod car_set;
mod tracker;

pub use car_set::CarSet;
pub use tracker::EntityState;

use crate::db::{open_store, DbError};
use crate::model::car::{CarId, CarValidationError};
use crate::options::{ConflictPolicy, ContextOptions};
use crate::repo::car_repo::{CarRepository, RepoError, SqliteCarRepository};
use log::{info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use tracker::ChangeTracker;

pub type ContextResult<T> = Result<T, ContextError>;

/// Errors surfaced by the persistence context.
#[derive(Debug)]
pub enum ContextError {
    Repo(RepoError),
    AlreadyTracked(CarId),
    /// Pending changes cannot be saved through read-only options.
    ReadOnly,
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::AlreadyTracked(id) => write!(f, "car {id} is already tracked by this context"),
            Self::ReadOnly => write!(f, "context was opened read-only"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::AlreadyTracked(_) | Self::ReadOnly => None,
        }
    }
}

impl From<RepoError> for ContextError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for ContextError {
    fn from(value: DbError) -> Self {
        Self::Repo(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for ContextError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

impl From<CarValidationError> for ContextError {
    fn from(value: CarValidationError) -> Self {
        Self::Repo(RepoError::Validation(value))
    }
}

/// One unit of work over the car store.
pub struct CarDbContext {
    options: ContextOptions,
    conn: Connection,
    tracker: ChangeTracker,
}

enum Applied {
    Saved(CarId, i64),
    Removed(CarId),
}

impl CarDbContext {
    /// Names of the collections this context declares.
    pub const COLLECTIONS: &'static [&'static str] = &["Cars"];

    /// Opens the store described by `options`.
    ///
    /// # Errors
    /// - Store open or migration failures, wrapped as `Repo(Db(..))`.
    pub fn new(options: ContextOptions) -> ContextResult<Self> {
        let conn = open_store(&options)?;
        info!(
            "event=context_open module=context status=ok mode={} conflict_policy={} read_only={}",
            options.mode_label(),
            options.conflict_policy.as_str(),
            options.read_only
        );

        Ok(Self {
            options,
            conn,
            tracker: ChangeTracker::default(),
        })
    }

    /// The options this context was built with.
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// The `Cars` collection.
    pub fn cars(&mut self) -> CarSet<'_> {
        CarSet::new(&self.conn, &mut self.tracker)
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.has_pending()
    }

    pub fn entry_state(&self, id: CarId) -> Option<EntityState> {
        self.tracker.get(&id).map(|entry| entry.state)
    }

    /// Drops all pending changes; modified cars revert to their stored state.
    pub fn discard_changes(&mut self) {
        let discarded = self.tracker.discard();
        info!(
            "event=context_discard module=context status=ok discarded={}",
            discarded
        );
    }

    /// Writes every pending change in one transaction.
    ///
    /// Returns the number of rows written. Inserts, updates and deletes run
    /// in the order the cars were first tracked.
    ///
    /// # Errors
    /// - `ReadOnly` when changes are pending on a read-only context.
    /// - `Repo(Conflict)` for stale writes under `ConflictPolicy::RejectStale`.
    /// - `Repo(NotFound)` / `Repo(Duplicate)` when the store disagrees with
    ///   the tracked state.
    pub fn save_changes(&mut self) -> ContextResult<usize> {
        if !self.tracker.has_pending() {
            return Ok(0);
        }
        if self.options.read_only {
            return Err(ContextError::ReadOnly);
        }

        let started_at = Instant::now();
        let policy = self.options.conflict_policy;
        // Take the write lock up front so waiting on other writers goes
        // through the busy timeout instead of failing on lock upgrade.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let applied = {
            let repo = SqliteCarRepository::new_unchecked(&tx);
            let mut applied = Vec::new();
            for entry in self.tracker.pending() {
                let id = entry.current.id;
                let result = match entry.state {
                    EntityState::Added => repo
                        .insert_car(&entry.current)
                        .map(|version| Applied::Saved(id, version)),
                    EntityState::Modified => {
                        let mut car = entry.current.clone();
                        car.version = entry.original_version;
                        repo.update_car(&car, policy)
                            .map(|version| Applied::Saved(id, version))
                    }
                    EntityState::Deleted => {
                        let expected_version = match policy {
                            ConflictPolicy::RejectStale => Some(entry.original_version),
                            ConflictPolicy::LastWriteWins => None,
                        };
                        repo.delete_car(id, expected_version)
                            .map(|()| Applied::Removed(id))
                    }
                    EntityState::Unchanged => continue,
                };

                match result {
                    Ok(outcome) => applied.push(outcome),
                    Err(err) => {
                        warn!(
                            "event=save_changes module=context status=error duration_ms={} error={}",
                            started_at.elapsed().as_millis(),
                            err
                        );
                        return Err(err.into());
                    }
                }
            }
            applied
        };

        tx.commit()?;

        let written = applied.len();
        for outcome in applied {
            match outcome {
                Applied::Saved(id, version) => self.tracker.accept(&id, version),
                Applied::Removed(id) => {
                    self.tracker.detach(&id);
                }
            }
        }

        info!(
            "event=save_changes module=context status=ok written={} duration_ms={}",
            written,
            started_at.elapsed().as_millis()
        );
        Ok(written)
    }
}
