//! The `Cars` collection of a persistence context.
//!
//! # Responsibility
//! - Stage create/update/remove operations in the owning context's tracker.
//! - Serve reads from the store with identity resolution against tracked cars.
//!
//! # Invariants
//! - Nothing here writes to the store; writes happen in `save_changes`.
//! - A car read through the set is tracked until saved, discarded or removed.

use super::tracker::{ChangeTracker, EntityState};
use super::{ContextError, ContextResult};
use crate::model::car::{Car, CarId};
use crate::repo::car_repo::{CarQuery, CarRepository, RepoError, SqliteCarRepository};
use rusqlite::Connection;

/// Queryable, mutable set of cars bound to one context.
pub struct CarSet<'ctx> {
    conn: &'ctx Connection,
    tracker: &'ctx mut ChangeTracker,
}

impl<'ctx> CarSet<'ctx> {
    pub(crate) fn new(conn: &'ctx Connection, tracker: &'ctx mut ChangeTracker) -> Self {
        Self { conn, tracker }
    }

    fn repo(&self) -> SqliteCarRepository<'ctx> {
        SqliteCarRepository::new_unchecked(self.conn)
    }

    /// Stages a new car for insertion.
    ///
    /// # Errors
    /// - `AlreadyTracked` when this context already tracks `car.id`.
    /// - `Repo(Validation)` when the car is invalid.
    pub fn add(&mut self, car: Car) -> ContextResult<CarId> {
        car.validate().map_err(RepoError::from)?;
        if self.tracker.contains(&car.id) {
            return Err(ContextError::AlreadyTracked(car.id));
        }

        let id = car.id;
        self.tracker.track_added(car);
        Ok(id)
    }

    /// Finds a car by id, preferring the tracked copy.
    ///
    /// Returns `None` for ids staged for deletion.
    pub fn find(&mut self, id: CarId) -> ContextResult<Option<Car>> {
        if let Some(entry) = self.tracker.get(&id) {
            return Ok(match entry.state {
                EntityState::Deleted => None,
                _ => Some(entry.current.clone()),
            });
        }

        let loaded = self.repo().get_car(id)?;
        if let Some(car) = &loaded {
            self.tracker.track_unchanged(car.clone());
        }
        Ok(loaded)
    }

    /// Runs `query` against the store.
    ///
    /// Tracked cars replace their stored rows, cars staged for deletion are
    /// dropped, and cars added in this unit of work are not included.
    pub fn query(&mut self, query: &CarQuery) -> ContextResult<Vec<Car>> {
        let stored = self.repo().list_cars(query)?;
        let mut cars = Vec::with_capacity(stored.len());

        for car in stored {
            match self.tracker.get(&car.id) {
                Some(entry) if entry.state == EntityState::Deleted => {}
                Some(entry) => cars.push(entry.current.clone()),
                None => {
                    self.tracker.track_unchanged(car.clone());
                    cars.push(car);
                }
            }
        }

        Ok(cars)
    }

    /// Every stored car, in creation order.
    pub fn all(&mut self) -> ContextResult<Vec<Car>> {
        self.query(&CarQuery::default())
    }

    /// Stages new attributes for a car.
    ///
    /// Cars added in this unit of work stay `Added`. Untracked cars are
    /// attached as `Modified` and their `version` is used as the
    /// concurrency token.
    pub fn update(&mut self, car: Car) -> ContextResult<()> {
        car.validate().map_err(RepoError::from)?;

        match self.tracker.get_mut(&car.id) {
            Some(entry) => {
                let version = entry.current.version;
                entry.current = Car { version, ..car };
                if entry.state != EntityState::Added {
                    entry.state = EntityState::Modified;
                }
            }
            None => self.tracker.track_attached(car, EntityState::Modified),
        }

        Ok(())
    }

    /// Stages a car for deletion.
    ///
    /// # Errors
    /// - `Repo(NotFound)` when the id is neither tracked nor stored.
    pub fn remove(&mut self, id: CarId) -> ContextResult<()> {
        match self.tracker.get(&id).map(|entry| entry.state) {
            Some(EntityState::Added) => {
                self.tracker.detach(&id);
            }
            Some(_) => self.tracker.mark(&id, EntityState::Deleted),
            None => {
                let car = self.repo().get_car(id)?.ok_or(RepoError::NotFound(id))?;
                self.tracker.track_unchanged(car);
                self.tracker.mark(&id, EntityState::Deleted);
            }
        }
        Ok(())
    }

    /// Number of rows in the store; pending changes are not counted.
    pub fn count(&self) -> ContextResult<u64> {
        Ok(self.repo().count_cars()?)
    }

    /// Number of cars tracked by the owning context.
    pub fn len_tracked(&self) -> usize {
        self.tracker.len()
    }
}
