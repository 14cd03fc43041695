//! Repository layer contracts and SQLite implementation.
//!
//! # Responsibility
//! - Define the explicit data-access capability set for cars.
//! - Isolate SQL details from the persistence context.
//!
//! # Invariants
//! - Repository writes enforce `Car::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`) in
//!   addition to DB transport errors.

pub mod car_repo;
