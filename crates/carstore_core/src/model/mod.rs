//! Domain model for records managed by the persistence context.
//!
//! # Responsibility
//! - Define the `Car` record shape shared by repository and context layers.
//!
//! # Invariants
//! - Every car is identified by a non-nil `CarId`.
//! - Application fields live in an opaque attribute document; core never
//!   interprets their meaning.

pub mod car;
