//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the storage primitives the customer service orchestrates.
//! - Isolate SQLite query details from business orchestration.
//!
//! # Invariants
//! - Repositories report affected-row counts and never decide success.
//! - Mutations always receive an explicit transaction handle.

pub mod customer_repo;
