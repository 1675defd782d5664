//! Domain model for the customer store.
//!
//! # Responsibility
//! - Define the keyed customer record and its update/delete payloads.
//! - Keep input validation next to the data it guards.
//!
//! # Invariants
//! - Every record is identified by one string key (`customer_id`).
//! - Deletion is a hard delete acknowledged by `CustomerDeleted`.

pub mod customer;
