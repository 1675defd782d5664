//! Customer use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own the per-key lock table, the error funnel and the audit recorder.

pub mod customer_service;
pub mod error;
pub mod lock_table;
pub mod recorder;
