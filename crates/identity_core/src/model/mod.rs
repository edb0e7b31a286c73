//! Contact identity domain model.
//!
//! # Responsibility
//! - Define the contact record and its typed link state.
//! - Define the Identify request/response wire shapes.
//!
//! # Invariants
//! - A secondary always names its primary; a primary never names anyone.
//! - Deletion is represented by the `deleted_at` tombstone, never hard delete.

pub mod contact;
pub mod identify;
