//! Repository layer: the contact store boundary.
//!
//! # Responsibility
//! - Define the store contract identity resolution is written against.
//! - Isolate SQLite query details from resolution and orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `InvalidLinkTarget`)
//!   in addition to DB transport errors.

pub mod contact_repo;
