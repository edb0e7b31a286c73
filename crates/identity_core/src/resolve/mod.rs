//! Identity resolution rules, free of storage and I/O.
//!
//! # Responsibility
//! - Derive group roots from matched contacts and validate expanded sets.
//! - Plan merges of bridged groups into one canonical primary.
//! - Decide coverage of a request and build the canonical summary.
//!
//! # Invariants
//! - Depth-1 hierarchy: a secondary always links straight to a primary.
//!   Every function here checks it on input and never repairs it.
//! - Canonical primary is the oldest primary, smallest id on ties.

use crate::model::contact::ContactId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod coverage;
pub mod group;
pub mod merge;
pub mod summary;

pub use coverage::is_covered;
pub use group::{group_roots, validate_expansion, ContactGroup};
pub use merge::{plan_merge, MergePlan};
pub use summary::build_summary;

/// Persisted state breaks the identity hierarchy. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// Secondary `id` links to `linked_id`, which is itself a secondary.
    SecondaryChain { id: ContactId, linked_id: ContactId },
    /// Secondary `id` links to `linked_id`, which does not exist.
    DanglingLink { id: ContactId, linked_id: ContactId },
    /// Expanded contact set has no primary at all.
    NoPrimary,
    /// Expected primary is missing or is not primary.
    NotPrimary(ContactId),
    /// Group load for `primary_id` returned a contact linked elsewhere.
    ForeignMember {
        id: ContactId,
        primary_id: ContactId,
    },
}

impl Display for IntegrityViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SecondaryChain { id, linked_id } => write!(
                f,
                "secondary contact {id} links to contact {linked_id}, which is not primary"
            ),
            Self::DanglingLink { id, linked_id } => write!(
                f,
                "secondary contact {id} links to missing contact {linked_id}"
            ),
            Self::NoPrimary => write!(f, "matched contact groups contain no primary"),
            Self::NotPrimary(id) => write!(f, "contact {id} is not a primary contact"),
            Self::ForeignMember { id, primary_id } => write!(
                f,
                "contact {id} was loaded as a member of group {primary_id} but links elsewhere"
            ),
        }
    }
}

impl Error for IntegrityViolation {}
