//! Contact domain model.
//!
//! # Responsibility
//! - Define the canonical contact record shared by store and resolver.
//! - Encode link precedence as a typed state instead of a nullable pair.
//!
//! # Invariants
//! - `id` is assigned by the store, immutable, and grows with creation order.
//! - `Link::Secondary` is the only state that carries a `linked_id`.
//! - Demotion (`Primary -> Secondary`) is one-way.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Store-assigned contact identifier.
pub type ContactId = i64;

/// Flat precedence label, as persisted in `contacts.link_precedence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

impl Display for LinkPrecedence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a contact inside its identity group.
///
/// The depth-1 hierarchy means a secondary's `linked_id` must name a contact
/// whose own link is `Primary`; the store and resolver both check this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "linkPrecedence", rename_all = "lowercase")]
pub enum Link {
    /// Canonical representative of a group.
    Primary,
    /// Member subordinate to the primary `linked_id`.
    Secondary {
        #[serde(rename = "linkedId")]
        linked_id: ContactId,
    },
}

impl Link {
    pub fn precedence(self) -> LinkPrecedence {
        match self {
            Self::Primary => LinkPrecedence::Primary,
            Self::Secondary { .. } => LinkPrecedence::Secondary,
        }
    }

    pub fn linked_id(self) -> Option<ContactId> {
        match self {
            Self::Primary => None,
            Self::Secondary { linked_id } => Some(linked_id),
        }
    }

    /// Rebuilds a link from its persisted columns.
    ///
    /// Returns `None` when the pair violates "linked iff secondary".
    pub fn from_parts(precedence: LinkPrecedence, linked_id: Option<ContactId>) -> Option<Self> {
        match (precedence, linked_id) {
            (LinkPrecedence::Primary, None) => Some(Self::Primary),
            (LinkPrecedence::Secondary, Some(linked_id)) => Some(Self::Secondary { linked_id }),
            _ => None,
        }
    }
}

/// One stored contact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    #[serde(flatten)]
    pub link: Link,
    /// Epoch milliseconds; immutable, first key for canonical-primary choice.
    pub created_at: i64,
    /// Epoch milliseconds; refreshed on demotion and repointing.
    pub updated_at: i64,
    /// Soft-delete tombstone. Not consulted by identity resolution.
    pub deleted_at: Option<i64>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        matches!(self.link, Link::Primary)
    }

    /// Id of the primary this contact belongs to: itself or its `linked_id`.
    pub fn root_id(&self) -> ContactId {
        self.link.linked_id().unwrap_or(self.id)
    }

    /// Ordering key for canonical-primary selection: oldest first, id breaks ties.
    pub fn seniority(&self) -> (i64, ContactId) {
        (self.created_at, self.id)
    }
}

/// Insert payload; the store assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link: Link,
}

impl NewContact {
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            link: Link::Primary,
        }
    }

    pub fn secondary_of(
        primary_id: ContactId,
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Self {
        Self {
            email,
            phone_number,
            link: Link::Secondary {
                linked_id: primary_id,
            },
        }
    }
}

/// Immutable description of one link rewrite applied by a batch update.
///
/// Only secondary targets can be expressed through [`ContactUpdate::link_to`];
/// the store additionally rejects any update carrying `Link::Primary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactUpdate {
    pub id: ContactId,
    pub link: Link,
}

impl ContactUpdate {
    /// Makes `id` a secondary of `primary_id` (demotion or repointing).
    pub fn link_to(id: ContactId, primary_id: ContactId) -> Self {
        Self {
            id,
            link: Link::Secondary {
                linked_id: primary_id,
            },
        }
    }
}
