//! Identify request and response shapes.
//!
//! Field names follow the external JSON contract (`phoneNumber`,
//! `primaryContactId`, ...), so these types serialize directly onto the wire.

use crate::model::contact::ContactId;
use serde::{Deserialize, Serialize};

/// Submitted identifying attributes. Either or both may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_owned),
            phone_number: phone_number.map(str::to_owned),
        }
    }

    /// Treats empty strings as absent. Values are otherwise kept verbatim,
    /// matching stays exact.
    pub fn normalized(&self) -> Self {
        Self {
            email: self.email.clone().filter(|value| !value.is_empty()),
            phone_number: self.phone_number.clone().filter(|value| !value.is_empty()),
        }
    }

    /// True when neither attribute carries a value.
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone_number.is_none()
    }
}

/// Envelope returned by Identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ContactSummary,
}

/// Canonical view of one identity group.
///
/// # Invariants
/// - The primary's own email/phone, when present, sit at index 0.
/// - Remaining values are distinct and lexicographically ordered.
/// - `secondary_contact_ids` is ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}
