//! Merge planning for requests that bridge several groups.

use super::IntegrityViolation;
use crate::model::contact::{Contact, ContactId, ContactUpdate};

/// Link rewrites that collapse an expanded set into one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Surviving primary.
    pub canonical_id: ContactId,
    /// Former primaries becoming secondaries of `canonical_id`, ascending.
    pub demoted: Vec<ContactId>,
    /// Existing secondaries moving to `canonical_id`, ascending.
    pub repointed: Vec<ContactId>,
}

impl MergePlan {
    /// True when the expanded set already forms a single group.
    pub fn is_noop(&self) -> bool {
        self.demoted.is_empty() && self.repointed.is_empty()
    }

    /// Batch for the store: every demotion, then every repoint.
    ///
    /// All targets are `canonical_id`, so the rewrite is flat and never
    /// needs a chain walk.
    pub fn updates(&self) -> Vec<ContactUpdate> {
        self.demoted
            .iter()
            .chain(self.repointed.iter())
            .map(|&id| ContactUpdate::link_to(id, self.canonical_id))
            .collect()
    }
}

/// Plans the merge of a validated expanded set.
///
/// The canonical primary is the primary with the earliest `created_at`;
/// identical timestamps fall back to the smaller id.
pub fn plan_merge(expanded: &[Contact]) -> Result<MergePlan, IntegrityViolation> {
    let canonical_id = expanded
        .iter()
        .filter(|contact| contact.is_primary())
        .min_by_key(|contact| contact.seniority())
        .map(|contact| contact.id)
        .ok_or(IntegrityViolation::NoPrimary)?;

    let mut demoted = Vec::new();
    let mut repointed = Vec::new();
    for contact in expanded {
        if contact.id == canonical_id {
            continue;
        }
        match contact.link.linked_id() {
            None => demoted.push(contact.id),
            Some(linked_id) if linked_id != canonical_id => repointed.push(contact.id),
            Some(_) => {}
        }
    }
    demoted.sort_unstable();
    demoted.dedup();
    repointed.sort_unstable();
    repointed.dedup();

    Ok(MergePlan {
        canonical_id,
        demoted,
        repointed,
    })
}
