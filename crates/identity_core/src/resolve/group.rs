//! Group roots, expansion checks, and the validated group view.
//!
//! Expansion is a single hop: roots plus everything linked to a root. That is
//! only complete under the depth-1 hierarchy, so [`validate_expansion`] must
//! pass before an expanded set is trusted.

use super::IntegrityViolation;
use crate::model::contact::{Contact, ContactId, Link};
use std::collections::{BTreeSet, HashMap};

/// Distinct group roots of the matched contacts: own id for a primary,
/// `linked_id` for a secondary.
pub fn group_roots(matched: &[Contact]) -> BTreeSet<ContactId> {
    matched.iter().map(Contact::root_id).collect()
}

/// Checks that every secondary in `expanded` links to a primary in the set.
///
/// Chains are reported before dangling links: a secondary linked to another
/// secondary is named as a chain even when that secondary's target was not
/// loaded.
pub fn validate_expansion(expanded: &[Contact]) -> Result<(), IntegrityViolation> {
    let by_id: HashMap<ContactId, &Contact> = expanded.iter().map(|c| (c.id, c)).collect();
    let links = expanded
        .iter()
        .filter_map(|contact| contact.link.linked_id().map(|linked_id| (contact.id, linked_id)));

    let mut dangling = None;
    for (id, linked_id) in links {
        match by_id.get(&linked_id) {
            Some(target) if target.is_primary() => {}
            Some(_) => return Err(IntegrityViolation::SecondaryChain { id, linked_id }),
            None => {
                dangling.get_or_insert(IntegrityViolation::DanglingLink { id, linked_id });
            }
        }
    }

    match dangling {
        Some(violation) => Err(violation),
        None => Ok(()),
    }
}

/// One primary plus its secondaries, checked at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactGroup {
    primary: Contact,
    secondaries: Vec<Contact>,
}

impl ContactGroup {
    /// Builds the group of `primary_id` from a store load of that group.
    ///
    /// # Errors
    /// - `NotPrimary` when `primary_id` is absent or not primary.
    /// - `ForeignMember` when any other member links to a different contact.
    pub fn from_members(
        primary_id: ContactId,
        members: Vec<Contact>,
    ) -> Result<Self, IntegrityViolation> {
        let mut primary = None;
        let mut secondaries = Vec::with_capacity(members.len().saturating_sub(1));

        for contact in members {
            if contact.id == primary_id {
                if !contact.is_primary() {
                    return Err(IntegrityViolation::NotPrimary(primary_id));
                }
                primary = Some(contact);
                continue;
            }
            match contact.link {
                Link::Secondary { linked_id } if linked_id == primary_id => {
                    secondaries.push(contact);
                }
                _ => {
                    return Err(IntegrityViolation::ForeignMember {
                        id: contact.id,
                        primary_id,
                    });
                }
            }
        }

        let primary = primary.ok_or(IntegrityViolation::NotPrimary(primary_id))?;
        secondaries.sort_by_key(|contact| contact.id);
        Ok(Self {
            primary,
            secondaries,
        })
    }

    /// Group made of a freshly created primary.
    pub fn singleton(primary: Contact) -> Result<Self, IntegrityViolation> {
        Self::from_members(primary.id, vec![primary])
    }

    /// Adds a freshly created secondary of this group.
    pub fn push_secondary(&mut self, contact: Contact) -> Result<(), IntegrityViolation> {
        if contact.link.linked_id() != Some(self.primary.id) {
            return Err(IntegrityViolation::ForeignMember {
                id: contact.id,
                primary_id: self.primary.id,
            });
        }
        let position = self
            .secondaries
            .partition_point(|existing| existing.id < contact.id);
        self.secondaries.insert(position, contact);
        Ok(())
    }

    pub fn primary(&self) -> &Contact {
        &self.primary
    }

    /// Secondaries in ascending id order.
    pub fn secondaries(&self) -> &[Contact] {
        &self.secondaries
    }

    /// Primary first, then secondaries.
    pub fn members(&self) -> impl Iterator<Item = &Contact> {
        std::iter::once(&self.primary).chain(self.secondaries.iter())
    }

    pub fn member_count(&self) -> usize {
        1 + self.secondaries.len()
    }
}
