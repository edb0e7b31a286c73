//! Canonical response view of a resolved group.

use super::coverage::non_empty;
use super::group::ContactGroup;
use crate::model::identify::ContactSummary;
use std::collections::BTreeSet;

/// Builds the deterministic summary of `group`.
///
/// Values are distinct and sorted, except that the primary's own email and
/// phone are moved to index 0 when present.
pub fn build_summary(group: &ContactGroup) -> ContactSummary {
    let primary = group.primary();
    let emails = group
        .members()
        .filter_map(|contact| non_empty(contact.email.as_deref()))
        .collect::<BTreeSet<_>>();
    let phone_numbers = group
        .members()
        .filter_map(|contact| non_empty(contact.phone_number.as_deref()))
        .collect::<BTreeSet<_>>();

    ContactSummary {
        primary_contact_id: primary.id,
        emails: primary_first(non_empty(primary.email.as_deref()), emails),
        phone_numbers: primary_first(non_empty(primary.phone_number.as_deref()), phone_numbers),
        secondary_contact_ids: group.secondaries().iter().map(|contact| contact.id).collect(),
    }
}

fn primary_first(own: Option<&str>, values: BTreeSet<&str>) -> Vec<String> {
    let mut ordered = Vec::with_capacity(values.len());
    if let Some(own) = own {
        ordered.push(own.to_owned());
    }
    ordered.extend(
        values
            .into_iter()
            .filter(|value| Some(*value) != own)
            .map(str::to_owned),
    );
    ordered
}
