//! Coverage check: does a group already know the submitted attributes.

use super::group::ContactGroup;

/// True when every submitted value is already present in the group.
///
/// An absent value is trivially covered. Empty stored values never count.
pub fn is_covered(group: &ContactGroup, email: Option<&str>, phone_number: Option<&str>) -> bool {
    let email_known = email.map_or(true, |wanted| {
        group
            .members()
            .any(|contact| non_empty(contact.email.as_deref()) == Some(wanted))
    });
    let phone_known = phone_number.map_or(true, |wanted| {
        group
            .members()
            .any(|contact| non_empty(contact.phone_number.as_deref()) == Some(wanted))
    });
    email_known && phone_known
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}
