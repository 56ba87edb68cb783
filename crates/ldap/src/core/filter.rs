use crate::core::{
    attributes::{DirectoryEntity, ENTRY_DN},
    dn,
    error::{LdapError, LdapResult},
};
use ldap3_proto::{LdapFilter, LdapResultCode};

/// Evaluates `filter` against a single entry.
///
/// Supports AND, OR, equality, presence and substrings. Unknown attributes
/// never match. An equality on `entryDN` is checked against the first
/// component of the given DN only.
pub fn matches<E: DirectoryEntity>(entity: &E, filter: &LdapFilter) -> LdapResult<bool> {
    Ok(match filter {
        LdapFilter::And(filters) => {
            for filter in filters {
                if !matches(entity, filter)? {
                    return Ok(false);
                }
            }
            true
        }
        LdapFilter::Or(filters) => {
            let mut any = false;
            for filter in filters {
                any |= matches(entity, filter)?;
            }
            any
        }
        LdapFilter::Equality(attribute, value) => {
            if attribute.eq_ignore_ascii_case(ENTRY_DN) {
                let dn = dn::normalize(value);
                let (attribute, value, _) = dn::split_head(&dn);
                equals(entity, attribute, value)
            } else {
                equals(entity, attribute, value)
            }
        }
        LdapFilter::Present(attribute) => {
            attribute.eq_ignore_ascii_case(ENTRY_DN) || E::field_matching(attribute).is_some()
        }
        LdapFilter::Substring(attribute, substring) => E::field_matching(attribute)
            .is_some_and(|field| field.matches_substring(entity, substring)),
        _ => {
            return Err(LdapError::new(
                LdapResultCode::UnwillingToPerform,
                format!("Unsupported filter: {filter:?}"),
            ))
        }
    })
}

fn equals<E: DirectoryEntity>(entity: &E, attribute: &str, value: &str) -> bool {
    E::field_matching(attribute).is_some_and(|field| field.value_equals(entity, value))
}
