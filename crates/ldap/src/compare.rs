use crate::core::{
    attributes::{DirectoryEntity, ENTRY_DN},
    dn,
    error::{LdapError, LdapResult},
    utils::{resolve_entry, EntryRef, LdapInfo},
};
use ldap3_proto::{
    proto::{LdapCompareRequest, LdapOp, LdapResult as LdapResultOp},
    LdapResultCode,
};
use restldap_auth::access_control::AccessGrant;
use restldap_domain::dit::Dit;

pub(crate) fn make_compare_response(code: LdapResultCode, matcheddn: String, message: String) -> LdapOp {
    LdapOp::CompareResult(LdapResultOp {
        code,
        matcheddn,
        message,
        referral: vec![],
    })
}

fn compare_attribute<E: DirectoryEntity>(entity: &E, attribute: &str, value: &str) -> LdapResult<bool> {
    let field = E::field_matching(attribute).ok_or_else(|| {
        LdapError::new(
            LdapResultCode::UndefinedAttributeType,
            format!("Entry has no attribute {attribute}"),
        )
    })?;
    Ok(field.value_equals(entity, value))
}

pub(crate) fn compare(
    dit: &Dit,
    ldap_info: &LdapInfo,
    grant: &AccessGrant,
    request: &LdapCompareRequest,
) -> LdapResult<Vec<LdapOp>> {
    let target = dn::normalize(&request.dn);
    if !dn::is_well_formed(&target) {
        return Err(LdapError::new(
            LdapResultCode::InvalidDNSyntax,
            format!(r#"Invalid DN: "{}""#, request.dn),
        ));
    }
    if request.atype.eq_ignore_ascii_case(ENTRY_DN) {
        return Err(LdapError::new(
            LdapResultCode::UnwillingToPerform,
            "Comparing entryDN is not supported",
        ));
    }
    if !grant.can_compare(&target) {
        return Err(LdapError::new(
            LdapResultCode::InsufficentAccessRights,
            format!(r#"Not allowed to compare "{}""#, request.dn),
        ));
    }
    let entry = resolve_entry(dit, ldap_info, &target).ok_or_else(|| {
        LdapError::new(
            LdapResultCode::NoSuchObject,
            format!(r#"No such entry: "{}""#, request.dn),
        )
    })?;
    let value = String::from_utf8_lossy(&request.val);
    let equal = match entry {
        EntryRef::Domain(domain) => compare_attribute(domain, &request.atype, &value),
        EntryRef::OrganizationalUnit(ou) => compare_attribute(ou, &request.atype, &value),
        EntryRef::User(user) => compare_attribute(user, &request.atype, &value),
        EntryRef::Group(group) => compare_attribute(group, &request.atype, &value),
    }?;
    Ok(vec![make_compare_response(
        if equal {
            LdapResultCode::CompareTrue
        } else {
            LdapResultCode::CompareFalse
        },
        request.dn.clone(),
        "".to_string(),
    )])
}
