use crate::core::{
    dn,
    error::{LdapError, LdapResult},
    utils::LdapInfo,
};
use ldap3_proto::{
    proto::{LdapBindCred, LdapBindRequest},
    LdapResultCode,
};
use restldap_auth::{
    access_control::{AccessGrant, Permission},
    ssha,
};
use restldap_domain::dit::Dit;
use tracing::{debug, instrument, warn};

/// Checks a simple bind against the users of the DIT.
///
/// Users bind as `cn=<cn>` or `uid=<uid>` directly under the users OU.
#[instrument(skip_all, level = "debug", fields(dn = %request.dn))]
pub(crate) fn do_bind(
    ldap_info: &LdapInfo,
    dit: &Dit,
    request: &LdapBindRequest,
) -> LdapResult<AccessGrant> {
    let password = match &request.cred {
        LdapBindCred::Simple(password) => password,
        _ => {
            return Err(LdapError::new(
                LdapResultCode::AuthMethodNotSupported,
                "Only simple binds are supported",
            ))
        }
    };
    let bind_dn = dn::normalize(&request.dn);
    if !dn::is_well_formed(&bind_dn) {
        return Err(LdapError::new(
            LdapResultCode::InvalidDNSyntax,
            format!(r#"Invalid DN: "{}""#, request.dn),
        ));
    }
    let (attribute, value, parent) = dn::split_head(&bind_dn);
    let user = if parent == ldap_info.users_ou_dn {
        dit.users.iter().find(|user| match attribute {
            "cn" => user.cn.to_lowercase() == value,
            "uid" => user.uid.to_lowercase() == value,
            _ => false,
        })
    } else {
        None
    };
    let user = user.ok_or_else(|| {
        LdapError::new(
            LdapResultCode::NoSuchObject,
            format!(r#"No such user: "{}""#, request.dn),
        )
    })?;
    if password.is_empty() {
        return Err(LdapError::new(
            LdapResultCode::InvalidCredentials,
            "Empty password",
        ));
    }
    match ssha::validate_password(password, &user.user_password) {
        Ok(true) => {}
        Ok(false) => {
            debug!("Wrong password");
            return Err(LdapError::new(
                LdapResultCode::InvalidCredentials,
                "Invalid credentials",
            ));
        }
        Err(e) => {
            warn!(user = %bind_dn, "Unusable password hash: {e}");
            return Err(LdapError::new(
                LdapResultCode::InvalidCredentials,
                "Invalid credentials",
            ));
        }
    }
    let permission = if user.ldap_admin {
        Permission::Admin
    } else {
        Permission::Regular
    };
    debug!(?permission, "Bind successful");
    Ok(AccessGrant::new(bind_dn, permission))
}
