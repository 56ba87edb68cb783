use crate::{
    core::{
        attributes::DirectoryEntity,
        dn,
        error::{LdapError, LdapResult},
        utils::{resolve_entry, EntryRef},
    },
    handler::DirectoryContext,
};
use ldap3_proto::{
    proto::{LdapModify, LdapModifyRequest, LdapModifyType, LdapOp, LdapResult as LdapResultOp},
    LdapPartialAttribute, LdapResultCode,
};
use restldap_auth::access_control::AccessGrant;
use restldap_domain::types::DirectoryRecord;
use restldap_domain_handlers::handler::BackendHandler;
use tracing::{debug, error, instrument};

pub(crate) fn make_modify_response(code: LdapResultCode, message: String) -> LdapOp {
    LdapOp::ModifyResponse(LdapResultOp {
        code,
        matcheddn: "".to_string(),
        message,
        referral: vec![],
    })
}

fn apply_modification<E: DirectoryEntity>(
    entity: &mut E,
    modification: &LdapPartialAttribute,
) -> LdapResult<()> {
    let field = E::field_matching(&modification.atype).ok_or_else(|| {
        LdapError::new(
            LdapResultCode::UndefinedAttributeType,
            format!("Unknown attribute {}", modification.atype),
        )
    })?;
    let values = modification
        .vals
        .iter()
        .map(|value| {
            String::from_utf8(value.clone()).map_err(|_| {
                LdapError::new(
                    LdapResultCode::InvalidAttributeSyntax,
                    format!("Non UTF-8 value for attribute {}", modification.atype),
                )
            })
        })
        .collect::<LdapResult<Vec<_>>>()?;
    field.replace(entity, values)
}

fn apply_changes(old: &DirectoryRecord, changes: &[LdapModify]) -> LdapResult<DirectoryRecord> {
    let mut new = old.clone();
    for change in changes {
        if change.operation != LdapModifyType::Replace {
            return Err(LdapError::new(
                LdapResultCode::UnwillingToPerform,
                format!("Unsupported modify operation: {:?}", change.operation),
            ));
        }
        match &mut new {
            DirectoryRecord::User(user) => apply_modification(user, &change.modification)?,
            DirectoryRecord::Group(group) => apply_modification(group, &change.modification)?,
        }
    }
    Ok(new)
}

/// Applies the changes to a copy of the target, hands both versions to the
/// backend, and only then updates the in-memory DIT.
#[instrument(skip_all, level = "debug", fields(dn = %request.dn))]
pub(crate) async fn handle_modify_request<Backend: BackendHandler>(
    context: &DirectoryContext<Backend>,
    grant: &AccessGrant,
    request: &LdapModifyRequest,
) -> LdapResult<Vec<LdapOp>> {
    let ldap_info = &context.ldap_info;
    let target = dn::normalize(&request.dn);
    if !dn::is_well_formed(&target) {
        return Err(LdapError::new(
            LdapResultCode::InvalidDNSyntax,
            format!(r#"Invalid DN: "{}""#, request.dn),
        ));
    }
    if target == ldap_info.base_dn_str
        || target == ldap_info.users_ou_dn
        || target == ldap_info.groups_ou_dn
    {
        return Err(LdapError::new(
            LdapResultCode::UnwillingToPerform,
            "Only users and groups can be modified",
        ));
    }
    if !grant.can_modify(&target) {
        return Err(LdapError::new(
            LdapResultCode::InsufficentAccessRights,
            format!(r#"Not allowed to modify "{}""#, request.dn),
        ));
    }
    let (old, new) = {
        let dit = context.dit.read().await;
        let old: DirectoryRecord = match resolve_entry(&dit, ldap_info, &target) {
            Some(EntryRef::User(user)) => user.clone().into(),
            Some(EntryRef::Group(group)) => group.clone().into(),
            Some(EntryRef::Domain(_) | EntryRef::OrganizationalUnit(_)) => {
                return Err(LdapError::new(
                    LdapResultCode::UnwillingToPerform,
                    "Only users and groups can be modified",
                ))
            }
            None => {
                return Err(LdapError::new(
                    LdapResultCode::NoSuchObject,
                    format!(r#"No such entry: "{}""#, request.dn),
                ))
            }
        };
        let new = apply_changes(&old, &request.changes)?;
        (old, new)
    };
    context
        .backend_handler
        .update_data(&old, &new)
        .await
        .map_err(|e| {
            error!("Backend update of {} failed: {e:#}", old.cn());
            LdapError::new(
                LdapResultCode::UnwillingToPerform,
                format!("Error updating backend data: {e}"),
            )
        })?;
    if !context.dit.replace_record(&old, new).await {
        debug!("Entry changed since it was read, the next refresh will catch up");
    }
    context.refresh_handler.refresh_now();
    Ok(vec![make_modify_response(
        LdapResultCode::Success,
        "".to_string(),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::make_context;
    use mockall::predicate::always;
    use pretty_assertions::assert_eq;
    use restldap_auth::access_control::Permission;
    use restldap_domain::types::User;
    use restldap_domain_handlers::error::DomainError;
    use restldap_test_utils::{MockTestBackendHandler, MockTestRefreshHandler};

    const BOB: &str = "cn=bob,ou=users,dc=example,dc=com";

    fn admin() -> AccessGrant {
        AccessGrant::new(
            "cn=admin,ou=users,dc=example,dc=com".to_string(),
            Permission::Admin,
        )
    }

    fn replace(atype: &str, vals: &[&str]) -> LdapModify {
        LdapModify {
            operation: LdapModifyType::Replace,
            modification: LdapPartialAttribute {
                atype: atype.to_string(),
                vals: vals.iter().map(|v| v.as_bytes().to_vec()).collect(),
            },
        }
    }

    fn request(dn: &str, changes: Vec<LdapModify>) -> LdapModifyRequest {
        LdapModifyRequest {
            dn: dn.to_string(),
            changes,
        }
    }

    fn untouched() -> (MockTestBackendHandler, MockTestRefreshHandler) {
        let mut backend = MockTestBackendHandler::new();
        backend.expect_update_data().never();
        let mut refresh = MockTestRefreshHandler::new();
        refresh.expect_refresh_now().never();
        (backend, refresh)
    }

    #[tokio::test]
    async fn test_modify_user() {
        let mut backend = MockTestBackendHandler::new();
        backend
            .expect_update_data()
            .withf(|old, new| match (old, new) {
                (DirectoryRecord::User(old), DirectoryRecord::User(new)) => {
                    old.mail == "bob@example.com"
                        && new.mail == "robert@example.com"
                        && new.gid_number == 2001
                        && old.cn == new.cn
                }
                _ => false,
            })
            .times(1)
            .return_once(|_, _| Ok(()));
        let mut refresh = MockTestRefreshHandler::new();
        refresh.expect_refresh_now().times(1).return_const(());
        let context = make_context(backend, refresh);
        let response = handle_modify_request(
            &context,
            &admin(),
            &request(
                "CN=Bob, ou=users,dc=example,dc=com",
                vec![
                    replace("mail", &["robert@example.com"]),
                    replace("gidNumber", &["2001"]),
                ],
            ),
        )
        .await;
        assert_eq!(
            response,
            Ok(vec![make_modify_response(
                LdapResultCode::Success,
                "".to_string()
            )])
        );
        let dit = context.dit.read().await;
        let bob: &User = &dit.users[1];
        assert_eq!(bob.mail, "robert@example.com");
        assert_eq!(bob.gid_number, 2001);
    }

    #[tokio::test]
    async fn test_modify_self() {
        let mut backend = MockTestBackendHandler::new();
        backend
            .expect_update_data()
            .with(always(), always())
            .times(1)
            .return_once(|_, _| Ok(()));
        let mut refresh = MockTestRefreshHandler::new();
        refresh.expect_refresh_now().times(1).return_const(());
        let context = make_context(backend, refresh);
        let bob = AccessGrant::new(BOB.to_string(), Permission::Regular);
        let response = handle_modify_request(
            &context,
            &bob,
            &request(BOB, vec![replace("loginShell", &["/bin/zsh"])]),
        )
        .await;
        assert!(response.is_ok());
        assert_eq!(context.dit.read().await.users[1].login_shell, "/bin/zsh");
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_dit_untouched() {
        let mut backend = MockTestBackendHandler::new();
        backend
            .expect_update_data()
            .times(1)
            .return_once(|_, _| Err(DomainError::HttpError("connection refused".to_string())));
        let mut refresh = MockTestRefreshHandler::new();
        refresh.expect_refresh_now().never();
        let context = make_context(backend, refresh);
        let err = handle_modify_request(
            &context,
            &admin(),
            &request(BOB, vec![replace("mail", &["robert@example.com"])]),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, LdapResultCode::UnwillingToPerform);
        assert!(err.message.starts_with("Error updating backend data"));
        assert_eq!(context.dit.read().await.users[1].mail, "bob@example.com");
    }

    async fn rejected(grant: &AccessGrant, request: &LdapModifyRequest) -> LdapResultCode {
        let (backend, refresh) = untouched();
        let context = make_context(backend, refresh);
        handle_modify_request(&context, grant, request)
            .await
            .unwrap_err()
            .code
    }

    #[tokio::test]
    async fn test_modify_errors() {
        let admin = admin();
        assert_eq!(
            rejected(&admin, &request("bob", vec![])).await,
            LdapResultCode::InvalidDNSyntax
        );
        assert_eq!(
            rejected(&admin, &request("ou=users,dc=example,dc=com", vec![])).await,
            LdapResultCode::UnwillingToPerform
        );
        assert_eq!(
            rejected(&admin, &request("dc=example,dc=com", vec![])).await,
            LdapResultCode::UnwillingToPerform
        );
        assert_eq!(
            rejected(
                &admin,
                &request("cn=carol,ou=users,dc=example,dc=com", vec![])
            )
            .await,
            LdapResultCode::NoSuchObject
        );
        assert_eq!(
            rejected(
                &admin,
                &request(
                    BOB,
                    vec![LdapModify {
                        operation: LdapModifyType::Add,
                        ..replace("mail", &["x"])
                    }]
                )
            )
            .await,
            LdapResultCode::UnwillingToPerform
        );
        assert_eq!(
            rejected(&admin, &request(BOB, vec![replace("nonexistent", &["x"])])).await,
            LdapResultCode::UndefinedAttributeType
        );
        assert_eq!(
            rejected(&admin, &request(BOB, vec![replace("ldapAdmin", &["TRUE"])])).await,
            LdapResultCode::UndefinedAttributeType
        );
        assert_eq!(
            rejected(&admin, &request(BOB, vec![replace("mail", &["a", "b"])])).await,
            LdapResultCode::InvalidAttributeSyntax
        );
        assert_eq!(
            rejected(&admin, &request(BOB, vec![replace("uidNumber", &["many"])])).await,
            LdapResultCode::InvalidAttributeSyntax
        );
        let alice = AccessGrant::new(
            "cn=alice,ou=users,dc=example,dc=com".to_string(),
            Permission::Regular,
        );
        assert_eq!(
            rejected(&alice, &request(BOB, vec![replace("mail", &["x"])])).await,
            LdapResultCode::InsufficentAccessRights
        );
    }
}
