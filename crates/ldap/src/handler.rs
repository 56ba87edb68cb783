use crate::{
    codec::RequestControl,
    compare::{self, make_compare_response},
    core::{error::LdapResult, utils::LdapInfo},
    modify::{self, make_modify_response},
    password,
    search::{self, is_root_dse_request, make_search_error, make_search_success, root_dse_response, SearchOutcome},
    session::Session,
};
use ldap3_proto::{
    control::LdapControl,
    proto::{
        LdapBindRequest, LdapBindResponse, LdapCompareRequest, LdapExtendedResponse,
        LdapModifyRequest, LdapOp, LdapResult as LdapResultOp, LdapSearchRequest,
    },
    LdapResultCode,
};
use restldap_domain::dit::DitSnapshot;
use restldap_domain_handlers::handler::{BackendHandler, RefreshHandler};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

fn make_ldap_result(code: LdapResultCode, message: String) -> LdapResultOp {
    LdapResultOp {
        code,
        matcheddn: "".to_string(),
        message,
        referral: vec![],
    }
}

pub(crate) fn make_add_response(code: LdapResultCode, message: String) -> LdapOp {
    LdapOp::AddResponse(make_ldap_result(code, message))
}

pub(crate) fn make_del_response(code: LdapResultCode, message: String) -> LdapOp {
    LdapOp::DelResponse(make_ldap_result(code, message))
}

pub(crate) fn make_extended_response(code: LdapResultCode, message: String) -> LdapOp {
    LdapOp::ExtendedResponse(LdapExtendedResponse {
        res: make_ldap_result(code, message),
        name: None,
        value: None,
    })
}

/// One response message, with the controls to attach to it.
#[derive(Debug, Clone, PartialEq)]
pub struct LdapResponse {
    pub op: LdapOp,
    pub controls: Vec<LdapControl>,
}

impl From<LdapOp> for LdapResponse {
    fn from(op: LdapOp) -> Self {
        Self {
            op,
            controls: Vec::new(),
        }
    }
}

/// What every connection shares: the directory and the services around it.
pub struct DirectoryContext<Backend> {
    pub ldap_info: LdapInfo,
    pub dit: DitSnapshot,
    pub backend_handler: Backend,
    pub refresh_handler: Arc<dyn RefreshHandler>,
}

pub struct LdapHandler<Backend> {
    session: Session,
    context: Arc<DirectoryContext<Backend>>,
    session_uuid: uuid::Uuid,
}

impl<Backend> LdapHandler<Backend> {
    pub fn session_uuid(&self) -> &uuid::Uuid {
        &self.session_uuid
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl<Backend: BackendHandler> LdapHandler<Backend> {
    pub fn new(context: Arc<DirectoryContext<Backend>>, session_uuid: uuid::Uuid) -> Self {
        Self {
            session: Session::default(),
            context,
            session_uuid,
        }
    }

    #[instrument(skip_all, level = "debug", fields(dn = %request.dn))]
    pub async fn do_bind(&mut self, request: &LdapBindRequest) -> Vec<LdapOp> {
        let result = {
            let dit = self.context.dit.read().await;
            password::do_bind(&self.context.ldap_info, &dit, request)
        };
        let (code, message) = match result {
            Ok(grant) => {
                self.session.bind(grant);
                debug!("Success!");
                (LdapResultCode::Success, "".to_string())
            }
            Err(err) => (err.code, err.message),
        };
        vec![LdapOp::BindResponse(LdapBindResponse {
            res: make_ldap_result(code, message),
            saslcreds: None,
        })]
    }

    pub(crate) async fn do_search_or_dse(
        &mut self,
        request: &LdapSearchRequest,
        controls: &[RequestControl],
        cancellation: &CancellationToken,
    ) -> LdapResult<SearchOutcome> {
        if is_root_dse_request(request) {
            debug!("rootDSE request");
            return Ok(SearchOutcome::Completed(vec![
                root_dse_response(&self.context.ldap_info.base_dn_str, &request.attrs).into(),
                make_search_success().into(),
            ]));
        }
        let context = self.context.clone();
        let dit = context.dit.read().await;
        search::do_search(
            &dit,
            &context.ldap_info,
            &mut self.session,
            request,
            controls,
            cancellation,
        )
        .await
    }

    #[instrument(skip_all, level = "debug", fields(dn = %request.dn))]
    pub async fn do_compare(&self, request: &LdapCompareRequest) -> LdapResult<Vec<LdapOp>> {
        let dit = self.context.dit.read().await;
        compare::compare(&dit, &self.context.ldap_info, self.session.grant(), request)
    }

    pub async fn do_modify_request(&self, request: &LdapModifyRequest) -> Vec<LdapOp> {
        modify::handle_modify_request(&self.context, self.session.grant(), request)
            .await
            .unwrap_or_else(|e| vec![make_modify_response(e.code, e.message)])
    }

    /// Handles one request. `None` means nothing is to be sent back and the
    /// connection is done.
    pub async fn handle_ldap_message(
        &mut self,
        ldap_op: LdapOp,
        controls: &[RequestControl],
        cancellation: &CancellationToken,
    ) -> Option<Vec<LdapResponse>> {
        if cancellation.is_cancelled() {
            return None;
        }
        let ops = match ldap_op {
            LdapOp::BindRequest(request) => self.do_bind(&request).await,
            LdapOp::SearchRequest(request) => {
                match self.do_search_or_dse(&request, controls, cancellation).await {
                    Ok(SearchOutcome::Completed(responses)) => return Some(responses),
                    Ok(SearchOutcome::Cancelled) => return None,
                    Err(e) => vec![make_search_error(e.code, e.message)],
                }
            }
            LdapOp::UnbindRequest => {
                debug!(
                    "Unbind request for {}",
                    if self.session.grant().is_bound() {
                        self.session.grant().bind_dn.as_str()
                    } else {
                        "<not bound>"
                    }
                );
                self.session.unbind();
                // No need to notify on unbind (per rfc4511)
                return None;
            }
            LdapOp::ModifyRequest(request) => self.do_modify_request(&request).await,
            LdapOp::CompareRequest(request) => self
                .do_compare(&request)
                .await
                .unwrap_or_else(|e| vec![make_compare_response(e.code, "".to_string(), e.message)]),
            LdapOp::AddRequest(_) => vec![make_add_response(
                LdapResultCode::UnwillingToPerform,
                "Adding entries is not supported".to_string(),
            )],
            LdapOp::DelRequest(_) => vec![make_del_response(
                LdapResultCode::UnwillingToPerform,
                "Deleting entries is not supported".to_string(),
            )],
            op => vec![make_extended_response(
                LdapResultCode::UnwillingToPerform,
                format!("Unsupported operation: {op:#?}"),
            )],
        };
        Some(ops.into_iter().map(LdapResponse::from).collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        core::utils::tests::ldap_info,
        password::tests::make_bind_request,
        search::make_search_request,
    };
    use ldap3_proto::{proto::LdapFilter, LdapSearchScope};
    use pretty_assertions::assert_eq;
    use restldap_test_utils::{sample_dit, MockTestBackendHandler, MockTestRefreshHandler};

    pub fn make_context<Backend>(
        backend_handler: Backend,
        refresh_handler: MockTestRefreshHandler,
    ) -> DirectoryContext<Backend> {
        DirectoryContext {
            ldap_info: ldap_info(),
            dit: DitSnapshot::new(sample_dit()),
            backend_handler,
            refresh_handler: Arc::new(refresh_handler),
        }
    }

    fn make_handler() -> LdapHandler<MockTestBackendHandler> {
        LdapHandler::new(
            Arc::new(make_context(
                MockTestBackendHandler::new(),
                MockTestRefreshHandler::new(),
            )),
            uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
        )
    }

    pub fn make_bind_success() -> Vec<LdapOp> {
        vec![LdapOp::BindResponse(LdapBindResponse {
            res: make_ldap_result(LdapResultCode::Success, "".to_string()),
            saslcreds: None,
        })]
    }

    async fn handle(
        handler: &mut LdapHandler<MockTestBackendHandler>,
        op: LdapOp,
    ) -> Option<Vec<LdapResponse>> {
        handler
            .handle_ldap_message(op, &[], &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_bind() {
        let mut handler = make_handler();
        assert_eq!(
            handler
                .do_bind(&make_bind_request("cn=bob,ou=users,dc=example,dc=com", "secret"))
                .await,
            make_bind_success()
        );
        assert!(handler.session().grant().is_bound());
        assert!(!handler.session().grant().can_search_all);
    }

    #[tokio::test]
    async fn test_failed_bind_keeps_previous_grant() {
        let mut handler = make_handler();
        handler
            .do_bind(&make_bind_request("cn=admin,ou=users,dc=example,dc=com", "adminpass"))
            .await;
        let response = handler
            .do_bind(&make_bind_request("cn=bob,ou=users,dc=example,dc=com", "wrong"))
            .await;
        match response.as_slice() {
            [LdapOp::BindResponse(response)] => {
                assert_eq!(response.res.code, LdapResultCode::InvalidCredentials)
            }
            ops => panic!("unexpected ops: {ops:?}"),
        }
        assert!(handler.session().grant().can_search_all);
    }

    #[tokio::test]
    async fn test_root_dse() {
        let mut handler = make_handler();
        let request = LdapSearchRequest {
            scope: LdapSearchScope::Base,
            ..make_search_request::<String>(
                "",
                LdapFilter::Present("objectClass".to_string()),
                vec![],
            )
        };
        assert_eq!(
            handle(&mut handler, LdapOp::SearchRequest(request)).await,
            Some(vec![
                root_dse_response("dc=example,dc=com", &[]).into(),
                make_search_success().into(),
            ])
        );
    }

    #[tokio::test]
    async fn test_search_requires_bind() {
        let mut handler = make_handler();
        let request = make_search_request::<String>(
            "dc=example,dc=com",
            LdapFilter::Present("objectClass".to_string()),
            vec![],
        );
        let responses = handle(&mut handler, LdapOp::SearchRequest(request.clone()))
            .await
            .unwrap();
        assert_eq!(responses.len(), 1);
        match &responses[0].op {
            LdapOp::SearchResultDone(result) => {
                assert_eq!(result.code, LdapResultCode::NoSuchObject)
            }
            op => panic!("unexpected op: {op:?}"),
        }
        handler
            .do_bind(&make_bind_request("cn=admin,ou=users,dc=example,dc=com", "adminpass"))
            .await;
        let responses = handle(&mut handler, LdapOp::SearchRequest(request))
            .await
            .unwrap();
        assert_eq!(responses.len(), 9);
    }

    #[tokio::test]
    async fn test_compare_through_handler() {
        let mut handler = make_handler();
        handler
            .do_bind(&make_bind_request("uid=bob,ou=users,dc=example,dc=com", "secret"))
            .await;
        let request = LdapCompareRequest {
            dn: "cn=alice,ou=users,dc=example,dc=com".to_string(),
            atype: "uid".to_string(),
            val: b"alice".to_vec(),
        };
        assert_eq!(
            handle(&mut handler, LdapOp::CompareRequest(request)).await,
            Some(vec![make_compare_response(
                LdapResultCode::InsufficentAccessRights,
                "".to_string(),
                r#"Not allowed to compare "cn=alice,ou=users,dc=example,dc=com""#.to_string(),
            )
            .into()])
        );
    }

    #[tokio::test]
    async fn test_unbind_and_cancellation() {
        let mut handler = make_handler();
        handler
            .do_bind(&make_bind_request("cn=admin,ou=users,dc=example,dc=com", "adminpass"))
            .await;
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert_eq!(
            handler
                .handle_ldap_message(
                    LdapOp::BindRequest(make_bind_request("cn=bob,ou=users,dc=example,dc=com", "secret")),
                    &[],
                    &cancelled,
                )
                .await,
            None
        );
        assert_eq!(handle(&mut handler, LdapOp::UnbindRequest).await, None);
        assert!(!handler.session().grant().is_bound());
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let mut handler = make_handler();
        assert_eq!(
            handle(
                &mut handler,
                LdapOp::DelRequest("cn=bob,ou=users,dc=example,dc=com".to_string())
            )
            .await,
            Some(vec![make_del_response(
                LdapResultCode::UnwillingToPerform,
                "Deleting entries is not supported".to_string()
            )
            .into()])
        );
    }
}
