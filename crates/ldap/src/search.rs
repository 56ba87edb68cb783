use crate::{
    codec::{decode_paged_results, RequestControl},
    core::{
        attributes::{attributes_of, AttributeField, DirectoryEntity, FieldSlot, FieldValue},
        dn,
        error::{LdapError, LdapResult},
        filter,
        utils::LdapInfo,
    },
    handler::LdapResponse,
    session::Session,
};
use ldap3_proto::{
    control::LdapControl,
    proto::{LdapOp, LdapResult as LdapResultOp, LdapSearchRequest},
    LdapFilter, LdapPartialAttribute, LdapResultCode, LdapSearchResultEntry, LdapSearchScope,
};
use restldap_domain::dit::{Dit, USERS_OU};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// Opaque cookie handed out while a paged search has more pages.
const CONTINUATION_COOKIE: &[u8] = env!("CARGO_PKG_NAME").as_bytes();

const ENTRIES_BETWEEN_YIELDS: usize = 256;

/// The traversal order of the DIT: domain, both OUs, users, then groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Domain,
    OrganizationalUnits,
    Users,
    Groups,
    Done,
}

/// Where a search stopped, kept in the session between pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCursor {
    pub phase: Phase,
    /// Next entry to look at within the current phase.
    pub index: usize,
    pub users_done: bool,
    pub groups_done: bool,
    /// Entries sent so far, over all the pages.
    pub sent: usize,
}

impl Default for SearchCursor {
    fn default() -> Self {
        Self {
            phase: Phase::Domain,
            index: 0,
            users_done: false,
            groups_done: false,
            sent: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Exhausted,
    /// The page is full and at least one more entry matches.
    PageFull,
    SizeLimitExceeded,
    Cancelled,
}

#[derive(Debug, PartialEq, Eq)]
enum Transition {
    Next(Phase),
    Stop(Stop),
}

#[derive(Debug, PartialEq)]
pub(crate) enum SearchOutcome {
    Completed(Vec<LdapResponse>),
    /// The connection went away, nothing is to be sent.
    Cancelled,
}

#[derive(Debug, PartialEq)]
struct PageRequest {
    size: usize,
    cookie: Vec<u8>,
}

#[cfg(test)]
pub(crate) fn make_search_request<S: Into<String>>(
    base: &str,
    filter: LdapFilter,
    attrs: Vec<S>,
) -> LdapSearchRequest {
    LdapSearchRequest {
        base: base.to_string(),
        scope: LdapSearchScope::Subtree,
        aliases: ldap3_proto::proto::LdapDerefAliases::Never,
        sizelimit: 0,
        timelimit: 0,
        typesonly: false,
        filter,
        attrs: attrs.into_iter().map(Into::into).collect(),
    }
}

pub(crate) fn make_search_success() -> LdapOp {
    make_search_error(LdapResultCode::Success, "".to_string())
}

pub(crate) fn make_search_error(code: LdapResultCode, message: String) -> LdapOp {
    LdapOp::SearchResultDone(LdapResultOp {
        code,
        matcheddn: "".to_string(),
        message,
        referral: vec![],
    })
}

/// The root DSE, served without a bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RootDse {
    object_class: Vec<String>,
    vendor_name: String,
    vendor_version: String,
    supported_ldap_version: String,
    supported_control: Vec<String>,
    naming_contexts: Vec<String>,
}

impl RootDse {
    fn new(base_dn: &str) -> Self {
        Self {
            object_class: vec!["top".to_string(), "LDAProotDSE".to_string()],
            vendor_name: env!("CARGO_PKG_NAME").to_string(),
            vendor_version: concat!(env!("CARGO_PKG_NAME"), "_", env!("CARGO_PKG_VERSION")).to_string(),
            supported_ldap_version: "3".to_string(),
            supported_control: vec![PAGED_RESULTS_OID.to_string()],
            naming_contexts: vec![base_dn.to_string()],
        }
    }
}

type RootDseField = AttributeField<RootDse>;

impl DirectoryEntity for RootDse {
    const ATTRIBUTES: &'static [AttributeField<Self>] = &[
        RootDseField::regular(
            "objectClass",
            |r| FieldValue::List(&r.object_class),
            |r| FieldSlot::List(&mut r.object_class),
        ),
        RootDseField::regular(
            "vendorName",
            |r| FieldValue::Text(&r.vendor_name),
            |r| FieldSlot::Text(&mut r.vendor_name),
        ),
        RootDseField::regular(
            "vendorVersion",
            |r| FieldValue::Text(&r.vendor_version),
            |r| FieldSlot::Text(&mut r.vendor_version),
        ),
        RootDseField::regular(
            "supportedLDAPVersion",
            |r| FieldValue::Text(&r.supported_ldap_version),
            |r| FieldSlot::Text(&mut r.supported_ldap_version),
        ),
        RootDseField::regular(
            "supportedControl",
            |r| FieldValue::List(&r.supported_control),
            |r| FieldSlot::List(&mut r.supported_control),
        ),
        RootDseField::regular(
            "namingContexts",
            |r| FieldValue::List(&r.naming_contexts),
            |r| FieldSlot::List(&mut r.naming_contexts),
        ),
    ];

    fn distinguished_name(&self, _ldap_info: &LdapInfo) -> String {
        String::new()
    }
}

pub(crate) fn root_dse_response(base_dn: &str, requested: &[String]) -> LdapOp {
    make_search_entry(&RootDse::new(base_dn), String::new(), requested)
}

pub(crate) fn is_root_dse_request(request: &LdapSearchRequest) -> bool {
    if request.base.is_empty() && request.scope == LdapSearchScope::Base {
        if let LdapFilter::Present(attribute) = &request.filter {
            if attribute.eq_ignore_ascii_case("objectclass") {
                return true;
            }
        }
    }
    false
}

fn make_search_entry<E: DirectoryEntity>(entity: &E, dn: String, requested: &[String]) -> LdapOp {
    let attributes = attributes_of(entity, &dn, requested)
        .into_iter()
        .map(|(atype, vals)| LdapPartialAttribute {
            atype,
            vals: vals.into_iter().map(String::into_bytes).collect(),
        })
        .collect();
    LdapOp::SearchResultEntry(LdapSearchResultEntry { dn, attributes })
}

fn read_controls(
    controls: &[RequestControl],
    respect_criticality: bool,
) -> LdapResult<Option<PageRequest>> {
    let mut page = None;
    for control in controls {
        if control.oid == PAGED_RESULTS_OID {
            match control.value.as_deref().map(decode_paged_results) {
                Some(Ok((size, cookie))) => {
                    page = Some(PageRequest {
                        size: usize::try_from(size).unwrap_or_default(),
                        cookie,
                    });
                }
                Some(Err(e)) => warn!("Could not decode the paged results control, ignoring it: {e}"),
                None => warn!("Paged results control without a value, ignoring it"),
            }
        } else if control.criticality && respect_criticality {
            return Err(LdapError::new(
                LdapResultCode::UnavailableCriticalExtension,
                format!("Unsupported critical control: {}", control.oid),
            ));
        } else {
            debug!(oid = %control.oid, critical = control.criticality, "Ignoring unsupported control");
        }
    }
    Ok(page)
}

fn descend_into_ou(cursor: &mut SearchCursor, position: usize) -> Transition {
    if position == USERS_OU {
        cursor.groups_done = true;
        Transition::Next(Phase::Users)
    } else {
        cursor.users_done = true;
        Transition::Next(Phase::Groups)
    }
}

fn end_at_leaf(cursor: &mut SearchCursor, _position: usize) -> Transition {
    cursor.users_done = true;
    cursor.groups_done = true;
    Transition::Stop(Stop::Exhausted)
}

/// One walk over the DIT, producing at most a page of entries.
struct Traversal<'a> {
    dit: &'a Dit,
    ldap_info: &'a LdapInfo,
    base: String,
    scope: &'a LdapSearchScope,
    filter: &'a LdapFilter,
    attributes: &'a [String],
    size_limit: usize,
    /// Entries that still fit in the page.
    remaining: usize,
    /// Set once the page is full: the walk goes on only to find out whether
    /// another entry would match.
    lookahead: bool,
    steps: usize,
    cursor: SearchCursor,
    entries: Vec<LdapOp>,
}

impl<'a> Traversal<'a> {
    async fn run(
        mut self,
        cancellation: &CancellationToken,
    ) -> LdapResult<(Stop, SearchCursor, Vec<LdapOp>)> {
        loop {
            if cancellation.is_cancelled() {
                return Ok((Stop::Cancelled, self.cursor, self.entries));
            }
            match self.resume(cancellation).await? {
                Transition::Next(phase) => {
                    self.cursor.phase = phase;
                    self.cursor.index = 0;
                }
                Transition::Stop(stop) => {
                    if stop == Stop::Exhausted {
                        self.cursor.phase = Phase::Done;
                    }
                    return Ok((stop, self.cursor, self.entries));
                }
            }
        }
    }

    async fn resume(&mut self, cancellation: &CancellationToken) -> LdapResult<Transition> {
        let dit = self.dit;
        match self.cursor.phase {
            Phase::Domain => self.visit_domain(),
            Phase::OrganizationalUnits => {
                self.visit_entries(
                    dit.organizational_units.as_slice(),
                    descend_into_ou,
                    Phase::Users,
                    cancellation,
                )
                .await
            }
            Phase::Users if self.cursor.users_done => Ok(Transition::Next(Phase::Groups)),
            Phase::Users => {
                self.visit_entries(&dit.users, end_at_leaf, Phase::Groups, cancellation)
                    .await
            }
            Phase::Groups if self.cursor.groups_done => Ok(Transition::Next(Phase::Done)),
            Phase::Groups => {
                self.visit_entries(&dit.groups, end_at_leaf, Phase::Done, cancellation)
                    .await
            }
            Phase::Done => Ok(Transition::Stop(Stop::Exhausted)),
        }
    }

    fn visit_domain(&mut self) -> LdapResult<Transition> {
        if self.base != self.ldap_info.base_dn_str {
            return Ok(Transition::Next(Phase::OrganizationalUnits));
        }
        match self.scope {
            LdapSearchScope::Base | LdapSearchScope::Subtree => {
                let dit = self.dit;
                let domain = &dit.domain;
                if let Some(stop) = self.offer(domain, domain.distinguished_name(self.ldap_info))? {
                    return Ok(Transition::Stop(stop));
                }
                if *self.scope == LdapSearchScope::Base {
                    return Ok(Transition::Stop(Stop::Exhausted));
                }
            }
            LdapSearchScope::OneLevel => {
                self.cursor.users_done = true;
                self.cursor.groups_done = true;
            }
            LdapSearchScope::Children => {}
        }
        Ok(Transition::Next(Phase::OrganizationalUnits))
    }

    async fn visit_entries<E: DirectoryEntity>(
        &mut self,
        entries: &'a [E],
        descend: fn(&mut SearchCursor, usize) -> Transition,
        next: Phase,
        cancellation: &CancellationToken,
    ) -> LdapResult<Transition> {
        for position in self.cursor.index..entries.len() {
            if cancellation.is_cancelled() {
                return Ok(Transition::Stop(Stop::Cancelled));
            }
            self.pause().await;
            if self.remaining == 0 {
                self.lookahead = true;
            }
            if !self.lookahead {
                self.cursor.index = position + 1;
            }
            let entity = &entries[position];
            let dn = entity.distinguished_name(self.ldap_info);
            let normalized = dn::normalize(&dn);
            if !dn::is_within(&normalized, &self.base) {
                continue;
            }
            let is_base = normalized == self.base;
            match self.scope {
                LdapSearchScope::Base if !is_base => continue,
                LdapSearchScope::OneLevel | LdapSearchScope::Children if is_base => {
                    return Ok(descend(&mut self.cursor, position));
                }
                _ => {}
            }
            if let Some(stop) = self.offer(entity, dn)? {
                return Ok(Transition::Stop(stop));
            }
        }
        Ok(Transition::Next(next))
    }

    /// Runs the filter on an entry in scope and adds it to the page if it matches.
    fn offer<E: DirectoryEntity>(&mut self, entity: &E, dn: String) -> LdapResult<Option<Stop>> {
        if !filter::matches(entity, self.filter)? {
            return Ok(None);
        }
        if self.size_limit > 0 && self.cursor.sent >= self.size_limit {
            return Ok(Some(Stop::SizeLimitExceeded));
        }
        if self.lookahead {
            return Ok(Some(Stop::PageFull));
        }
        self.entries
            .push(make_search_entry(entity, dn, self.attributes));
        self.cursor.sent += 1;
        self.remaining = self.remaining.saturating_sub(1);
        Ok((*self.scope == LdapSearchScope::Base).then_some(Stop::Exhausted))
    }

    async fn pause(&mut self) {
        self.steps += 1;
        if self.steps % ENTRIES_BETWEEN_YIELDS == 0 {
            tokio::task::yield_now().await;
        }
    }
}

fn done_with_controls(code: LdapResultCode, message: String, controls: Vec<LdapControl>) -> LdapResponse {
    LdapResponse {
        op: make_search_error(code, message),
        controls,
    }
}

fn paged_done_control(more: bool) -> LdapControl {
    LdapControl::SimplePagedResults {
        size: 0,
        cookie: if more {
            CONTINUATION_COOKIE.to_vec()
        } else {
            Vec::new()
        },
    }
}

#[instrument(skip_all, level = "debug", fields(base = %request.base, scope = ?request.scope))]
pub(crate) async fn do_search(
    dit: &Dit,
    ldap_info: &LdapInfo,
    session: &mut Session,
    request: &LdapSearchRequest,
    controls: &[RequestControl],
    cancellation: &CancellationToken,
) -> LdapResult<SearchOutcome> {
    let page = read_controls(controls, ldap_info.respect_control_criticality)?;
    let base = if request.base.is_empty() {
        ldap_info.base_dn_str.clone()
    } else {
        dn::normalize(&request.base)
    };
    if !session.grant().can_search(&base) {
        session.take_cursor();
        return Err(LdapError::new(
            LdapResultCode::NoSuchObject,
            format!(r#"Search base "{base}" does not exist or is not readable"#),
        ));
    }
    let page_size = page.as_ref().map(|p| p.size).unwrap_or_default();
    let resuming = page.as_ref().is_some_and(|p| !p.cookie.is_empty());
    let previous = session.take_cursor();
    if page_size == 0 && resuming {
        debug!("Paged search abandoned by the client");
        return Ok(SearchOutcome::Completed(vec![done_with_controls(
            LdapResultCode::Success,
            "".to_string(),
            vec![paged_done_control(false)],
        )]));
    }
    let cursor = match previous {
        Some(cursor) if resuming && page_size > 0 => {
            debug!(?cursor, "Resuming paged search");
            cursor
        }
        _ => SearchCursor::default(),
    };
    let traversal = Traversal {
        dit,
        ldap_info,
        base,
        scope: &request.scope,
        filter: &request.filter,
        attributes: &request.attrs,
        size_limit: usize::try_from(request.sizelimit).unwrap_or_default(),
        remaining: if page_size > 0 {
            page_size
        } else {
            dit.entry_count()
        },
        lookahead: false,
        steps: 0,
        cursor,
        entries: Vec::new(),
    };
    let (stop, cursor, entries) = traversal.run(cancellation).await?;
    debug!(?stop, sent = cursor.sent, "Search stopped");
    let (code, message) = match stop {
        Stop::Cancelled => return Ok(SearchOutcome::Cancelled),
        Stop::SizeLimitExceeded => (
            LdapResultCode::SizeLimitExceeded,
            format!("Size limit of {} entries exceeded", request.sizelimit),
        ),
        Stop::Exhausted | Stop::PageFull => (LdapResultCode::Success, "".to_string()),
    };
    let more = page_size > 0 && stop == Stop::PageFull;
    let done_controls = if page.is_some() {
        vec![paged_done_control(more)]
    } else {
        Vec::new()
    };
    if more {
        session.store_cursor(cursor);
    }
    let mut responses: Vec<LdapResponse> = entries.into_iter().map(LdapResponse::from).collect();
    responses.push(done_with_controls(code, message, done_controls));
    Ok(SearchOutcome::Completed(responses))
}
