use crate::search::SearchCursor;
use restldap_auth::access_control::AccessGrant;

/// Per connection state: who is bound, and where a paged search left off.
#[derive(Debug, Default)]
pub struct Session {
    grant: AccessGrant,
    cursor: Option<SearchCursor>,
}

impl Session {
    pub fn grant(&self) -> &AccessGrant {
        &self.grant
    }

    /// A successful bind replaces the grant and abandons any paged search.
    pub fn bind(&mut self, grant: AccessGrant) {
        self.grant = grant;
        self.cursor = None;
    }

    pub fn unbind(&mut self) {
        *self = Self::default();
    }

    pub fn cursor(&self) -> Option<&SearchCursor> {
        self.cursor.as_ref()
    }

    pub(crate) fn take_cursor(&mut self) -> Option<SearchCursor> {
        self.cursor.take()
    }

    pub(crate) fn store_cursor(&mut self, cursor: SearchCursor) {
        self.cursor = Some(cursor);
    }
}
