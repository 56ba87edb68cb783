use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Permission {
    Admin,
    Regular,
}

/// What a connection may do, established by a successful bind.
///
/// The default grant (no bind yet) allows nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Normalized DN of the bound user.
    pub bind_dn: String,
    pub can_search_all: bool,
    pub can_compare_all: bool,
    pub can_modify_all: bool,
}

impl AccessGrant {
    pub fn new(bind_dn: String, permission: Permission) -> Self {
        let is_admin = permission == Permission::Admin;
        Self {
            bind_dn,
            can_search_all: is_admin,
            can_compare_all: is_admin,
            can_modify_all: is_admin,
        }
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        !self.bind_dn.is_empty()
    }

    #[must_use]
    pub fn is_self(&self, dn: &str) -> bool {
        self.is_bound() && self.bind_dn == dn
    }

    #[must_use]
    pub fn can_search(&self, base_dn: &str) -> bool {
        self.can_search_all || self.is_self(base_dn)
    }

    #[must_use]
    pub fn can_compare(&self, dn: &str) -> bool {
        self.can_compare_all || self.is_self(dn)
    }

    #[must_use]
    pub fn can_modify(&self, dn: &str) -> bool {
        self.can_modify_all || self.is_self(dn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "cn=alice,ou=users,dc=example,dc=com";
    const BOB: &str = "cn=bob,ou=users,dc=example,dc=com";

    #[test]
    fn test_admin_grant() {
        let grant = AccessGrant::new(ALICE.to_string(), Permission::Admin);
        assert!(grant.can_search(BOB));
        assert!(grant.can_compare(BOB));
        assert!(grant.can_modify(BOB));
    }

    #[test]
    fn test_regular_grant_is_self_only() {
        let grant = AccessGrant::new(ALICE.to_string(), Permission::Regular);
        assert!(grant.can_search(ALICE));
        assert!(grant.can_compare(ALICE));
        assert!(grant.can_modify(ALICE));
        assert!(!grant.can_search(BOB));
        assert!(!grant.can_compare(BOB));
        assert!(!grant.can_modify(BOB));
    }

    #[test]
    fn test_unbound_grant() {
        let grant = AccessGrant::default();
        assert!(!grant.is_bound());
        assert!(!grant.can_search(""));
        assert!(!grant.can_compare(""));
    }
}
