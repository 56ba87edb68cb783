use crate::core::{
    dn,
    error::{LdapError, LdapResult},
};
use ldap3_proto::LdapResultCode;
use restldap_domain::{
    dit::Dit,
    types::{Domain, Group, OrganizationalUnit, User},
};

#[derive(Debug, Clone, PartialEq)]
pub struct LdapInfo {
    /// Normalized base DN, e.g. `dc=example,dc=com`.
    pub base_dn_str: String,
    pub users_ou_name: String,
    pub groups_ou_name: String,
    pub users_ou_dn: String,
    pub groups_ou_dn: String,
    pub respect_control_criticality: bool,
}

impl LdapInfo {
    pub fn new(base_dn: &str, users_ou_name: &str, groups_ou_name: &str) -> LdapResult<Self> {
        let base_dn_str = dn::normalize(base_dn);
        if !dn::is_well_formed(&base_dn_str) {
            return Err(LdapError::new(
                LdapResultCode::InvalidDNSyntax,
                format!(r#"Invalid base DN: "{base_dn}""#),
            ));
        }
        let users_ou_name = users_ou_name.to_lowercase();
        let groups_ou_name = groups_ou_name.to_lowercase();
        Ok(Self {
            users_ou_dn: format!("ou={users_ou_name},{base_dn_str}"),
            groups_ou_dn: format!("ou={groups_ou_name},{base_dn_str}"),
            base_dn_str,
            users_ou_name,
            groups_ou_name,
            respect_control_criticality: false,
        })
    }

    /// Value of the first component of the base DN, `example` for `dc=example,dc=com`.
    pub fn domain_component(&self) -> &str {
        dn::split_head(&self.base_dn_str).1
    }

    pub fn new_dit(&self, users: Vec<User>, groups: Vec<Group>) -> Dit {
        Dit::new(
            self.domain_component(),
            &self.users_ou_name,
            &self.groups_ou_name,
            users,
            groups,
        )
    }

    pub fn ou_dn(&self, ou: &str) -> String {
        format!("ou={},{}", ou, self.base_dn_str)
    }

    pub fn user_dn(&self, user: &User) -> String {
        format!("cn={},{}", user.cn, self.users_ou_dn)
    }

    pub fn group_dn(&self, group: &Group) -> String {
        format!("cn={},{}", group.cn, self.groups_ou_dn)
    }
}

/// An entry of the DIT, borrowed from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryRef<'a> {
    Domain(&'a Domain),
    OrganizationalUnit(&'a OrganizationalUnit),
    User(&'a User),
    Group(&'a Group),
}

/// Finds the entry named by a normalized DN.
///
/// Users are found by `cn=` or `uid=` under the users OU, groups by `cn=`
/// under the groups OU. Values are compared case-insensitively.
pub fn resolve_entry<'a>(dit: &'a Dit, ldap_info: &LdapInfo, dn: &str) -> Option<EntryRef<'a>> {
    if dn == ldap_info.base_dn_str {
        return Some(EntryRef::Domain(&dit.domain));
    }
    let (attribute, value, parent) = dn::split_head(dn);
    if attribute == "ou" && parent == ldap_info.base_dn_str {
        return dit
            .organizational_units
            .iter()
            .find(|ou| ou.ou.eq_ignore_ascii_case(value))
            .map(EntryRef::OrganizationalUnit);
    }
    if parent == ldap_info.users_ou_dn {
        return match attribute {
            "cn" => dit.users.iter().find(|u| u.cn.to_lowercase() == value),
            "uid" => dit.users.iter().find(|u| u.uid.to_lowercase() == value),
            _ => None,
        }
        .map(EntryRef::User);
    }
    if parent == ldap_info.groups_ou_dn && attribute == "cn" {
        return dit
            .groups
            .iter()
            .find(|g| g.cn.to_lowercase() == value)
            .map(EntryRef::Group);
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use restldap_test_utils::sample_dit;

    pub fn ldap_info() -> LdapInfo {
        LdapInfo::new("dc=Example, dc=com", "users", "groups").unwrap()
    }

    #[test]
    fn test_ldap_info() {
        let info = ldap_info();
        assert_eq!(info.base_dn_str, "dc=example,dc=com");
        assert_eq!(info.users_ou_dn, "ou=users,dc=example,dc=com");
        assert_eq!(info.groups_ou_dn, "ou=groups,dc=example,dc=com");
        assert_eq!(info.domain_component(), "example");
    }

    #[test]
    fn test_ldap_info_rejects_bad_base() {
        assert_eq!(
            LdapInfo::new("example.com", "users", "groups")
                .unwrap_err()
                .code,
            LdapResultCode::InvalidDNSyntax
        );
    }

    #[test]
    fn test_resolve_entry() {
        let info = ldap_info();
        let dit = sample_dit();
        assert_eq!(
            resolve_entry(&dit, &info, "dc=example,dc=com"),
            Some(EntryRef::Domain(&dit.domain))
        );
        assert_eq!(
            resolve_entry(&dit, &info, "ou=groups,dc=example,dc=com"),
            Some(EntryRef::OrganizationalUnit(dit.groups_ou()))
        );
        assert_eq!(
            resolve_entry(&dit, &info, "cn=bob,ou=users,dc=example,dc=com"),
            Some(EntryRef::User(&dit.users[1]))
        );
        assert_eq!(
            resolve_entry(&dit, &info, "uid=bob,ou=users,dc=example,dc=com"),
            Some(EntryRef::User(&dit.users[1]))
        );
        assert_eq!(
            resolve_entry(&dit, &info, "cn=ops,ou=groups,dc=example,dc=com"),
            Some(EntryRef::Group(&dit.groups[1]))
        );
        assert_eq!(
            resolve_entry(&dit, &info, "uid=ops,ou=groups,dc=example,dc=com"),
            None
        );
        assert_eq!(
            resolve_entry(&dit, &info, "cn=carol,ou=users,dc=example,dc=com"),
            None
        );
    }
}
