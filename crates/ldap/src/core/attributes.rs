//! Per entity attribute tables.
//!
//! Every entity kind lists its LDAP attributes once, with accessors into the
//! record. Rendering, filtering, compare and modify all go through the table.

use crate::core::{
    error::{LdapError, LdapResult},
    utils::LdapInfo,
};
use ldap3_proto::{proto::LdapSubstringFilter, LdapResultCode};
use restldap_domain::types::{Domain, Group, OrganizationalUnit, User};
use std::{borrow::Cow, collections::HashSet};

pub const ENTRY_DN: &str = "entryDN";

const TRUE: &str = "TRUE";
const FALSE: &str = "FALSE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Regular,
    /// Only returned when asked for by name or with `+`.
    Operational,
    /// Never exposed over LDAP.
    Hidden,
}

pub enum FieldValue<'a> {
    Text(&'a str),
    Number(u32),
    Flag(bool),
    List(&'a [String]),
}

pub enum FieldSlot<'a> {
    Text(&'a mut String),
    Number(&'a mut u32),
    Flag(&'a mut bool),
    List(&'a mut Vec<String>),
}

pub struct AttributeField<E> {
    pub name: &'static str,
    pub visibility: Visibility,
    /// Values are compared byte for byte instead of case-folded.
    pub case_sensitive: bool,
    get: fn(&E) -> FieldValue<'_>,
    get_mut: fn(&mut E) -> FieldSlot<'_>,
}

fn flag_str(flag: bool) -> &'static str {
    if flag {
        TRUE
    } else {
        FALSE
    }
}

fn invalid_syntax(message: String) -> LdapError {
    LdapError::new(LdapResultCode::InvalidAttributeSyntax, message)
}

impl<E> AttributeField<E> {
    const fn new(
        name: &'static str,
        visibility: Visibility,
        case_sensitive: bool,
        get: fn(&E) -> FieldValue<'_>,
        get_mut: fn(&mut E) -> FieldSlot<'_>,
    ) -> Self {
        Self {
            name,
            visibility,
            case_sensitive,
            get,
            get_mut,
        }
    }

    pub(crate) const fn regular(
        name: &'static str,
        get: fn(&E) -> FieldValue<'_>,
        get_mut: fn(&mut E) -> FieldSlot<'_>,
    ) -> Self {
        Self::new(name, Visibility::Regular, false, get, get_mut)
    }

    pub(crate) const fn operational(
        name: &'static str,
        get: fn(&E) -> FieldValue<'_>,
        get_mut: fn(&mut E) -> FieldSlot<'_>,
    ) -> Self {
        Self::new(name, Visibility::Operational, false, get, get_mut)
    }

    pub(crate) const fn hidden(
        name: &'static str,
        get: fn(&E) -> FieldValue<'_>,
        get_mut: fn(&mut E) -> FieldSlot<'_>,
    ) -> Self {
        Self::new(name, Visibility::Hidden, false, get, get_mut)
    }

    pub(crate) const fn case_sensitive(
        name: &'static str,
        get: fn(&E) -> FieldValue<'_>,
        get_mut: fn(&mut E) -> FieldSlot<'_>,
    ) -> Self {
        Self::new(name, Visibility::Regular, true, get, get_mut)
    }

    /// The rendered values. Empty strings and lists have no value at all.
    pub fn values(&self, entity: &E) -> Vec<String> {
        match (self.get)(entity) {
            FieldValue::Text("") => Vec::new(),
            FieldValue::Text(text) => vec![text.to_string()],
            FieldValue::Number(number) => vec![number.to_string()],
            FieldValue::Flag(flag) => vec![flag_str(flag).to_string()],
            FieldValue::List(list) => list.to_vec(),
        }
    }

    fn fold<'s>(&self, value: &'s str) -> Cow<'s, str> {
        if self.case_sensitive {
            Cow::Borrowed(value)
        } else {
            Cow::Owned(value.to_lowercase())
        }
    }

    fn text_equals(&self, value: &str, candidate: &str) -> bool {
        self.fold(value) == self.fold(candidate)
    }

    pub fn value_equals(&self, entity: &E, candidate: &str) -> bool {
        match (self.get)(entity) {
            FieldValue::Text(text) => self.text_equals(text, candidate),
            FieldValue::Number(number) => number.to_string() == candidate.trim(),
            FieldValue::Flag(flag) => flag_str(flag).eq_ignore_ascii_case(candidate.trim()),
            FieldValue::List(list) => list.iter().any(|value| self.text_equals(value, candidate)),
        }
    }

    pub fn matches_substring(&self, entity: &E, filter: &LdapSubstringFilter) -> bool {
        self.values(entity)
            .iter()
            .any(|value| self.substring_matches(value, filter))
    }

    fn substring_matches(&self, value: &str, filter: &LdapSubstringFilter) -> bool {
        let value = self.fold(value);
        let mut rest: &str = &value;
        if let Some(initial) = &filter.initial {
            match rest.strip_prefix(&*self.fold(initial)) {
                Some(remainder) => rest = remainder,
                None => return false,
            }
        }
        for part in &filter.any {
            let part = self.fold(part);
            match rest.find(&*part) {
                Some(index) => rest = &rest[index + part.len()..],
                None => return false,
            }
        }
        match &filter.final_ {
            Some(final_) => rest.ends_with(&*self.fold(final_)),
            None => true,
        }
    }

    /// Replaces all the values of the attribute.
    pub fn replace(&self, entity: &mut E, mut values: Vec<String>) -> LdapResult<()> {
        let slot = (self.get_mut)(entity);
        if !matches!(slot, FieldSlot::List(_)) && values.len() > 1 {
            return Err(invalid_syntax(format!(
                "Attribute {} is single-valued, got {} values",
                self.name,
                values.len()
            )));
        }
        match slot {
            FieldSlot::Text(text) => *text = values.pop().unwrap_or_default(),
            FieldSlot::Number(number) => {
                let value = values
                    .pop()
                    .ok_or_else(|| invalid_syntax(format!("Attribute {} needs a value", self.name)))?;
                *number = value.trim().parse().map_err(|_| {
                    invalid_syntax(format!(
                        r#"Wrong value for attribute {}: "{value}" is not a number"#,
                        self.name
                    ))
                })?;
            }
            FieldSlot::Flag(flag) => {
                let value = values.pop().unwrap_or_default();
                *flag = if value.eq_ignore_ascii_case(TRUE) {
                    true
                } else if value.eq_ignore_ascii_case(FALSE) {
                    false
                } else {
                    return Err(invalid_syntax(format!(
                        r#"Wrong value for attribute {}: "{value}" is not a boolean"#,
                        self.name
                    )));
                };
            }
            FieldSlot::List(list) => *list = values,
        }
        Ok(())
    }
}

pub trait DirectoryEntity: Sized + 'static {
    const ATTRIBUTES: &'static [AttributeField<Self>];

    fn distinguished_name(&self, ldap_info: &LdapInfo) -> String;

    /// The exposed attribute with that name, case-insensitively.
    fn field_matching(name: &str) -> Option<&'static AttributeField<Self>> {
        Self::ATTRIBUTES
            .iter()
            .find(|field| field.visibility != Visibility::Hidden && field.name.eq_ignore_ascii_case(name))
    }
}

/// Attributes of `entity` to send back for the `requested` selection.
///
/// No selection means `*`. `+` selects `entryDN` and the operational
/// attributes, and `1.1` selects nothing. Explicitly named attributes keep
/// the spelling of the request.
pub fn attributes_of<E: DirectoryEntity>(
    entity: &E,
    dn: &str,
    requested: &[String],
) -> Vec<(String, Vec<String>)> {
    let mut attributes = Vec::new();
    let mut seen = HashSet::new();
    let mut add = |name: &str, values: Vec<String>| {
        if !values.is_empty() && seen.insert(name.to_lowercase()) {
            attributes.push((name.to_string(), values));
        }
    };
    let all_regular = ["*".to_string()];
    let requested = if requested.is_empty() {
        &all_regular[..]
    } else {
        requested
    };
    for name in requested {
        match name.as_str() {
            "*" => E::ATTRIBUTES
                .iter()
                .filter(|field| field.visibility == Visibility::Regular)
                .for_each(|field| add(field.name, field.values(entity))),
            "+" => {
                add(ENTRY_DN, vec![dn.to_string()]);
                E::ATTRIBUTES
                    .iter()
                    .filter(|field| field.visibility == Visibility::Operational)
                    .for_each(|field| add(field.name, field.values(entity)));
            }
            "1.1" => {}
            name if name.eq_ignore_ascii_case(ENTRY_DN) => add(name, vec![dn.to_string()]),
            name => {
                if let Some(field) = E::field_matching(name) {
                    add(name, field.values(entity));
                }
            }
        }
    }
    attributes
}

type DomainField = AttributeField<Domain>;
type OrganizationalUnitField = AttributeField<OrganizationalUnit>;
type UserField = AttributeField<User>;
type GroupField = AttributeField<Group>;

impl DirectoryEntity for Domain {
    const ATTRIBUTES: &'static [AttributeField<Self>] = &[
        DomainField::regular(
            "objectClass",
            |d| FieldValue::List(&d.object_class),
            |d| FieldSlot::List(&mut d.object_class),
        ),
        DomainField::hidden("dc", |d| FieldValue::Text(&d.dc), |d| FieldSlot::Text(&mut d.dc)),
        DomainField::operational(
            "entryUUID",
            |d| FieldValue::Text(&d.entry_uuid),
            |d| FieldSlot::Text(&mut d.entry_uuid),
        ),
        DomainField::operational(
            "hasSubordinates",
            |d| FieldValue::Text(&d.has_subordinates),
            |d| FieldSlot::Text(&mut d.has_subordinates),
        ),
    ];

    fn distinguished_name(&self, ldap_info: &LdapInfo) -> String {
        ldap_info.base_dn_str.clone()
    }
}

impl DirectoryEntity for OrganizationalUnit {
    const ATTRIBUTES: &'static [AttributeField<Self>] = &[
        OrganizationalUnitField::regular(
            "objectClass",
            |o| FieldValue::List(&o.object_class),
            |o| FieldSlot::List(&mut o.object_class),
        ),
        OrganizationalUnitField::hidden(
            "ou",
            |o| FieldValue::Text(&o.ou),
            |o| FieldSlot::Text(&mut o.ou),
        ),
        OrganizationalUnitField::operational(
            "entryUUID",
            |o| FieldValue::Text(&o.entry_uuid),
            |o| FieldSlot::Text(&mut o.entry_uuid),
        ),
        OrganizationalUnitField::operational(
            "hasSubordinates",
            |o| FieldValue::Text(&o.has_subordinates),
            |o| FieldSlot::Text(&mut o.has_subordinates),
        ),
    ];

    fn distinguished_name(&self, ldap_info: &LdapInfo) -> String {
        ldap_info.ou_dn(&self.ou)
    }
}

impl DirectoryEntity for User {
    const ATTRIBUTES: &'static [AttributeField<Self>] = &[
        UserField::regular(
            "objectClass",
            |u| FieldValue::List(&u.object_class),
            |u| FieldSlot::List(&mut u.object_class),
        ),
        UserField::regular("cn", |u| FieldValue::Text(&u.cn), |u| FieldSlot::Text(&mut u.cn)),
        UserField::regular("uid", |u| FieldValue::Text(&u.uid), |u| FieldSlot::Text(&mut u.uid)),
        UserField::regular(
            "uidNumber",
            |u| FieldValue::Number(u.uid_number),
            |u| FieldSlot::Number(&mut u.uid_number),
        ),
        UserField::regular(
            "gidNumber",
            |u| FieldValue::Number(u.gid_number),
            |u| FieldSlot::Number(&mut u.gid_number),
        ),
        UserField::case_sensitive(
            "userPassword",
            |u| FieldValue::Text(&u.user_password),
            |u| FieldSlot::Text(&mut u.user_password),
        ),
        UserField::regular(
            "displayName",
            |u| FieldValue::Text(&u.display_name),
            |u| FieldSlot::Text(&mut u.display_name),
        ),
        UserField::regular(
            "givenName",
            |u| FieldValue::Text(&u.given_name),
            |u| FieldSlot::Text(&mut u.given_name),
        ),
        UserField::regular("sn", |u| FieldValue::Text(&u.sn), |u| FieldSlot::Text(&mut u.sn)),
        UserField::regular("mail", |u| FieldValue::Text(&u.mail), |u| FieldSlot::Text(&mut u.mail)),
        UserField::regular(
            "homeDirectory",
            |u| FieldValue::Text(&u.home_directory),
            |u| FieldSlot::Text(&mut u.home_directory),
        ),
        UserField::regular(
            "loginShell",
            |u| FieldValue::Text(&u.login_shell),
            |u| FieldSlot::Text(&mut u.login_shell),
        ),
        UserField::regular(
            "memberOf",
            |u| FieldValue::List(&u.member_of),
            |u| FieldSlot::List(&mut u.member_of),
        ),
        UserField::hidden(
            "ldapAdmin",
            |u| FieldValue::Flag(u.ldap_admin),
            |u| FieldSlot::Flag(&mut u.ldap_admin),
        ),
        UserField::operational(
            "entryUUID",
            |u| FieldValue::Text(&u.entry_uuid),
            |u| FieldSlot::Text(&mut u.entry_uuid),
        ),
        UserField::operational(
            "hasSubordinates",
            |u| FieldValue::Text(&u.has_subordinates),
            |u| FieldSlot::Text(&mut u.has_subordinates),
        ),
    ];

    fn distinguished_name(&self, ldap_info: &LdapInfo) -> String {
        ldap_info.user_dn(self)
    }
}

impl DirectoryEntity for Group {
    const ATTRIBUTES: &'static [AttributeField<Self>] = &[
        GroupField::regular(
            "objectClass",
            |g| FieldValue::List(&g.object_class),
            |g| FieldSlot::List(&mut g.object_class),
        ),
        GroupField::regular("cn", |g| FieldValue::Text(&g.cn), |g| FieldSlot::Text(&mut g.cn)),
        GroupField::regular(
            "gidNumber",
            |g| FieldValue::Number(g.gid_number),
            |g| FieldSlot::Number(&mut g.gid_number),
        ),
        GroupField::regular(
            "description",
            |g| FieldValue::Text(&g.description),
            |g| FieldSlot::Text(&mut g.description),
        ),
        GroupField::regular(
            "memberUid",
            |g| FieldValue::List(&g.member_uid),
            |g| FieldSlot::List(&mut g.member_uid),
        ),
        GroupField::operational(
            "entryUUID",
            |g| FieldValue::Text(&g.entry_uuid),
            |g| FieldSlot::Text(&mut g.entry_uuid),
        ),
        GroupField::operational(
            "hasSubordinates",
            |g| FieldValue::Text(&g.has_subordinates),
            |g| FieldSlot::Text(&mut g.has_subordinates),
        ),
    ];

    fn distinguished_name(&self, ldap_info: &LdapInfo) -> String {
        ldap_info.group_dn(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::tests::ldap_info;
    use pretty_assertions::assert_eq;
    use restldap_test_utils::{make_group, make_user};

    fn names(attributes: &[(String, Vec<String>)]) -> Vec<&str> {
        attributes.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn test_all_regular_attributes() {
        let group = make_group("ops", 2001, &["bob"]);
        let attributes = attributes_of(&group, "cn=ops,ou=groups,dc=example,dc=com", &[]);
        assert_eq!(
            attributes,
            vec![
                ("objectClass".to_string(), vec!["posixGroup".to_string()]),
                ("cn".to_string(), vec!["ops".to_string()]),
                ("gidNumber".to_string(), vec!["2001".to_string()]),
                ("memberUid".to_string(), vec!["bob".to_string()]),
            ]
        );
    }

    #[test]
    fn test_hidden_attributes_never_show() {
        let user = make_user("bob", "secret", true);
        let attributes = attributes_of(
            &user,
            "cn=bob,ou=users,dc=example,dc=com",
            &["*".to_string(), "+".to_string(), "ldapAdmin".to_string()],
        );
        assert!(!names(&attributes).contains(&"ldapAdmin"));
        assert!(names(&attributes).contains(&"entryUUID"));
        assert!(names(&attributes).contains(&"entryDN"));
    }

    #[test]
    fn test_operational_and_named_selection() {
        let user = make_user("bob", "secret", false);
        let dn = "cn=bob,ou=users,dc=example,dc=com";
        assert_eq!(
            names(&attributes_of(&user, dn, &["+".to_string()])),
            vec!["entryDN", "entryUUID"]
        );
        assert_eq!(
            attributes_of(&user, dn, &["MAIL".to_string(), "entrydn".to_string()]),
            vec![
                ("MAIL".to_string(), vec!["bob@example.com".to_string()]),
                ("entrydn".to_string(), vec![dn.to_string()]),
            ]
        );
        assert!(attributes_of(&user, dn, &["1.1".to_string()]).is_empty());
        assert!(attributes_of(&user, dn, &["nonexistent".to_string()]).is_empty());
    }

    #[test]
    fn test_value_equals() {
        let user = make_user("Bob", "secret", false);
        let cn = User::field_matching("CN").unwrap();
        assert!(cn.value_equals(&user, "bob"));
        let uid_number = User::field_matching("uidnumber").unwrap();
        assert!(uid_number.value_equals(&user, "1000"));
        assert!(!uid_number.value_equals(&user, "1001"));
        let password = User::field_matching("userPassword").unwrap();
        assert!(password.value_equals(&user, &user.user_password));
        assert!(!password.value_equals(&user, &user.user_password.to_lowercase()));
        assert!(User::field_matching("ldapAdmin").is_none());
    }

    #[test]
    fn test_substring() {
        let user = make_user("alice", "wonderland", false);
        let mail = User::field_matching("mail").unwrap();
        let filter = |initial: Option<&str>, any: &[&str], final_: Option<&str>| LdapSubstringFilter {
            initial: initial.map(str::to_string),
            any: any.iter().map(|s| s.to_string()).collect(),
            final_: final_.map(str::to_string),
        };
        assert!(mail.matches_substring(&user, &filter(Some("ALI"), &[], None)));
        assert!(mail.matches_substring(&user, &filter(None, &["@"], Some(".com"))));
        assert!(mail.matches_substring(&user, &filter(Some("a"), &["ce", "ample"], Some("com"))));
        assert!(!mail.matches_substring(&user, &filter(Some("bob"), &[], None)));
        assert!(!mail.matches_substring(&user, &filter(None, &["example", "alice"], None)));
    }

    #[test]
    fn test_replace() {
        let mut user = make_user("bob", "secret", false);
        let field = |name| User::field_matching(name).unwrap();
        field("mail").replace(&mut user, vec!["b@x.org".to_string()]).unwrap();
        assert_eq!(user.mail, "b@x.org");
        field("gidNumber").replace(&mut user, vec!["42".to_string()]).unwrap();
        assert_eq!(user.gid_number, 42);
        field("memberOf")
            .replace(&mut user, vec!["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(user.member_of, vec!["a", "b"]);
        field("sn").replace(&mut user, vec![]).unwrap();
        assert_eq!(user.sn, "");
        assert_eq!(
            field("gidNumber")
                .replace(&mut user, vec!["many".to_string()])
                .unwrap_err()
                .code,
            LdapResultCode::InvalidAttributeSyntax
        );
        assert_eq!(
            field("mail")
                .replace(&mut user, vec!["a".to_string(), "b".to_string()])
                .unwrap_err()
                .code,
            LdapResultCode::InvalidAttributeSyntax
        );
        assert_eq!(
            field("uidNumber").replace(&mut user, vec![]).unwrap_err().code,
            LdapResultCode::InvalidAttributeSyntax
        );
    }

    #[test]
    fn test_distinguished_names() {
        let info = ldap_info();
        assert_eq!(
            make_user("bob", "x", false).distinguished_name(&info),
            "cn=bob,ou=users,dc=example,dc=com"
        );
        assert_eq!(
            OrganizationalUnit::new("groups").distinguished_name(&info),
            "ou=groups,dc=example,dc=com"
        );
        assert_eq!(
            Domain::new("example").distinguished_name(&info),
            "dc=example,dc=com"
        );
    }
}
