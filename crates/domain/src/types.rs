use serde::{Deserialize, Serialize};

/// Stable entryUUID for the synthetic entries (domain and OUs), derived from their name.
pub fn name_based_uuid(name: &str) -> String {
    uuid::Uuid::new_v3(&uuid::Uuid::NAMESPACE_X500, name.as_bytes()).to_string()
}

const TRUE: &str = "TRUE";

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct Domain {
    pub object_class: Vec<String>,
    pub dc: String,
    pub entry_uuid: String,
    pub has_subordinates: String,
}

impl Domain {
    pub fn new(domain_component: &str) -> Self {
        Self {
            object_class: vec!["top".to_string(), "domain".to_string()],
            dc: domain_component.to_string(),
            entry_uuid: name_based_uuid(domain_component),
            has_subordinates: TRUE.to_string(),
        }
    }
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    pub object_class: Vec<String>,
    pub ou: String,
    pub entry_uuid: String,
    pub has_subordinates: String,
}

impl OrganizationalUnit {
    pub fn new(name: &str) -> Self {
        Self {
            object_class: vec!["top".to_string(), "organizationalUnit".to_string()],
            ou: name.to_string(),
            entry_uuid: name_based_uuid(name),
            has_subordinates: TRUE.to_string(),
        }
    }
}

/// A user record, as stored by the backends.
#[derive(PartialEq, Eq, Clone, Default, Serialize, Deserialize, derive_more::Debug)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub object_class: Vec<String>,
    pub cn: String,
    pub uid_number: u32,
    #[debug(skip)]
    pub user_password: String,
    pub gid_number: u32,
    pub uid: String,
    pub display_name: String,
    pub given_name: String,
    pub sn: String,
    pub mail: String,
    pub home_directory: String,
    pub login_shell: String,
    pub member_of: Vec<String>,
    /// Only consulted when binding, never exposed over LDAP.
    pub ldap_admin: bool,
    #[serde(rename = "entryUUID")]
    pub entry_uuid: String,
    pub has_subordinates: String,
}

#[derive(PartialEq, Eq, Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Group {
    pub object_class: Vec<String>,
    pub cn: String,
    pub gid_number: u32,
    pub description: String,
    pub member_uid: Vec<String>,
    #[serde(rename = "entryUUID")]
    pub entry_uuid: String,
    pub has_subordinates: String,
}

/// The records a client is allowed to modify.
#[derive(PartialEq, Eq, Clone, Debug, derive_more::From)]
pub enum DirectoryRecord {
    User(User),
    Group(Group),
}

impl DirectoryRecord {
    pub fn cn(&self) -> &str {
        match self {
            DirectoryRecord::User(user) => &user.cn,
            DirectoryRecord::Group(group) => &group.cn,
        }
    }
}
