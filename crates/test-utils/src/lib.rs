use async_trait::async_trait;
use restldap_auth::ssha::encode_password;
use restldap_domain::{
    dit::Dit,
    types::{DirectoryRecord, Group, User},
};
use restldap_domain_handlers::{
    error::Result,
    handler::{BackendHandler, RefreshHandler},
};

mockall::mock! {
    pub TestBackendHandler{}
    impl Clone for TestBackendHandler {
        fn clone(&self) -> Self;
    }
    #[async_trait]
    impl BackendHandler for TestBackendHandler {
        async fn get_data(&self) -> Result<(Vec<User>, Vec<Group>)>;
        async fn update_data(&self, old: &DirectoryRecord, new: &DirectoryRecord) -> Result<()>;
    }
}

mockall::mock! {
    pub TestRefreshHandler{}
    impl RefreshHandler for TestRefreshHandler {
        fn refresh_now(&self);
    }
}

pub const TEST_SALT: &[u8] = b"salt1234";

pub fn make_user(cn: &str, password: &str, ldap_admin: bool) -> User {
    User {
        object_class: vec!["posixAccount".to_string(), "inetOrgPerson".to_string()],
        cn: cn.to_string(),
        uid: cn.to_string(),
        uid_number: 1000,
        gid_number: 1000,
        user_password: encode_password(password, TEST_SALT),
        mail: format!("{cn}@example.com"),
        home_directory: format!("/home/{cn}"),
        login_shell: "/bin/bash".to_string(),
        ldap_admin,
        entry_uuid: format!("00000000-0000-0000-0000-{:0>12}", cn.len()),
        ..Default::default()
    }
}

pub fn make_group(cn: &str, gid_number: u32, members: &[&str]) -> Group {
    Group {
        object_class: vec!["posixGroup".to_string()],
        cn: cn.to_string(),
        gid_number,
        member_uid: members.iter().map(|m| m.to_string()).collect(),
        ..Default::default()
    }
}

/// `dc=example,dc=com` with admin `admin`, users `bob` and `alice`, groups `admins` and `ops`.
pub fn sample_dit() -> Dit {
    Dit::new(
        "example",
        "users",
        "groups",
        vec![
            make_user("admin", "adminpass", true),
            make_user("bob", "secret", false),
            make_user("alice", "wonderland", false),
        ],
        vec![
            make_group("admins", 2000, &["admin"]),
            make_group("ops", 2001, &["bob", "alice"]),
        ],
    )
}
