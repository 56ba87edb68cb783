use crate::types::{DirectoryRecord, Domain, Group, OrganizationalUnit, User};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

pub const USERS_OU: usize = 0;
pub const GROUPS_OU: usize = 1;

/// The whole directory: one domain, the users and groups OUs, and their children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dit {
    pub domain: Domain,
    /// Always `[users, groups]`, see [`USERS_OU`] and [`GROUPS_OU`].
    pub organizational_units: [OrganizationalUnit; 2],
    pub users: Vec<User>,
    pub groups: Vec<Group>,
}

impl Dit {
    pub fn new(
        domain_component: &str,
        users_ou_name: &str,
        groups_ou_name: &str,
        users: Vec<User>,
        groups: Vec<Group>,
    ) -> Self {
        Self {
            domain: Domain::new(domain_component),
            organizational_units: [
                OrganizationalUnit::new(users_ou_name),
                OrganizationalUnit::new(groups_ou_name),
            ],
            users,
            groups,
        }
    }

    pub fn users_ou(&self) -> &OrganizationalUnit {
        &self.organizational_units[USERS_OU]
    }

    pub fn groups_ou(&self) -> &OrganizationalUnit {
        &self.organizational_units[GROUPS_OU]
    }

    pub fn entry_count(&self) -> usize {
        1 + self.organizational_units.len() + self.users.len() + self.groups.len()
    }
}

/// Shared handle on the current [`Dit`].
///
/// Users and groups are only ever swapped as whole collections, so readers
/// see either the previous or the next data set.
#[derive(Clone, Debug)]
pub struct DitSnapshot(Arc<RwLock<Dit>>);

impl DitSnapshot {
    pub fn new(dit: Dit) -> Self {
        Self(Arc::new(RwLock::new(dit)))
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Dit> {
        self.0.read().await
    }

    pub async fn replace_users_and_groups(&self, users: Vec<User>, groups: Vec<Group>) {
        let mut dit = self.0.write().await;
        dit.users = users;
        dit.groups = groups;
    }

    /// Replaces the record equal to `old` with `new`. Returns false if `old` is
    /// no longer present, e.g. after a refresh.
    pub async fn replace_record(&self, old: &DirectoryRecord, new: DirectoryRecord) -> bool {
        let mut dit = self.0.write().await;
        match (old, new) {
            (DirectoryRecord::User(old), DirectoryRecord::User(new)) => {
                match dit.users.iter_mut().find(|u| *u == old) {
                    Some(user) => {
                        *user = new;
                        true
                    }
                    None => false,
                }
            }
            (DirectoryRecord::Group(old), DirectoryRecord::Group(new)) => {
                match dit.groups.iter_mut().find(|g| *g == old) {
                    Some(group) => {
                        *group = new;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }
}
