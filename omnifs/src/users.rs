//! User accounts, keyed by username.

use std::collections::BTreeMap;

use log::debug;

use crate::record::{UserRecord, UserRole};

#[derive(Debug, Default)]
pub struct UserManager {
    users: BTreeMap<String, UserRecord>,
}

impl UserManager {
    pub fn new() -> UserManager {
        UserManager {
            users: BTreeMap::new(),
        }
    }

    /// Rebuilds the map from a user table read off disk. Zeroed slots in
    /// the fixed-size table parse with an empty username and are skipped.
    pub fn load_records(&mut self, records: Vec<UserRecord>) {
        self.users.clear();
        for rec in records {
            if rec.username.is_empty() {
                continue;
            }
            self.users.insert(rec.username.clone(), rec);
        }
    }

    /// Exports every account for the on-disk user table.
    pub fn save_records(&self) -> Vec<UserRecord> {
        self.users.values().cloned().collect()
    }

    /// Returns false when the username is already taken.
    pub fn create_user(
        &mut self,
        username: &str,
        password_hash: &str,
        role: UserRole,
        created_time: u64,
    ) -> bool {
        if self.users.contains_key(username) {
            return false;
        }
        debug!("creating user {:?} role {:?}", username, role);
        self.users.insert(
            username.to_string(),
            UserRecord::new(username, password_hash, role, created_time),
        );
        true
    }

    pub fn delete_user(&mut self, username: &str) -> bool {
        self.users.remove(username).is_some()
    }

    pub fn find_user(&self, username: &str) -> Option<&UserRecord> {
        self.users.get(username)
    }

    pub fn find_user_mut(&mut self, username: &str) -> Option<&mut UserRecord> {
        self.users.get_mut(username)
    }

    // The stored field is compared as text; see DESIGN.md for the policy.
    pub fn verify_password(&self, username: &str, incoming: &str) -> bool {
        match self.users.get(username) {
            Some(user) => user.password_hash == incoming,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_duplicates() {
        let mut mgr = UserManager::new();
        assert!(mgr.create_user("alice", "pw", UserRole::Normal, 1));
        assert!(!mgr.create_user("alice", "other", UserRole::Admin, 2));
        assert_eq!(mgr.len(), 1);
        assert_eq!(mgr.find_user("alice").unwrap().password_hash, "pw");
    }

    #[test]
    fn delete_reports_presence() {
        let mut mgr = UserManager::new();
        mgr.create_user("alice", "pw", UserRole::Normal, 1);
        assert!(mgr.delete_user("alice"));
        assert!(!mgr.delete_user("alice"));
    }

    #[test]
    fn verify_password_compares_stored_text() {
        let mut mgr = UserManager::new();
        mgr.create_user("alice", "pw", UserRole::Normal, 1);
        assert!(mgr.verify_password("alice", "pw"));
        assert!(!mgr.verify_password("alice", "nope"));
        assert!(!mgr.verify_password("bob", "pw"));
    }

    #[test]
    fn load_skips_zeroed_table_slots() {
        let mut mgr = UserManager::new();
        let live = UserRecord::new("alice", "pw", UserRole::Admin, 1);
        let empty = UserRecord::parse(&[0u8; crate::record::USER_RECORD_SIZE]);
        mgr.load_records(vec![empty.clone(), live.clone(), empty]);
        assert_eq!(mgr.len(), 1);
        assert_eq!(mgr.save_records(), vec![live]);
    }
}
