//! The namespace service: one owned value bundling the directory tree,
//! allocator, inode table, users, and sessions. The worker thread holds
//! the only mutable borrow, so operations never observe interleaved
//! mutation.

use std::collections::HashMap;

use log::{debug, info};

use crate::alloc::Bitmap;
use crate::config::Config;
use crate::error::{FsError, Result};
use crate::record::{unix_now, EntryKind, FileEntry, OmniHeader, UserRecord, UserRole};
use crate::session::SessionManager;
use crate::tree::{self, DirNode, DirTree};
use crate::users::UserManager;

pub const DIR_PERMISSIONS: u32 = 0o755;
pub const FILE_PERMISSIONS: u32 = 0o644;
pub const DEFAULT_OWNER: &str = "root";

/// Metadata view of a single file.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub path: String,
    pub entry: FileEntry,
    pub blocks_used: u64,
    pub actual_size: u64,
}

/// Filesystem-wide counters for `get_stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct FsStats {
    pub total_size: u64,
    pub used_space: u64,
    pub free_space: u64,
    pub total_files: u64,
    pub total_directories: u64,
    pub total_users: u64,
    pub active_sessions: u64,
    pub fragmentation: f64,
}

pub struct Service {
    pub config: Config,
    pub header: OmniHeader,
    pub tree: DirTree,
    pub allocator: Bitmap,
    /// Every live file keyed by its inode (= allocated block index).
    pub inode_table: HashMap<u32, FileEntry>,
    pub users: UserManager,
    pub sessions: SessionManager,
}

impl Service {
    pub fn new(config: Config) -> Service {
        let header = OmniHeader::from_config(&config);
        let total_blocks = if config.block_size > 0 {
            config.total_size / config.block_size
        } else {
            0
        };
        let block_size = config.block_size;
        Service {
            header,
            tree: DirTree::new(),
            allocator: Bitmap::new(total_blocks, block_size),
            inode_table: HashMap::new(),
            users: UserManager::new(),
            sessions: SessionManager::new(),
            config,
        }
    }

    /// Creates the first admin account from the configured credentials.
    /// Called when no user table was loaded (fresh container).
    pub fn bootstrap_admin(&mut self) {
        if !self.users.is_empty() {
            return;
        }
        let username = self.config.admin_username.clone();
        let password = self.config.admin_password.clone();
        self.users
            .create_user(&username, &password, UserRole::Admin, unix_now());
        info!("bootstrap admin account {:?} created", username);
    }

    // ------------------------------------------------------------------
    // Directory operations
    // ------------------------------------------------------------------

    pub fn dir_create(&mut self, path: &str) -> Result<()> {
        let (parent, name) =
            tree::locate_parent_mut(self.tree.root_mut(), path).ok_or(FsError::InvalidPath)?;
        if parent.children.contains_key(&name) || parent.files.contains_key(&name) {
            return Err(FsError::FileExists);
        }
        let entry = FileEntry::new(&name, EntryKind::Directory, 0, DIR_PERMISSIONS, DEFAULT_OWNER, 0);
        parent.children.insert(name, DirNode::new(entry));
        Ok(())
    }

    pub fn dir_delete(&mut self, path: &str) -> Result<()> {
        let (parent, name) =
            tree::locate_parent_mut(self.tree.root_mut(), path).ok_or(FsError::InvalidPath)?;
        let node = parent.children.get(&name).ok_or(FsError::NotFound)?;
        if !node.is_empty() {
            return Err(FsError::DirectoryNotEmpty);
        }
        parent.children.remove(&name);
        Ok(())
    }

    pub fn dir_exists(&self, path: &str) -> bool {
        tree::locate_dir(self.tree.root(), path).is_some()
    }

    /// Lists a directory, child directories first with a `/` suffix. A
    /// missing directory lists as empty.
    pub fn dir_list(&self, path: &str) -> Vec<String> {
        let mut entries = Vec::new();
        if let Some(node) = tree::locate_dir(self.tree.root(), path) {
            for name in node.children.keys() {
                entries.push(format!("{}/", name));
            }
            for name in node.files.keys() {
                entries.push(name.clone());
            }
        }
        entries
    }

    // ------------------------------------------------------------------
    // File operations
    // ------------------------------------------------------------------

    pub fn file_create(&mut self, path: &str, size: u64) -> Result<()> {
        let (parent, name) =
            tree::locate_parent_mut(self.tree.root_mut(), path).ok_or(FsError::InvalidPath)?;
        if parent.files.contains_key(&name) || parent.children.contains_key(&name) {
            return Err(FsError::FileExists);
        }
        let block = self.allocator.allocate().ok_or(FsError::NoSpace)?;
        let entry = FileEntry::new(
            &name,
            EntryKind::File,
            size,
            FILE_PERMISSIONS,
            DEFAULT_OWNER,
            block as u32,
        );
        debug!("created file {:?} on block {}", path, block);
        self.inode_table.insert(entry.inode, entry.clone());
        parent.files.insert(name, entry);
        Ok(())
    }

    pub fn file_delete(&mut self, path: &str) -> Result<()> {
        let (parent, name) =
            tree::locate_parent_mut(self.tree.root_mut(), path).ok_or(FsError::InvalidPath)?;
        let entry = parent.files.remove(&name).ok_or(FsError::NotFound)?;
        self.allocator.free(u64::from(entry.inode));
        self.inode_table.remove(&entry.inode);
        Ok(())
    }

    pub fn file_exists(&self, path: &str) -> bool {
        match tree::locate_parent(self.tree.root(), path) {
            Some((parent, name)) => parent.files.contains_key(&name),
            None => false,
        }
    }

    /// Returns the in-memory payload. An empty file reads as empty bytes;
    /// only a missing entry is an error.
    pub fn file_read(&self, path: &str) -> Result<Vec<u8>> {
        let (parent, name) =
            tree::locate_parent(self.tree.root(), path).ok_or(FsError::InvalidPath)?;
        let entry = parent.files.get(&name).ok_or(FsError::NotFound)?;
        Ok(entry.content.clone())
    }

    pub fn file_edit(&mut self, path: &str, data: &[u8], offset: u64) -> Result<()> {
        let entry = self.find_file_mut(path)?;
        let offset = offset as usize;
        let end = offset + data.len();
        if entry.content.len() < end {
            entry.content.resize(end, 0);
        }
        entry.content[offset..end].copy_from_slice(data);
        entry.size = entry.content.len() as u64;
        entry.modified_time = unix_now();
        Ok(())
    }

    pub fn file_truncate(&mut self, path: &str, new_size: u64) -> Result<()> {
        let entry = self.find_file_mut(path)?;
        entry.content.resize(new_size as usize, 0);
        entry.size = entry.content.len() as u64;
        entry.modified_time = unix_now();
        Ok(())
    }

    pub fn file_rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        {
            let (old_parent, old_name) =
                tree::locate_parent(self.tree.root(), old_path).ok_or(FsError::InvalidPath)?;
            if !old_parent.files.contains_key(&old_name) {
                return Err(FsError::NotFound);
            }
        }
        {
            let (new_parent, new_name) =
                tree::locate_parent(self.tree.root(), new_path).ok_or(FsError::InvalidPath)?;
            if new_parent.files.contains_key(&new_name) || new_parent.children.contains_key(&new_name)
            {
                return Err(FsError::FileExists);
            }
        }

        let (old_parent, old_name) =
            tree::locate_parent_mut(self.tree.root_mut(), old_path).ok_or(FsError::InvalidPath)?;
        let mut entry = old_parent.files.remove(&old_name).ok_or(FsError::NotFound)?;

        let (new_parent, new_name) =
            tree::locate_parent_mut(self.tree.root_mut(), new_path).ok_or(FsError::InvalidPath)?;
        entry.set_name(&new_name);
        entry.modified_time = unix_now();
        self.inode_table.insert(entry.inode, entry.clone());
        new_parent.files.insert(new_name, entry);
        Ok(())
    }

    pub fn get_metadata(&self, path: &str) -> Result<FileMetadata> {
        let (parent, name) =
            tree::locate_parent(self.tree.root(), path).ok_or(FsError::NotFound)?;
        let entry = parent.files.get(&name).ok_or(FsError::NotFound)?;
        Ok(FileMetadata {
            path: path.to_string(),
            blocks_used: 1,
            actual_size: entry.size,
            entry: entry.clone(),
        })
    }

    pub fn set_permissions(&mut self, path: &str, permissions: u32) -> Result<()> {
        let entry = self.find_file_mut(path)?;
        entry.permissions = permissions;
        Ok(())
    }

    pub fn get_stats(&self) -> FsStats {
        FsStats {
            total_size: self.header.total_size,
            used_space: self.allocator.used_blocks() * self.allocator.block_size(),
            free_space: self.allocator.free_blocks() * self.allocator.block_size(),
            total_files: self.tree.count_files(),
            total_directories: self.tree.count_directories(),
            total_users: self.users.len() as u64,
            active_sessions: self.sessions.active_count(),
            fragmentation: 0.0,
        }
    }

    fn find_file_mut(&mut self, path: &str) -> Result<&mut FileEntry> {
        let (parent, name) =
            tree::locate_parent_mut(self.tree.root_mut(), path).ok_or(FsError::InvalidPath)?;
        parent.files.get_mut(&name).ok_or(FsError::NotFound)
    }

    // ------------------------------------------------------------------
    // User and session operations
    // ------------------------------------------------------------------

    pub fn user_login(&mut self, username: &str, password: &str) -> Result<String> {
        {
            let user = self.users.find_user(username).ok_or(FsError::NotFound)?;
            if user.is_active != 1 {
                return Err(FsError::InvalidOperation);
            }
        }
        if !self.users.verify_password(username, password) {
            return Err(FsError::PermissionDenied);
        }
        let snapshot = match self.users.find_user_mut(username) {
            Some(user) => {
                user.last_login = unix_now();
                user.clone()
            }
            None => return Err(FsError::NotFound),
        };
        let session_id = self
            .sessions
            .create_session(&snapshot)
            .ok_or(FsError::InvalidOperation)?;
        info!("user {:?} logged in", username);
        Ok(session_id)
    }

    pub fn user_logout(&mut self, session_id: &str) -> Result<()> {
        if !self.sessions.destroy_session(session_id) {
            return Err(FsError::InvalidSession);
        }
        Ok(())
    }

    pub fn user_create(
        &mut self,
        session_id: &str,
        username: &str,
        password_hash: &str,
        role: UserRole,
    ) -> Result<()> {
        self.require_admin(session_id)?;
        if !self
            .users
            .create_user(username, password_hash, role, unix_now())
        {
            return Err(FsError::InvalidOperation);
        }
        self.sessions.update_activity(session_id);
        Ok(())
    }

    pub fn user_delete(&mut self, session_id: &str, username: &str) -> Result<()> {
        self.require_admin(session_id)?;
        if !self.users.delete_user(username) {
            return Err(FsError::NotFound);
        }
        self.sessions.update_activity(session_id);
        Ok(())
    }

    pub fn user_list(&mut self, session_id: &str) -> Result<Vec<UserRecord>> {
        self.require_admin(session_id)?;
        let users = self.users.save_records();
        self.sessions.update_activity(session_id);
        Ok(users)
    }

    pub fn validate_session(&self, session_id: &str) -> bool {
        self.sessions.validate_session(session_id)
    }

    fn require_admin(&self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get_session(session_id)
            .ok_or(FsError::InvalidSession)?;
        if session.user.role != UserRole::Admin {
            return Err(FsError::PermissionDenied);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service(total_blocks: u64) -> Service {
        let config = Config {
            total_size: total_blocks * 512,
            header_size: 512,
            block_size: 512,
            max_users: 8,
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
            port: 9000,
            ..Config::default()
        };
        let mut service = Service::new(config);
        service.bootstrap_admin();
        service
    }

    fn admin_session(service: &mut Service) -> String {
        service.user_login("admin", "admin123").unwrap()
    }

    #[test]
    fn directory_lifecycle() {
        let mut svc = test_service(8);
        svc.dir_create("/a").unwrap();
        assert!(svc.dir_exists("/a"));
        assert_eq!(svc.dir_create("/a").unwrap_err().code(), -5);
        svc.dir_create("/a/b").unwrap();
        assert_eq!(svc.dir_delete("/a").unwrap_err().code(), -10);
        svc.dir_delete("/a/b").unwrap();
        svc.dir_delete("/a").unwrap();
        assert_eq!(svc.dir_delete("/a").unwrap_err().code(), -1);
        assert_eq!(svc.dir_create("/no/such").unwrap_err().code(), -4);
    }

    #[test]
    fn dir_create_collides_with_files_too() {
        let mut svc = test_service(8);
        svc.file_create("/taken", 0).unwrap();
        assert_eq!(svc.dir_create("/taken").unwrap_err().code(), -5);
        svc.dir_create("/d").unwrap();
        assert_eq!(svc.file_create("/d", 0).unwrap_err().code(), -5);
    }

    #[test]
    fn dir_list_marks_directories() {
        let mut svc = test_service(8);
        svc.dir_create("/sub").unwrap();
        svc.file_create("/file", 4).unwrap();
        let entries = svc.dir_list("/");
        assert!(entries.contains(&"sub/".to_string()));
        assert!(entries.contains(&"file".to_string()));
        assert!(svc.dir_list("/missing").is_empty());
    }

    #[test]
    fn file_lifecycle_tracks_content() {
        let mut svc = test_service(8);
        svc.file_create("/f", 10).unwrap();
        assert!(svc.file_exists("/f"));
        assert!(svc.file_read("/f").unwrap().is_empty());

        svc.file_edit("/f", b"hello", 0).unwrap();
        assert_eq!(svc.file_read("/f").unwrap(), b"hello");
        assert_eq!(svc.get_metadata("/f").unwrap().entry.size, 5);

        svc.file_edit("/f", b"!!", 5).unwrap();
        assert_eq!(svc.file_read("/f").unwrap(), b"hello!!");

        svc.file_truncate("/f", 9).unwrap();
        assert_eq!(svc.file_read("/f").unwrap(), b"hello!!\0\0");
        svc.file_truncate("/f", 2).unwrap();
        assert_eq!(svc.file_read("/f").unwrap(), b"he");
        assert_eq!(svc.get_metadata("/f").unwrap().actual_size, 2);
    }

    #[test]
    fn read_of_missing_file_is_not_found() {
        let svc = test_service(8);
        assert_eq!(svc.file_read("/nope").unwrap_err().code(), -1);
        assert_eq!(svc.file_read("/no/dir").unwrap_err().code(), -4);
    }

    #[test]
    fn rename_moves_and_checks_destination() {
        let mut svc = test_service(8);
        svc.dir_create("/a").unwrap();
        svc.file_create("/a/f", 0).unwrap();
        svc.file_edit("/a/f", b"data", 0).unwrap();
        svc.file_rename("/a/f", "/g").unwrap();
        assert!(svc.file_exists("/g"));
        assert!(!svc.file_exists("/a/f"));
        assert_eq!(svc.file_read("/g").unwrap(), b"data");

        svc.file_create("/a/f", 0).unwrap();
        assert_eq!(svc.file_rename("/a/f", "/g").unwrap_err().code(), -5);
        assert_eq!(svc.file_rename("/a/f", "/a").unwrap_err().code(), -5);
        assert_eq!(svc.file_rename("/ghost", "/h").unwrap_err().code(), -1);
    }

    #[test]
    fn allocator_is_conserved_across_create_delete() {
        let mut svc = test_service(4);
        let total = svc.allocator.total_blocks();
        svc.file_create("/one", 0).unwrap();
        svc.file_create("/two", 0).unwrap();
        assert_eq!(svc.allocator.used_blocks(), svc.tree.count_files());
        assert_eq!(
            svc.allocator.used_blocks() + svc.allocator.free_blocks(),
            total
        );
        svc.file_delete("/one").unwrap();
        assert_eq!(svc.allocator.used_blocks(), 1);
        assert_eq!(svc.allocator.used_blocks(), svc.tree.count_files());
    }

    #[test]
    fn full_allocator_rejects_creation_without_mutation() {
        let mut svc = test_service(2);
        svc.file_create("/one", 0).unwrap();
        svc.file_create("/two", 0).unwrap();
        assert_eq!(svc.file_create("/three", 0).unwrap_err().code(), -6);
        assert!(!svc.file_exists("/three"));
        assert_eq!(svc.tree.count_files(), 2);
        // freeing makes room again, reusing the lowest index
        svc.file_delete("/one").unwrap();
        svc.file_create("/three", 0).unwrap();
        assert_eq!(svc.get_metadata("/three").unwrap().entry.inode, 0);
    }

    #[test]
    fn permissions_round_trip() {
        let mut svc = test_service(4);
        svc.file_create("/f", 0).unwrap();
        svc.set_permissions("/f", 0o600).unwrap();
        assert_eq!(svc.get_metadata("/f").unwrap().entry.permissions, 0o600);
        assert_eq!(svc.set_permissions("/nope", 0o600).unwrap_err().code(), -1);
    }

    #[test]
    fn stats_cover_every_subsystem() {
        let mut svc = test_service(8);
        let sid = admin_session(&mut svc);
        svc.dir_create("/a").unwrap();
        svc.file_create("/a/f", 0).unwrap();
        let stats = svc.get_stats();
        assert_eq!(stats.total_directories, 2);
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.used_space, 512);
        assert_eq!(stats.total_size, 8 * 512);
        assert!(svc.validate_session(&sid));
    }

    #[test]
    fn login_error_taxonomy() {
        let mut svc = test_service(4);
        assert_eq!(svc.user_login("ghost", "x").unwrap_err().code(), -1);
        assert_eq!(svc.user_login("admin", "wrong").unwrap_err().code(), -2);
        let sid = svc.user_login("admin", "admin123").unwrap();
        assert_eq!(sid.len(), 128);

        if let Some(user) = svc.users.find_user_mut("admin") {
            user.is_active = 0;
        }
        assert_eq!(svc.user_login("admin", "admin123").unwrap_err().code(), -11);
    }

    #[test]
    fn admin_gating_for_user_management() {
        let mut svc = test_service(4);
        let admin = admin_session(&mut svc);
        svc.user_create(&admin, "bob", "pw", UserRole::Normal).unwrap();
        assert_eq!(
            svc.user_create(&admin, "bob", "pw", UserRole::Normal)
                .unwrap_err()
                .code(),
            -11
        );

        let bob = svc.user_login("bob", "pw").unwrap();
        assert_eq!(
            svc.user_create(&bob, "eve", "pw", UserRole::Normal)
                .unwrap_err()
                .code(),
            -2
        );
        assert_eq!(
            svc.user_create("bogus", "eve", "pw", UserRole::Normal)
                .unwrap_err()
                .code(),
            -9
        );

        let names: Vec<String> = svc
            .user_list(&admin)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["admin".to_string(), "bob".to_string()]);

        svc.user_delete(&admin, "bob").unwrap();
        assert_eq!(svc.user_delete(&admin, "bob").unwrap_err().code(), -1);
    }

    #[test]
    fn logout_destroys_the_session() {
        let mut svc = test_service(4);
        let sid = admin_session(&mut svc);
        svc.user_logout(&sid).unwrap();
        assert!(!svc.validate_session(&sid));
        assert_eq!(svc.user_logout(&sid).unwrap_err().code(), -9);
    }
}
