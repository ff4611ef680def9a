//! Fixed-layout binary records for the container format.
//!
//! Every record is written field by field, little-endian, with fixed-size
//! string fields zero-padded and guaranteed a NUL terminator. The in-memory
//! representation is never cast to bytes; serializers place each field at an
//! explicit offset so the format is independent of struct layout.

use std::io::{Error, ErrorKind};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::{FsError, Result};

pub const MAGIC: &[u8; 8] = b"OMNIFS01";
pub const FORMAT_VERSION: u32 = 0x0001_0000;

pub const HEADER_SIZE: usize = 512;
pub const USER_RECORD_SIZE: usize = 140;
pub const ENTRY_SIZE: usize = 240;

pub const USERNAME_LEN: usize = 32;
pub const PASSWORD_LEN: usize = 64;
pub const CONFIG_HASH_LEN: usize = 64;
pub const NAME_LEN: usize = 128;
pub const OWNER_LEN: usize = 32;

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Copies `s` into `field`, truncating to capacity minus one so the NUL
/// terminator is always present; the tail is zero-filled.
fn put_str(field: &mut [u8], s: &str) {
    let n = s.len().min(field.len() - 1);
    field[..n].copy_from_slice(&s.as_bytes()[..n]);
    for b in &mut field[n..] {
        *b = 0;
    }
}

/// Reads a NUL-terminated string out of a fixed-size field.
fn get_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn corrupt(what: &str) -> FsError {
    FsError::Io(Error::new(ErrorKind::InvalidData, what.to_string()))
}

/// Container header occupying the first 512 bytes of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct OmniHeader {
    pub total_size: u64,
    pub header_size: u64,
    pub block_size: u64,
    pub config_hash: String,
    pub config_timestamp: u64,
    pub user_table_offset: u32,
    pub max_users: u32,
    pub file_state_storage_offset: u32,
    pub change_log_offset: u32,
}

impl OmniHeader {
    pub fn from_config(config: &Config) -> OmniHeader {
        OmniHeader {
            total_size: config.total_size,
            header_size: HEADER_SIZE as u64,
            block_size: config.block_size,
            config_hash: config.sha256_hash.clone(),
            config_timestamp: config.timestamp,
            user_table_offset: HEADER_SIZE as u32,
            max_users: config.max_users,
            file_state_storage_offset: 0,
            change_log_offset: 0,
        }
    }

    /// Packed layout: magic 0..8, format_version 8..12, total_size 12..20,
    /// header_size 20..28, block_size 28..36, student_id 36..68,
    /// submission_date 68..84, config_hash 84..148, config_timestamp
    /// 148..156, user_table_offset 156..160, max_users 160..164,
    /// file_state_storage_offset 164..168, change_log_offset 168..172,
    /// reserved 172..512.
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(MAGIC);
        buf[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[12..20].copy_from_slice(&self.total_size.to_le_bytes());
        buf[20..28].copy_from_slice(&self.header_size.to_le_bytes());
        buf[28..36].copy_from_slice(&self.block_size.to_le_bytes());
        // student_id and submission_date stay zero-filled.
        put_str(&mut buf[84..148], &self.config_hash);
        buf[148..156].copy_from_slice(&self.config_timestamp.to_le_bytes());
        buf[156..160].copy_from_slice(&self.user_table_offset.to_le_bytes());
        buf[160..164].copy_from_slice(&self.max_users.to_le_bytes());
        buf[164..168].copy_from_slice(&self.file_state_storage_offset.to_le_bytes());
        buf[168..172].copy_from_slice(&self.change_log_offset.to_le_bytes());
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<OmniHeader> {
        if buf.len() < HEADER_SIZE {
            return Err(corrupt("container header truncated"));
        }
        if &buf[0..8] != MAGIC {
            return Err(corrupt("bad container magic"));
        }
        let version = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if version != FORMAT_VERSION {
            return Err(corrupt("unsupported container format version"));
        }
        Ok(OmniHeader {
            total_size: read_u64(buf, 12),
            header_size: read_u64(buf, 20),
            block_size: read_u64(buf, 28),
            config_hash: get_str(&buf[84..148]),
            config_timestamp: read_u64(buf, 148),
            user_table_offset: read_u32(buf, 156),
            max_users: read_u32(buf, 160),
            file_state_storage_offset: read_u32(buf, 164),
            change_log_offset: read_u32(buf, 168),
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Normal = 0,
    Admin = 1,
}

impl UserRole {
    pub fn from_u32(v: u32) -> UserRole {
        match v {
            1 => UserRole::Admin,
            _ => UserRole::Normal,
        }
    }
}

/// One slot of the user table.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub role: UserRole,
    pub created_time: u64,
    pub last_login: u64,
    pub is_active: u8,
}

impl UserRecord {
    pub fn new(username: &str, password_hash: &str, role: UserRole, created_time: u64) -> UserRecord {
        UserRecord {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role,
            created_time,
            last_login: 0,
            is_active: 1,
        }
    }

    /// Packed layout: username 0..32, password_hash 32..96, role 96..100,
    /// created_time 100..108, last_login 108..116, is_active 116,
    /// reserved 117..140.
    pub fn serialize(&self) -> [u8; USER_RECORD_SIZE] {
        let mut buf = [0u8; USER_RECORD_SIZE];
        put_str(&mut buf[0..32], &self.username);
        put_str(&mut buf[32..96], &self.password_hash);
        buf[96..100].copy_from_slice(&(self.role as u32).to_le_bytes());
        buf[100..108].copy_from_slice(&self.created_time.to_le_bytes());
        buf[108..116].copy_from_slice(&self.last_login.to_le_bytes());
        buf[116] = self.is_active;
        buf
    }

    pub fn parse(buf: &[u8]) -> UserRecord {
        UserRecord {
            username: get_str(&buf[0..32]),
            password_hash: get_str(&buf[32..96]),
            role: UserRole::from_u32(read_u32(buf, 96)),
            created_time: read_u64(buf, 100),
            last_login: read_u64(buf, 108),
            is_active: buf[116],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File = 0,
    Directory = 1,
}

/// Metadata record for a file or directory, plus the in-memory payload for
/// files. Only the fixed metadata portion reaches the container; `content`
/// lives with the entry for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub permissions: u32,
    pub created_time: u64,
    pub modified_time: u64,
    pub owner: String,
    pub inode: u32,
    pub content: Vec<u8>,
}

impl FileEntry {
    pub fn new(
        name: &str,
        kind: EntryKind,
        size: u64,
        permissions: u32,
        owner: &str,
        inode: u32,
    ) -> FileEntry {
        let now = unix_now();
        FileEntry {
            name: name.to_string(),
            kind,
            size,
            permissions,
            created_time: now,
            modified_time: now,
            owner: owner.to_string(),
            inode,
            content: Vec::new(),
        }
    }

    /// Renames the entry, truncating to the on-disk field capacity.
    pub fn set_name(&mut self, name: &str) {
        let mut end = name.len().min(NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        self.name = name[..end].to_string();
    }

    /// Packed layout: name 0..128, kind 128, size 129..137, permissions
    /// 137..141, created_time 141..149, modified_time 149..157, owner
    /// 157..189, inode 189..193, reserved 193..240.
    pub fn serialize(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        put_str(&mut buf[0..128], &self.name);
        buf[128] = self.kind as u8;
        buf[129..137].copy_from_slice(&self.size.to_le_bytes());
        buf[137..141].copy_from_slice(&self.permissions.to_le_bytes());
        buf[141..149].copy_from_slice(&self.created_time.to_le_bytes());
        buf[149..157].copy_from_slice(&self.modified_time.to_le_bytes());
        put_str(&mut buf[157..189], &self.owner);
        buf[189..193].copy_from_slice(&self.inode.to_le_bytes());
        buf
    }

    pub fn parse(buf: &[u8]) -> FileEntry {
        FileEntry {
            name: get_str(&buf[0..128]),
            kind: if buf[128] == 1 {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            size: read_u64(buf, 129),
            permissions: read_u32(buf, 137),
            created_time: read_u64(buf, 141),
            modified_time: read_u64(buf, 149),
            owner: get_str(&buf[157..189]),
            inode: read_u32(buf, 189),
            content: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            total_size: 1_048_576,
            header_size: 512,
            block_size: 4096,
            max_users: 8,
            sha256_hash: "ab".repeat(32),
            timestamp: 1_700_000_000,
            ..Config::default()
        }
    }

    #[test]
    fn header_round_trip() {
        let mut header = OmniHeader::from_config(&test_config());
        header.file_state_storage_offset = 9001;
        let buf = header.serialize();
        assert_eq!(&buf[0..8], MAGIC);
        let parsed = OmniHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut buf = OmniHeader::from_config(&test_config()).serialize();
        buf[0] = b'X';
        assert!(OmniHeader::parse(&buf).is_err());
    }

    #[test]
    fn header_reserved_region_is_zeroed() {
        let buf = OmniHeader::from_config(&test_config()).serialize();
        assert!(buf[172..].iter().all(|&b| b == 0));
        // student_id and submission_date too
        assert!(buf[36..84].iter().all(|&b| b == 0));
    }

    #[test]
    fn user_record_round_trip() {
        let mut rec = UserRecord::new("alice", "secret", UserRole::Admin, 42);
        rec.last_login = 99;
        let parsed = UserRecord::parse(&rec.serialize());
        assert_eq!(parsed, rec);
    }

    #[test]
    fn user_record_strings_are_nul_terminated() {
        let long = "x".repeat(100);
        let rec = UserRecord::new(&long, &long, UserRole::Normal, 0);
        let buf = rec.serialize();
        assert_eq!(buf[31], 0);
        assert_eq!(buf[95], 0);
        let parsed = UserRecord::parse(&buf);
        assert_eq!(parsed.username.len(), USERNAME_LEN - 1);
        assert_eq!(parsed.password_hash.len(), PASSWORD_LEN - 1);
    }

    #[test]
    fn entry_round_trip_drops_content() {
        let mut entry = FileEntry::new("report.txt", EntryKind::File, 10, 0o644, "root", 7);
        entry.content = b"payload".to_vec();
        let parsed = FileEntry::parse(&entry.serialize());
        assert_eq!(parsed.name, "report.txt");
        assert_eq!(parsed.kind, EntryKind::File);
        assert_eq!(parsed.size, 10);
        assert_eq!(parsed.permissions, 0o644);
        assert_eq!(parsed.owner, "root");
        assert_eq!(parsed.inode, 7);
        assert!(parsed.content.is_empty());
    }

    #[test]
    fn entry_name_truncates_to_field_capacity() {
        let mut entry = FileEntry::new("f", EntryKind::File, 0, 0o644, "root", 0);
        entry.set_name(&"n".repeat(300));
        assert_eq!(entry.name.len(), NAME_LEN - 1);
        let parsed = FileEntry::parse(&entry.serialize());
        assert_eq!(parsed.name.len(), NAME_LEN - 1);
    }
}
