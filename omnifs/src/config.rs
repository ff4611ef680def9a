//! Startup configuration: a small INI-style file with `[filesystem]`,
//! `[security]`, and `[server]` sections.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::error::{FsError, Result};

#[derive(Debug, Clone, Default)]
pub struct Config {
    // [filesystem]
    pub total_size: u64,
    pub header_size: u64,
    pub block_size: u64,
    pub max_files: u32,
    pub max_filename_length: u32,

    // [security]
    pub max_users: u32,
    pub admin_username: String,
    pub admin_password: String,
    pub require_auth: bool,

    // [server]
    pub port: u16,
    pub max_connections: u32,
    pub queue_timeout: u32,

    // Derived at load time
    pub sha256_hash: String,
    pub timestamp: u64,
}

impl Config {
    /// Parses and validates a config file. Lines are trimmed, `#` starts
    /// an inline comment, values may be double-quoted, unknown keys are
    /// ignored.
    pub fn load(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|_| {
            FsError::InvalidConfig(format!("Cannot open config file: {}", path.display()))
        })?;

        let mut config = Config::default();
        config.sha256_hash = sha256_hex(&content);
        config.timestamp = file_mtime(path);

        let mut section = String::new();
        for raw in content.lines() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].to_string();
                continue;
            }
            let eq = match line.find('=') {
                Some(pos) => pos,
                None => continue,
            };
            let key = line[..eq].trim();
            let mut value = line[eq + 1..].trim();
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = &value[1..value.len() - 1];
            }

            match (section.as_str(), key) {
                ("filesystem", "total_size") => config.total_size = parse_num(key, value)?,
                ("filesystem", "header_size") => config.header_size = parse_num(key, value)?,
                ("filesystem", "block_size") => config.block_size = parse_num(key, value)?,
                ("filesystem", "max_files") => config.max_files = parse_num(key, value)?,
                ("filesystem", "max_filename_length") => {
                    config.max_filename_length = parse_num(key, value)?
                }
                ("security", "max_users") => config.max_users = parse_num(key, value)?,
                ("security", "admin_username") => config.admin_username = value.to_string(),
                ("security", "admin_password") => config.admin_password = value.to_string(),
                ("security", "require_auth") => {
                    config.require_auth = value == "true" || value == "1" || value == "yes"
                }
                ("server", "port") => config.port = parse_num(key, value)?,
                ("server", "max_connections") => config.max_connections = parse_num(key, value)?,
                ("server", "queue_timeout") => config.queue_timeout = parse_num(key, value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.total_size == 0 {
            return Err(FsError::InvalidConfig("total_size missing!".to_string()));
        }
        if self.block_size == 0 {
            return Err(FsError::InvalidConfig("block_size missing!".to_string()));
        }
        if self.header_size == 0 {
            return Err(FsError::InvalidConfig("header_size missing!".to_string()));
        }
        if self.max_users == 0 {
            return Err(FsError::InvalidConfig("max_users missing!".to_string()));
        }
        if self.port == 0 {
            return Err(FsError::InvalidConfig("server port missing!".to_string()));
        }
        Ok(())
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| FsError::InvalidConfig(format!("invalid value for {}: {}", key, value)))
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn file_mtime(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
# sample configuration
[filesystem]
total_size = 1048576   # one MiB
block_size = 4096
header_size = 512
max_files = 1024
max_filename_length = 127

[security]
max_users = 8
admin_username = "admin"
admin_password = "admin123"
require_auth = yes
ignored_key = whatever

[server]
port = 9000
max_connections = 50
queue_timeout = 30
"#;

    fn write_config(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn parses_sections_quotes_and_comments() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.total_size, 1_048_576);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.header_size, 512);
        assert_eq!(config.max_files, 1024);
        assert_eq!(config.max_filename_length, 127);
        assert_eq!(config.max_users, 8);
        assert_eq!(config.admin_username, "admin");
        assert_eq!(config.admin_password, "admin123");
        assert!(config.require_auth);
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.queue_timeout, 30);
    }

    #[test]
    fn derives_digest_and_mtime() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sha256_hash.len(), 64);
        assert!(config
            .sha256_hash
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(config.timestamp > 0);
    }

    #[test]
    fn missing_required_key_names_the_field() {
        let file = write_config("[filesystem]\nblock_size = 4096\nheader_size = 512\n[security]\nmax_users = 4\n[server]\nport = 9000\n");
        match Config::load(file.path()) {
            Err(FsError::InvalidConfig(msg)) => assert_eq!(msg, "total_size missing!"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn bad_number_is_rejected() {
        let file = write_config("[filesystem]\ntotal_size = lots\n");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_invalid_config() {
        match Config::load(Path::new("/definitely/not/here.uconf")) {
            Err(FsError::InvalidConfig(msg)) => {
                assert!(msg.starts_with("Cannot open config file"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
