//! Container file I/O: formatting a fresh container, saving a snapshot of
//! the whole service state, and loading it back.
//!
//! Post-save layout: `[header][user table][directory-tree stream][free
//! block map]`. The bitmap offset is only known once the stream is
//! written, so the header is rewritten last. A freshly formatted container
//! instead carries a bare root entry and a zero
//! `file_state_storage_offset`, which is how `load` tells the two layouts
//! apart.

use std::fs::{self, File, OpenOptions};
use std::io::{Error, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::alloc::Bitmap;
use crate::config::Config;
use crate::error::{FsError, Result};
use crate::record::{
    FileEntry, OmniHeader, UserRecord, ENTRY_SIZE, HEADER_SIZE, USER_RECORD_SIZE,
};
use crate::service::Service;
use crate::tree::{self, DirNode, DirTree};

/// Upper bound on a stored path; longer means the stream is corrupt.
const MAX_STREAM_PATH: usize = 4096;

pub struct Container {
    path: PathBuf,
}

impl Container {
    pub fn new<P: Into<PathBuf>>(path: P) -> Container {
        Container { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads an existing container or formats a fresh one; either way the
    /// returned service ends up with at least the bootstrap admin account.
    pub fn open_or_format(&self, config: &Config) -> Result<Service> {
        let mut service = if self.exists() {
            info!("loading container {}", self.path.display());
            self.load(config)?
        } else {
            self.format(config)?;
            Service::new(config.clone())
        };
        service.bootstrap_admin();
        Ok(service)
    }

    /// Writes a fresh, empty container: header, zeroed user table, a root
    /// directory entry, zero-fill up to the configured total size.
    pub fn format(&self, config: &Config) -> Result<()> {
        self.ensure_parent_dir()?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;

        let header = OmniHeader::from_config(config);
        file.write_all(&header.serialize())?;

        let zero_slot = [0u8; USER_RECORD_SIZE];
        for _ in 0..config.max_users {
            file.write_all(&zero_slot)?;
        }

        let root = DirTree::new();
        file.write_all(&root.root().entry.serialize())?;

        let written = HEADER_SIZE as u64
            + u64::from(config.max_users) * USER_RECORD_SIZE as u64
            + ENTRY_SIZE as u64;
        if written < config.total_size {
            let zeros = [0u8; 8192];
            let mut remaining = config.total_size - written;
            while remaining > 0 {
                let n = remaining.min(zeros.len() as u64) as usize;
                file.write_all(&zeros[..n])?;
                remaining -= n as u64;
            }
        }
        file.sync_all()?;
        info!(
            "formatted container {} ({} bytes)",
            self.path.display(),
            config.total_size
        );
        Ok(())
    }

    /// Snapshots the full service state. Updates the header's bitmap
    /// offset in `service` as a side effect.
    pub fn save(&self, service: &mut Service) -> Result<()> {
        self.ensure_parent_dir()?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;

        // Placeholder header; rewritten below once the bitmap offset is
        // known.
        file.write_all(&service.header.serialize())?;

        file.seek(SeekFrom::Start(u64::from(service.header.user_table_offset)))?;
        let records = service.users.save_records();
        let slots = service.header.max_users as usize;
        if records.len() > slots {
            warn!(
                "user table holds {} accounts but only {} slots; extra accounts are not saved",
                records.len(),
                slots
            );
        }
        for record in records.iter().take(slots) {
            file.write_all(&record.serialize())?;
        }
        let zero_slot = [0u8; USER_RECORD_SIZE];
        for _ in records.len()..slots {
            file.write_all(&zero_slot)?;
        }

        let stream_offset = u64::from(service.header.user_table_offset)
            + service.header.max_users as u64 * USER_RECORD_SIZE as u64;
        file.seek(SeekFrom::Start(stream_offset))?;
        let mut nodes = Vec::new();
        collect_nodes(service.tree.root(), "/".to_string(), &mut nodes);
        file.write_all(&(nodes.len() as u32).to_le_bytes())?;
        for (path, node) in &nodes {
            file.write_all(&(path.len() as u32).to_le_bytes())?;
            file.write_all(path.as_bytes())?;
            file.write_all(&node.entry.serialize())?;
            file.write_all(&(node.files.len() as u32).to_le_bytes())?;
            for entry in node.files.values() {
                file.write_all(&entry.serialize())?;
            }
        }

        let map_offset = file.seek(SeekFrom::End(0))?;
        service.allocator.write_to(&mut file)?;

        service.header.file_state_storage_offset = map_offset as u32;
        service.header.change_log_offset = 0;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&service.header.serialize())?;
        file.sync_all()?;
        info!(
            "saved container {} ({} directories, {} files)",
            self.path.display(),
            nodes.len(),
            service.tree.count_files()
        );
        Ok(())
    }

    /// Rebuilds a service from a saved container.
    pub fn load(&self, config: &Config) -> Result<Service> {
        let mut file = File::open(&self.path)?;
        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = OmniHeader::parse(&header_buf)?;

        let mut service = Service::new(config.clone());
        service.header = header.clone();

        file.seek(SeekFrom::Start(u64::from(header.user_table_offset)))?;
        let mut slot = [0u8; USER_RECORD_SIZE];
        let mut records = Vec::with_capacity(header.max_users as usize);
        for _ in 0..header.max_users {
            file.read_exact(&mut slot)?;
            records.push(UserRecord::parse(&slot));
        }
        service.users.load_records(records);

        if header.file_state_storage_offset == 0 {
            // Fresh format: no directory stream or bitmap was written yet.
            info!(
                "container {} is freshly formatted; starting with an empty tree",
                self.path.display()
            );
            return Ok(service);
        }

        let stream_offset = u64::from(header.user_table_offset)
            + header.max_users as u64 * USER_RECORD_SIZE as u64;
        file.seek(SeekFrom::Start(stream_offset))?;
        let node_count = read_u32(&mut file)?;
        for _ in 0..node_count {
            let path_len = read_u32(&mut file)? as usize;
            if path_len > MAX_STREAM_PATH {
                return Err(stream_error("directory stream path is implausibly long"));
            }
            let mut path_buf = vec![0u8; path_len];
            file.read_exact(&mut path_buf)?;
            let path = String::from_utf8_lossy(&path_buf).into_owned();

            let mut entry_buf = [0u8; ENTRY_SIZE];
            file.read_exact(&mut entry_buf)?;
            let mut entry = FileEntry::parse(&entry_buf);

            let file_count = read_u32(&mut file)?;
            let mut files = Vec::with_capacity(file_count as usize);
            for _ in 0..file_count {
                file.read_exact(&mut entry_buf)?;
                files.push(FileEntry::parse(&entry_buf));
            }

            let node = if path == "/" {
                let root = service.tree.root_mut();
                root.entry = entry;
                root
            } else {
                let (parent, leaf) = tree::locate_parent_mut(service.tree.root_mut(), &path)
                    .ok_or_else(|| stream_error("directory stream references a missing parent"))?;
                entry.set_name(&leaf);
                parent
                    .children
                    .entry(leaf)
                    .or_insert_with(|| DirNode::new(entry))
            };
            for f in files {
                service.inode_table.insert(f.inode, f.clone());
                node.files.insert(f.name.clone(), f);
            }
        }

        file.seek(SeekFrom::Start(u64::from(header.file_state_storage_offset)))?;
        service.allocator = Bitmap::read_from(&mut file)?;
        Ok(service)
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// DFS pre-order over the tree, pairing each node with its absolute path.
fn collect_nodes<'t>(node: &'t DirNode, path: String, out: &mut Vec<(String, &'t DirNode)>) {
    out.push((path.clone(), node));
    for (name, child) in &node.children {
        let child_path = if path == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", path, name)
        };
        collect_nodes(child, child_path, out);
    }
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn stream_error(what: &str) -> FsError {
    FsError::Io(Error::new(ErrorKind::InvalidData, what.to_string()))
}
