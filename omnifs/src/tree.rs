//! The in-memory namespace: an owned directory tree plus the path
//! resolver that walks it.
//!
//! Directory nodes own their children outright; there are no back-pointers
//! and resolution always starts from the root. Both maps are ordered so
//! listings and the persisted tree stream come out deterministic.

use std::collections::BTreeMap;

use crate::record::{EntryKind, FileEntry};

pub const ROOT_PERMISSIONS: u32 = 0o755;

/// One directory: its own metadata entry, child directories, and the files
/// directly inside it. The child-name and file-name namespaces are kept
/// disjoint by the create operations.
#[derive(Debug, Clone, PartialEq)]
pub struct DirNode {
    pub entry: FileEntry,
    pub children: BTreeMap<String, DirNode>,
    pub files: BTreeMap<String, FileEntry>,
}

impl DirNode {
    pub fn new(entry: FileEntry) -> DirNode {
        DirNode {
            entry,
            children: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.files.is_empty()
    }
}

/// The namespace tree, rooted at `/`.
#[derive(Debug, Clone, PartialEq)]
pub struct DirTree {
    root: DirNode,
}

impl DirTree {
    pub fn new() -> DirTree {
        let entry = FileEntry::new("/", EntryKind::Directory, 0, ROOT_PERMISSIONS, "root", 1);
        DirTree {
            root: DirNode::new(entry),
        }
    }

    pub fn root(&self) -> &DirNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut DirNode {
        &mut self.root
    }

    pub fn count_directories(&self) -> u64 {
        fn dfs(node: &DirNode) -> u64 {
            1 + node.children.values().map(dfs).sum::<u64>()
        }
        dfs(&self.root)
    }

    pub fn count_files(&self) -> u64 {
        fn dfs(node: &DirNode) -> u64 {
            node.files.len() as u64 + node.children.values().map(dfs).sum::<u64>()
        }
        dfs(&self.root)
    }
}

impl Default for DirTree {
    fn default() -> DirTree {
        DirTree::new()
    }
}

/// A path is well-formed when it is non-empty and absolute.
pub fn validate_path(path: &str) -> bool {
    !path.is_empty() && path.starts_with('/')
}

/// Splits on `/`, discarding empty components, so `"/a//b/"` and `"/a/b"`
/// resolve identically.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Walks child links from the root; `"/"` resolves to the root itself.
pub fn locate_dir<'t>(root: &'t DirNode, path: &str) -> Option<&'t DirNode> {
    if !validate_path(path) {
        return None;
    }
    let mut node = root;
    for comp in split_path(path) {
        node = node.children.get(comp)?;
    }
    Some(node)
}

pub fn locate_dir_mut<'t>(root: &'t mut DirNode, path: &str) -> Option<&'t mut DirNode> {
    if !validate_path(path) {
        return None;
    }
    let mut node = root;
    for comp in split_path(path) {
        node = node.children.get_mut(comp)?;
    }
    Some(node)
}

/// Resolves the parent directory of `path` and the leaf name. `"/"` and
/// paths with a missing prefix segment resolve to `None`.
pub fn locate_parent<'t>(root: &'t DirNode, path: &str) -> Option<(&'t DirNode, String)> {
    let mut comps = split_path(path);
    let name = comps.pop()?;
    let mut node = root;
    for comp in comps {
        node = node.children.get(comp)?;
    }
    Some((node, name.to_string()))
}

pub fn locate_parent_mut<'t>(
    root: &'t mut DirNode,
    path: &str,
) -> Option<(&'t mut DirNode, String)> {
    let mut comps = split_path(path);
    let name = comps.pop()?;
    let mut node = root;
    for comp in comps {
        node = node.children.get_mut(comp)?;
    }
    Some((node, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(name: &str) -> DirNode {
        DirNode::new(FileEntry::new(name, EntryKind::Directory, 0, 0o755, "root", 0))
    }

    fn tree_with_a_b() -> DirTree {
        let mut tree = DirTree::new();
        let mut a = dir("a");
        a.children.insert("b".to_string(), dir("b"));
        tree.root_mut().children.insert("a".to_string(), a);
        tree
    }

    #[test]
    fn validate_requires_absolute_paths() {
        assert!(validate_path("/"));
        assert!(validate_path("/a/b"));
        assert!(!validate_path(""));
        assert!(!validate_path("a/b"));
    }

    #[test]
    fn split_discards_empty_components() {
        assert_eq!(split_path("/a//b/"), vec!["a", "b"]);
        assert!(split_path("/").is_empty());
    }

    #[test]
    fn locate_dir_walks_children() {
        let tree = tree_with_a_b();
        assert!(locate_dir(tree.root(), "/").is_some());
        assert_eq!(
            locate_dir(tree.root(), "/a/b").map(|n| n.entry.name.as_str()),
            Some("b")
        );
        assert!(locate_dir(tree.root(), "/a/c").is_none());
        assert!(locate_dir(tree.root(), "a/b").is_none());
    }

    #[test]
    fn locate_parent_returns_parent_and_leaf() {
        let tree = tree_with_a_b();
        let (parent, leaf) = locate_parent(tree.root(), "/a/b").unwrap();
        assert_eq!(parent.entry.name, "a");
        assert_eq!(leaf, "b");

        let (parent, leaf) = locate_parent(tree.root(), "/a").unwrap();
        assert_eq!(parent.entry.name, "/");
        assert_eq!(leaf, "a");
    }

    #[test]
    fn locate_parent_of_root_is_none() {
        let tree = DirTree::new();
        assert!(locate_parent(tree.root(), "/").is_none());
        assert!(locate_parent(tree.root(), "").is_none());
    }

    #[test]
    fn locate_parent_requires_full_prefix() {
        let tree = tree_with_a_b();
        assert!(locate_parent(tree.root(), "/missing/x").is_none());
    }

    #[test]
    fn counts_cover_the_whole_tree() {
        let mut tree = tree_with_a_b();
        let node = locate_dir_mut(tree.root_mut(), "/a/b").unwrap();
        node.files.insert(
            "f".to_string(),
            FileEntry::new("f", EntryKind::File, 0, 0o644, "root", 3),
        );
        assert_eq!(tree.count_directories(), 3);
        assert_eq!(tree.count_files(), 1);
    }
}
