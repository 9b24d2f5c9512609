use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{FsError, Result};
use crate::tree::{Directory, File, Node, ROOT_INODE};

struct InodeEntry {
    node: Node,
    parent: u64,
}

/// Maps kernel inode numbers to live nodes of the tree.
///
/// Every node the bridge creates is registered here right away, so the
/// kernel can only ever name inodes it has been told about. Removing a
/// node drops its whole subtree.
pub struct InodeTable {
    entries: DashMap<u64, InodeEntry>,
}

impl InodeTable {
    pub fn new(root: Arc<Directory>) -> Self {
        let entries = DashMap::new();
        entries.insert(
            ROOT_INODE,
            InodeEntry {
                node: Node::Directory(root),
                parent: ROOT_INODE,
            },
        );
        Self { entries }
    }

    pub fn insert(&self, node: Node, parent: u64) {
        self.entries.insert(node.inode(), InodeEntry { node, parent });
    }

    pub fn get(&self, ino: u64) -> Option<Node> {
        self.entries.get(&ino).map(|e| e.node.clone())
    }

    /// Inode of the directory containing `ino`. The root is its own parent.
    pub fn parent_of(&self, ino: u64) -> Option<u64> {
        self.entries.get(&ino).map(|e| e.parent)
    }

    pub fn get_dir(&self, ino: u64) -> Result<Arc<Directory>> {
        match self.get(ino) {
            Some(Node::Directory(d)) => Ok(d),
            Some(Node::File(_)) => Err(FsError::NotADirectory(ino)),
            None => Err(FsError::UnknownInode(ino)),
        }
    }

    pub fn get_file(&self, ino: u64) -> Result<Arc<File>> {
        match self.get(ino) {
            Some(Node::File(f)) => Ok(f),
            Some(Node::Directory(_)) => Err(FsError::IsADirectory(ino)),
            None => Err(FsError::UnknownInode(ino)),
        }
    }

    /// Forget a detached node and, for directories, everything below it.
    /// Returns how many entries were dropped.
    ///
    /// Each directory leaves the table before its children are read. A
    /// creator that registers a child and then still finds the parent here
    /// inserted that child early enough for this walk to see it.
    pub fn remove_subtree(&self, node: &Node) -> usize {
        if node.inode() == ROOT_INODE {
            return 0;
        }
        let mut dropped = usize::from(self.entries.remove(&node.inode()).is_some());
        if let Node::Directory(dir) = node {
            for child in dir.children() {
                dropped += self.remove_subtree(&child);
            }
        }
        dropped
    }

    /// Number of inodes the kernel can currently name, the root included.
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }
}
