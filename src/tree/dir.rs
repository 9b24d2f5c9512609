use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::file::File;
use super::inode::{InodeAllocator, ROOT_INODE};
use super::node::{Attributes, DirEntry, Node, NodeKind, DIR_PERM};
use crate::error::{FsError, Result};

/// Children of one directory. Both lists keep insertion order; names are
/// unique across the two lists together.
#[derive(Debug, Default)]
struct Children {
    files: Vec<Arc<File>>,
    dirs: Vec<Arc<Directory>>,
}

impl Children {
    fn find(&self, name: &str) -> Option<Node> {
        if let Some(f) = self.files.iter().find(|f| f.name() == name) {
            return Some(Node::File(Arc::clone(f)));
        }
        self.dirs
            .iter()
            .find(|d| d.name() == name)
            .map(|d| Node::Directory(Arc::clone(d)))
    }

    fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|f| f.name() == name) || self.dirs.iter().any(|d| d.name() == name)
    }
}

/// A directory node.
///
/// Every operation that touches the child lists holds this directory's lock
/// for its whole duration: lookups and listings take it shared, inserts and
/// removals take it exclusive. No operation holds the locks of two
/// directories at once.
#[derive(Debug)]
pub struct Directory {
    name: String,
    inode: u64,
    inodes: Arc<InodeAllocator>,
    children: RwLock<Children>,
}

impl Directory {
    /// Create the root of a new tree, with its own inode allocator.
    pub fn root() -> Arc<Self> {
        Arc::new(Self::new("", ROOT_INODE, Arc::new(InodeAllocator::default())))
    }

    pub fn new(name: impl Into<String>, inode: u64, inodes: Arc<InodeAllocator>) -> Self {
        Self {
            name: name.into(),
            inode,
            inodes,
            children: RwLock::new(Children::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn attributes(&self) -> Attributes {
        Attributes {
            inode: self.inode,
            kind: NodeKind::Directory,
            perm: DIR_PERM,
            size: 0,
        }
    }

    /// Find a child by exact name. Files are searched before subdirectories.
    pub fn lookup(&self, name: &str) -> Result<Node> {
        debug!("lookup {:?} in dir {}", name, self.inode);
        self.children
            .read()
            .find(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    /// Create an empty subdirectory.
    pub fn mkdir(&self, name: &str) -> Result<Arc<Directory>> {
        let mut children = self.children.write();
        if children.contains(name) {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let dir = Arc::new(Directory::new(
            name,
            self.inodes.next(),
            Arc::clone(&self.inodes),
        ));
        children.dirs.push(Arc::clone(&dir));
        debug!("mkdir {:?} in dir {} -> inode {}", name, self.inode, dir.inode());
        Ok(dir)
    }

    /// Create an empty file.
    pub fn create(&self, name: &str) -> Result<Arc<File>> {
        let mut children = self.children.write();
        if children.contains(name) {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let file = Arc::new(File::new(name, self.inodes.next()));
        children.files.push(Arc::clone(&file));
        debug!("create {:?} in dir {} -> inode {}", name, self.inode, file.inode());
        Ok(file)
    }

    /// Detach a child and return it. Only the collection selected by
    /// `is_dir` is searched. A directory is removed together with whatever
    /// it still contains.
    pub fn remove(&self, name: &str, is_dir: bool) -> Result<Node> {
        let mut children = self.children.write();
        let removed = if is_dir {
            children
                .dirs
                .iter()
                .position(|d| d.name() == name)
                .map(|i| Node::Directory(children.dirs.remove(i)))
        } else {
            children
                .files
                .iter()
                .position(|f| f.name() == name)
                .map(|i| Node::File(children.files.remove(i)))
        };
        match removed {
            Some(node) => {
                debug!("remove {:?} from dir {} (inode {})", name, self.inode, node.inode());
                Ok(node)
            }
            None => Err(FsError::NotFound(name.to_string())),
        }
    }

    /// Every child, files first, then subdirectories.
    pub fn list_children(&self) -> Vec<DirEntry> {
        let children = self.children.read();
        let files = children.files.iter().map(|f| DirEntry {
            name: f.name().to_string(),
            inode: f.inode(),
            kind: NodeKind::File,
        });
        let dirs = children.dirs.iter().map(|d| DirEntry {
            name: d.name().to_string(),
            inode: d.inode(),
            kind: NodeKind::Directory,
        });
        let entries: Vec<DirEntry> = files.chain(dirs).collect();
        debug!("{} children for dir {}", entries.len(), self.inode);
        entries
    }

    pub fn child_count(&self) -> usize {
        let children = self.children.read();
        children.files.len() + children.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.child_count() == 0
    }

    /// The child nodes themselves, files first.
    pub fn children(&self) -> Vec<Node> {
        let children = self.children.read();
        children
            .files
            .iter()
            .map(|f| Node::File(Arc::clone(f)))
            .chain(children.dirs.iter().map(|d| Node::Directory(Arc::clone(d))))
            .collect()
    }
}
