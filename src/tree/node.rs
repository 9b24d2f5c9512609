use std::sync::Arc;

use super::dir::Directory;
use super::file::File;

/// Mode bits reported for every directory: read and traverse for all.
pub const DIR_PERM: u16 = 0o555;

/// Mode bits reported for every file: read-only for all.
pub const FILE_PERM: u16 = 0o444;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// What a node reports about itself. The bridge widens this into a full
/// kernel attribute structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub inode: u64,
    pub kind: NodeKind,
    pub perm: u16,
    pub size: u64,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode: u64,
    pub kind: NodeKind,
}

/// A reference to a file or directory in the tree.
#[derive(Debug, Clone)]
pub enum Node {
    File(Arc<File>),
    Directory(Arc<Directory>),
}

impl Node {
    pub fn inode(&self) -> u64 {
        match self {
            Node::File(f) => f.inode(),
            Node::Directory(d) => d.inode(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::File(f) => f.name(),
            Node::Directory(d) => d.name(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File(_) => NodeKind::File,
            Node::Directory(_) => NodeKind::Directory,
        }
    }

    pub fn attributes(&self) -> Attributes {
        match self {
            Node::File(f) => f.attributes(),
            Node::Directory(d) => d.attributes(),
        }
    }

    pub fn as_file(&self) -> Option<&Arc<File>> {
        match self {
            Node::File(f) => Some(f),
            Node::Directory(_) => None,
        }
    }

    pub fn as_dir(&self) -> Option<&Arc<Directory>> {
        match self {
            Node::Directory(d) => Some(d),
            Node::File(_) => None,
        }
    }
}

impl From<Arc<File>> for Node {
    fn from(f: Arc<File>) -> Self {
        Node::File(f)
    }
}

impl From<Arc<Directory>> for Node {
    fn from(d: Arc<Directory>) -> Self {
        Node::Directory(d)
    }
}
