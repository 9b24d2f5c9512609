//! Conversion from tree attributes to FUSE attributes.
use std::time::SystemTime;

use fuser::{FileAttr, FileType, INodeNo};

use crate::tree::{Attributes, NodeKind};

pub const BLOCK_SIZE: u32 = 512;

/// Owner and timestamps stamped on every reply. Nodes carry neither, so
/// they are fixed at mount time.
#[derive(Debug, Clone, Copy)]
pub struct AttrTemplate {
    pub uid: u32,
    pub gid: u32,
    pub time: SystemTime,
}

impl AttrTemplate {
    /// Owner of the mounting process, timestamps at now.
    pub fn current() -> Self {
        Self {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            time: SystemTime::now(),
        }
    }

    pub fn file_attr(&self, attr: &Attributes) -> FileAttr {
        FileAttr {
            ino: INodeNo(attr.inode),
            size: attr.size,
            blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
            atime: self.time,
            mtime: self.time,
            ctime: self.time,
            crtime: self.time,
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: match attr.kind {
                NodeKind::Directory => 2,
                NodeKind::File => 1,
            },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

pub fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::File => FileType::RegularFile,
        NodeKind::Directory => FileType::Directory,
    }
}
