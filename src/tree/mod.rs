//! The in-memory filesystem tree: directories, files and their inode numbers.

pub mod dir;
pub mod file;
pub mod inode;
pub mod node;

pub use dir::Directory;
pub use file::{File, MAX_FILE_SIZE};
pub use inode::{InodeAllocator, ROOT_INODE};
pub use node::{Attributes, DirEntry, Node, NodeKind};
