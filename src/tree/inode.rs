use std::sync::atomic::{AtomicU64, Ordering};

/// Inode number of the filesystem root (FUSE_ROOT_ID).
pub const ROOT_INODE: u64 = 1;

/// Issues inode numbers for one filesystem tree.
///
/// Created once together with the root directory and shared by every
/// directory of that tree. The counter only moves forward, so a number is
/// never handed out twice for the life of the process, even after the node
/// that carried it has been removed. Nothing is persisted.
#[derive(Debug)]
pub struct InodeAllocator {
    next: AtomicU64,
}

impl InodeAllocator {
    /// Create an allocator whose first issued number is `first`.
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate a fresh inode number.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for InodeAllocator {
    fn default() -> Self {
        Self::new(ROOT_INODE + 1)
    }
}
