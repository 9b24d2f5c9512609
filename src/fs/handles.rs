use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::tree::{File, NodeKind};

#[derive(Debug, Clone)]
pub struct HandleState {
    /// The file handle ID handed to the kernel.
    pub fh: u64,
    /// Inode of the open file.
    pub ino: u64,
    /// The file itself. Stays usable after the file is unlinked.
    pub file: Arc<File>,
    /// Open flags.
    pub flags: i32,
    /// Session ID of the process that opened this handle.
    pub sid: u32,
}

impl HandleState {
    pub fn is_append(&self) -> bool {
        self.flags & libc::O_APPEND != 0
    }
}

/// Summary of an open handle, for reporting why a mount is busy.
#[derive(Debug, Clone)]
pub struct OpenFileInfo {
    pub ino: u64,
    pub name: String,
    pub sid: u32,
}

pub struct HandleTable {
    handles: DashMap<u64, HandleState>,
    next_fh: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn alloc(&self, file: Arc<File>, flags: i32, sid: u32) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let state = HandleState {
            fh,
            ino: file.inode(),
            file,
            flags,
            sid,
        };
        self.handles.insert(fh, state);
        fh
    }

    pub fn get(&self, fh: u64) -> Option<dashmap::mapref::one::Ref<'_, u64, HandleState>> {
        self.handles.get(&fh)
    }

    pub fn remove(&self, fh: u64) -> Option<HandleState> {
        self.handles.remove(&fh).map(|(_, v)| v)
    }

    /// The file behind `fh`, if that handle is open on `ino`.
    pub fn file(&self, fh: u64, ino: u64) -> Option<Arc<File>> {
        self.handles
            .get(&fh)
            .filter(|h| h.ino == ino)
            .map(|h| Arc::clone(&h.file))
    }

    /// Any open file for `ino`. Unlinked files are only reachable this way.
    pub fn any_open(&self, ino: u64) -> Option<Arc<File>> {
        self.handles
            .iter()
            .find(|h| h.ino == ino)
            .map(|h| Arc::clone(&h.file))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn list_open(&self) -> Vec<OpenFileInfo> {
        let mut open: Vec<OpenFileInfo> = self
            .handles
            .iter()
            .map(|h| OpenFileInfo {
                ino: h.ino,
                name: h.file.name().to_string(),
                sid: h.sid,
            })
            .collect();
        open.sort_by_key(|info| info.ino);
        open
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// State for directory handles: the listing captured at opendir, so that
/// readdir offsets stay meaningful while the directory changes.
#[derive(Debug)]
pub struct DirHandleState {
    pub fh: u64,
    pub ino: u64,
    pub entries: Vec<(u64, NodeKind, String)>,
}

pub struct DirHandleTable {
    handles: DashMap<u64, DirHandleState>,
    next_fh: AtomicU64,
}

impl DirHandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn alloc(&self, ino: u64, entries: Vec<(u64, NodeKind, String)>) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, DirHandleState { fh, ino, entries });
        fh
    }

    pub fn get(&self, fh: u64) -> Option<dashmap::mapref::one::Ref<'_, u64, DirHandleState>> {
        self.handles.get(&fh)
    }

    pub fn remove(&self, fh: u64) -> Option<DirHandleState> {
        self.handles.remove(&fh).map(|(_, v)| v)
    }
}

impl Default for DirHandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_distinct() {
        let table = HandleTable::new();
        let f = Arc::new(File::new("a", 5));
        let h1 = table.alloc(Arc::clone(&f), libc::O_RDONLY, 10);
        let h2 = table.alloc(Arc::clone(&f), libc::O_WRONLY | libc::O_APPEND, 11);
        assert_ne!(h1, h2);
        assert_eq!(table.len(), 2);
        assert!(!table.get(h1).unwrap().is_append());
        assert!(table.get(h2).unwrap().is_append());
    }

    #[test]
    fn test_file_by_handle_checks_inode() {
        let table = HandleTable::new();
        let fh = table.alloc(Arc::new(File::new("a", 5)), libc::O_RDONLY, 1);
        assert_eq!(table.file(fh, 5).unwrap().inode(), 5);
        assert!(table.file(fh, 6).is_none());
        assert!(table.file(fh + 1, 5).is_none());
        assert_eq!(table.any_open(5).unwrap().name(), "a");
        assert!(table.any_open(6).is_none());
    }

    #[test]
    fn test_handle_outlives_lookup() {
        let table = HandleTable::new();
        let f = Arc::new(File::new("a", 5));
        let fh = table.alloc(Arc::clone(&f), libc::O_RDWR, 1);
        drop(f);
        table.get(fh).unwrap().file.write_at(0, b"still here").unwrap();
        let state = table.remove(fh).unwrap();
        assert_eq!(state.file.data(), b"still here");
        assert!(table.is_empty());
        assert!(table.remove(fh).is_none());
    }

    #[test]
    fn test_list_open() {
        let table = HandleTable::new();
        table.alloc(Arc::new(File::new("b", 9)), libc::O_RDONLY, 2);
        table.alloc(Arc::new(File::new("a", 3)), libc::O_RDONLY, 1);
        let open = table.list_open();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].name, "a");
        assert_eq!(open[1].ino, 9);
    }

    #[test]
    fn test_dir_handle_snapshot() {
        let table = DirHandleTable::new();
        let fh = table.alloc(1, vec![(1, NodeKind::Directory, ".".to_string())]);
        assert_eq!(table.get(fh).unwrap().entries.len(), 1);
        assert_eq!(table.remove(fh).unwrap().ino, 1);
        assert!(table.get(fh).is_none());
    }
}
