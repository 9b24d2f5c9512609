pub mod attr;
pub mod handles;
pub mod inodes;

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    AccessFlags, BsdFileFlags, Errno, FileAttr, FileHandle, Filesystem, FopenFlags,
    Generation, INodeNo, KernelConfig, LockOwner, OpenFlags, RenameFlags, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite,
    Request, TimeOrNow, WriteFlags,
};
use tracing::{debug, info};

use self::attr::{file_type, AttrTemplate, BLOCK_SIZE};
use self::handles::{DirHandleTable, HandleTable};
use self::inodes::InodeTable;
use crate::config::MemFsConfig;
use crate::error::{FsError, Result};
use crate::tree::{Directory, Node, NodeKind, ROOT_INODE};

/// Longest name the kernel is told it may pass.
const NAME_MAX: u32 = 255;

/// Get the session ID for a given PID. Falls back to the PID itself on error.
fn get_sid(pid: u32) -> u32 {
    let sid = unsafe { libc::getsid(pid as i32) };
    if sid < 0 { pid } else { sid as u32 }
}

fn entry_name(name: &OsStr) -> Result<&str> {
    name.to_str()
        .ok_or_else(|| FsError::InvalidName(name.to_string_lossy().into_owned()))
}

/// The kernel-facing side of the filesystem. Owns the tree root and the
/// tables that map kernel inode and handle numbers onto it.
pub struct MemFs {
    pub config: MemFsConfig,
    /// Root of the tree, registered as inode 1.
    pub root: Arc<Directory>,
    /// Inode table mapping kernel inodes to nodes.
    pub inodes: InodeTable,
    /// File handle table.
    pub file_handles: Arc<HandleTable>,
    /// Directory handle table.
    pub dir_handles: DirHandleTable,
    /// Owner and timestamps reported for every node.
    pub attrs: AttrTemplate,
    ttl: Duration,
}

impl MemFs {
    pub fn new(config: MemFsConfig) -> Self {
        let root = Directory::root();
        let ttl = Duration::from_secs(config.ttl_secs);
        Self {
            config,
            inodes: InodeTable::new(Arc::clone(&root)),
            root,
            file_handles: Arc::new(HandleTable::new()),
            dir_handles: DirHandleTable::new(),
            attrs: AttrTemplate::current(),
            ttl,
        }
    }

    fn file_attr(&self, node: &Node) -> FileAttr {
        self.attrs.file_attr(&node.attributes())
    }

    pub fn lookup_entry(&self, parent: u64, name: &OsStr) -> Result<FileAttr> {
        let dir = self.inodes.get_dir(parent)?;
        let node = dir.lookup(entry_name(name)?)?;
        Ok(self.file_attr(&node))
    }

    pub fn attr_of(&self, ino: u64) -> Result<FileAttr> {
        self.inodes
            .get(ino)
            .map(|node| self.file_attr(&node))
            .ok_or(FsError::UnknownInode(ino))
    }

    /// Attributes of `ino`, read through an open handle when one exists so
    /// that unlinked but still open files keep answering.
    pub fn attr_for(&self, ino: u64, fh: Option<u64>) -> Result<FileAttr> {
        if let Some(file) = fh.and_then(|fh| self.file_handles.file(fh, ino)) {
            return Ok(self.attrs.file_attr(&file.attributes()));
        }
        match self.attr_of(ino) {
            Err(FsError::UnknownInode(_)) => self
                .file_handles
                .any_open(ino)
                .map(|file| self.attrs.file_attr(&file.attributes()))
                .ok_or(FsError::UnknownInode(ino)),
            other => other,
        }
    }

    /// Resize a file, through its open handle when the kernel supplied one.
    pub fn resize(&self, ino: u64, fh: Option<u64>, size: u64) -> Result<FileAttr> {
        let file = match fh.and_then(|fh| self.file_handles.file(fh, ino)) {
            Some(file) => file,
            None => self.inodes.get_file(ino)?,
        };
        file.truncate(size)?;
        Ok(self.attrs.file_attr(&file.attributes()))
    }

    pub fn open_file(&self, ino: u64, flags: i32, sid: u32) -> Result<u64> {
        let file = self.inodes.get_file(ino)?;
        if flags & libc::O_TRUNC != 0 && flags & libc::O_ACCMODE != libc::O_RDONLY {
            file.truncate(0)?;
        }
        Ok(self.file_handles.alloc(file, flags, sid))
    }

    pub fn read_handle(&self, fh: u64, offset: u64, size: u32) -> Result<Vec<u8>> {
        let handle = self.file_handles.get(fh).ok_or(FsError::BadHandle(fh))?;
        Ok(handle.file.read_at(offset, size as usize))
    }

    pub fn write_handle(&self, fh: u64, offset: u64, data: &[u8]) -> Result<usize> {
        let handle = self.file_handles.get(fh).ok_or(FsError::BadHandle(fh))?;
        if handle.is_append() {
            handle.file.append(data)?;
            Ok(data.len())
        } else {
            handle.file.write_at(offset, data)
        }
    }

    /// Snapshot `.`, `..` and the children of a directory into a new handle.
    pub fn open_dir(&self, ino: u64) -> Result<u64> {
        let dir = self.inodes.get_dir(ino)?;
        let parent = self.inodes.parent_of(ino).unwrap_or(ROOT_INODE);
        let mut entries = vec![
            (ino, NodeKind::Directory, ".".to_string()),
            (parent, NodeKind::Directory, "..".to_string()),
        ];
        entries.extend(
            dir.list_children()
                .into_iter()
                .map(|e| (e.inode, e.kind, e.name)),
        );
        Ok(self.dir_handles.alloc(ino, entries))
    }

    /// Register a freshly created child of `parent`. When `parent` was
    /// removed while the child was being created, the child is forgotten
    /// again and the request fails as if the parent were already gone.
    fn register_child(&self, node: Node, parent: u64, dir: &Arc<Directory>) -> Result<()> {
        self.inodes.insert(node.clone(), parent);
        match self.inodes.get(parent) {
            Some(Node::Directory(current)) if Arc::ptr_eq(&current, dir) => Ok(()),
            _ => {
                self.inodes.remove_subtree(&node);
                debug!("parent {} vanished while creating inode {}", parent, node.inode());
                Err(FsError::UnknownInode(parent))
            }
        }
    }

    pub fn create_file(&self, parent: u64, name: &OsStr, flags: i32, sid: u32) -> Result<(FileAttr, u64)> {
        let dir = self.inodes.get_dir(parent)?;
        let file = dir.create(entry_name(name)?)?;
        self.register_child(Node::File(Arc::clone(&file)), parent, &dir)?;
        let attr = self.attrs.file_attr(&file.attributes());
        let fh = self.file_handles.alloc(file, flags, sid);
        Ok((attr, fh))
    }

    pub fn make_dir(&self, parent: u64, name: &OsStr) -> Result<FileAttr> {
        let dir = self.inodes.get_dir(parent)?;
        let node = Node::Directory(dir.mkdir(entry_name(name)?)?);
        self.register_child(node.clone(), parent, &dir)?;
        Ok(self.file_attr(&node))
    }

    /// Detach a child and forget its inodes. Open file handles keep working
    /// on the detached payload until they are released.
    pub fn remove_entry(&self, parent: u64, name: &OsStr, is_dir: bool) -> Result<()> {
        let dir = self.inodes.get_dir(parent)?;
        let node = dir.remove(entry_name(name)?, is_dir)?;
        let forgotten = self.inodes.remove_subtree(&node);
        debug!("removed {:?} (inode {}), forgot {} inode(s)", name, node.inode(), forgotten);
        Ok(())
    }
}

impl Filesystem for MemFs {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::io::Result<()> {
        info!("memfs filesystem initialized, fs_name={}", self.config.fs_name);
        Ok(())
    }

    fn destroy(&mut self) {
        info!(
            "memfs filesystem shutting down, {} inode(s) live, {} open handle(s)",
            self.inodes.live_count(),
            self.file_handles.len()
        );
    }

    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let parent = u64::from(parent);
        debug!("lookup(parent={}, name={:?})", parent, name);

        match self.lookup_entry(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &attr, Generation(0)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, fh: Option<FileHandle>, reply: ReplyAttr) {
        let ino = u64::from(ino);
        debug!("getattr(ino={}, fh={:?})", ino, fh.map(u64::from));

        match self.attr_for(ino, fh.map(u64::from)) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        let ino = u64::from(ino);
        debug!("setattr(ino={}, size={:?})", ino, size);

        // Modes, owners and times are fixed; only the payload size can change.
        let result = match size {
            Some(size) => self.resize(ino, fh.map(u64::from), size),
            None => self.attr_for(ino, fh.map(u64::from)),
        };
        match result {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&self, req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        let ino = u64::from(ino);
        let raw_flags = flags.0;
        debug!("open(ino={}, flags={})", ino, raw_flags);

        match self.open_file(ino, raw_flags, get_sid(req.pid())) {
            Ok(fh) => reply.opened(FileHandle(fh), FopenFlags::empty()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        let ino = u64::from(ino);
        let fh = u64::from(fh);
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        match self.read_handle(fh, offset, size) {
            Ok(buf) => reply.data(&buf),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        let ino = u64::from(ino);
        let fh = u64::from(fh);
        debug!("write(ino={}, fh={}, offset={}, size={})", ino, fh, offset, data.len());

        match self.write_handle(fh, offset, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&self, _req: &Request, ino: INodeNo, fh: FileHandle, _lock_owner: LockOwner, reply: ReplyEmpty) {
        debug!("flush(ino={}, fh={})", u64::from(ino), u64::from(fh));
        reply.ok();
    }

    fn release(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let fh = u64::from(fh);
        debug!("release(fh={})", fh);
        self.file_handles.remove(fh);
        reply.ok();
    }

    fn opendir(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        let ino = u64::from(ino);
        debug!("opendir(ino={})", ino);

        match self.open_dir(ino) {
            Ok(fh) => reply.opened(FileHandle(fh), FopenFlags::empty()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        let ino = u64::from(ino);
        let fh = u64::from(fh);
        debug!("readdir(ino={}, fh={}, offset={})", ino, fh, offset);

        let handle = match self.dir_handles.get(fh) {
            Some(h) => h,
            None => {
                reply.error(FsError::BadHandle(fh).errno());
                return;
            }
        };

        for (i, (entry_ino, kind, name)) in handle.entries.iter().enumerate().skip(offset as usize) {
            if reply.add(INodeNo(*entry_ino), (i + 1) as u64, file_type(*kind), name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&self, _req: &Request, _ino: INodeNo, fh: FileHandle, _flags: OpenFlags, reply: ReplyEmpty) {
        let fh = u64::from(fh);
        debug!("releasedir(fh={})", fh);
        self.dir_handles.remove(fh);
        reply.ok();
    }

    fn create(
        &self,
        req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let parent = u64::from(parent);
        debug!("create(parent={}, name={:?}, mode={:#o})", parent, name, mode);

        match self.create_file(parent, name, flags, get_sid(req.pid())) {
            Ok((attr, fh)) => {
                reply.created(&self.ttl, &attr, Generation(0), FileHandle(fh), FopenFlags::empty())
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let parent = u64::from(parent);
        debug!("mkdir(parent={}, name={:?}, mode={:#o})", parent, name, mode);

        match self.make_dir(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &attr, Generation(0)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let parent = u64::from(parent);
        debug!("unlink(parent={}, name={:?})", parent, name);

        match self.remove_entry(parent, name, false) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let parent = u64::from(parent);
        debug!("rmdir(parent={}, name={:?})", parent, name);

        match self.remove_entry(parent, name, true) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        newparent: INodeNo,
        newname: &OsStr,
        _flags: RenameFlags,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            u64::from(parent),
            name,
            u64::from(newparent),
            newname
        );
        reply.error(FsError::Unsupported("rename").errno());
    }

    fn link(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _newparent: INodeNo,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        // Hard links would give a node two parents.
        reply.error(Errno::ENOTSUP);
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        reply.statfs(
            0,
            0,
            0,
            self.inodes.live_count() as u64,
            u32::MAX as u64,
            BLOCK_SIZE,
            NAME_MAX,
            BLOCK_SIZE,
        );
    }

    fn access(&self, _req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        let ino = u64::from(ino);
        debug!("access(ino={}, mask={:?})", ino, mask);

        // No permission enforcement: any live inode is accessible.
        match self.inodes.get(ino) {
            Some(_) => reply.ok(),
            None => reply.error(Errno::ENOENT),
        }
    }
}
