use fuser::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("No such entry: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Inode {0} is not a directory")]
    NotADirectory(u64),

    #[error("Inode {0} is a directory")]
    IsADirectory(u64),

    #[error("Invalid entry name: {0}")]
    InvalidName(String),

    #[error("Unknown inode: {0}")]
    UnknownInode(u64),

    #[error("Bad file handle: {0}")]
    BadHandle(u64),

    #[error("Inode {0} would exceed the maximum file size")]
    FileTooLarge(u64),

    #[error("Out of memory growing inode {0}")]
    NoSpace(u64),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mount error: {0}")]
    Mount(String),
}

impl FsError {
    /// The raw errno value for this error.
    pub fn code(&self) -> i32 {
        match self {
            FsError::NotFound(_) | FsError::UnknownInode(_) => libc::ENOENT,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::InvalidName(_) => libc::EINVAL,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::FileTooLarge(_) => libc::EFBIG,
            FsError::NoSpace(_) => libc::ENOSPC,
            FsError::Unsupported(_) => libc::ENOSYS,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::Mount(_) => libc::EIO,
        }
    }

    /// The errno reported to the kernel for this error.
    pub fn errno(&self) -> Errno {
        Errno::from(std::io::Error::from_raw_os_error(self.code()))
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
