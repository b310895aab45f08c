use std::io;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};

use libsqlite3_sys as ffi;
use thiserror::Error;

use crate::lock::LockLevel;

pub type Result<T> = std::result::Result<T, VfsError>;

/// The primitive operation an I/O failure came from.
///
/// The host engine distinguishes these in its extended result codes, so the
/// adapter keeps the tag alongside the OS error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Read,
    Write,
    Truncate,
    Fsync,
    DirFsync,
    Fstat,
    Close,
    Delete,
    Access,
    Lock,
    Unlock,
    CheckReservedLock,
}

impl IoOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            IoOp::Open => "open",
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Truncate => "truncate",
            IoOp::Fsync => "fsync",
            IoOp::DirFsync => "dir fsync",
            IoOp::Fstat => "fstat",
            IoOp::Close => "close",
            IoOp::Delete => "delete",
            IoOp::Access => "access",
            IoOp::Lock => "lock",
            IoOp::Unlock => "unlock",
            IoOp::CheckReservedLock => "check reserved lock",
        }
    }

    fn result_code(&self) -> c_int {
        match self {
            IoOp::Open => ffi::SQLITE_CANTOPEN,
            IoOp::Read => ffi::SQLITE_IOERR_READ,
            IoOp::Write => ffi::SQLITE_IOERR_WRITE,
            IoOp::Truncate => ffi::SQLITE_IOERR_TRUNCATE,
            IoOp::Fsync => ffi::SQLITE_IOERR_FSYNC,
            IoOp::DirFsync => ffi::SQLITE_IOERR_DIR_FSYNC,
            IoOp::Fstat => ffi::SQLITE_IOERR_FSTAT,
            IoOp::Close => ffi::SQLITE_IOERR_CLOSE,
            IoOp::Delete => ffi::SQLITE_IOERR_DELETE,
            IoOp::Access => ffi::SQLITE_IOERR_ACCESS,
            IoOp::Lock => ffi::SQLITE_IOERR_LOCK,
            IoOp::Unlock => ffi::SQLITE_IOERR_UNLOCK,
            IoOp::CheckReservedLock => ffi::SQLITE_IOERR_CHECKRESERVEDLOCK,
        }
    }
}

/// Misuse of the adapter by its caller. These are bugs in the host, never
/// conditions to retry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("file record is already closed")]
    AlreadyClosed,
    #[error("illegal lock transition {from:?} -> {to:?}")]
    IllegalLock { from: LockLevel, to: LockLevel },
    #[error("unlock target must be UNLOCKED or SHARED, got {0:?}")]
    IllegalUnlock(LockLevel),
}

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("lock is held by another connection")]
    Busy,

    #[error("{} failed: {source}", op.as_str())]
    Io {
        op: IoOp,
        #[source]
        source: io::Error,
    },

    #[error("no such file: {}", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    AccessDenied(PathBuf),

    #[error("file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("file record was opened read-only")]
    ReadOnly,

    #[error("path exceeds {max} bytes")]
    PathTooLong { max: usize },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("vfs registration rejected with code {0}")]
    Registration(c_int),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}

impl VfsError {
    pub fn io(op: IoOp, source: io::Error) -> Self {
        VfsError::Io { op, source }
    }

    /// Classifies an OS error raised while operating on `path`.
    pub fn from_io(op: IoOp, path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => VfsError::AccessDenied(path.to_path_buf()),
            io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(path.to_path_buf()),
            _ => VfsError::io(op, err),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, VfsError::Busy)
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, VfsError::Protocol(_))
    }

    /// OS errno carried by this error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            VfsError::Io { source, .. } => source.raw_os_error(),
            VfsError::NotFound(_) => Some(libc::ENOENT),
            VfsError::AccessDenied(_) => Some(libc::EACCES),
            VfsError::AlreadyExists(_) => Some(libc::EEXIST),
            VfsError::ReadOnly => Some(libc::EBADF),
            VfsError::PathTooLong { .. } => Some(libc::ENAMETOOLONG),
            _ => None,
        }
    }

    /// Result code reported to the host engine.
    pub fn result_code(&self) -> c_int {
        match self {
            VfsError::Busy => ffi::SQLITE_BUSY,
            VfsError::Io { op, source } => match source.raw_os_error() {
                Some(libc::ENOMEM) => ffi::SQLITE_IOERR_NOMEM,
                Some(libc::ENOSPC) if *op == IoOp::Write => ffi::SQLITE_FULL,
                _ => op.result_code(),
            },
            VfsError::NotFound(_) => ffi::SQLITE_CANTOPEN,
            VfsError::AccessDenied(_) => ffi::SQLITE_PERM,
            VfsError::AlreadyExists(_) => ffi::SQLITE_CANTOPEN,
            VfsError::ReadOnly => ffi::SQLITE_READONLY,
            VfsError::PathTooLong { .. } => ffi::SQLITE_CANTOPEN_FULLPATH,
            VfsError::InvalidPath(_) => ffi::SQLITE_CANTOPEN_CONVPATH,
            VfsError::InvalidConfig(_) => ffi::SQLITE_ERROR,
            VfsError::Registration(code) => *code,
            VfsError::Protocol(_) => ffi::SQLITE_MISUSE,
        }
    }
}
