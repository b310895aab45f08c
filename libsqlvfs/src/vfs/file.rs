use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::VfsInner;
use crate::backing::{BackingFile, Durability, ReadOutcome};
use crate::diagnostics::traced;
use crate::error::{IoOp, ProtocolViolation, Result, VfsError};
use crate::lock::{LockLevel, PathLock};
use crate::util::{AccessMode, DeviceCharacteristics, OpenFlags};

/// One open of a file.
///
/// Owns its backing handle and its own lock level. Several records may be
/// open on one path; their levels are coalesced through a shared
/// [`PathLock`].
pub struct FileRecord {
    id: u64,
    path: PathBuf,
    flags: OpenFlags,
    handle: Option<Box<dyn BackingFile>>,
    lock: Arc<PathLock>,
    level: LockLevel,
    last_error: i32,
    vfs: Arc<VfsInner>,
}

/// Names a record, and the lock level involved, in log lines.
struct Subject<'a>(u64, &'a Path, Option<LockLevel>);

impl fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.0, self.1.display())?;
        match self.2 {
            Some(level) => write!(f, " {level:?}"),
            None => Ok(()),
        }
    }
}

impl FileRecord {
    pub(super) fn new(
        id: u64,
        path: PathBuf,
        flags: OpenFlags,
        handle: Box<dyn BackingFile>,
        lock: Arc<PathLock>,
        vfs: Arc<VfsInner>,
    ) -> Self {
        FileRecord {
            id,
            path,
            flags,
            handle: Some(handle),
            lock,
            level: LockLevel::Unlocked,
            last_error: 0,
            vfs,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective open flags. May differ from the request after a read-only
    /// fallback.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn lock_level(&self) -> LockLevel {
        self.level
    }

    /// Whether this record may roll back or journal without coordinating with
    /// anyone: it created the file exclusively, or holds EXCLUSIVE.
    pub fn has_exclusive_access(&self) -> bool {
        self.flags.contains(OpenFlags::EXCLUSIVE) || self.level == LockLevel::Exclusive
    }

    /// OS errno of the most recent failed operation, 0 if none failed.
    pub fn last_error(&self) -> i32 {
        self.last_error
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Name of the adapter this record was opened through.
    pub fn vfs_name(&self) -> &str {
        &self.vfs.config.name
    }

    pub fn sector_size(&self) -> u32 {
        self.vfs.config.sector_size
    }

    pub fn device_characteristics(&self) -> DeviceCharacteristics {
        self.vfs.config.device_characteristics
    }

    /// Runs `f` on the open handle, logging and remembering failures.
    fn with_handle<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut dyn BackingFile) -> Result<T>,
    ) -> Result<T> {
        let subject = Subject(self.id, &self.path, None);
        let handle = &mut self.handle;
        let res = traced(op, subject, || match handle {
            Some(h) => f(h.as_mut()),
            None => Err(ProtocolViolation::AlreadyClosed.into()),
        });
        self.remember(res)
    }

    fn remember<T>(&mut self, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            if let Some(errno) = e.errno() {
                self.last_error = errno;
                self.vfs.set_last_error(errno);
            }
        }
        res
    }

    fn check_writable(&self) -> Result<()> {
        if self.flags.is_writable() {
            Ok(())
        } else {
            Err(VfsError::ReadOnly)
        }
    }

    /// Fills `buf` from `offset`. A read past end of file zero-fills and
    /// reports [`ReadOutcome::Short`].
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.with_handle("read", |h| {
            h.read_at(offset, buf).map_err(|e| VfsError::io(IoOp::Read, e))
        })
    }

    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let writable = self.check_writable();
        self.with_handle("write", |h| {
            writable?;
            h.write_at(offset, data).map_err(|e| VfsError::io(IoOp::Write, e))
        })
    }

    pub fn truncate(&mut self, size: u64) -> Result<()> {
        let writable = self.check_writable();
        self.with_handle("truncate", |h| {
            writable?;
            h.truncate(size).map_err(|e| VfsError::io(IoOp::Truncate, e))
        })
    }

    pub fn sync(&mut self, durability: Durability) -> Result<()> {
        self.with_handle("sync", |h| {
            h.flush(durability).map_err(|e| VfsError::io(IoOp::Fsync, e))
        })
    }

    pub fn size(&mut self) -> Result<u64> {
        self.with_handle("size", |h| h.size().map_err(|e| VfsError::io(IoOp::Fstat, e)))
    }

    /// Raises this record's lock to `target`. Never waits: contention is
    /// [`VfsError::Busy`].
    pub fn lock(&mut self, target: LockLevel) -> Result<()> {
        let subject = Subject(self.id, &self.path, Some(target));
        let res = traced("lock", subject, || {
            if self.handle.is_none() {
                return Err(ProtocolViolation::AlreadyClosed.into());
            }
            self.lock.acquire(&mut self.level, target)
        });
        self.remember(res)
    }

    /// Lowers this record's lock to SHARED or UNLOCKED.
    pub fn unlock(&mut self, target: LockLevel) -> Result<()> {
        let subject = Subject(self.id, &self.path, Some(target));
        let res = traced("unlock", subject, || {
            if self.handle.is_none() {
                return Err(ProtocolViolation::AlreadyClosed.into());
            }
            self.lock.release(&mut self.level, target)
        });
        self.remember(res)
    }

    /// Whether some other record, here or in another process, holds RESERVED
    /// or more on this path.
    pub fn check_reserved_lock(&mut self) -> Result<bool> {
        let subject = Subject(self.id, &self.path, Some(self.level));
        let res = traced("check reserved", subject, || {
            if self.handle.is_none() {
                return Err(ProtocolViolation::AlreadyClosed.into());
            }
            self.lock.reserved_held_elsewhere(self.level)
        });
        self.remember(res)
    }

    /// The path no longer names an existing file.
    pub fn has_moved(&mut self) -> Result<bool> {
        if self.handle.is_none() {
            return Err(ProtocolViolation::AlreadyClosed.into());
        }
        let exists = self
            .vfs
            .storage
            .access(&self.path, AccessMode::Exists)
            .map_err(|e| VfsError::io(IoOp::Access, e));
        self.remember(exists).map(|exists| !exists)
    }

    /// Releases this record's lock, closes the handle and, for delete-on-close
    /// records, removes the file.
    ///
    /// The record is closed afterwards whatever the outcome; the first
    /// failure is returned. A second close is a protocol violation.
    pub fn close(&mut self) -> Result<()> {
        let subject = Subject(self.id, &self.path, None).to_string();
        let res = traced("close", subject, || self.close_inner());
        self.remember(res)
    }

    fn close_inner(&mut self) -> Result<()> {
        let handle = self
            .handle
            .take()
            .ok_or(VfsError::Protocol(ProtocolViolation::AlreadyClosed))?;
        let mut first: Option<VfsError> = None;

        if let Err(e) = self.lock.release(&mut self.level, LockLevel::Unlocked) {
            first.get_or_insert(e);
        }
        self.level = LockLevel::Unlocked;
        self.vfs.table.detach(&self.lock);

        if let Err(e) = handle.close() {
            first.get_or_insert(VfsError::io(IoOp::Close, e));
        }
        if self.flags.contains(OpenFlags::DELETEONCLOSE) {
            if let Err(e) = self.vfs.storage.delete(&self.path) {
                first.get_or_insert(VfsError::from_io(IoOp::Delete, &self.path, e));
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for FileRecord {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.close_inner() {
                warn!("close on drop #{} {}: {e}", self.id, self.path.display());
            }
        }
    }
}

impl fmt::Debug for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRecord")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("level", &self.level)
            .field("closed", &self.handle.is_none())
            .finish()
    }
}
