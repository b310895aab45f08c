//! The adapter: path-level operations and the factory for [`FileRecord`]s.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use uuid::Uuid;

use crate::backing::{DiskStorage, MemoryStorage, Storage};
use crate::config::VfsConfig;
use crate::diagnostics::{init_diagnostics, traced};
use crate::error::{IoOp, Result, VfsError};
use crate::lock::LockTable;
use crate::util::{AccessMode, DeviceCharacteristics, OpenFlags};

mod file;

pub use file::FileRecord;

const TEMP_PREFIX: &str = "sqlvfs-";

pub(crate) struct VfsInner {
    pub(crate) config: VfsConfig,
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) table: LockTable,
    next_id: AtomicU64,
    last_error: AtomicI32,
}

impl VfsInner {
    pub(crate) fn set_last_error(&self, errno: i32) {
        self.last_error.store(errno, Ordering::Relaxed);
    }
}

/// A VFS adapter over one storage medium.
///
/// Cloning is cheap and yields the same adapter. Two adapters built
/// separately never coalesce their locks, even on a shared medium, so they
/// behave towards each other like two processes.
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<VfsInner>,
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs")
            .field("name", &self.inner.config.name)
            .field("open_paths", &self.inner.table.len())
            .finish()
    }
}

impl Vfs {
    pub fn new(storage: impl Storage + 'static, config: VfsConfig) -> Result<Self> {
        init_diagnostics();
        config.validate()?;
        debug!("creating vfs {:?}", config.name);
        Ok(Vfs {
            inner: Arc::new(VfsInner {
                config,
                storage: Box::new(storage),
                table: LockTable::new(),
                next_id: AtomicU64::new(1),
                last_error: AtomicI32::new(0),
            }),
        })
    }

    /// Adapter over the local filesystem, resolving relative paths against
    /// the current directory.
    pub fn disk(config: VfsConfig) -> Result<Self> {
        let storage = DiskStorage::new().map_err(|e| VfsError::io(IoOp::Fstat, e))?;
        Self::new(storage, config)
    }

    pub fn memory(storage: MemoryStorage, config: VfsConfig) -> Result<Self> {
        Self::new(storage, config)
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &VfsConfig {
        &self.inner.config
    }

    pub fn max_pathname(&self) -> usize {
        self.inner.config.max_pathname
    }

    pub fn sector_size(&self) -> u32 {
        self.inner.config.sector_size
    }

    pub fn device_characteristics(&self) -> DeviceCharacteristics {
        self.inner.config.device_characteristics
    }

    /// OS errno of the most recent failure on any record of this adapter.
    pub fn last_error(&self) -> i32 {
        self.inner.last_error.load(Ordering::Relaxed)
    }

    /// Number of distinct paths with open records.
    pub fn open_paths(&self) -> usize {
        self.inner.table.len()
    }

    fn remember<T>(&self, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            if let Some(errno) = e.errno() {
                self.inner.set_last_error(errno);
            }
        }
        res
    }

    /// Opens `path`, or a fresh temporary file when `path` is `None`.
    ///
    /// Temporary files are always deleted on close. A read-write request on
    /// a file the process may only read falls back to read-only; the
    /// returned record's [`FileRecord::flags`] tell which happened.
    pub fn open(&self, path: Option<&Path>, flags: OpenFlags) -> Result<FileRecord> {
        let (path, flags) = match path {
            Some(p) => (self.full_pathname(p)?, flags),
            None => {
                let name = format!("{TEMP_PREFIX}{}", Uuid::new_v4().simple());
                let path = self.full_pathname(&self.inner.config.temp_dir().join(name))?;
                let flags = flags | OpenFlags::DELETEONCLOSE | OpenFlags::CREATE;
                (path, flags)
            }
        };
        let res = traced("open", path.display(), || self.open_inner(path.clone(), flags));
        self.remember(res)
    }

    fn open_inner(&self, path: PathBuf, flags: OpenFlags) -> Result<FileRecord> {
        let storage = &self.inner.storage;
        let (handle, flags) = match storage.open(&path, flags) {
            Ok(h) => (h, flags),
            Err(e)
                if e.kind() == std::io::ErrorKind::PermissionDenied
                    && flags.is_writable()
                    && !flags.contains(OpenFlags::EXCLUSIVE) =>
            {
                let ro = flags.read_only();
                debug!("open {}: {e}, retrying read-only", path.display());
                let handle = storage
                    .open(&path, ro)
                    .map_err(|e| VfsError::from_io(IoOp::Open, &path, e))?;
                (handle, ro)
            }
            Err(e) => return Err(VfsError::from_io(IoOp::Open, &path, e)),
        };

        let lock = match self
            .inner
            .table
            .attach(&path, || storage.lock_primitive(&path))
        {
            Ok(lock) => lock,
            Err(e) => {
                if let Err(close) = handle.close() {
                    warn!("closing {} after failed open: {close}", path.display());
                }
                return Err(VfsError::io(IoOp::Lock, e));
            }
        };
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("opened #{id} {} as {:?}", path.display(), flags.kind());
        Ok(FileRecord::new(
            id,
            path,
            flags,
            handle,
            lock,
            self.inner.clone(),
        ))
    }

    /// Removes `path`. With `sync_dir` the removal is durable on return.
    pub fn delete(&self, path: &Path, sync_dir: bool) -> Result<()> {
        let path = self.full_pathname(path)?;
        let storage = &self.inner.storage;
        let res = traced("delete", path.display(), || {
            storage
                .delete(&path)
                .map_err(|e| VfsError::from_io(IoOp::Delete, &path, e))?;
            // The file is gone by now; a failure here only means the removal
            // may not survive a crash.
            if sync_dir {
                storage
                    .sync_dir(&path)
                    .map_err(|e| VfsError::io(IoOp::DirFsync, e))?;
            }
            Ok(())
        });
        self.remember(res)
    }

    /// Answers an access query. A missing file is `false`, never an error.
    pub fn access(&self, path: &Path, mode: AccessMode) -> Result<bool> {
        let path = self.full_pathname(path)?;
        let res = traced("access", path.display(), || {
            self.inner
                .storage
                .access(&path, mode)
                .map_err(|e| VfsError::io(IoOp::Access, e))
        });
        self.remember(res)
    }

    /// Canonical absolute form of `path`, stable for the adapter's lifetime.
    pub fn full_pathname(&self, path: &Path) -> Result<PathBuf> {
        let full = self.inner.storage.canonicalize(path);
        let max = self.inner.config.max_pathname;
        // One byte is kept for the host's terminating NUL.
        if full.as_os_str().len() >= max {
            return Err(VfsError::PathTooLong { max });
        }
        Ok(full)
    }
}
