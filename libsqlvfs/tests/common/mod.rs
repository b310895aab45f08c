#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use libsqlvfs::backing::BackingFile;
use libsqlvfs::lock::LockPrimitive;
use libsqlvfs::{
    AccessMode, DiskStorage, Durability, MemoryStorage, OpenFlags, ReadOutcome, Storage, Vfs,
    VfsConfig,
};
use tempfile::TempDir;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .is_test(true)
            .try_init();
    });
}

pub fn rw_create() -> OpenFlags {
    OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::MAIN_DB
}

/// Two adapters over one medium, standing in for two processes.
pub struct Pair {
    pub one: Vfs,
    pub two: Vfs,
    pub root: PathBuf,
    _dir: Option<TempDir>,
}

pub fn memory_pair() -> Pair {
    init_logging();
    let storage = MemoryStorage::new();
    Pair {
        one: Vfs::memory(storage.clone(), VfsConfig::default()).unwrap(),
        two: Vfs::memory(storage, VfsConfig::default()).unwrap(),
        root: PathBuf::from("/"),
        _dir: None,
    }
}

pub fn disk_pair() -> Pair {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    Pair {
        one: Vfs::new(DiskStorage::with_base(&root), VfsConfig::default()).unwrap(),
        two: Vfs::new(DiskStorage::with_base(&root), VfsConfig::default()).unwrap(),
        root,
        _dir: Some(dir),
    }
}

pub fn pairs() -> Vec<(&'static str, Pair)> {
    vec![("memory", memory_pair()), ("disk", disk_pair())]
}

/// Memory storage with switches that make individual operations fail with
/// `EIO`: file writes and syncs, directory syncs, and removals.
#[derive(Clone, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    failing: Arc<AtomicBool>,
    failing_dir_sync: Arc<AtomicBool>,
    failing_delete: Arc<AtomicBool>,
}

fn eio_if(switch: &AtomicBool) -> io::Result<()> {
    if switch.load(Ordering::SeqCst) {
        Err(io::Error::from_raw_os_error(libc::EIO))
    } else {
        Ok(())
    }
}

impl FlakyStorage {
    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn fail_dir_sync(&self, on: bool) {
        self.failing_dir_sync.store(on, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, on: bool) {
        self.failing_delete.store(on, Ordering::SeqCst);
    }

    pub fn memory(&self) -> &MemoryStorage {
        &self.inner
    }
}

impl Storage for FlakyStorage {
    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<Box<dyn BackingFile>> {
        let inner = self.inner.open(path, flags)?;
        Ok(Box::new(FlakyFile {
            inner,
            failing: self.failing.clone(),
        }))
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        eio_if(&self.failing_delete)?;
        self.inner.delete(path)
    }

    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        eio_if(&self.failing_dir_sync)?;
        self.inner.sync_dir(path)
    }

    fn access(&self, path: &Path, mode: AccessMode) -> io::Result<bool> {
        self.inner.access(path, mode)
    }

    fn canonicalize(&self, path: &Path) -> PathBuf {
        self.inner.canonicalize(path)
    }

    fn lock_primitive(&self, path: &Path) -> io::Result<Box<dyn LockPrimitive>> {
        self.inner.lock_primitive(path)
    }
}

struct FlakyFile {
    inner: Box<dyn BackingFile>,
    failing: Arc<AtomicBool>,
}

impl BackingFile for FlakyFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        eio_if(&self.failing)?;
        self.inner.write_at(offset, data)
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        eio_if(&self.failing)?;
        self.inner.truncate(size)
    }

    fn flush(&mut self, durability: Durability) -> io::Result<()> {
        eio_if(&self.failing)?;
        self.inner.flush(durability)
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        self.inner.close()
    }
}
