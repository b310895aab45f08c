use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::{BackingFile, Durability, ReadOutcome, Storage, finish_read, normalize};
use crate::lock::LockPrimitive;
use crate::lock::memory::MemoryLockRegistry;
use crate::util::{AccessMode, OpenFlags};

type Blob = Arc<RwLock<Vec<u8>>>;

#[derive(Default)]
struct Namespace {
    files: HashMap<PathBuf, Blob>,
    protected: HashSet<PathBuf>,
}

/// In-process storage. Clones share files and lock state, so two adapters
/// built over clones of one `MemoryStorage` behave like two processes on the
/// same disk.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    ns: Arc<Mutex<Namespace>>,
    locks: MemoryLockRegistry,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn ns(&self) -> MutexGuard<'_, Namespace> {
        self.ns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `path` readable but not writable, like a mode 0444 file.
    pub fn protect(&self, path: impl AsRef<Path>) {
        let path = self.canonicalize(path.as_ref());
        self.ns().protected.insert(path);
    }

    /// Snapshot of a file's bytes.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let path = self.canonicalize(path.as_ref());
        self.ns()
            .files
            .get(&path)
            .map(|blob| blob.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.ns().files.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Storage for MemoryStorage {
    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<Box<dyn BackingFile>> {
        let mut ns = self.ns();
        let writable = flags.is_writable();
        if writable && ns.protected.contains(path) {
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        let existing = ns.files.get(path).cloned();
        let blob = match existing {
            Some(_) if flags.contains(OpenFlags::EXCLUSIVE) => {
                return Err(io::Error::from_raw_os_error(libc::EEXIST));
            }
            Some(blob) => blob,
            None if flags.contains(OpenFlags::CREATE) && writable => {
                let blob = Blob::default();
                ns.files.insert(path.to_path_buf(), blob.clone());
                blob
            }
            None => return Err(io::Error::from_raw_os_error(libc::ENOENT)),
        };
        Ok(Box::new(MemoryFile { data: blob, writable }))
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        let mut ns = self.ns();
        match ns.files.remove(path) {
            Some(_) => {
                ns.protected.remove(path);
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    fn sync_dir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn access(&self, path: &Path, mode: AccessMode) -> io::Result<bool> {
        let ns = self.ns();
        let exists = ns.files.contains_key(path);
        Ok(match mode {
            AccessMode::Exists | AccessMode::Read => exists,
            AccessMode::ReadWrite => exists && !ns.protected.contains(path),
        })
    }

    fn canonicalize(&self, path: &Path) -> PathBuf {
        normalize(Path::new("/"), path)
    }

    fn lock_primitive(&self, path: &Path) -> io::Result<Box<dyn LockPrimitive>> {
        Ok(Box::new(self.locks.primitive(path)))
    }
}

/// A file opened from [`MemoryStorage`]. Deleting the path leaves the bytes
/// reachable through handles that are still open.
struct MemoryFile {
    data: Blob,
    writable: bool,
}

impl MemoryFile {
    fn check_writable(&self) -> io::Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(libc::EBADF))
        }
    }
}

impl BackingFile for MemoryFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(finish_read(buf, n))
    }

    fn write_at(&mut self, offset: u64, src: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        let start = usize::try_from(offset).map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
        let end = start
            .checked_add(src.len())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EFBIG))?;
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.check_writable()?;
        let size = usize::try_from(size).map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .resize(size, 0);
        Ok(())
    }

    fn flush(&mut self, _durability: Durability) -> io::Result<()> {
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.data.read().unwrap_or_else(PoisonError::into_inner).len() as u64)
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw_create() -> OpenFlags {
        OpenFlags::READWRITE | OpenFlags::CREATE
    }

    #[test]
    fn read_past_end_is_short_and_zeroed() {
        let store = MemoryStorage::new();
        let mut f = store.open(Path::new("/a"), rw_create()).unwrap();
        f.write_at(0, b"abc").unwrap();
        let mut buf = [9u8; 6];
        assert_eq!(f.read_at(1, &mut buf).unwrap(), ReadOutcome::Short(2));
        assert_eq!(&buf, b"bc\0\0\0\0");
        assert_eq!(f.read_at(100, &mut buf).unwrap(), ReadOutcome::Short(0));
    }

    #[test]
    fn write_past_end_leaves_zero_gap() {
        let store = MemoryStorage::new();
        let mut f = store.open(Path::new("/a"), rw_create()).unwrap();
        f.write_at(4, b"xy").unwrap();
        assert_eq!(f.size().unwrap(), 6);
        assert_eq!(store.contents("/a").unwrap(), b"\0\0\0\0xy");
        f.truncate(1).unwrap();
        assert_eq!(f.size().unwrap(), 1);
    }

    #[test]
    fn open_rules() {
        let store = MemoryStorage::new();
        let missing = store.open(Path::new("/nope"), OpenFlags::READWRITE).err().unwrap();
        assert_eq!(missing.kind(), io::ErrorKind::NotFound);

        store.open(Path::new("/a"), rw_create()).unwrap();
        let excl = store
            .open(Path::new("/a"), rw_create() | OpenFlags::EXCLUSIVE)
            .err()
            .unwrap();
        assert_eq!(excl.kind(), io::ErrorKind::AlreadyExists);

        store.protect("/a");
        let denied = store.open(Path::new("/a"), OpenFlags::READWRITE).err().unwrap();
        assert_eq!(denied.kind(), io::ErrorKind::PermissionDenied);
        assert!(store.open(Path::new("/a"), OpenFlags::READONLY).is_ok());
        assert!(!store.access(Path::new("/a"), AccessMode::ReadWrite).unwrap());
        assert!(store.access(Path::new("/a"), AccessMode::Read).unwrap());
    }

    #[test]
    fn deleted_file_stays_readable_through_open_handle() {
        let store = MemoryStorage::new();
        let mut f = store.open(Path::new("/a"), rw_create()).unwrap();
        f.write_at(0, b"keep").unwrap();
        store.delete(Path::new("/a")).unwrap();
        assert!(!store.access(Path::new("/a"), AccessMode::Exists).unwrap());
        let mut buf = [0u8; 4];
        assert_eq!(f.read_at(0, &mut buf).unwrap(), ReadOutcome::Full);
        assert_eq!(&buf, b"keep");
        let again = store.delete(Path::new("/a")).unwrap_err();
        assert_eq!(again.kind(), io::ErrorKind::NotFound);
    }
}
