//! Local filesystem storage.
//!
//! Files are plain OS files opened with positional I/O. Locks are OFD
//! byte-range locks on a descriptor owned by the lock primitive, so they are
//! visible to every other process using the same byte layout.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::IntoRawFd;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::{AccessFlags, access};

use super::{BackingFile, Durability, ReadOutcome, Storage, finish_read, normalize};
use crate::lock::LockPrimitive;
use crate::lock::fcntl::OfdLock;
use crate::util::{AccessMode, OpenFlags};

const FILE_MODE: u32 = 0o644;

pub struct DiskStorage {
    base_dir: PathBuf,
}

impl DiskStorage {
    /// Storage resolving relative paths against the current directory, as it
    /// is now.
    pub fn new() -> io::Result<Self> {
        Ok(Self::with_base(env::current_dir()?))
    }

    pub fn with_base(base_dir: impl AsRef<Path>) -> Self {
        let base_dir = normalize(Path::new("/"), base_dir.as_ref());
        DiskStorage { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl Storage for DiskStorage {
    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<Box<dyn BackingFile>> {
        let mut opts = OpenOptions::new();
        opts.read(true).mode(FILE_MODE);
        if flags.is_writable() {
            opts.write(true);
            if flags.contains(OpenFlags::EXCLUSIVE) {
                opts.create_new(true);
            } else if flags.contains(OpenFlags::CREATE) {
                opts.create(true);
            }
        }
        let file = opts.open(path)?;
        Ok(Box::new(DiskFile { file }))
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(dir) => File::open(dir)?.sync_all(),
            None => Ok(()),
        }
    }

    fn access(&self, path: &Path, mode: AccessMode) -> io::Result<bool> {
        let amode = match mode {
            AccessMode::Exists => AccessFlags::F_OK,
            AccessMode::Read => AccessFlags::R_OK,
            AccessMode::ReadWrite => AccessFlags::R_OK | AccessFlags::W_OK,
        };
        match access(path, amode) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT | Errno::EACCES | Errno::EROFS | Errno::ENOTDIR) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn canonicalize(&self, path: &Path) -> PathBuf {
        normalize(&self.base_dir, path)
    }

    fn lock_primitive(&self, path: &Path) -> io::Result<Box<dyn LockPrimitive>> {
        Ok(Box::new(OfdLock::open(path)?))
    }
}

struct DiskFile {
    file: File,
}

impl BackingFile for DiskFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut n = 0;
        while n < buf.len() {
            match self.file.read_at(&mut buf[n..], offset + n as u64) {
                Ok(0) => break,
                Ok(got) => n += got,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(finish_read(buf, n))
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.file.set_len(size)
    }

    fn flush(&mut self, durability: Durability) -> io::Result<()> {
        match durability {
            Durability::Data => self.file.sync_data(),
            Durability::Full => self.file.sync_all(),
        }
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        // Dropping a File swallows close(2) errors.
        nix::unistd::close(self.file.into_raw_fd())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rw_create() -> OpenFlags {
        OpenFlags::READWRITE | OpenFlags::CREATE
    }

    #[test]
    fn positional_io() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::with_base(dir.path());
        let path = store.canonicalize(Path::new("t.db"));
        let mut f = store.open(&path, rw_create()).unwrap();

        f.write_at(8, b"page").unwrap();
        assert_eq!(f.size().unwrap(), 12);
        let mut buf = [7u8; 16];
        assert_eq!(f.read_at(0, &mut buf).unwrap(), ReadOutcome::Short(12));
        assert_eq!(&buf[..12], b"\0\0\0\0\0\0\0\0page");
        assert_eq!(&buf[12..], &[0u8; 4]);

        f.truncate(4).unwrap();
        f.flush(Durability::Full).unwrap();
        f.flush(Durability::Data).unwrap();
        assert_eq!(f.size().unwrap(), 4);
        f.close().unwrap();
    }

    #[test]
    fn create_and_exclusive() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::with_base(dir.path());
        let path = dir.path().join("x.db");

        let missing = store.open(&path, OpenFlags::READWRITE).err().unwrap();
        assert_eq!(missing.kind(), io::ErrorKind::NotFound);

        store.open(&path, rw_create() | OpenFlags::EXCLUSIVE).unwrap();
        let again = store
            .open(&path, rw_create() | OpenFlags::EXCLUSIVE)
            .err()
            .unwrap();
        assert_eq!(again.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn access_and_delete() {
        let dir = tempdir().unwrap();
        let store = DiskStorage::with_base(dir.path());
        let path = dir.path().join("a.db");
        assert!(!store.access(&path, AccessMode::Exists).unwrap());

        store.open(&path, rw_create()).unwrap();
        assert!(store.access(&path, AccessMode::Exists).unwrap());
        assert!(store.access(&path, AccessMode::Read).unwrap());

        store.delete(&path).unwrap();
        store.sync_dir(&path).unwrap();
        assert!(!path.exists());
        let err = store.delete(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn canonical_paths_use_captured_base() {
        let store = DiskStorage::with_base("/srv/db/../data");
        assert_eq!(store.base_dir(), Path::new("/srv/data"));
        assert_eq!(
            store.canonicalize(Path::new("main.db")),
            Path::new("/srv/data/main.db")
        );
    }
}
