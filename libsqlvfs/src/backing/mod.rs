//! Storage media behind the adapter.
//!
//! Responsibilities:
//! - [`BackingFile`]: positional I/O on one opened file.
//! - [`Storage`]: the namespace a [`BackingFile`] lives in (open, delete,
//!   directory sync, access checks, path resolution) and the source of the cross-process
//!   lock primitive for each path.

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::lock::LockPrimitive;
use crate::util::{AccessMode, OpenFlags};

pub mod disk;
pub mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// Result of a positional read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Every requested byte came from the file.
    Full,
    /// Only the first `n` bytes existed; the rest of the buffer was zeroed.
    Short(usize),
}

/// How much of a file a flush must make durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// File contents only.
    Data,
    /// Contents and metadata.
    Full,
}

pub trait BackingFile: Send {
    /// Reads `buf.len()` bytes at `offset`. Bytes past end of file are zeroed.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<ReadOutcome>;

    /// Writes all of `data` at `offset`, extending the file if needed. A gap
    /// between the old end of file and `offset` reads back as zeroes.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    fn truncate(&mut self, size: u64) -> io::Result<()>;

    fn flush(&mut self, durability: Durability) -> io::Result<()>;

    fn size(&self) -> io::Result<u64>;

    fn close(self: Box<Self>) -> io::Result<()>;
}

pub trait Storage: Send + Sync {
    fn open(&self, path: &Path, flags: OpenFlags) -> io::Result<Box<dyn BackingFile>>;

    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Makes changes to the directory holding `path` (a removal, say) durable.
    fn sync_dir(&self, path: &Path) -> io::Result<()>;

    fn access(&self, path: &Path, mode: AccessMode) -> io::Result<bool>;

    /// Absolute, normalized form of `path`. Pure: the same input always
    /// yields the same output.
    fn canonicalize(&self, path: &Path) -> PathBuf;

    /// Lock primitive for an already opened `path`, distinct from every other
    /// primitive handed out for it.
    fn lock_primitive(&self, path: &Path) -> io::Result<Box<dyn LockPrimitive>>;
}

/// Zeroes the tail of `buf` after a read that returned `n` bytes.
pub(crate) fn finish_read(buf: &mut [u8], n: usize) -> ReadOutcome {
    if n >= buf.len() {
        ReadOutcome::Full
    } else {
        buf[n..].fill(0);
        ReadOutcome::Short(n)
    }
}

/// Joins `path` onto `base` when relative, then folds `.` and `..` without
/// touching the filesystem.
pub(crate) fn normalize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut out = PathBuf::from("/");
    for comp in joined.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}
