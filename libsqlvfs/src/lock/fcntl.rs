//! Open file description locks (`F_OFD_SETLK`).
//!
//! Unlike classic POSIX record locks, OFD locks belong to the descriptor,
//! not the process: closing some other descriptor of the same file does not
//! drop them, and two descriptors in one process conflict with each other.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, fcntl};

use super::{LockMode, LockPrimitive, LockSlot};

pub struct OfdLock {
    file: File,
}

impl OfdLock {
    /// Opens a descriptor dedicated to locking `path`. Falls back to a
    /// read-only descriptor when the file is not writable, in which case
    /// write locks fail with `EBADF`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => File::open(path)?,
            Err(e) => return Err(e),
        };
        Ok(OfdLock { file })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

fn flock(slot: LockSlot, l_type: libc::c_short) -> libc::flock {
    let (start, len) = slot.range();
    // SAFETY: flock is plain old data; all-zero is a valid value.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = l_type;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = start as libc::off_t;
    fl.l_len = len as libc::off_t;
    // OFD requests require l_pid == 0.
    fl.l_pid = 0;
    fl
}

impl LockPrimitive for OfdLock {
    fn try_lock(&mut self, slot: LockSlot, mode: LockMode) -> io::Result<bool> {
        let l_type = match mode {
            LockMode::Read => libc::F_RDLCK,
            LockMode::Write => libc::F_WRLCK,
        };
        let fl = flock(slot, l_type as libc::c_short);
        match fcntl(self.fd(), FcntlArg::F_OFD_SETLK(&fl)) {
            Ok(_) => Ok(true),
            Err(Errno::EAGAIN | Errno::EACCES) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn unlock(&mut self, slot: LockSlot) -> io::Result<()> {
        let fl = flock(slot, libc::F_UNLCK as libc::c_short);
        fcntl(self.fd(), FcntlArg::F_OFD_SETLK(&fl))?;
        Ok(())
    }

    fn is_held_by_other(&mut self, slot: LockSlot) -> io::Result<bool> {
        let mut fl = flock(slot, libc::F_WRLCK as libc::c_short);
        fcntl(self.fd(), FcntlArg::F_OFD_GETLK(&mut fl))?;
        Ok(fl.l_type != libc::F_UNLCK as libc::c_short)
    }
}
