//! Per-path lock coalescing inside one adapter.
//!
//! The cross-process primitive only knows one owner per path per adapter,
//! while the host may open the same path several times. [`PathLock`] tracks
//! the strongest level any record holds and how many records hold SHARED or
//! more, and only talks to the primitive when that aggregate changes.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    Acquire, LockLevel, LockMode, LockPrimitive, LockSlot, check_acquire, check_release,
};
use crate::error::{IoOp, Result, VfsError};

struct PathState {
    /// Strongest level held by any record of this adapter.
    level: LockLevel,
    /// Records holding SHARED or more.
    shared_holders: usize,
    /// Records attached to this path, locked or not.
    records: usize,
    primitive: Box<dyn LockPrimitive>,
}

pub struct PathLock {
    path: PathBuf,
    state: Mutex<PathState>,
}

impl PathLock {
    fn state(&self) -> MutexGuard<'_, PathState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn level(&self) -> LockLevel {
        self.state().level
    }

    /// Raises `held` towards `target`.
    ///
    /// On success `held == target`. On [`VfsError::Busy`] an EXCLUSIVE request
    /// may have advanced `held` part of the way, typically to PENDING while
    /// readers drain; the caller retries EXCLUSIVE from there.
    pub fn acquire(&self, held: &mut LockLevel, target: LockLevel) -> Result<()> {
        if check_acquire(*held, target)? == Acquire::Noop {
            return Ok(());
        }
        let mut st = self.state();
        let lock_err = |e: io::Error| VfsError::io(IoOp::Lock, e);

        // Another record of this adapter holds a level we would conflict with.
        if *held != st.level && (st.level >= LockLevel::Pending || target > LockLevel::Shared) {
            return Err(VfsError::Busy);
        }

        if target == LockLevel::Shared {
            // A pending writer elsewhere holds the pending byte for write.
            if !st.primitive.try_lock(LockSlot::Pending, LockMode::Read).map_err(lock_err)? {
                return Err(VfsError::Busy);
            }
            if matches!(st.level, LockLevel::Shared | LockLevel::Reserved) {
                st.primitive
                    .unlock(LockSlot::Pending)
                    .map_err(|e| VfsError::io(IoOp::Unlock, e))?;
                st.shared_holders += 1;
                *held = LockLevel::Shared;
                return Ok(());
            }
            let granted = st.primitive.try_lock(LockSlot::Shared, LockMode::Read);
            let released = st.primitive.unlock(LockSlot::Pending);
            if !granted.map_err(lock_err)? {
                return Err(VfsError::Busy);
            }
            released.map_err(|e| VfsError::io(IoOp::Unlock, e))?;
            st.shared_holders += 1;
            st.level = LockLevel::Shared;
            *held = LockLevel::Shared;
            return Ok(());
        }

        // Every level above SHARED owns the reserved byte, so probing it
        // answers "is anyone at RESERVED or more".
        if *held < LockLevel::Reserved {
            if !st.primitive.try_lock(LockSlot::Reserved, LockMode::Write).map_err(lock_err)? {
                return Err(VfsError::Busy);
            }
            *held = LockLevel::Reserved;
            st.level = LockLevel::Reserved;
        }
        if target == LockLevel::Reserved {
            return Ok(());
        }

        if *held < LockLevel::Pending {
            if !st.primitive.try_lock(LockSlot::Pending, LockMode::Write).map_err(lock_err)? {
                return Err(VfsError::Busy);
            }
            *held = LockLevel::Pending;
            st.level = LockLevel::Pending;
        }
        if target == LockLevel::Pending {
            return Ok(());
        }

        // Other records of this adapter still read.
        if st.shared_holders > 1 {
            return Err(VfsError::Busy);
        }
        if !st.primitive.try_lock(LockSlot::Shared, LockMode::Write).map_err(lock_err)? {
            return Err(VfsError::Busy);
        }
        *held = LockLevel::Exclusive;
        st.level = LockLevel::Exclusive;
        Ok(())
    }

    /// Lowers `held` to `target` (SHARED or UNLOCKED).
    ///
    /// The bookkeeping is updated even when the primitive reports an error,
    /// and the first such error is returned.
    pub fn release(&self, held: &mut LockLevel, target: LockLevel) -> Result<()> {
        if !check_release(*held, target)? {
            return Ok(());
        }
        let mut st = self.state();
        let mut first_err: Option<io::Error> = None;
        let mut note = |r: io::Result<()>| {
            if let Err(e) = r {
                first_err.get_or_insert(e);
            }
        };

        if *held > LockLevel::Shared {
            if *held == LockLevel::Exclusive && target == LockLevel::Shared {
                // Downgrade in place; there is no window without a read lock.
                note(
                    st.primitive
                        .try_lock(LockSlot::Shared, LockMode::Read)
                        .map(|_| ()),
                );
            }
            note(st.primitive.unlock(LockSlot::Pending));
            note(st.primitive.unlock(LockSlot::Reserved));
            st.level = LockLevel::Shared;
        }

        if target == LockLevel::Unlocked {
            st.shared_holders = st.shared_holders.saturating_sub(1);
            if st.shared_holders == 0 {
                note(st.primitive.unlock(LockSlot::Shared));
                st.level = LockLevel::Unlocked;
            }
        }
        *held = target;

        match first_err {
            Some(e) => Err(VfsError::io(IoOp::Unlock, e)),
            None => Ok(()),
        }
    }

    /// Whether a record other than the caller, in this adapter or in another
    /// process, holds RESERVED or more.
    pub fn reserved_held_elsewhere(&self, held: LockLevel) -> Result<bool> {
        let mut st = self.state();
        if st.level > LockLevel::Shared && held <= LockLevel::Shared {
            return Ok(true);
        }
        st.primitive
            .is_held_by_other(LockSlot::Reserved)
            .map_err(|e| VfsError::io(IoOp::CheckReservedLock, e))
    }
}

/// Every path this adapter has open, with its coalesced lock state.
#[derive(Default)]
pub struct LockTable {
    paths: Mutex<HashMap<PathBuf, Arc<PathLock>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn paths(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<PathLock>>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers one more record on `path`. `primitive` is only called when
    /// the path is not open yet.
    pub fn attach(
        &self,
        path: &Path,
        primitive: impl FnOnce() -> io::Result<Box<dyn LockPrimitive>>,
    ) -> io::Result<Arc<PathLock>> {
        let mut paths = self.paths();
        if let Some(lock) = paths.get(path) {
            lock.state().records += 1;
            return Ok(lock.clone());
        }
        let lock = Arc::new(PathLock {
            path: path.to_path_buf(),
            state: Mutex::new(PathState {
                level: LockLevel::Unlocked,
                shared_holders: 0,
                records: 1,
                primitive: primitive()?,
            }),
        });
        paths.insert(path.to_path_buf(), lock.clone());
        Ok(lock)
    }

    /// Drops one record from `lock`'s path, forgetting the path (and its
    /// primitive) with the last one.
    pub fn detach(&self, lock: &Arc<PathLock>) {
        let mut paths = self.paths();
        let mut st = lock.state();
        st.records = st.records.saturating_sub(1);
        if st.records == 0 {
            if let Some(current) = paths.get(&lock.path) {
                if Arc::ptr_eq(current, lock) {
                    paths.remove(&lock.path);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.paths().len()
    }
}
