//! The five-level file lock protocol.
//!
//! A record moves `UNLOCKED -> SHARED -> RESERVED -> PENDING -> EXCLUSIVE`
//! one step at a time and falls back to `SHARED` or `UNLOCKED` on release.
//! Levels are coalesced per path inside one adapter and made
//! visible to other processes through a [`LockPrimitive`].

use std::io;
use std::os::raw::c_int;

use crate::error::ProtocolViolation;

pub mod fcntl;
pub mod memory;
mod table;

pub(crate) use table::{LockTable, PathLock};

/// Lock level of one open file record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockLevel {
    #[default]
    Unlocked = 0,
    /// Reading is allowed; any number of holders.
    Shared = 1,
    /// Intends to write; at most one holder, coexists with SHARED.
    Reserved = 2,
    /// Waiting for readers to drain; no new SHARED may be granted.
    Pending = 3,
    /// Sole access.
    Exclusive = 4,
}

impl LockLevel {
    pub const ALL: [LockLevel; 5] = [
        LockLevel::Unlocked,
        LockLevel::Shared,
        LockLevel::Reserved,
        LockLevel::Pending,
        LockLevel::Exclusive,
    ];

    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            0 => Some(LockLevel::Unlocked),
            1 => Some(LockLevel::Shared),
            2 => Some(LockLevel::Reserved),
            3 => Some(LockLevel::Pending),
            4 => Some(LockLevel::Exclusive),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> c_int {
        *self as c_int
    }

    /// Whether a holder at `self` and a holder at `other`, in different
    /// processes, may exist at the same time.
    pub fn compatible_with(&self, other: LockLevel) -> bool {
        use LockLevel::*;
        match (*self, other) {
            (Unlocked, _) | (_, Unlocked) => true,
            (Exclusive, _) | (_, Exclusive) => false,
            (Shared, _) | (_, Shared) => true,
            _ => false,
        }
    }
}

/// What a lock request has to do to move from `from` to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Already at or above the target.
    Noop,
    /// Take the next level.
    Step,
}

/// Validates a lock request.
///
/// Targets at or below the current level are no-ops. Otherwise the request
/// must be one legal step up, except that EXCLUSIVE may be requested from
/// SHARED or RESERVED, in which case it passes through PENDING.
pub fn check_acquire(from: LockLevel, to: LockLevel) -> Result<Acquire, ProtocolViolation> {
    use LockLevel::*;
    if to <= from {
        return Ok(Acquire::Noop);
    }
    match (from, to) {
        (Unlocked, Shared)
        | (Shared, Reserved)
        | (Reserved, Pending)
        | (Pending, Exclusive)
        | (Shared, Exclusive)
        | (Reserved, Exclusive) => Ok(Acquire::Step),
        _ => Err(ProtocolViolation::IllegalLock { from, to }),
    }
}

/// Validates an unlock request. Returns false when there is nothing to do.
pub fn check_release(from: LockLevel, to: LockLevel) -> Result<bool, ProtocolViolation> {
    if !matches!(to, LockLevel::Unlocked | LockLevel::Shared) {
        return Err(ProtocolViolation::IllegalUnlock(to));
    }
    Ok(to < from)
}

/// Regions of a file the lock protocol claims.
///
/// Offsets match the host engine's native layout so that processes using the
/// stock engine and processes using this adapter exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockSlot {
    Pending,
    Reserved,
    Shared,
}

pub const PENDING_BYTE: u64 = 0x4000_0000;
pub const RESERVED_BYTE: u64 = PENDING_BYTE + 1;
pub const SHARED_FIRST: u64 = PENDING_BYTE + 2;
pub const SHARED_SIZE: u64 = 510;

impl LockSlot {
    /// `(offset, len)` of the slot's byte range.
    pub fn range(&self) -> (u64, u64) {
        match self {
            LockSlot::Pending => (PENDING_BYTE, 1),
            LockSlot::Reserved => (RESERVED_BYTE, 1),
            LockSlot::Shared => (SHARED_FIRST, SHARED_SIZE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// Cross-process lock token for one path, owned by one adapter.
///
/// Implementations never block: a conflicting request returns `Ok(false)`.
/// Requests from the same primitive replace each other (a write request on a
/// slot held for read upgrades it). Dropping the primitive releases
/// everything it holds.
pub trait LockPrimitive: Send {
    fn try_lock(&mut self, slot: LockSlot, mode: LockMode) -> io::Result<bool>;

    fn unlock(&mut self, slot: LockSlot) -> io::Result<()>;

    /// Whether a different owner holds any lock on `slot`.
    fn is_held_by_other(&mut self, slot: LockSlot) -> io::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::LockLevel::*;
    use super::*;

    #[test]
    fn legal_steps() {
        for (from, to) in [
            (Unlocked, Shared),
            (Shared, Reserved),
            (Reserved, Pending),
            (Pending, Exclusive),
            (Shared, Exclusive),
            (Reserved, Exclusive),
        ] {
            assert_eq!(check_acquire(from, to), Ok(Acquire::Step), "{from:?}->{to:?}");
        }
    }

    #[test]
    fn illegal_steps() {
        for (from, to) in [
            (Unlocked, Reserved),
            (Unlocked, Pending),
            (Unlocked, Exclusive),
            (Shared, Pending),
        ] {
            assert_eq!(
                check_acquire(from, to),
                Err(ProtocolViolation::IllegalLock { from, to })
            );
        }
    }

    #[test]
    fn requests_at_or_below_are_noops() {
        for from in LockLevel::ALL {
            for to in LockLevel::ALL.into_iter().filter(|to| *to <= from) {
                assert_eq!(check_acquire(from, to), Ok(Acquire::Noop));
            }
        }
    }

    #[test]
    fn release_targets() {
        assert_eq!(check_release(Exclusive, Shared), Ok(true));
        assert_eq!(check_release(Shared, Unlocked), Ok(true));
        assert_eq!(check_release(Shared, Shared), Ok(false));
        assert_eq!(check_release(Unlocked, Unlocked), Ok(false));
        assert_eq!(
            check_release(Exclusive, Reserved),
            Err(ProtocolViolation::IllegalUnlock(Reserved))
        );
    }

    #[test]
    fn compatibility_matrix() {
        assert!(Shared.compatible_with(Shared));
        assert!(Shared.compatible_with(Reserved));
        assert!(Shared.compatible_with(Pending));
        assert!(!Reserved.compatible_with(Reserved));
        assert!(!Reserved.compatible_with(Pending));
        assert!(!Pending.compatible_with(Pending));
        for l in LockLevel::ALL {
            assert!(Unlocked.compatible_with(l));
            if l != Unlocked {
                assert!(!Exclusive.compatible_with(l));
            }
        }
    }

    #[test]
    fn raw_round_trip() {
        for l in LockLevel::ALL {
            assert_eq!(LockLevel::from_raw(l.as_raw()), Some(l));
        }
        assert_eq!(LockLevel::from_raw(9), None);
    }
}
