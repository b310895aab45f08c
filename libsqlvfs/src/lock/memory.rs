use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::{LockMode, LockPrimitive, LockSlot};

type Holders = HashMap<Uuid, LockMode>;

/// Lock state shared by every [`MemoryLock`] created from one registry.
#[derive(Clone, Default)]
pub struct MemoryLockRegistry {
    paths: Arc<Mutex<HashMap<PathBuf, HashMap<LockSlot, Holders>>>>,
}

impl MemoryLockRegistry {
    fn paths(&self) -> MutexGuard<'_, HashMap<PathBuf, HashMap<LockSlot, Holders>>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A new owner for `path`.
    pub fn primitive(&self, path: &Path) -> MemoryLock {
        MemoryLock {
            registry: self.clone(),
            path: path.to_path_buf(),
            owner: Uuid::new_v4(),
        }
    }
}

pub struct MemoryLock {
    registry: MemoryLockRegistry,
    path: PathBuf,
    owner: Uuid,
}

impl LockPrimitive for MemoryLock {
    fn try_lock(&mut self, slot: LockSlot, mode: LockMode) -> io::Result<bool> {
        let mut paths = self.registry.paths();
        let holders = paths
            .entry(self.path.clone())
            .or_default()
            .entry(slot)
            .or_default();
        let mut others = holders.iter().filter(|(owner, _)| **owner != self.owner);
        let conflict = match mode {
            LockMode::Read => others.any(|(_, m)| *m == LockMode::Write),
            LockMode::Write => others.next().is_some(),
        };
        if conflict {
            return Ok(false);
        }
        holders.insert(self.owner, mode);
        Ok(true)
    }

    fn unlock(&mut self, slot: LockSlot) -> io::Result<()> {
        let mut paths = self.registry.paths();
        if let Some(slots) = paths.get_mut(&self.path) {
            if let Some(holders) = slots.get_mut(&slot) {
                holders.remove(&self.owner);
            }
        }
        Ok(())
    }

    fn is_held_by_other(&mut self, slot: LockSlot) -> io::Result<bool> {
        let paths = self.registry.paths();
        Ok(paths
            .get(&self.path)
            .and_then(|slots| slots.get(&slot))
            .is_some_and(|holders| holders.keys().any(|owner| *owner != self.owner)))
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        let mut paths = self.registry.paths();
        if let Some(slots) = paths.get_mut(&self.path) {
            for holders in slots.values_mut() {
                holders.remove(&self.owner);
            }
            slots.retain(|_, holders| !holders.is_empty());
            if slots.is_empty() {
                paths.remove(&self.path);
            }
        }
    }
}
