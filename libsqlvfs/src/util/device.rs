use std::os::raw::c_int;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::backing::Durability;

bitflags! {
    /// Guarantees the underlying medium offers, reported to the host so it
    /// can skip journaling work that the medium makes redundant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DeviceCharacteristics: u32 {
        const ATOMIC = 0x0000_0001;
        const ATOMIC512 = 0x0000_0002;
        const ATOMIC1K = 0x0000_0004;
        const ATOMIC2K = 0x0000_0008;
        const ATOMIC4K = 0x0000_0010;
        const ATOMIC8K = 0x0000_0020;
        const ATOMIC16K = 0x0000_0040;
        const ATOMIC32K = 0x0000_0080;
        const ATOMIC64K = 0x0000_0100;
        /// Appended data is never observed as garbage after a crash.
        const SAFE_APPEND = 0x0000_0200;
        const SEQUENTIAL = 0x0000_0400;
        const UNDELETABLE_WHEN_OPEN = 0x0000_0800;
        /// A torn write never corrupts bytes outside the written range.
        const POWERSAFE_OVERWRITE = 0x0000_1000;
        const IMMUTABLE = 0x0000_2000;
        const BATCH_ATOMIC = 0x0000_4000;
    }
}

impl Default for DeviceCharacteristics {
    fn default() -> Self {
        DeviceCharacteristics::SAFE_APPEND | DeviceCharacteristics::POWERSAFE_OVERWRITE
    }
}

impl DeviceCharacteristics {
    pub fn as_raw(&self) -> c_int {
        self.bits() as c_int
    }
}

bitflags! {
    /// Flags passed with a sync request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncFlags: u32 {
        const NORMAL = 0x0000_0002;
        const FULL = 0x0000_0003;
        const DATAONLY = 0x0000_0010;
    }
}

impl SyncFlags {
    pub fn from_raw(raw: c_int) -> Self {
        SyncFlags::from_bits_retain(raw as u32)
    }

    pub fn durability(&self) -> Durability {
        if self.contains(SyncFlags::DATAONLY) {
            Durability::Data
        } else {
            Durability::Full
        }
    }
}
