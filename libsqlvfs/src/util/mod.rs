pub mod device;
pub mod open_flags;

pub use device::{DeviceCharacteristics, SyncFlags};
pub use open_flags::{AccessMode, FileKind, OpenFlags};
