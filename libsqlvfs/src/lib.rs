//! A SQLite VFS with a five-level file lock protocol.
//!
//! [`Vfs`] implements the adapter over a pluggable [`backing::Storage`]
//! (local disk or process memory). [`capi`] turns one into a `sqlite3_vfs`
//! the engine can register.

#[macro_use]
extern crate log;

pub mod backing;
pub mod capi;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod lock;
pub mod util;
pub mod vfs;

pub use backing::{BackingFile, DiskStorage, Durability, MemoryStorage, ReadOutcome, Storage};
pub use config::VfsConfig;
pub use diagnostics::init_diagnostics;
pub use error::{ProtocolViolation, Result, VfsError};
pub use lock::LockLevel;
pub use util::{AccessMode, DeviceCharacteristics, OpenFlags};
pub use vfs::{FileRecord, Vfs};
