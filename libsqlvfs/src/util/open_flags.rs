use std::os::raw::c_int;

use bitflags::bitflags;

// Open flags as passed by the host engine to xOpen.
const OPEN_READONLY: u32 = 0x0000_0001;
const OPEN_READWRITE: u32 = 0x0000_0002;
const OPEN_CREATE: u32 = 0x0000_0004;
const OPEN_DELETEONCLOSE: u32 = 0x0000_0008;
const OPEN_EXCLUSIVE: u32 = 0x0000_0010;
const OPEN_MAIN_DB: u32 = 0x0000_0100;
const OPEN_TEMP_DB: u32 = 0x0000_0200;
const OPEN_TRANSIENT_DB: u32 = 0x0000_0400;
const OPEN_MAIN_JOURNAL: u32 = 0x0000_0800;
const OPEN_TEMP_JOURNAL: u32 = 0x0000_1000;
const OPEN_SUBJOURNAL: u32 = 0x0000_2000;
const OPEN_SUPER_JOURNAL: u32 = 0x0000_4000;
const OPEN_WAL: u32 = 0x0008_0000;

bitflags! {
    /// Flags describing how a file is to be opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READONLY = OPEN_READONLY;
        const READWRITE = OPEN_READWRITE;
        /// Create the file if it does not exist.
        const CREATE = OPEN_CREATE;
        /// Remove the file when its last record is closed.
        const DELETEONCLOSE = OPEN_DELETEONCLOSE;
        /// Fail if the file already exists.
        const EXCLUSIVE = OPEN_EXCLUSIVE;
        const MAIN_DB = OPEN_MAIN_DB;
        const TEMP_DB = OPEN_TEMP_DB;
        const TRANSIENT_DB = OPEN_TRANSIENT_DB;
        const MAIN_JOURNAL = OPEN_MAIN_JOURNAL;
        const TEMP_JOURNAL = OPEN_TEMP_JOURNAL;
        const SUBJOURNAL = OPEN_SUBJOURNAL;
        const SUPER_JOURNAL = OPEN_SUPER_JOURNAL;
        const WAL = OPEN_WAL;
    }
}

impl OpenFlags {
    /// Host flags, keeping bits this crate does not name.
    pub fn from_raw(flags: c_int) -> Self {
        OpenFlags::from_bits_retain(flags as u32)
    }

    pub fn as_raw(&self) -> c_int {
        self.bits() as c_int
    }

    pub fn is_writable(&self) -> bool {
        self.contains(OpenFlags::READWRITE) && !self.contains(OpenFlags::READONLY)
    }

    /// The same request downgraded to read-only access.
    pub fn read_only(self) -> Self {
        let dropped = OpenFlags::READWRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE;
        (self - dropped) | OpenFlags::READONLY
    }

    pub fn kind(&self) -> FileKind {
        if self.contains(OpenFlags::MAIN_DB) {
            FileKind::MainDb
        } else if self.contains(OpenFlags::MAIN_JOURNAL) {
            FileKind::MainJournal
        } else if self.contains(OpenFlags::WAL) {
            FileKind::Wal
        } else if self.intersects(OpenFlags::TEMP_DB | OpenFlags::TRANSIENT_DB) {
            FileKind::TempDb
        } else if self.intersects(OpenFlags::TEMP_JOURNAL | OpenFlags::SUBJOURNAL) {
            FileKind::TempJournal
        } else if self.contains(OpenFlags::SUPER_JOURNAL) {
            FileKind::SuperJournal
        } else {
            FileKind::Other
        }
    }
}

/// The role the host assigns to an opened file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    MainDb,
    MainJournal,
    TempDb,
    TempJournal,
    SuperJournal,
    Wal,
    Other,
}

/// What an access check asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Exists,
    ReadWrite,
    Read,
}

impl AccessMode {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            0 => Some(AccessMode::Exists),
            1 => Some(AccessMode::ReadWrite),
            2 => Some(AccessMode::Read),
            _ => None,
        }
    }
}
