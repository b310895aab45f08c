use std::ffi::{CString, c_void};
use std::os::raw::{c_char, c_int};
use std::ptr;

use libsqlite3_sys as ffi;

use crate::backing::ReadOutcome;
use crate::lock::LockLevel;
use crate::util::SyncFlags;
use crate::vfs::FileRecord;

use super::rc_of;

/// The engine allocates `szOsFile` bytes per open file and hands them to
/// xOpen; this is their layout.
#[repr(C)]
pub(super) struct RawFile {
    pub(super) base: ffi::sqlite3_file,
    pub(super) record: *mut FileRecord,
}

pub(super) static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(x_close),
    xRead: Some(x_read),
    xWrite: Some(x_write),
    xTruncate: Some(x_truncate),
    xSync: Some(x_sync),
    xFileSize: Some(x_file_size),
    xLock: Some(x_lock),
    xUnlock: Some(x_unlock),
    xCheckReservedLock: Some(x_check_reserved_lock),
    xFileControl: Some(x_file_control),
    xSectorSize: Some(x_sector_size),
    xDeviceCharacteristics: Some(x_device_characteristics),
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};

unsafe fn record_of<'a>(file: *mut ffi::sqlite3_file) -> Option<&'a mut FileRecord> {
    unsafe { (*(file as *mut RawFile)).record.as_mut() }
}

macro_rules! with_record {
    ($file:expr, $rec:ident => $body:expr) => {
        match unsafe { record_of($file) } {
            Some($rec) => $body,
            None => {
                error!("io method called on a file that is not open");
                ffi::SQLITE_MISUSE
            }
        }
    };
}

unsafe extern "C" fn x_close(file: *mut ffi::sqlite3_file) -> c_int {
    let raw = file as *mut RawFile;
    let record = unsafe { std::mem::replace(&mut (*raw).record, ptr::null_mut()) };
    if record.is_null() {
        error!("xClose on a file that is already closed");
        return ffi::SQLITE_MISUSE;
    }
    let mut record = unsafe { Box::from_raw(record) };
    rc_of(record.close())
}

unsafe extern "C" fn x_read(
    file: *mut ffi::sqlite3_file,
    buf: *mut c_void,
    amount: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    if amount < 0 || offset < 0 {
        return ffi::SQLITE_IOERR_READ;
    }
    if amount == 0 {
        return ffi::SQLITE_OK;
    }
    let buf = unsafe { std::slice::from_raw_parts_mut(buf as *mut u8, amount as usize) };
    with_record!(file, rec => match rec.read(offset as u64, buf) {
        Ok(ReadOutcome::Full) => ffi::SQLITE_OK,
        Ok(ReadOutcome::Short(_)) => ffi::SQLITE_IOERR_SHORT_READ,
        Err(e) => e.result_code(),
    })
}

unsafe extern "C" fn x_write(
    file: *mut ffi::sqlite3_file,
    buf: *const c_void,
    amount: c_int,
    offset: ffi::sqlite3_int64,
) -> c_int {
    if amount < 0 || offset < 0 {
        return ffi::SQLITE_IOERR_WRITE;
    }
    if amount == 0 {
        return ffi::SQLITE_OK;
    }
    let data = unsafe { std::slice::from_raw_parts(buf as *const u8, amount as usize) };
    with_record!(file, rec => rc_of(rec.write(offset as u64, data)))
}

unsafe extern "C" fn x_truncate(file: *mut ffi::sqlite3_file, size: ffi::sqlite3_int64) -> c_int {
    if size < 0 {
        return ffi::SQLITE_IOERR_TRUNCATE;
    }
    with_record!(file, rec => rc_of(rec.truncate(size as u64)))
}

unsafe extern "C" fn x_sync(file: *mut ffi::sqlite3_file, flags: c_int) -> c_int {
    let durability = SyncFlags::from_raw(flags).durability();
    with_record!(file, rec => rc_of(rec.sync(durability)))
}

unsafe extern "C" fn x_file_size(
    file: *mut ffi::sqlite3_file,
    size_out: *mut ffi::sqlite3_int64,
) -> c_int {
    with_record!(file, rec => match rec.size() {
        Ok(size) => {
            unsafe { *size_out = size as ffi::sqlite3_int64 };
            ffi::SQLITE_OK
        }
        Err(e) => e.result_code(),
    })
}

unsafe extern "C" fn x_lock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let Some(level) = LockLevel::from_raw(level) else {
        return ffi::SQLITE_MISUSE;
    };
    with_record!(file, rec => rc_of(rec.lock(level)))
}

unsafe extern "C" fn x_unlock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let Some(level) = LockLevel::from_raw(level) else {
        return ffi::SQLITE_MISUSE;
    };
    with_record!(file, rec => rc_of(rec.unlock(level)))
}

unsafe extern "C" fn x_check_reserved_lock(
    file: *mut ffi::sqlite3_file,
    res_out: *mut c_int,
) -> c_int {
    with_record!(file, rec => match rec.check_reserved_lock() {
        Ok(held) => {
            unsafe { *res_out = held as c_int };
            ffi::SQLITE_OK
        }
        Err(e) => e.result_code(),
    })
}

unsafe extern "C" fn x_file_control(
    file: *mut ffi::sqlite3_file,
    op: c_int,
    arg: *mut c_void,
) -> c_int {
    with_record!(file, rec => match op {
        ffi::SQLITE_FCNTL_LOCKSTATE => {
            unsafe { *(arg as *mut c_int) = rec.lock_level().as_raw() };
            ffi::SQLITE_OK
        }
        ffi::SQLITE_FCNTL_LAST_ERRNO => {
            unsafe { *(arg as *mut c_int) = rec.last_error() };
            ffi::SQLITE_OK
        }
        ffi::SQLITE_FCNTL_HAS_MOVED => match rec.has_moved() {
            Ok(moved) => {
                unsafe { *(arg as *mut c_int) = moved as c_int };
                ffi::SQLITE_OK
            }
            Err(e) => e.result_code(),
        },
        ffi::SQLITE_FCNTL_VFSNAME => {
            let Ok(name) = CString::new(rec.vfs_name()) else {
                return ffi::SQLITE_NOTFOUND;
            };
            // The engine frees this with sqlite3_free.
            let copy = unsafe { ffi::sqlite3_mprintf(c"%s".as_ptr(), name.as_ptr()) };
            unsafe { *(arg as *mut *mut c_char) = copy };
            ffi::SQLITE_OK
        }
        _ => ffi::SQLITE_NOTFOUND,
    })
}

unsafe extern "C" fn x_sector_size(file: *mut ffi::sqlite3_file) -> c_int {
    match unsafe { record_of(file) } {
        Some(rec) => rec.sector_size() as c_int,
        None => crate::config::DEFAULT_SECTOR_SIZE as c_int,
    }
}

unsafe extern "C" fn x_device_characteristics(file: *mut ffi::sqlite3_file) -> c_int {
    match unsafe { record_of(file) } {
        Some(rec) => rec.device_characteristics().as_raw(),
        None => 0,
    }
}
