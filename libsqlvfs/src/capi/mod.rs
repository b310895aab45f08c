//! The boundary the SQLite engine talks to.
//!
//! Everything here translates between raw `sqlite3_vfs` / `sqlite3_file`
//! calls and [`Vfs`] / [`FileRecord`]; no lock or I/O logic lives here.

use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::ptr;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use libsqlite3_sys as ffi;
use rand::RngCore;

use crate::config::VfsConfig;
use crate::diagnostics::init_diagnostics;
use crate::error::{Result, VfsError};
use crate::util::{AccessMode, OpenFlags};
use crate::vfs::{FileRecord, Vfs};

mod io;

use io::RawFile;

/// A `sqlite3_vfs` together with what its pointers refer to. Never freed:
/// the engine keeps registered VFS pointers for the life of the process.
#[repr(C)]
struct Registration {
    base: ffi::sqlite3_vfs,
    name: CString,
    vfs: Vfs,
}

/// Julian day number of the Unix epoch, in milliseconds.
const JULIAN_UNIX_EPOCH_MS: i64 = 24_405_875 * 8_640_000;

/// Builds a process-lifetime `sqlite3_vfs` for `vfs` without registering it.
pub fn into_raw_vfs(vfs: Vfs) -> Result<*mut ffi::sqlite3_vfs> {
    let name = CString::new(vfs.name())
        .map_err(|_| VfsError::InvalidConfig(format!("vfs name {:?} contains NUL", vfs.name())))?;
    let max_pathname = c_int::try_from(vfs.max_pathname())
        .map_err(|_| VfsError::InvalidConfig("max pathname out of range".into()))?;

    let reg = Box::leak(Box::new(Registration {
        base: ffi::sqlite3_vfs {
            iVersion: 2,
            szOsFile: std::mem::size_of::<RawFile>() as c_int,
            mxPathname: max_pathname,
            pNext: ptr::null_mut(),
            zName: ptr::null(),
            pAppData: ptr::null_mut(),
            xOpen: Some(x_open),
            xDelete: Some(x_delete),
            xAccess: Some(x_access),
            xFullPathname: Some(x_full_pathname),
            xDlOpen: Some(x_dlopen),
            xDlError: Some(x_dlerror),
            xDlSym: Some(x_dlsym),
            xDlClose: Some(x_dlclose),
            xRandomness: Some(x_randomness),
            xSleep: Some(x_sleep),
            xCurrentTime: Some(x_current_time),
            xGetLastError: Some(x_get_last_error),
            xCurrentTimeInt64: Some(x_current_time_int64),
            xSetSystemCall: None,
            xGetSystemCall: None,
            xNextSystemCall: None,
        },
        name,
        vfs,
    }));
    reg.base.zName = reg.name.as_ptr();
    reg.base.pAppData = reg as *mut Registration as *mut c_void;
    Ok(&mut reg.base)
}

/// Registers `vfs` with the engine under its configured name.
pub fn register(vfs: Vfs, make_default: bool) -> Result<()> {
    let name = vfs.name().to_string();
    let raw = into_raw_vfs(vfs)?;
    let rc = unsafe { ffi::sqlite3_vfs_register(raw, make_default as c_int) };
    if rc != ffi::SQLITE_OK {
        return Err(VfsError::Registration(rc));
    }
    info!("registered vfs {name:?} (default: {make_default})");
    Ok(())
}

/// Creates a disk-backed adapter configured from `SQLVFS_CONFIG`.
///
/// Returns NULL on failure; the cause is logged.
#[unsafe(no_mangle)]
pub extern "C" fn sqlvfs_create() -> *mut ffi::sqlite3_vfs {
    let created = VfsConfig::from_env()
        .and_then(Vfs::disk)
        .and_then(into_raw_vfs);
    match created {
        Ok(raw) => raw,
        Err(e) => {
            error!("sqlvfs_create: {e}");
            ptr::null_mut()
        }
    }
}

/// Installs the process logger. Safe to call any number of times.
#[unsafe(no_mangle)]
pub extern "C" fn sqlvfs_init_log() {
    init_diagnostics();
}

unsafe fn vfs_of<'a>(raw: *mut ffi::sqlite3_vfs) -> &'a Vfs {
    unsafe { &(*((*raw).pAppData as *const Registration)).vfs }
}

unsafe fn path_of<'a>(name: *const c_char) -> std::result::Result<&'a Path, c_int> {
    if name.is_null() {
        return Err(ffi::SQLITE_MISUSE);
    }
    let name = unsafe { CStr::from_ptr(name) };
    match name.to_str() {
        Ok(s) => Ok(Path::new(s)),
        Err(_) => {
            let err = VfsError::InvalidPath(name.to_string_lossy().into_owned());
            warn!("{err}");
            Err(err.result_code())
        }
    }
}

fn rc_of(res: Result<()>) -> c_int {
    match res {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => e.result_code(),
    }
}

/// Copies `msg` into a C buffer of `n` bytes, truncating and terminating it.
unsafe fn write_c_str(out: *mut c_char, n: c_int, msg: &str) {
    if out.is_null() || n <= 0 {
        return;
    }
    let len = msg.len().min(n as usize - 1);
    unsafe {
        ptr::copy_nonoverlapping(msg.as_ptr(), out as *mut u8, len);
        *out.add(len) = 0;
    }
}

unsafe extern "C" fn x_open(
    raw: *mut ffi::sqlite3_vfs,
    name: ffi::sqlite3_filename,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    out_flags: *mut c_int,
) -> c_int {
    let file = file as *mut RawFile;
    // The engine calls xClose only if pMethods is set.
    unsafe {
        (*file).base.pMethods = ptr::null();
        (*file).record = ptr::null_mut();
    }
    let vfs = unsafe { vfs_of(raw) };
    let path = if name.is_null() {
        None
    } else {
        match unsafe { path_of(name) } {
            Ok(p) => Some(p),
            Err(rc) => return rc,
        }
    };
    let record: FileRecord = match vfs.open(path, OpenFlags::from_raw(flags)) {
        Ok(r) => r,
        Err(e) => return e.result_code(),
    };
    unsafe {
        if !out_flags.is_null() {
            *out_flags = record.flags().as_raw();
        }
        (*file).record = Box::into_raw(Box::new(record));
        (*file).base.pMethods = &io::IO_METHODS;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_delete(
    raw: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    sync_dir: c_int,
) -> c_int {
    let vfs = unsafe { vfs_of(raw) };
    let path = match unsafe { path_of(name) } {
        Ok(p) => p,
        Err(rc) => return rc,
    };
    match vfs.delete(path, sync_dir != 0) {
        Ok(()) => ffi::SQLITE_OK,
        Err(VfsError::NotFound(_)) => ffi::SQLITE_IOERR_DELETE_NOENT,
        Err(e) => e.result_code(),
    }
}

unsafe extern "C" fn x_access(
    raw: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    flags: c_int,
    res_out: *mut c_int,
) -> c_int {
    let vfs = unsafe { vfs_of(raw) };
    let path = match unsafe { path_of(name) } {
        Ok(p) => p,
        Err(rc) => return rc,
    };
    let Some(mode) = AccessMode::from_raw(flags) else {
        return ffi::SQLITE_MISUSE;
    };
    match vfs.access(path, mode) {
        Ok(ok) => {
            unsafe { *res_out = ok as c_int };
            ffi::SQLITE_OK
        }
        Err(e) => e.result_code(),
    }
}

unsafe extern "C" fn x_full_pathname(
    raw: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    n_out: c_int,
    out: *mut c_char,
) -> c_int {
    let vfs = unsafe { vfs_of(raw) };
    let path = match unsafe { path_of(name) } {
        Ok(p) => p,
        Err(rc) => return rc,
    };
    let full = match vfs.full_pathname(path) {
        Ok(p) => p,
        Err(e) => return e.result_code(),
    };
    let bytes = full.as_os_str().as_encoded_bytes();
    if n_out <= 0 || bytes.len() >= n_out as usize {
        return ffi::SQLITE_CANTOPEN_FULLPATH;
    }
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), out as *mut u8, bytes.len());
        *out.add(bytes.len()) = 0;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_dlopen(_: *mut ffi::sqlite3_vfs, _: *const c_char) -> *mut c_void {
    ptr::null_mut()
}

unsafe extern "C" fn x_dlerror(_: *mut ffi::sqlite3_vfs, n: c_int, out: *mut c_char) {
    unsafe { write_c_str(out, n, "loadable extensions are not supported") };
}

unsafe extern "C" fn x_dlsym(
    _: *mut ffi::sqlite3_vfs,
    _: *mut c_void,
    _: *const c_char,
) -> Option<unsafe extern "C" fn(*mut ffi::sqlite3_vfs, *mut c_void, *const c_char)> {
    None
}

unsafe extern "C" fn x_dlclose(_: *mut ffi::sqlite3_vfs, _: *mut c_void) {}

unsafe extern "C" fn x_randomness(_: *mut ffi::sqlite3_vfs, n: c_int, out: *mut c_char) -> c_int {
    if out.is_null() || n <= 0 {
        return 0;
    }
    let buf = unsafe { std::slice::from_raw_parts_mut(out as *mut u8, n as usize) };
    rand::rng().fill_bytes(buf);
    n
}

unsafe extern "C" fn x_sleep(_: *mut ffi::sqlite3_vfs, micros: c_int) -> c_int {
    if micros > 0 {
        thread::sleep(Duration::from_micros(micros as u64));
    }
    micros.max(0)
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

unsafe extern "C" fn x_current_time(_: *mut ffi::sqlite3_vfs, out: *mut f64) -> c_int {
    let ms = unix_millis() + JULIAN_UNIX_EPOCH_MS;
    unsafe { *out = ms as f64 / 86_400_000.0 };
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_current_time_int64(
    _: *mut ffi::sqlite3_vfs,
    out: *mut ffi::sqlite3_int64,
) -> c_int {
    unsafe { *out = unix_millis() + JULIAN_UNIX_EPOCH_MS };
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_get_last_error(
    raw: *mut ffi::sqlite3_vfs,
    n: c_int,
    out: *mut c_char,
) -> c_int {
    let vfs = unsafe { vfs_of(raw) };
    let errno = vfs.last_error();
    if errno != 0 {
        let msg = std::io::Error::from_raw_os_error(errno).to_string();
        unsafe { write_c_str(out, n, &msg) };
    }
    errno
}
