//! Logging bootstrap and per-operation records.
//!
//! Every adapter operation goes through [`traced`], which emits one record
//! with the operation name, its target, the outcome and the elapsed time.
//! Diagnostics never change the outcome they describe.

use std::fmt::Display;
use std::time::Instant;

use env_logger::Env;
use once_cell::sync::OnceCell;

use crate::error::{Result, VfsError};

/// Environment variable holding the `env_logger` filter.
pub const LOG_ENV: &str = "SQLVFS_LOG";

static LOGGER: OnceCell<()> = OnceCell::new();

/// Installs the process logger the first time it is called.
///
/// A logger installed by the host beforehand is left in place.
pub fn init_diagnostics() {
    LOGGER.get_or_init(|| {
        let _ = env_logger::Builder::from_env(Env::default().filter_or(LOG_ENV, "warn"))
            .format_timestamp_millis()
            .try_init();
    });
}

/// Runs `f` and logs its outcome.
pub(crate) fn traced<T>(
    op: &'static str,
    target: impl Display,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let start = Instant::now();
    let res = f();
    let elapsed = start.elapsed();
    match &res {
        Ok(_) => trace!("{op} {target}: ok ({elapsed:?})"),
        Err(VfsError::Busy) => debug!("{op} {target}: busy ({elapsed:?})"),
        Err(e @ VfsError::Protocol(_)) => error!("{op} {target}: {e} ({elapsed:?})"),
        Err(e) => warn!("{op} {target}: {e} ({elapsed:?})"),
    }
    res
}
