use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VfsError};
use crate::util::DeviceCharacteristics;

/// Environment variable naming a JSON file with a [`VfsConfig`].
pub const CONFIG_ENV: &str = "SQLVFS_CONFIG";

pub const DEFAULT_NAME: &str = "sqlvfs";
pub const DEFAULT_MAX_PATHNAME: usize = 512;
pub const DEFAULT_SECTOR_SIZE: u32 = 4096;

/// Adapter settings, fixed for the lifetime of a [`crate::Vfs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VfsConfig {
    /// Name the adapter registers under.
    pub name: String,
    /// Longest full pathname the adapter will produce, in bytes.
    pub max_pathname: usize,
    pub sector_size: u32,
    pub device_characteristics: DeviceCharacteristics,
    /// Directory for files opened without a name. Defaults to the OS temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        VfsConfig {
            name: DEFAULT_NAME.to_string(),
            max_pathname: DEFAULT_MAX_PATHNAME,
            sector_size: DEFAULT_SECTOR_SIZE,
            device_characteristics: DeviceCharacteristics::default(),
            temp_dir: None,
        }
    }
}

impl VfsConfig {
    pub fn named(name: impl Into<String>) -> Self {
        VfsConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: VfsConfig =
            serde_json::from_str(text).map_err(|e| VfsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            VfsError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Loads the file named by `SQLVFS_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('\0') {
            return Err(VfsError::InvalidConfig(format!(
                "vfs name {:?} must be non-empty and free of NUL",
                self.name
            )));
        }
        if !self.sector_size.is_power_of_two() || !(512..=65536).contains(&self.sector_size) {
            return Err(VfsError::InvalidConfig(format!(
                "sector size {} must be a power of two in 512..=65536",
                self.sector_size
            )));
        }
        if !(64..=4096).contains(&self.max_pathname) {
            return Err(VfsError::InvalidConfig(format!(
                "max pathname {} must be in 64..=4096",
                self.max_pathname
            )));
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let c = VfsConfig::default();
        c.validate().unwrap();
        assert_eq!(c.name, "sqlvfs");
        assert_eq!(c.sector_size, 4096);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c = VfsConfig::from_json(
            r#"{"name":"pagestore","deviceCharacteristics":"ATOMIC4K | SAFE_APPEND"}"#,
        )
        .unwrap();
        assert_eq!(c.name, "pagestore");
        assert_eq!(c.max_pathname, DEFAULT_MAX_PATHNAME);
        assert!(c.device_characteristics.contains(DeviceCharacteristics::ATOMIC4K));
        assert!(!c.device_characteristics.contains(DeviceCharacteristics::POWERSAFE_OVERWRITE));
    }

    #[test]
    fn rejects_bad_values() {
        for text in [
            r#"{"sectorSize":1000}"#,
            r#"{"sectorSize":256}"#,
            r#"{"name":""}"#,
            r#"{"maxPathname":10}"#,
            r#"{"sectorSize":"big"}"#,
        ] {
            let err = VfsConfig::from_json(text).unwrap_err();
            assert!(matches!(err, VfsError::InvalidConfig(_)), "{text}");
        }
    }

    #[test]
    #[serial]
    fn from_env_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name":"envvfs","sectorSize":512}}"#).unwrap();
        unsafe { env::set_var(CONFIG_ENV, file.path()) };
        let c = VfsConfig::from_env();
        unsafe { env::remove_var(CONFIG_ENV) };
        let c = c.unwrap();
        assert_eq!(c.name, "envvfs");
        assert_eq!(c.sector_size, 512);
    }

    #[test]
    #[serial]
    fn from_env_unset_is_default() {
        unsafe { env::remove_var(CONFIG_ENV) };
        assert_eq!(VfsConfig::from_env().unwrap(), VfsConfig::default());
    }
}
