use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, MigrateResult};

/// Where the vault keeps its files.
///
/// File names are resolved against `data_dir` unless absolute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    /// First-generation key/value document.
    pub legacy_file: PathBuf,
    /// Relational database.
    pub database_file: PathBuf,
    /// Last completed storage version.
    pub version_file: PathBuf,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            legacy_file: PathBuf::from("legacy-accounts.json"),
            database_file: PathBuf::from("vault.db"),
            version_file: PathBuf::from("storage.version"),
        }
    }
}

impl VaultConfig {
    /// Read a TOML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> MigrateResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| MigrateError::Config(e.to_string()))
    }

    /// Defaults rooted at `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn legacy_path(&self) -> PathBuf {
        self.data_dir.join(&self.legacy_file)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn version_path(&self) -> PathBuf {
        self.data_dir.join(&self.version_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = VaultConfig::default();
        assert_eq!(c.data_dir, PathBuf::from("."));
        assert_eq!(c.database_path(), PathBuf::from("./vault.db"));
        assert_eq!(c.legacy_path(), PathBuf::from("./legacy-accounts.json"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c: VaultConfig = toml::from_str("data_dir = \"/var/lib/vault\"").unwrap();
        assert_eq!(c.version_path(), PathBuf::from("/var/lib/vault/storage.version"));
        assert_eq!(c.database_file, PathBuf::from("vault.db"));
    }

    #[test]
    fn absolute_file_overrides_data_dir() {
        let c = VaultConfig {
            database_file: PathBuf::from("/tmp/other.db"),
            ..VaultConfig::in_dir("/data")
        };
        assert_eq!(c.database_path(), PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = VaultConfig::load(&dir.path().join("vault.toml")).unwrap();
        assert_eq!(c, VaultConfig::default());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.toml");
        fs::write(&path, "data_dir = [").unwrap();
        assert!(matches!(VaultConfig::load(&path), Err(MigrateError::Config(_))));
    }
}
