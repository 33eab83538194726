//! The persisted "last completed storage version".
//!
//! The marker lives apart from both backends so that neither has to know
//! about the other.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::{MigrateError, MigrateResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum StorageVersion {
    /// Legacy key/value document.
    V1 = 1,
    /// Relational store.
    V2 = 2,
}

impl StorageVersion {
    pub const CURRENT: Self = Self::V2;

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for StorageVersion {
    type Error = MigrateError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(MigrateError::UnknownVersion(other)),
        }
    }
}

pub trait VersionMarker: Send + Sync {
    /// `None` if no version was ever recorded.
    fn read(&self) -> MigrateResult<Option<StorageVersion>>;

    fn write(&self, version: StorageVersion) -> MigrateResult<()>;
}

/// Marker kept as a decimal integer in a small text file.
#[derive(Clone, Debug)]
pub struct FileVersionMarker {
    path: PathBuf,
}

impl FileVersionMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VersionMarker for FileVersionMarker {
    fn read(&self) -> MigrateResult<Option<StorageVersion>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        let value: i64 = text
            .trim()
            .parse()
            .map_err(|_| MigrateError::InvalidMarker(text.trim().to_string()))?;
        StorageVersion::try_from(value).map(Some)
    }

    /// Written to a sibling temp file first, then renamed over the marker.
    fn write(&self, version: StorageVersion) -> MigrateResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        writeln!(file, "{}", version.as_i64())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Marker held in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryVersionMarker {
    value: Mutex<Option<i64>>,
}

impl InMemoryVersionMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary raw value, valid or not.
    pub fn with_raw(value: i64) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }

    pub fn raw(&self) -> Option<i64> {
        self.value.lock().ok().and_then(|v| *v)
    }
}

impl VersionMarker for InMemoryVersionMarker {
    fn read(&self) -> MigrateResult<Option<StorageVersion>> {
        let value = self
            .value
            .lock()
            .map_err(|e| MigrateError::InvalidMarker(e.to_string()))?;
        value.map(StorageVersion::try_from).transpose()
    }

    fn write(&self, version: StorageVersion) -> MigrateResult<()> {
        let mut value = self
            .value
            .lock()
            .map_err(|e| MigrateError::InvalidMarker(e.to_string()))?;
        *value = Some(version.as_i64());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_convert_from_integers() {
        assert_eq!(StorageVersion::try_from(1i64).unwrap(), StorageVersion::V1);
        assert_eq!(StorageVersion::try_from(2i64).unwrap(), StorageVersion::V2);
        assert!(matches!(
            StorageVersion::try_from(3i64),
            Err(MigrateError::UnknownVersion(3))
        ));
    }

    #[test]
    fn file_marker_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let marker = FileVersionMarker::new(dir.path().join("nested").join("storage.version"));
        assert_eq!(marker.read().unwrap(), None);
        marker.write(StorageVersion::V1).unwrap();
        assert_eq!(marker.read().unwrap(), Some(StorageVersion::V1));
        marker.write(StorageVersion::V2).unwrap();
        assert_eq!(marker.read().unwrap(), Some(StorageVersion::V2));
        assert_eq!(fs::read_to_string(marker.path()).unwrap(), "2\n");
    }

    #[test]
    fn file_marker_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.version");
        fs::write(&path, "two").unwrap();
        assert!(matches!(
            FileVersionMarker::new(&path).read(),
            Err(MigrateError::InvalidMarker(_))
        ));
        fs::write(&path, "9").unwrap();
        assert!(matches!(
            FileVersionMarker::new(&path).read(),
            Err(MigrateError::UnknownVersion(9))
        ));
    }

    #[test]
    fn memory_marker_starts_empty() {
        let marker = InMemoryVersionMarker::new();
        assert_eq!(marker.read().unwrap(), None);
        marker.write(StorageVersion::CURRENT).unwrap();
        assert_eq!(marker.raw(), Some(2));
    }
}
