use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("invalid bookmark id {0:?}")]
    InvalidId(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure a directory exists and is writable; create it if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    NamedTempFile::new_in(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    Ok(())
}

/// Maps bookmark identities to container locations:
/// `{data_dir}/bookmarks/{prefix}/{id}.zip`, prefix being the first two characters.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    data_dir: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn container_path(&self, id: &str) -> Result<PathBuf, PersistError> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(PersistError::InvalidId(id.to_string()));
        }
        let prefix = id.get(..2).unwrap_or(id);
        Ok(self
            .data_dir
            .join("bookmarks")
            .join(prefix)
            .join(format!("{id}.zip")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn container_path_uses_two_character_prefix() {
        let paths = StoragePaths::new("/data");
        assert_eq!(
            paths.container_path("Xk4Pq9").unwrap(),
            PathBuf::from("/data/bookmarks/Xk/Xk4Pq9.zip")
        );
        assert_eq!(
            paths.container_path("a").unwrap(),
            PathBuf::from("/data/bookmarks/a/a.zip")
        );
    }

    #[test]
    fn ids_cannot_escape_the_data_dir() {
        let paths = StoragePaths::new("/data");
        assert!(matches!(
            paths.container_path("../etc"),
            Err(PersistError::InvalidId(_))
        ));
        assert!(paths.container_path("").is_err());
    }
}
