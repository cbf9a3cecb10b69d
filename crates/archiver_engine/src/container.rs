//! Zip container holding one bookmark's archived artifacts.
//!
//! Writes are buffered in memory and land on disk in one atomic replace.
//! Entries are ordered (`index.html`, `props.json`, `log`, then everything
//! else by name) and carry a fixed timestamp, so equal inputs give equal bytes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use archiver_core::RESOURCE_DIR;
use tempfile::NamedTempFile;
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::storage::{ensure_dir, PersistError};

pub const INDEX_FILE: &str = "index.html";
pub const PROPS_FILE: &str = "props.json";
pub const LOG_FILE: &str = "log";

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("no entry named {0:?}")]
    NotFound(String),
    #[error("invalid entry name {0:?}")]
    InvalidName(String),
    #[error("container has no parent directory: {0}")]
    NoParent(PathBuf),
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub struct Container;

impl Container {
    /// Starts a new container for `path`. Nothing touches the disk before
    /// [`ContainerWriter::commit`].
    pub fn create(path: impl Into<PathBuf>) -> ContainerWriter {
        ContainerWriter {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<ContainerReader<File>, ContainerError> {
        let file = File::open(path.as_ref())?;
        ContainerReader::new(file)
    }
}

fn entry_rank(name: &str) -> u8 {
    match name {
        INDEX_FILE => 0,
        PROPS_FILE => 1,
        LOG_FILE => 2,
        _ => 3,
    }
}

fn validate_name(name: &str) -> Result<(), ContainerError> {
    let valid = !name.is_empty()
        && !name.starts_with('/')
        && !name.contains('\\')
        && name.split('/').all(|part| !part.is_empty() && part != "." && part != "..");
    if valid {
        Ok(())
    } else {
        Err(ContainerError::InvalidName(name.to_string()))
    }
}

pub struct ContainerWriter {
    path: PathBuf,
    entries: BTreeMap<(u8, String), Vec<u8>>,
}

impl ContainerWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds or replaces an entry.
    pub fn add(&mut self, name: &str, bytes: impl Into<Vec<u8>>) -> Result<(), ContainerError> {
        validate_name(name)?;
        self.entries
            .insert((entry_rank(name), name.to_string()), bytes.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the archive next to its destination, then renames it over any
    /// previous version.
    pub fn commit(self) -> Result<PathBuf, ContainerError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| ContainerError::NoParent(self.path.clone()))?;
        ensure_dir(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        write_zip(tmp.as_file_mut(), &self.entries)?;
        tmp.as_file_mut().flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| ContainerError::Io(e.error))?;
        Ok(self.path)
    }
}

fn write_zip<W: Write + Seek>(
    sink: W,
    entries: &BTreeMap<(u8, String), Vec<u8>>,
) -> Result<(), ContainerError> {
    let base = SimpleFileOptions::default()
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    let mut zip = ZipWriter::new(sink);
    for ((_, name), bytes) in entries {
        // Resources are already compressed images.
        let method = if name.starts_with(RESOURCE_DIR) {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        zip.start_file(name.as_str(), base.compression_method(method))?;
        zip.write_all(bytes)?;
    }
    zip.finish()?;
    Ok(())
}

pub struct ContainerReader<R: Read + Seek> {
    archive: ZipArchive<R>,
}

impl<R: Read + Seek> ContainerReader<R> {
    pub fn new(reader: R) -> Result<Self, ContainerError> {
        Ok(Self {
            archive: ZipArchive::new(reader)?,
        })
    }

    pub fn get_file(&mut self, name: &str) -> Result<Vec<u8>, ContainerError> {
        let mut file = self.archive.by_name(name).map_err(|err| match err {
            ZipError::FileNotFound => ContainerError::NotFound(name.to_string()),
            other => ContainerError::Zip(other),
        })?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    pub fn get_text(&mut self, name: &str) -> Result<String, ContainerError> {
        let bytes = self.get_file(name)?;
        String::from_utf8(bytes)
            .map_err(|err| ContainerError::Io(io::Error::new(io::ErrorKind::InvalidData, err)))
    }

    /// Entry names in archive order.
    pub fn names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.archive.file_names().any(|n| n == name)
    }

    pub fn list_resources(&self) -> Vec<String> {
        let prefix = format!("{RESOURCE_DIR}/");
        self.archive
            .file_names()
            .filter(|n| n.starts_with(&prefix))
            .map(str::to_string)
            .collect()
    }
}
