use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::math::array::Array;

/// Extension appended to keys whose value is an [`Array`].
pub const ARRAY_SUFFIX: &str = ".arr";

/// Directory-backed key/value store: one file per key, no index file.
///
/// Blobs are JSON; arrays live in a sibling file named `<key>.arr`. Entries
/// are never updated in place or evicted.
///
/// Without a directory the store is a sink: writes are discarded, `exists`
/// is always false and reads report `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    directory: Option<PathBuf>,
}

impl CacheStore {
    pub fn new(directory: impl Into<PathBuf>) -> CacheStore {
        CacheStore { directory: Some(directory.into()) }
    }

    /// A store that remembers nothing.
    pub fn disabled() -> CacheStore {
        CacheStore { directory: None }
    }

    pub fn from_option(directory: Option<PathBuf>) -> CacheStore {
        CacheStore { directory }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// True if `key` was written either as a blob or as an array.
    pub fn exists(&self, key: &str) -> bool {
        self.blob_path(key).map_or(false, |p| p.is_file())
            || self.array_path(key).map_or(false, |p| p.is_file())
    }

    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let Some(path) = self.blob_path(key) else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(value)?;
        write_atomically(&path, |w| w.write_all(&bytes))?;
        debug!(path = %path.display(), "cached");
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let path = self.blob_path(key).ok_or_else(|| not_found(key))?;
        if !path.is_file() {
            return Err(self.missing(key, "a blob"));
        }
        let file = File::open(&path).map_err(|e| PipelineError::io(&path, e))?;
        let value = serde_json::from_reader(BufReader::new(file))?;
        debug!(path = %path.display(), "uncached");
        Ok(value)
    }

    pub fn put_array(&self, key: &str, array: &Array) -> Result<()> {
        let Some(path) = self.array_path(key) else {
            return Ok(());
        };
        let mut bytes = Vec::new();
        array.write_to(&mut bytes)?;
        write_atomically(&path, |w| w.write_all(&bytes))?;
        debug!(path = %path.display(), shape = ?array.shape(), "array cached");
        Ok(())
    }

    pub fn get_array(&self, key: &str) -> Result<Array> {
        let path = self.array_path(key).ok_or_else(|| not_found(key))?;
        if !path.is_file() {
            return Err(self.missing(key, "an array"));
        }
        let file = File::open(&path).map_err(|e| PipelineError::io(&path, e))?;
        let array = Array::read_from(BufReader::new(file)).map_err(|e| PipelineError::Decode {
            path: path.clone(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), "array uncached");
        Ok(array)
    }

    fn blob_path(&self, key: &str) -> Option<PathBuf> {
        self.directory.as_ref().map(|dir| dir.join(key))
    }

    fn array_path(&self, key: &str) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|dir| dir.join(format!("{key}{ARRAY_SUFFIX}")))
    }

    /// Builds the error for a read that found nothing of the wanted kind.
    fn missing(&self, key: &str, expected: &'static str) -> PipelineError {
        if !self.exists(key) {
            return not_found(key);
        }
        let found = if expected == "an array" { "a blob" } else { "an array" };
        PipelineError::TypeMismatch { key: key.to_string(), expected, found }
    }
}

fn not_found(key: &str) -> PipelineError {
    PipelineError::NotFound { key: key.to_string() }
}

/// Writes through a temporary sibling and renames it into place, so readers
/// only ever see complete entries.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.{:?}.tmp",
        std::process::id(),
        std::thread::current().id()
    ));

    let result = (|| {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(PipelineError::io(path, e));
    }
    Ok(())
}
