//! Helpers for reading the local input files.
use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use log::trace;

use crate::commons::error::KmsIoError;

/// Reads the full contents of a file.
pub fn read(path: &Path) -> Result<Vec<u8>, KmsIoError> {
    let mut f =
        File::open(path).map_err(|e| KmsIoError::new(format!("Could not open: '{}'", path.to_string_lossy()), e))?;
    let mut bytes = Vec::new();
    f.read_to_end(&mut bytes)
        .map_err(|e| KmsIoError::new(format!("Could not read: {}", path.to_string_lossy()), e))?;

    trace!("Read {} bytes from file: {}", bytes.len(), path.to_string_lossy());
    Ok(bytes)
}

/// Lists the regular files directly under a directory, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, KmsIoError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| KmsIoError::new(format!("Could not read dir: {}", dir.to_string_lossy()), e))?;

    let mut files = vec![];
    for entry in entries {
        let entry = entry.map_err(|e| KmsIoError::new(format!("Could not read dir: {}", dir.to_string_lossy()), e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
