//! Recording data removal.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{Error, Result};

/// Recursively delete the data directory after a successful collection.
///
/// Returns `false` if the directory was already gone.
pub fn remove_data_dir(dir: &Path) -> Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::file("remove", dir, e)),
    }
}
