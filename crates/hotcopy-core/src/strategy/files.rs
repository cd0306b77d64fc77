use crate::scanner::walk::dir_size;
use std::fs;
use std::io;
use std::path::Path;

/// Remove a file or directory tree; a missing path is not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// On-disk size of a file, or the recursive byte sum of a directory.
pub fn path_size(path: &Path) -> u64 {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => dir_size(path),
        Ok(metadata) => metadata.len(),
        Err(_) => 0,
    }
}

/// Copy every regular file directly inside `source` into `target`.
/// Subdirectories are not copied.
pub fn copy_top_level_files(source: &Path, target: &Path) -> io::Result<u64> {
    fs::create_dir_all(target)?;
    let mut copied = 0;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            copied += fs::copy(entry.path(), target.join(entry.file_name()))?;
        }
    }
    Ok(copied)
}
