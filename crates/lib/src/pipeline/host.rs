//! Host filesystem access for [`Source::Host`](super::Source::Host) and for
//! exported directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::PipelineError;

/// Join a source-relative path onto a host root. Leading `/`, empty and `.`
/// paths all address the root itself.
pub fn host_path(root: &Path, path: &str) -> PathBuf {
  let trimmed = path.trim_start_matches('/');
  if trimmed.is_empty() || trimmed == "." {
    root.to_path_buf()
  } else {
    root.join(trimmed)
  }
}

/// List entries directly under `path`, sorted by name. Directories carry a
/// trailing `/`.
pub fn entries(root: &Path, path: &str) -> Result<Vec<String>, PipelineError> {
  let dir = host_path(root, path);
  let read = fs::read_dir(&dir).map_err(|e| not_found_or_io(e, path))?;

  let mut names = Vec::new();
  for entry in read {
    let entry = entry?;
    let mut name = entry.file_name().to_string_lossy().to_string();
    if entry.file_type()?.is_dir() {
      name.push('/');
    }
    names.push(name);
  }
  names.sort();
  Ok(names)
}

/// Read a UTF-8 file under `root`.
pub fn contents(root: &Path, path: &str) -> Result<String, PipelineError> {
  let file = host_path(root, path);
  fs::read_to_string(&file).map_err(|e| not_found_or_io(e, path))
}

/// Recursively copy `src` into `dest`, creating `dest` if needed. Symlinks are
/// recreated rather than followed.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
  fs::create_dir_all(dest)?;

  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dest.join(rel);

    let file_type = entry.file_type();
    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      copy_symlink(&link, &target)?;
    } else if file_type.is_file() {
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::copy(entry.path(), &target)?;
    }
  }

  Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
  if target.symlink_metadata().is_ok() {
    fs::remove_file(target)?;
  }
  std::os::unix::fs::symlink(link, target)
}

#[cfg(windows)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
  if link.is_dir() {
    std::os::windows::fs::symlink_dir(link, target)
  } else {
    std::os::windows::fs::symlink_file(link, target)
  }
}

fn not_found_or_io(err: io::Error, path: &str) -> PipelineError {
  if err.kind() == io::ErrorKind::NotFound {
    PipelineError::NotFound { path: path.to_string() }
  } else {
    PipelineError::Io(err)
  }
}
