//! Local destination resolution for a remote file.

use std::path::{Component, Path, PathBuf};

use crate::config::{TransferOptions, STDOUT_SENTINEL};
use crate::error::{FetchError, Result};
use crate::models::FileRecord;
use crate::verify;

/// Where the content of one remote file goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferTarget {
    Stdout,
    RegularFile(PathBuf),
    /// The record is a directory; nothing is fetched.
    DirectoryMarker(PathBuf),
}

impl std::fmt::Display for TransferTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferTarget::Stdout => write!(f, "<stdout>"),
            TransferTarget::RegularFile(path) | TransferTarget::DirectoryMarker(path) => {
                write!(f, "{}", path.display())
            }
        }
    }
}

/// Decide the destination for `record`.
///
/// Priority: preserved tree, explicit name, remote name, stdout.
pub fn resolve(record: &FileRecord, options: &TransferOptions) -> TransferTarget {
    let explicit = options
        .output_name
        .as_deref()
        .filter(|name| !name.is_empty());

    let path = if options.preserve_tree {
        Some(options.output_dir.join(sanitize(&record.name)))
    } else if let Some(name) = explicit.filter(|name| *name != STDOUT_SENTINEL) {
        Some(options.output_dir.join(name))
    } else if options.use_remote_name && explicit.is_none() {
        Some(options.output_dir.join(sanitize(record.basename())))
    } else {
        None
    };

    match path {
        Some(path) if record.is_directory() => TransferTarget::DirectoryMarker(path),
        Some(path) => TransferTarget::RegularFile(path),
        None if record.is_directory() => {
            TransferTarget::DirectoryMarker(options.output_dir.join(sanitize(&record.name)))
        }
        None => TransferTarget::Stdout,
    }
}

/// Keep only normal components so remote names cannot escape `output_dir`.
fn sanitize(name: &str) -> PathBuf {
    let cleaned: PathBuf = Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    if cleaned.as_os_str().is_empty() {
        PathBuf::from("untitled")
    } else {
        cleaned
    }
}

/// Whether the file at `path` already holds exactly the content of `record`.
///
/// Requires both the size and the declared hash to match; records without a
/// hash are never considered up to date.
pub async fn is_up_to_date(path: &Path, record: &FileRecord, block_size: usize) -> Result<bool> {
    let Some(expected) = record.content_hash.as_deref() else {
        return Ok(false);
    };

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(FetchError::destination(path, e)),
    };

    if metadata.len() != record.byte_len() {
        return Ok(false);
    }

    let actual = verify::hash_file(path, block_size).await?;
    Ok(actual.eq_ignore_ascii_case(expected))
}

/// Create the local directory for a directory record.
pub async fn create_directory(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| FetchError::destination(path, e))
}
