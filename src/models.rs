//! Data models for file records and Google Drive API responses.

use serde::Deserialize;

/// Mime type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Size sentinel for directories and objects without downloadable content.
pub const NO_SIZE: i64 = -1;

/// A file as described by the remote catalog.
///
/// Records are immutable once built; the transfer engine only reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: String,
    /// Logical path of the file, relative to the listing root.
    pub name: String,
    /// Declared size in bytes, or [`NO_SIZE`] for directories.
    pub size: i64,
    /// Lowercase hex MD5 of the content, when the server declares one.
    pub content_hash: Option<String>,
    pub download_url: String,
}

impl FileRecord {
    pub fn is_directory(&self) -> bool {
        self.size < 0
    }

    /// Declared size as an unsigned byte count; zero for directories.
    pub fn byte_len(&self) -> u64 {
        u64::try_from(self.size).unwrap_or(0)
    }

    /// Final component of the logical path.
    pub fn basename(&self) -> &str {
        self.name
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or(&self.name)
    }
}

/// File metadata returned by the Drive v3 `files.get` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        Some(s) => s.parse::<u64>().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }

    /// Convert into a catalog record downloadable from `download_url`.
    pub fn into_record(self, download_url: String) -> FileRecord {
        let size = match self.size {
            Some(size) if !self.is_folder() => i64::try_from(size).unwrap_or(i64::MAX),
            _ => NO_SIZE,
        };
        FileRecord {
            id: self.id,
            name: self.name,
            size,
            content_hash: self.md5_checksum.map(|h| h.to_ascii_lowercase()),
            download_url,
        }
    }
}

/// Google API error response.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    pub code: u16,
    pub message: String,
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a throughput in bytes per second, e.g. "3.5 MB/s".
pub fn format_rate(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec < 0.0 {
        return "--".to_string();
    }

    let mut value = bytes_per_sec;
    for unit in ["", "K", "M", "G", "T"] {
        if value < 1024.0 {
            return format!("{:.1} {}B/s", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} PB/s", value)
}
