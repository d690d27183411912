//! File ID lookup, turning Drive IDs into [`FileRecord`]s.
//!
//! Authorized runs ask the Drive v3 API for metadata. Anonymous runs go
//! through the public `uc?export=download` link instead, which needs no
//! credentials but declares no checksum.

use reqwest::header::{CONTENT_DISPOSITION, SET_COOKIE};
use reqwest::{Client, Response, Url};

use crate::auth::Credentials;
use crate::error::{FetchError, Result};
use crate::models::{ApiErrorResponse, DriveFile, FileRecord};

/// Base URL for Google Drive API v3.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Host serving public share links.
pub const DRIVE_PUBLIC_BASE: &str = "https://drive.google.com";

/// Cookie prefix carrying the confirm token for files too large to scan.
const CONFIRM_COOKIE_PREFIX: &str = "download_warning";

/// Cookie set when the file requires a Google sign-in.
const SIGN_IN_COOKIE: &str = "GAPS";

const FILE_FIELDS: &str = "id, name, size, mimeType, md5Checksum";

/// Resolves Drive file IDs into catalog records.
#[derive(Clone)]
pub struct DriveCatalog {
    base_url: String,
    public_base: String,
    credentials: Credentials,
    http: Client,
}

impl DriveCatalog {
    /// Create a catalog against the public Drive API.
    pub fn new(http: Client, credentials: Credentials) -> Self {
        Self::with_base_url(http, credentials, DRIVE_API_BASE)
    }

    /// Create a catalog against a custom API base (proxies, tests).
    pub fn with_base_url(http: Client, credentials: Credentials, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            public_base: DRIVE_PUBLIC_BASE.to_string(),
            credentials,
            http,
        }
    }

    /// Use a custom host for public share links.
    pub fn with_public_base(mut self, public_base: &str) -> Self {
        self.public_base = public_base.trim_end_matches('/').to_string();
        self
    }

    /// URL serving the raw content of a file.
    pub fn content_url(&self, file_id: &str) -> String {
        format!(
            "{}/files/{}?alt=media&supportsAllDrives=true",
            self.base_url, file_id
        )
    }

    /// Build the record for `file_id` the way the credentials allow.
    ///
    /// Bearer credentials use the API; anonymous ones use the public link,
    /// where `size_hint` stands in for a missing `Content-Length`.
    pub async fn lookup(&self, file_id: &str, size_hint: Option<u64>) -> Result<FileRecord> {
        match self.credentials {
            Credentials::Bearer(_) => self.get_record(file_id).await,
            Credentials::Anonymous => self.public_record(file_id, size_hint).await,
        }
    }

    /// Fetch metadata for one file and build its record.
    pub async fn get_record(&self, file_id: &str) -> Result<FileRecord> {
        let request = self
            .http
            .get(format!("{}/files/{}", self.base_url, file_id))
            .query(&[("supportsAllDrives", "true"), ("fields", FILE_FIELDS)]);

        let response = self.credentials.authorize(request).send().await?;
        let response = ensure_success(response).await?;

        let file: DriveFile = response.json().await?;
        tracing::debug!(id = %file.id, name = %file.name, size = ?file.size, "resolved file metadata");

        let url = self.content_url(&file.id);
        Ok(file.into_record(url))
    }

    /// Build a record for a publicly shared file.
    ///
    /// Files too large for a virus scan answer the first request with a
    /// `download_warning` cookie, whose value goes back as `confirm`. The name
    /// comes from `Content-Disposition` and the size from `size` or, failing
    /// that, `Content-Length`. Only response headers are read.
    pub async fn public_record(&self, file_id: &str, size: Option<u64>) -> Result<FileRecord> {
        let mut url = self.public_url(file_id, None)?;
        let mut response = ensure_success(self.http.get(url.clone()).send().await?).await?;

        if cookie_value(&response, SIGN_IN_COOKIE).is_some() {
            return Err(FetchError::ApiError {
                status: 403,
                message: format!("{} is not a public file", file_id),
            });
        }

        if let Some(token) = cookie_value(&response, CONFIRM_COOKIE_PREFIX) {
            tracing::debug!(id = %file_id, "confirming public download");
            url = self.public_url(file_id, Some(&token))?;
            response = ensure_success(self.http.get(url.clone()).send().await?).await?;
        }

        let name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(disposition_filename)
            .ok_or_else(|| FetchError::ApiError {
                status: 404,
                message: format!("{} does not exist or is not shared publicly", file_id),
            })?;

        let size = size
            .or_else(|| response.content_length())
            .ok_or_else(|| FetchError::InvalidConfig {
                name: "size",
                value: format!("unknown for public file {}", file_id),
            })?;
        tracing::debug!(id = %file_id, name = %name, size, "resolved public file");

        Ok(FileRecord {
            id: file_id.to_string(),
            name,
            size: i64::try_from(size).unwrap_or(i64::MAX),
            content_hash: None,
            download_url: url.to_string(),
        })
    }

    fn public_url(&self, file_id: &str, confirm: Option<&str>) -> Result<Url> {
        let mut params = vec![("export", "download"), ("id", file_id)];
        if let Some(token) = confirm {
            params.push(("confirm", token));
        }
        Url::parse_with_params(&format!("{}/uc", self.public_base), &params)
            .map_err(|e| FetchError::InvalidUrlOrId(format!("{}: {}", self.public_base, e)))
    }
}

/// Value of the first `Set-Cookie` whose name starts with `prefix`.
fn cookie_value(response: &Response, prefix: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next()?.split_once('='))
        .find(|(name, _)| name.trim().starts_with(prefix))
        .map(|(_, value)| value.trim().to_string())
}

/// File name from a `Content-Disposition` value, preferring `filename*`.
fn disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in value.split(';') {
        let Some((key, raw)) = part.trim().split_once('=') else {
            continue;
        };
        let raw = raw.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.split_once("''").map_or(raw, |(_, rest)| rest);
                extended = Some(percent_decode(encoded));
            }
            "filename" => plain = Some(raw.to_string()),
            _ => {}
        }
    }

    extended.or(plain).filter(|name| !name.is_empty())
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hex = (bytes[i] == b'%')
            .then(|| value.get(i + 1..i + 3))
            .flatten()
            .and_then(|pair| u8::from_str_radix(pair, 16).ok());
        match hex {
            Some(byte) => {
                out.push(byte);
                i += 3;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Turn a non-success response into an [`FetchError::ApiError`].
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
        return Err(FetchError::ApiError {
            status: api_error.error.code,
            message: api_error.error.message,
        });
    }
    Err(FetchError::ApiError {
        status: status.as_u16(),
        message: error_body,
    })
}
