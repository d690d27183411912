//! Credentials attached to catalog and content requests.
//!
//! Obtaining and refreshing tokens happens outside this crate; callers hand
//! over whatever bearer token is currently valid.

use reqwest::RequestBuilder;

/// Credentials used for every request issued by a downloader or catalog.
#[derive(Clone, Default)]
pub enum Credentials {
    /// No authorization header; files are resolved through public share links.
    #[default]
    Anonymous,
    /// OAuth2 bearer token.
    Bearer(String),
}

impl Credentials {
    /// Build credentials from an optional token, treating blank as anonymous.
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(token) if !token.trim().is_empty() => Credentials::Bearer(token.trim().to_string()),
            _ => Credentials::Anonymous,
        }
    }

    /// Attach the credentials to a request.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credentials::Anonymous => request,
            Credentials::Bearer(token) => request.bearer_auth(token),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Anonymous"),
            Credentials::Bearer(_) => write!(f, "Bearer(***)"),
        }
    }
}
