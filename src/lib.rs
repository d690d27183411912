//! drive_fetch - Resumable, verified downloads from Google Drive.
//!
//! This library provides:
//! - Byte-range chunked downloads with retry and exponential backoff
//! - Resume of interrupted downloads after checking the partial file's tail
//! - MD5 verification against the checksum Drive declares
//! - Chunk sizes that adapt to the network and to rate limiting
//!
//! # Example
//!
//! ```no_run
//! use drive_fetch::{Credentials, Downloader, DriveCatalog, NetworkEnv, TransferConfig, TransferOptions};
//! use drive_fetch::progress::NoProgress;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let credentials = Credentials::Bearer("ya29.token".to_string());
//!     let downloader = Downloader::new(credentials.clone(), NetworkEnv::detect(), TransferConfig::default())?;
//!     let catalog = DriveCatalog::new(reqwest::Client::new(), credentials);
//!
//!     let record = catalog.get_record("file-id").await?;
//!     let options = TransferOptions { resume: true, ..TransferOptions::default() };
//!     let report = downloader
//!         .download(&record, &options, &NoProgress, &CancellationToken::new())
//!         .await?;
//!     println!("{:?}", report.status);
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod planner;
pub mod progress;
pub mod target;
pub mod transfer;
pub mod url_parser;
pub mod verify;

// Re-exports for convenience
pub use auth::Credentials;
pub use catalog::DriveCatalog;
pub use config::{NetworkEnv, NetworkSetting, TransferConfig, TransferOptions};
pub use error::{FetchError, Result};
pub use fetcher::FailureReason;
pub use models::FileRecord;
pub use target::TransferTarget;
pub use transfer::{Downloader, TransferReport, TransferStatus};
pub use url_parser::extract_id;
pub use verify::Integrity;
