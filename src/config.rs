//! Transfer tunables, per-run options and network environment detection.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FetchError;

pub const MIB: u64 = 1024 * 1024;

/// Baseline chunk size on ordinary networks.
pub const GENERIC_CHUNK_SIZE: u64 = 8 * MIB;

/// Baseline chunk size on known high-throughput cloud hosts.
pub const CLOUD_CHUNK_SIZE: u64 = 32 * MIB;

/// Chunks never grow past this size.
pub const MAX_CHUNK_SIZE: u64 = 128 * MIB;

/// Attempts per chunk before a rate limit is surfaced to the caller.
pub const MAX_ATTEMPTS: u32 = 10;

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes compared at the end of a partial file before resuming.
pub const TAIL_BLOCK_SIZE: u64 = 64 * 1024;

/// Read size used when hashing local files.
pub const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// Output name that selects standard output.
pub const STDOUT_SENTINEL: &str = "-";

/// Host name suffixes of cloud providers with fast links to Google storage.
const CLOUD_HOST_SUFFIXES: &[&str] = &[
    ".compute.internal",
    ".ec2.internal",
    ".compute.amazonaws.com",
    ".googleusercontent.com",
    ".google.internal",
    ".cloudapp.azure.com",
    ".cloudapp.net",
    ".internal.cloudapp.net",
];

/// Network environment of the local host, used to pick a baseline chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkEnv {
    #[default]
    Generic,
    Cloud,
}

impl NetworkEnv {
    /// Classify a host name against known cloud provider patterns.
    pub fn classify(host: &str) -> Self {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        let is_cloud = CLOUD_HOST_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix))
            // GCE instances are named `<vm>.c.<project>.internal`
            || (host.ends_with(".internal") && host.contains(".c."));

        if is_cloud {
            NetworkEnv::Cloud
        } else {
            NetworkEnv::Generic
        }
    }

    /// Classify the local host by its host name.
    pub fn detect() -> Self {
        match hostname::get() {
            Ok(name) => {
                let name = name.to_string_lossy();
                let env = Self::classify(&name);
                tracing::debug!(host = %name, env = ?env, "classified network environment");
                env
            }
            Err(e) => {
                tracing::debug!(error = %e, "could not read host name, assuming generic network");
                NetworkEnv::Generic
            }
        }
    }
}

/// Network environment selector as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkSetting {
    #[default]
    Auto,
    Fixed(NetworkEnv),
}

impl NetworkSetting {
    pub fn resolve(self) -> NetworkEnv {
        match self {
            NetworkSetting::Auto => NetworkEnv::detect(),
            NetworkSetting::Fixed(env) => env,
        }
    }
}

impl FromStr for NetworkSetting {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(NetworkSetting::Auto),
            "cloud" => Ok(NetworkSetting::Fixed(NetworkEnv::Cloud)),
            "generic" => Ok(NetworkSetting::Fixed(NetworkEnv::Generic)),
            _ => Err(FetchError::InvalidConfig {
                name: "network",
                value: s.to_string(),
            }),
        }
    }
}

/// Tunables shared by every transfer driven by one downloader.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub generic_chunk_size: u64,
    pub cloud_chunk_size: u64,
    pub max_chunk_size: u64,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub request_timeout: Duration,
    pub tail_block_size: u64,
    pub hash_block_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            generic_chunk_size: GENERIC_CHUNK_SIZE,
            cloud_chunk_size: CLOUD_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            max_attempts: MAX_ATTEMPTS,
            initial_backoff: INITIAL_BACKOFF,
            request_timeout: REQUEST_TIMEOUT,
            tail_block_size: TAIL_BLOCK_SIZE,
            hash_block_size: HASH_BLOCK_SIZE,
        }
    }
}

/// Options for one download run. Never mutated once built.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Directory every local destination is placed under.
    pub output_dir: PathBuf,
    /// Explicit local name; [`STDOUT_SENTINEL`] selects standard output.
    pub output_name: Option<String>,
    /// Name the local file after the remote one.
    pub use_remote_name: bool,
    /// Recreate the remote path below `output_dir`; overrides `output_name`.
    pub preserve_tree: bool,
    /// Continue a partial local file when its tail still matches the remote.
    pub resume: bool,
    /// Skip the post-transfer content hash comparison.
    pub skip_checksum: bool,
    /// Fixed initial chunk size in bytes.
    pub chunk_size: Option<u64>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            output_name: None,
            use_remote_name: true,
            preserve_tree: false,
            resume: false,
            skip_checksum: false,
            chunk_size: None,
        }
    }
}
