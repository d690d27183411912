//! The fetch-write loop: destination checks, resume, chunked transfer and
//! post-transfer verification for one file at a time.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Client;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::auth::Credentials;
use crate::config::{NetworkEnv, TransferConfig, TransferOptions};
use crate::error::{FetchError, Result};
use crate::fetcher::{ByteRange, ChunkResult, FailureReason, RangeFetcher};
use crate::models::FileRecord;
use crate::planner::ChunkPlanner;
use crate::progress::ProgressSink;
use crate::target::{self, TransferTarget};
use crate::verify::{self, Integrity};

/// Mutable bookkeeping for one transfer. Lives only inside the loop.
#[derive(Debug)]
pub struct TransferState {
    /// Absolute offset of the next byte to write.
    pub bytes_written: u64,
    pub start_offset: u64,
    pub chunk_size: u64,
    pub backoff: Duration,
    pub start_time: Instant,
}

impl TransferState {
    pub fn new(start_offset: u64, chunk_size: u64) -> Self {
        Self {
            bytes_written: start_offset,
            start_offset,
            chunk_size: chunk_size.max(1),
            backoff: Duration::ZERO,
            start_time: Instant::now(),
        }
    }

    /// Bytes moved in this run, excluding anything present before resume.
    pub fn transferred(&self) -> u64 {
        self.bytes_written - self.start_offset
    }

    /// Observed throughput of this run in bytes per second.
    pub fn bandwidth(&self) -> f64 {
        let secs = self.start_time.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.transferred() as f64 / secs
    }

    /// Advance the backoff (first `initial`, then doubling) and return it.
    pub fn next_backoff(&mut self, initial: Duration) -> Duration {
        self.backoff = if self.backoff.is_zero() {
            initial
        } else {
            self.backoff.saturating_mul(2)
        };
        self.backoff
    }

    pub fn reset_backoff(&mut self) {
        self.backoff = Duration::ZERO;
    }

    fn advance(&mut self, written: u64) {
        self.bytes_written += written;
    }
}

/// Terminal state of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// All declared bytes were received.
    Done,
    /// The local file already matched size and hash; nothing was fetched.
    UpToDate,
    /// The record is a directory; `created` tells whether it was made locally.
    Directory { created: bool },
    /// Cancelled; the partial file is kept for a later resume.
    Interrupted,
    Failed(FailureReason),
}

/// What a transfer did.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub file_id: String,
    pub target: TransferTarget,
    pub status: TransferStatus,
    /// Offset the transfer resumed from.
    pub start_offset: u64,
    /// Bytes written in this run.
    pub bytes_transferred: u64,
    /// Time spent in the fetch loop.
    pub elapsed: Duration,
    pub integrity: Integrity,
}

impl TransferReport {
    fn without_transfer(record: &FileRecord, target: TransferTarget, status: TransferStatus) -> Self {
        Self {
            file_id: record.id.clone(),
            target,
            status,
            start_offset: 0,
            bytes_transferred: 0,
            elapsed: Duration::ZERO,
            integrity: Integrity::Skipped,
        }
    }

    /// Whether the local destination now holds the full file.
    pub fn is_complete(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Done | TransferStatus::UpToDate | TransferStatus::Directory { .. }
        )
    }

    /// Whether rerunning with resume can continue this transfer.
    pub fn is_resumable(&self) -> bool {
        match &self.status {
            TransferStatus::Interrupted => true,
            TransferStatus::Failed(reason) => reason.is_resumable(),
            _ => false,
        }
    }

    /// Throughput over the newly transferred span.
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / secs
    }
}

enum ResumeDecision {
    From(u64),
    Abort(TransferStatus),
}

/// Downloads catalog records using byte-range requests.
///
/// Cloning is cheap and clones share one HTTP connection pool, so concurrent
/// transfers can each hold their own copy.
#[derive(Clone)]
pub struct Downloader {
    fetcher: RangeFetcher,
    config: TransferConfig,
}

impl Downloader {
    /// Create a downloader with its own HTTP client.
    pub fn new(credentials: Credentials, env: NetworkEnv, config: TransferConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self::with_client(http, credentials, env, config))
    }

    /// Create a downloader sharing an existing HTTP client.
    pub fn with_client(
        http: Client,
        credentials: Credentials,
        env: NetworkEnv,
        config: TransferConfig,
    ) -> Self {
        let planner = ChunkPlanner::new(env, &config);
        let fetcher = RangeFetcher::new(
            http,
            credentials,
            planner,
            config.max_attempts,
            config.initial_backoff,
        );
        Self { fetcher, config }
    }

    /// Download one record according to `options`.
    ///
    /// Rate limits, HTTP failures and cancellation are reported in the
    /// returned [`TransferReport`]. Only local destination errors are
    /// returned as `Err`.
    pub async fn download(
        &self,
        record: &FileRecord,
        options: &TransferOptions,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TransferReport> {
        let destination = target::resolve(record, options);
        let block = self.config.hash_block_size;

        let path = match &destination {
            TransferTarget::DirectoryMarker(path) => {
                let created = options.preserve_tree;
                if created {
                    target::create_directory(path).await?;
                }
                tracing::debug!(path = %path.display(), created, "directory record");
                let status = TransferStatus::Directory { created };
                return Ok(TransferReport::without_transfer(record, destination, status));
            }
            TransferTarget::RegularFile(path) => {
                if target::is_up_to_date(path, record, block).await? {
                    tracing::info!(path = %path.display(), "file is up to date");
                    return Ok(TransferReport::without_transfer(
                        record,
                        destination,
                        TransferStatus::UpToDate,
                    ));
                }
                Some(path.clone())
            }
            TransferTarget::Stdout => None,
        };

        let total = record.byte_len();
        let chunk_size = self
            .fetcher
            .planner()
            .initial_chunk_size(total, options.chunk_size);

        let start_offset = match &path {
            Some(path) if options.resume => {
                let mut tail_state = TransferState::new(0, chunk_size);
                match self.resume_offset(path, record, &mut tail_state, cancel).await? {
                    ResumeDecision::From(offset) => offset,
                    ResumeDecision::Abort(status) => {
                        return Ok(TransferReport::without_transfer(record, destination, status));
                    }
                }
            }
            _ => 0,
        };

        tracing::info!(
            id = %record.id,
            name = %record.name,
            dest = %destination,
            size = total,
            offset = start_offset,
            chunk_size,
            "downloading file"
        );

        let mut sink: Box<dyn AsyncWrite + Send + Unpin> = match &path {
            Some(path) => Box::new(open_destination(path, start_offset > 0).await?),
            None => Box::new(tokio::io::stdout()),
        };

        progress.on_start(total, start_offset);
        let mut state = TransferState::new(start_offset, chunk_size);

        let status = loop {
            if state.bytes_written >= total {
                break TransferStatus::Done;
            }
            if cancel.is_cancelled() {
                break TransferStatus::Interrupted;
            }

            let remaining = total - state.bytes_written;
            let range = ByteRange::new(state.bytes_written, state.chunk_size.min(remaining));

            match self
                .fetcher
                .fetch(&record.download_url, range, &mut state, cancel)
                .await
            {
                ChunkResult::Success(bytes) => {
                    let take = (bytes.len() as u64).min(remaining) as usize;
                    if let Err(e) = sink.write_all(&bytes[..take]).await {
                        let _ = sink.flush().await;
                        return Err(destination_error(&path, e));
                    }
                    state.advance(take as u64);
                    tracing::debug!(range = %range, offset = state.bytes_written, "chunk written");
                    progress.on_progress(state.bytes_written, total);
                }
                ChunkResult::Cancelled => break TransferStatus::Interrupted,
                ChunkResult::RateLimited { attempts } => {
                    break TransferStatus::Failed(FailureReason::RateLimited { attempts })
                }
                ChunkResult::PartialRangeUnsatisfiable(msg) => {
                    break TransferStatus::Failed(FailureReason::Unsatisfiable(msg))
                }
                ChunkResult::Fatal(reason) => break TransferStatus::Failed(reason),
            }
        };

        sink.flush().await.map_err(|e| destination_error(&path, e))?;
        drop(sink);

        let elapsed = state.start_time.elapsed();
        progress.on_finish();

        match &status {
            TransferStatus::Interrupted => tracing::warn!(
                dest = %destination,
                offset = state.bytes_written,
                "transfer interrupted; partial file kept for resume"
            ),
            TransferStatus::Failed(reason) => tracing::error!(
                dest = %destination,
                offset = state.bytes_written,
                resumable = reason.is_resumable(),
                error = %reason,
                "transfer failed"
            ),
            _ => {}
        }

        let integrity = match (&status, &path) {
            (TransferStatus::Done, Some(path)) if !options.skip_checksum => {
                verify::verify_file(path, record.content_hash.as_deref(), block).await?
            }
            _ => Integrity::Skipped,
        };

        if let Integrity::Mismatch { expected, actual } = &integrity {
            tracing::warn!(
                dest = %destination,
                expected = %expected,
                actual = %actual,
                "checksum mismatch; the file may be corrupted"
            );
        }

        Ok(TransferReport {
            file_id: record.id.clone(),
            target: destination,
            status,
            start_offset,
            bytes_transferred: state.transferred(),
            elapsed,
            integrity,
        })
    }

    /// Download several records, at most `jobs` at a time.
    ///
    /// Reports come back in the order of `records`. When any record resolves
    /// to stdout, transfers run one at a time so the stream is not mixed.
    pub async fn download_all<F>(
        &self,
        records: Vec<FileRecord>,
        options: &TransferOptions,
        jobs: usize,
        progress_for: F,
        cancel: &CancellationToken,
    ) -> Vec<Result<TransferReport>>
    where
        F: Fn(&FileRecord) -> Box<dyn ProgressSink>,
    {
        let to_stdout = records
            .iter()
            .any(|record| target::resolve(record, options) == TransferTarget::Stdout);
        let jobs = if to_stdout { 1 } else { jobs.max(1) };

        futures::stream::iter(records)
            .map(|record| {
                let progress = progress_for(&record);
                async move { self.download(&record, options, progress.as_ref(), cancel).await }
            })
            .buffered(jobs)
            .collect()
            .await
    }

    /// Decide where to resume an existing partial file.
    ///
    /// The last block of the local file is compared with the same range of
    /// the remote object; any difference restarts the transfer from zero.
    async fn resume_offset(
        &self,
        path: &Path,
        record: &FileRecord,
        tail_state: &mut TransferState,
        cancel: &CancellationToken,
    ) -> Result<ResumeDecision> {
        let local_len = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            Ok(_) => return Ok(ResumeDecision::From(0)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ResumeDecision::From(0))
            }
            Err(e) => return Err(FetchError::destination(path, e)),
        };

        let total = record.byte_len();
        if local_len == 0 {
            return Ok(ResumeDecision::From(0));
        }
        if local_len >= total {
            tracing::info!(
                path = %path.display(),
                local_len,
                total,
                "local file is not shorter than remote; downloading again"
            );
            return Ok(ResumeDecision::From(0));
        }

        let block = self.config.tail_block_size.clamp(1, local_len);
        let range = ByteRange::new(local_len - block, block);
        let local_tail = read_block(path, range.start, block as usize).await?;

        match self
            .fetcher
            .fetch(&record.download_url, range, tail_state, cancel)
            .await
        {
            ChunkResult::Success(remote) if remote.len() >= local_tail.len()
                && remote[..local_tail.len()] == local_tail[..] =>
            {
                tracing::info!(path = %path.display(), offset = local_len, "resuming partial file");
                Ok(ResumeDecision::From(local_len))
            }
            ChunkResult::Success(_) | ChunkResult::PartialRangeUnsatisfiable(_) => {
                tracing::warn!(
                    path = %path.display(),
                    "partial file does not match remote; downloading from the start"
                );
                Ok(ResumeDecision::From(0))
            }
            ChunkResult::Cancelled => Ok(ResumeDecision::Abort(TransferStatus::Interrupted)),
            ChunkResult::RateLimited { attempts } => Ok(ResumeDecision::Abort(
                TransferStatus::Failed(FailureReason::RateLimited { attempts }),
            )),
            ChunkResult::Fatal(reason) => {
                Ok(ResumeDecision::Abort(TransferStatus::Failed(reason)))
            }
        }
    }
}

/// Open the destination for writing, appending when resuming.
async fn open_destination(path: &Path, append: bool) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::destination(parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }

    options
        .open(path)
        .await
        .map_err(|e| FetchError::destination(path, e))
}

async fn read_block(path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut file = File::open(path)
        .await
        .map_err(|e| FetchError::destination(path, e))?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buffer = vec![0u8; len];
    file.read_exact(&mut buffer).await?;
    Ok(buffer)
}

fn destination_error(path: &Option<PathBuf>, source: std::io::Error) -> FetchError {
    FetchError::destination(
        path.clone().unwrap_or_else(|| PathBuf::from("<stdout>")),
        source,
    )
}
