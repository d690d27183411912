//! drive_fetch CLI - Download files from Google Drive.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use drive_fetch::catalog::DRIVE_API_BASE;
use drive_fetch::config::MIB;
use drive_fetch::models::{format_rate, format_size};
use drive_fetch::progress::{NoProgress, ProgressSink};
use drive_fetch::{
    extract_id, Credentials, Downloader, DriveCatalog, FileRecord, Integrity, NetworkSetting,
    TransferConfig, TransferOptions, TransferReport, TransferStatus,
};

const BAR_TEMPLATE: &str =
    "{prefix:>20.cyan} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Download files from Google Drive with resume and checksum verification.
#[derive(Parser)]
#[command(name = "drive_fetch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File URLs or IDs to download.
    #[arg(required = true)]
    files: Vec<String>,

    /// Output file name. Use -o - to write to stdout.
    #[arg(long, short = 'o')]
    output: Option<String>,

    /// Use the remote file name as the output name (default unless -o is given).
    #[arg(long, short = 'O')]
    remote_name: bool,

    /// Local parent directory for downloaded files.
    #[arg(long, short = 'd', default_value = ".")]
    output_dir: PathBuf,

    /// Recreate the remote path below the output directory. Overrides -o.
    #[arg(long, short = 'P')]
    preserve: bool,

    /// Continue a partially downloaded file.
    #[arg(long = "continue", short = 'c')]
    resume: bool,

    /// Do not verify the MD5 checksum after downloading.
    #[arg(long)]
    no_verify: bool,

    /// Initial chunk size in MiB.
    #[arg(long, env = "DRIVE_FETCH_CHUNK_SIZE", value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: Option<u64>,

    /// Size of a public file in bytes, when the server does not declare it.
    #[arg(long, short = 's')]
    size: Option<u64>,

    /// Network environment: auto, cloud or generic.
    #[arg(long, env = "DRIVE_FETCH_NETWORK", default_value = "auto")]
    network: NetworkSetting,

    /// Number of files downloaded at the same time.
    #[arg(long, short = 'j', default_value_t = 1)]
    jobs: usize,

    /// OAuth2 access token. Without one, files are fetched through public share links.
    #[arg(long, env = "DRIVE_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Drive API base URL.
    #[arg(long, env = "DRIVE_API_BASE", default_value = DRIVE_API_BASE)]
    api_base: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Suppress progress bars and informational messages.
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Log every chunk.
    #[arg(long, short = 'v', conflicts_with = "quiet")]
    verbose: bool,
}

impl Cli {
    fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            output_dir: self.output_dir.clone(),
            output_name: self.output.clone(),
            use_remote_name: self.remote_name || self.output.is_none(),
            preserve_tree: self.preserve,
            resume: self.resume,
            skip_checksum: self.no_verify,
            chunk_size: self.chunk_size.map(|mib| mib.saturating_mul(MIB)),
        }
    }
}

/// Progress sink drawing an indicatif bar on stderr.
struct BarProgress(ProgressBar);

impl ProgressSink for BarProgress {
    fn on_start(&self, total: u64, offset: u64) {
        self.0.set_length(total);
        self.0.set_position(offset);
        self.0.reset_eta();
    }

    fn on_progress(&self, current: u64, _total: u64) {
        self.0.set_position(current);
    }

    fn on_finish(&self) {
        self.0.finish();
    }
}

fn init_logging(cli: &Cli) {
    let default = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "drive_fetch=debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let options = cli.transfer_options();
    if cli.files.len() > 1 && !options.preserve_tree {
        if let Some(name) = options.output_name.as_deref().filter(|n| *n != "-") {
            anyhow::bail!("Cannot write {} files to a single output name: {}", cli.files.len(), name);
        }
    }
    if cli.files.len() > 1 && cli.size.is_some() {
        anyhow::bail!("--size applies to a single file");
    }

    let config = TransferConfig {
        request_timeout: Duration::from_secs(cli.timeout.max(1)),
        ..TransferConfig::default()
    };
    let credentials = Credentials::from_token(cli.token.clone());
    let env = cli.network.resolve();

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let catalog = DriveCatalog::with_base_url(http.clone(), credentials.clone(), &cli.api_base);
    let downloader = Downloader::with_client(http, credentials, env, config);

    let mut records: Vec<FileRecord> = Vec::new();
    for file in &cli.files {
        let file_id =
            extract_id(file).with_context(|| format!("Invalid file URL or ID: {}", file))?;
        let record = catalog
            .lookup(&file_id, cli.size)
            .await
            .with_context(|| format!("Failed to look up file: {}", file_id))?;
        records.push(record);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping transfers");
                cancel.cancel();
            }
        });
    }

    let bars = MultiProgress::with_draw_target(if cli.quiet {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stderr()
    });
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .context("Invalid progress bar template")?
        .progress_chars("=> ");

    let names: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
    let reports = downloader
        .download_all(
            records,
            &options,
            cli.jobs,
            |record| -> Box<dyn ProgressSink> {
                if cli.quiet || record.is_directory() {
                    return Box::new(NoProgress);
                }
                let bar = bars.add(ProgressBar::new(record.byte_len()));
                bar.set_style(style.clone());
                bar.set_prefix(record.basename().to_string());
                Box::new(BarProgress(bar))
            },
            &cancel,
        )
        .await;

    let unfinished = report_all(&names, reports, cli.quiet);
    if unfinished > 0 {
        anyhow::bail!("{} of {} file(s) did not finish", unfinished, names.len());
    }

    Ok(())
}

/// Print every outcome and return how many files did not finish.
fn report_all(
    names: &[String],
    reports: Vec<drive_fetch::Result<TransferReport>>,
    quiet: bool,
) -> usize {
    let mut unfinished = 0;
    for (name, report) in names.iter().zip(reports) {
        match report {
            Ok(report) => {
                if !report.is_complete() {
                    unfinished += 1;
                }
                print_summary(name, &report, quiet);
            }
            Err(e) => {
                unfinished += 1;
                eprintln!("Failed to download {}: {}", name, e);
            }
        }
    }
    unfinished
}

fn print_summary(name: &str, report: &TransferReport, quiet: bool) {
    match &report.status {
        TransferStatus::Done => {
            if !quiet {
                eprintln!(
                    "Downloaded {} in {:.1} seconds at {}",
                    format_size(report.bytes_transferred),
                    report.elapsed.as_secs_f64(),
                    format_rate(report.bytes_per_sec())
                );
            }
        }
        TransferStatus::UpToDate => {
            if !quiet {
                eprintln!("File {} is up to date.", report.target);
            }
        }
        TransferStatus::Directory { created } => {
            if *created && !quiet {
                eprintln!("Created directory {}", report.target);
            }
        }
        TransferStatus::Interrupted => {
            eprintln!(
                "Interrupted {} after {}; rerun with -c to resume.",
                name,
                format_size(report.start_offset + report.bytes_transferred)
            );
        }
        TransferStatus::Failed(reason) => {
            if reason.is_resumable() {
                eprintln!("Failed to download {}: {} (rerun with -c to resume)", name, reason);
            } else {
                eprintln!("Failed to download {}: {}", name, reason);
            }
        }
    }

    if let Integrity::Mismatch { expected, actual } = &report.integrity {
        eprintln!(
            "Warning: checksum mismatch for {} (expected {}, got {})",
            report.target, expected, actual
        );
    }
}
