use anyhow::{bail, Context, Result};
use audioconv::{
    BatchConverter, BatchOptions, CleanupQueue, DownloadResponder, FfmpegTranscoder,
    FormatPolicy, TempStorage, UploadedFile, DEFAULT_MAX_FILE_SIZE,
};
use audioconv_api::ServerConfig;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "audioconv",
    about = "Batch audio conversion to WAV, locally or as an HTTP service",
    version,
    author
)]
struct Cli {
    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve(ServerConfig),

    /// Convert local files; several inputs produce one zip archive
    Convert {
        /// Input audio files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory the result is written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// ffmpeg binary used for conversions
        #[arg(long, env = "AUDIOCONV_FFMPEG", default_value = "ffmpeg")]
        ffmpeg: PathBuf,

        /// Directory for intermediate artifacts
        #[arg(long, env = "AUDIOCONV_TEMP_DIR")]
        temp_dir: Option<PathBuf>,

        /// Accepted input extensions
        #[arg(long = "accept", value_delimiter = ',', default_value = "mp3")]
        accepted_formats: Vec<String>,

        /// Largest accepted file, in bytes
        #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
        max_file_size: u64,
    },

    /// Delete leftover artifacts older than the given age
    Sweep {
        /// Directory to sweep
        #[arg(long, env = "AUDIOCONV_TEMP_DIR")]
        temp_dir: Option<PathBuf>,

        /// Minimum age in seconds of a removed artifact
        #[arg(long, default_value_t = 3600)]
        max_age_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(config) => {
            audioconv_api::init_tracing();
            audioconv_api::serve(config).await
        }
        Commands::Convert {
            files,
            output_dir,
            ffmpeg,
            temp_dir,
            accepted_formats,
            max_file_size,
        } => {
            init_cli_tracing(cli.verbose);
            let options = BatchOptions::default()
                .with_formats(FormatPolicy::new(&accepted_formats))
                .with_max_file_size(max_file_size);
            let written =
                convert_files(&files, &output_dir, ffmpeg, temp_dir, options).await?;
            println!("✓ Wrote {}", written.display());
            Ok(())
        }
        Commands::Sweep {
            temp_dir,
            max_age_secs,
        } => {
            init_cli_tracing(cli.verbose);
            let storage = open_storage(temp_dir)?;
            let report = storage.sweep(Duration::from_secs(max_age_secs)).await?;
            println!(
                "Swept {}: {} removed, {} kept, {} failed",
                storage.base().display(),
                report.removed,
                report.kept,
                report.failed
            );
            Ok(())
        }
    }
}

fn init_cli_tracing(verbose: bool) {
    let filter = if verbose { "audioconv=info" } else { "audioconv=warn" };
    audioconv_api::init_tracing_with(filter);
}

fn open_storage(temp_dir: Option<PathBuf>) -> Result<TempStorage> {
    let base = temp_dir.unwrap_or_else(TempStorage::default_base);
    TempStorage::open(&base)
        .with_context(|| format!("failed to open temp directory {}", base.display()))
}

async fn convert_files(
    files: &[PathBuf],
    output_dir: &Path,
    ffmpeg: PathBuf,
    temp_dir: Option<PathBuf>,
    options: BatchOptions,
) -> Result<PathBuf> {
    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        uploads.push(UploadedFile::new(name, bytes));
    }

    let storage = Arc::new(open_storage(temp_dir)?);
    let (cleanup, _worker) = CleanupQueue::spawn(storage.clone());
    let converter = BatchConverter::new(
        storage.clone(),
        Arc::new(FfmpegTranscoder::new(ffmpeg)),
        cleanup.clone(),
        options,
    );
    let downloads = DownloadResponder::new(storage, cleanup.clone());

    let result = run_batch(&converter, &downloads, uploads, output_dir).await;

    cleanup.flush().await;
    result
}

async fn run_batch(
    converter: &BatchConverter,
    downloads: &DownloadResponder,
    uploads: Vec<UploadedFile>,
    output_dir: &Path,
) -> Result<PathBuf> {
    let outcome = converter.convert_batch(uploads).await?;
    let download = downloads.retrieve(&outcome.storage_name).await?;
    save_download(download, output_dir).await
}

async fn save_download(download: audioconv::Download, output_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let destination = output_dir.join(&download.display_name);
    if tokio::fs::try_exists(&destination).await? {
        bail!("{} already exists", destination.display());
    }

    let mut file = tokio::fs::File::create(&destination)
        .await
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let mut stream = download.into_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;

    info!(path = %destination.display(), "result written");
    Ok(destination)
}
