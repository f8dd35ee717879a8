//! Client binary. `upload <path>` or `download <filename> <saveAs>` per §6.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fsmesh::client::{chunk_path, download_file, upload_chunks, DispatcherClient};
use fsmesh::config::load_config;
use tracing::info;

#[derive(Parser)]
#[command(name = "client", about = "Chunking client for the blob store")]
struct Cli {
    /// Dispatcher base URL, e.g. http://127.0.0.1:9000.
    #[arg(long)]
    dispatcher_addr: String,

    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory rolling log files are written under.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split and upload a local file.
    Upload { path: PathBuf },
    /// Download a previously-uploaded file and save it locally.
    Download { filename: String, save_as: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let _log_guard = fsmesh::telemetry::init("client", &cli.log_dir, &config.common.log_level);
    let dispatcher = DispatcherClient::new(cli.dispatcher_addr);
    let http = reqwest::Client::new();

    match cli.command {
        Commands::Upload { path } => {
            let filename = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("upload path has no file name"))?
                .to_string_lossy()
                .to_string();

            let pieces = chunk_path(&path, config.common.chunk_size).await?;
            info!(filename = filename.as_str(), chunks = pieces.len(), "chunked file");

            let plan = dispatcher.request_upload_plan(&filename, &pieces).await?;
            upload_chunks(&http, pieces, &plan).await?;
            info!(filename = filename.as_str(), "upload succeeded");
        }
        Commands::Download { filename, save_as } => {
            let plan = dispatcher.get_file_locations(&filename).await?;
            download_file(&http, plan, &save_as).await?;
            info!(filename = filename.as_str(), path = %save_as.display(), "download succeeded");
        }
    }

    Ok(())
}
