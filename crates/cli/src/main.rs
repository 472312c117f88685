//! Command-line client for tessera.

mod api_client;

use anyhow::{Context, Result};
use api_client::{ApiClient, ApiFailure, RetryPolicy};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::path::{Path, PathBuf};
use tessera_core::upload::{InitUploadRequest, UploadStatusResponse, min_chunks};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Upload images to a tessera server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server API URL
    #[arg(long, env = "TESSERA_SERVER", default_value = "http://localhost:8000")]
    server: String,

    /// API token
    #[arg(long, env = "TESSERA_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file in chunks and print its public URL
    Upload {
        /// File to upload
        file: PathBuf,
        /// Alt text / link text used in the snippets
        #[arg(long)]
        display_name: Option<String>,
        /// Maximum chunk requests in flight
        #[arg(long, default_value_t = 4)]
        parallel: usize,
        /// Retries per chunk on transport errors and 5xx responses
        #[arg(long, default_value_t = 3)]
        retries: u32,
        /// Chunk length in bytes (must not exceed the server's chunk size)
        #[arg(long, default_value_t = tessera_core::DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Show progress of an upload session
    Status {
        session_id: String,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Abort an upload session and discard its chunks
    Abort {
        session_id: String,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Show the principal the token authenticates as
    Whoami {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Check server health and version
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Upload {
            file,
            display_name,
            parallel,
            retries,
            chunk_size,
            api,
        } => {
            let options = UploadOptions {
                display_name,
                parallel,
                chunk_size,
            };
            let retry = RetryPolicy {
                max_retries: retries,
                ..RetryPolicy::default()
            };
            let client = authenticated_client(&api)?.with_retry(retry);
            handle_upload_command(&client, &file, options).await
        }
        Commands::Status { session_id, api } => {
            let client = authenticated_client(&api)?;
            let status = client.upload_status(&session_id).await?;
            print_status(&status);
            Ok(())
        }
        Commands::Abort { session_id, api } => {
            let client = authenticated_client(&api)?;
            client.abort(&session_id).await?;
            println!("Aborted upload {session_id}");
            Ok(())
        }
        Commands::Whoami { api } => {
            let client = authenticated_client(&api)?;
            let whoami = client.whoami().await?;
            println!("Principal: {}", whoami.principal);
            println!("Authenticated via: {}", whoami.authenticated_via);
            Ok(())
        }
        Commands::Health { api } => handle_health_command(&api).await,
    }
}

fn authenticated_client(api: &ApiArgs) -> Result<ApiClient> {
    let token = api
        .token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("no API token: pass --token or set TESSERA_TOKEN"))?;
    ApiClient::new(&api.server, Some(token.trim()))
}

async fn handle_health_command(api: &ApiArgs) -> Result<()> {
    let client = ApiClient::new(&api.server, None)?;
    let health = client.health().await?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

struct UploadOptions {
    display_name: Option<String>,
    parallel: usize,
    chunk_size: u64,
}

/// Split `data` into chunks of at most `chunk_size` bytes. An empty file
/// becomes one empty chunk.
fn split_chunks(data: &Bytes, chunk_size: u64) -> Result<Vec<Bytes>> {
    if chunk_size == 0 {
        anyhow::bail!("chunk size must be greater than 0");
    }
    if data.is_empty() {
        return Ok(vec![Bytes::new()]);
    }
    let step = usize::try_from(chunk_size).unwrap_or(usize::MAX);
    Ok((0..data.len())
        .step_by(step)
        .map(|start| data.slice(start..data.len().min(start.saturating_add(step))))
        .collect())
}

async fn handle_upload_command(
    client: &ApiClient,
    path: &Path,
    options: UploadOptions,
) -> Result<()> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("{} has no usable file name", path.display()))?
        .to_string();
    let data = Bytes::from(
        tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
    );

    let chunks = split_chunks(&data, options.chunk_size)?;
    debug_assert_eq!(
        chunks.len() as u64,
        min_chunks(data.len() as u64, options.chunk_size)
    );
    let total_chunks = u32::try_from(chunks.len()).context("file has too many chunks")?;

    let init = client
        .init_upload(&InitUploadRequest {
            filename: filename.clone(),
            file_size: data.len() as u64,
            total_chunks,
            display_name: options.display_name,
        })
        .await
        .map_err(|e| with_chunk_size_hint(e, options.chunk_size))?;
    let session_id = init.session_id;
    tracing::info!(%session_id, total_chunks, "Upload session opened");
    eprintln!(
        "Uploading {filename} ({}) in {total_chunks} chunk(s)",
        format_bytes(data.len() as u64)
    );

    if let Err(e) = upload_chunks(client, &session_id, chunks, options.parallel).await {
        eprintln!("Upload incomplete; inspect with `tessera status {session_id}` or discard with `tessera abort {session_id}`");
        return Err(e);
    }

    let artifact = client
        .merge(&session_id)
        .await
        .with_context(|| format!("merge of session {session_id} failed"))?;

    println!("URL: {}", artifact.url);
    println!("Markdown: {}", artifact.markdown_snippet);
    println!("HTML: {}", artifact.html_snippet);
    Ok(())
}

/// The server rejects an init whose chunk count implies chunks larger than
/// its own limit. Point the user at `--chunk-size` in that case.
fn with_chunk_size_hint(err: anyhow::Error, chunk_size: u64) -> anyhow::Error {
    let rejected_layout = err.downcast_ref::<ApiFailure>().is_some_and(|f| {
        f.code.as_deref() == Some("validation_error") && f.message.contains("chunks of at most")
    });
    if rejected_layout {
        err.context(format!(
            "server rejected {chunk_size}-byte chunks; retry with a smaller --chunk-size"
        ))
    } else {
        err
    }
}

async fn upload_chunks(
    client: &ApiClient,
    session_id: &str,
    chunks: Vec<Bytes>,
    max_parallel: usize,
) -> Result<()> {
    let total_chunks = u32::try_from(chunks.len()).context("file has too many chunks")?;
    let parallel = max_parallel.max(1);
    let mut in_flight = FuturesUnordered::new();
    let started = std::time::Instant::now();

    for (index, data) in (0u32..).zip(chunks) {
        in_flight.push(async move {
            client
                .upload_chunk(session_id, index, total_chunks, data)
                .await
                .with_context(|| format!("chunk {index} failed"))
        });

        if in_flight.len() >= parallel
            && let Some(result) = in_flight.next().await
        {
            report_progress(result?.uploaded_chunks, total_chunks);
        }
    }

    while let Some(result) = in_flight.next().await {
        report_progress(result?.uploaded_chunks, total_chunks);
    }

    tracing::debug!(elapsed = ?started.elapsed(), "All chunks uploaded");
    Ok(())
}

fn report_progress(uploaded: u32, total: u32) {
    eprintln!("  {uploaded}/{total} chunks");
}

fn print_status(status: &UploadStatusResponse) {
    println!("Session: {}", status.session_id);
    println!("File: {}", status.filename);
    println!(
        "Chunks: {}/{} ({} missing)",
        status.uploaded_chunks, status.total_chunks, status.missing_chunks
    );
    println!("State: {:?}", status.state);
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
