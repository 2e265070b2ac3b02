//! Headless capture client: select, crop, preview and upload one avatar.

use anyhow::{Context, Result, bail};
use avatar_studio::{
    client::{
        Command, Studio, StudioEvent, StudioSettings, TransportError, UploadClient, UploadReceipt,
    },
    format::ImageKind,
    imaging::{CompressionController, CropInput, OutputArtifact, compress},
};
use bytes::Bytes;
use clap::Parser;
use std::{io::Write, path::PathBuf, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Lowest quality `--auto-quality` will settle for.
const AUTO_QUALITY_FLOOR: f32 = 0.3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Crop, compress and upload an avatar")]
struct Args {
    /// Photo to upload (JPEG, PNG or WebP)
    input: PathBuf,

    /// Avatar server base URL
    #[arg(long, default_value = "http://localhost:4000")]
    server: String,

    /// Existing session token; skips the login request
    #[arg(long)]
    token: Option<String>,

    /// Login name, used when no token is given
    #[arg(long, default_value = "admin")]
    username: String,

    /// Login password, used when no token is given
    #[arg(long)]
    password: Option<String>,

    /// Declared type of the input; guessed from the extension when absent
    #[arg(long)]
    mime: Option<String>,

    /// Zoom factor inside the crop stage
    #[arg(long, default_value_t = 1.0)]
    zoom: f64,

    /// Horizontal drag in stage pixels, applied after zooming
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pan_x: f64,

    /// Vertical drag in stage pixels, applied after zooming
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pan_y: f64,

    /// JPEG quality in (0, 1]; the upper bound for --auto-quality
    #[arg(long, default_value_t = compress::DEFAULT_QUALITY)]
    quality: f32,

    /// Search for the highest quality that fits the budget
    #[arg(long)]
    auto_quality: bool,

    /// Byte budget for the compressed avatar
    #[arg(long, default_value_t = compress::DEFAULT_BYTE_BUDGET)]
    budget: usize,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Extra attempts after a failed upload, reusing the same artifact
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Also write the compressed avatar here
    #[arg(long)]
    output: Option<PathBuf>,

    /// Stop after compressing; do not contact the server
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // --- Select ---
    let raw = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("reading {}", args.input.display()))?;
    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "avatar".into());
    let declared_mime = match &args.mime {
        Some(mime) => mime.clone(),
        None => ImageKind::from_extension(&file_name)
            .map(|kind| kind.mime().to_string())
            .with_context(|| format!("cannot guess the type of {file_name}; pass --mime"))?,
    };

    let mut studio = Studio::new(StudioSettings {
        byte_budget: args.budget,
        ..StudioSettings::default()
    });
    studio.dispatch(StudioEvent::FileSelected {
        bytes: Bytes::from(raw),
        declared_mime,
        file_name,
    })?;

    // --- Crop ---
    if args.zoom != 1.0 {
        studio.dispatch(StudioEvent::Crop(CropInput::Zoom(args.zoom)))?;
    }
    if args.pan_x != 0.0 || args.pan_y != 0.0 {
        studio.dispatch(StudioEvent::Crop(CropInput::DragStart { x: 0.0, y: 0.0 }))?;
        studio.dispatch(StudioEvent::Crop(CropInput::DragMove {
            x: args.pan_x,
            y: args.pan_y,
        }))?;
        studio.dispatch(StudioEvent::Crop(CropInput::DragEnd))?;
    }

    // --- Preview ---
    studio.dispatch(StudioEvent::QualityChanged(args.quality))?;
    studio.dispatch(StudioEvent::CommitCrop)?;
    if args.auto_quality {
        let preview = studio.preview().context("crop did not produce a preview")?;
        let best = CompressionController::new(args.budget)
            .search_quality(&preview.bitmap, AUTO_QUALITY_FLOOR, args.quality)
            .context("searching for a quality that fits the budget")?;
        studio.dispatch(StudioEvent::QualityChanged(best.quality))?;
    }

    let artifact = studio
        .preview()
        .map(|p| p.artifact().clone())
        .context("crop did not produce a preview")?;
    eprintln!(
        "avatar: {}x{} JPEG, {} bytes at quality {:.2} (budget {})",
        artifact.width,
        artifact.height,
        artifact.len(),
        artifact.quality,
        args.budget
    );
    if let Some(path) = &args.output {
        tokio::fs::write(path, &artifact.bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(warning) = studio.budget_warning() {
        bail!("{warning}");
    }
    if args.dry_run {
        return Ok(());
    }

    // --- Upload ---
    let client = UploadClient::new(&args.server, Duration::from_secs(args.timeout_secs.max(1)))?;
    let token = match args.token {
        Some(token) => token,
        None => {
            let password = args
                .password
                .as_deref()
                .context("either --token or --password is required")?;
            client
                .login(&args.username, password)
                .await
                .context("logging in")?
                .session_token
        }
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut command = studio.dispatch(StudioEvent::RequestUpload)?;
    let mut retries_left = args.retries;
    while let Some(Command::Upload { artifact }) = command.take() {
        match send(&client, &token, &artifact, &mut studio, &cancel).await {
            Ok(receipt) => {
                eprintln!();
                studio.dispatch(StudioEvent::UploadSucceeded {
                    avatar_url: receipt.temp_url().map(str::to_string),
                })?;
            }
            Err(TransportError::Cancelled) => {
                eprintln!();
                studio.dispatch(StudioEvent::UploadCancelled)?;
                bail!("upload cancelled");
            }
            Err(err) => {
                eprintln!();
                studio.dispatch(StudioEvent::UploadFailed {
                    message: err.to_string(),
                })?;
                if retries_left == 0 {
                    return Err(err).context("uploading avatar");
                }
                retries_left -= 1;
                tracing::warn!("upload failed ({}), retrying; {} left", err, retries_left);
                command = studio.dispatch(StudioEvent::Retry)?;
            }
        }
    }

    match studio.last_upload() {
        Some(done) => {
            println!(
                "{}",
                done.avatar_url.as_deref().unwrap_or("uploaded (no path returned)")
            );
            tracing::debug!(preview_len = done.preview_data_url.len(), "preview data url ready");
        }
        None => bail!("upload finished without a result"),
    }
    Ok(())
}

/// Run one upload, feeding progress back into the studio as it arrives.
async fn send(
    client: &UploadClient,
    token: &str,
    artifact: &OutputArtifact,
    studio: &mut Studio,
    cancel: &CancellationToken,
) -> Result<UploadReceipt, TransportError> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let upload = client.upload(
        token,
        artifact,
        move |progress| {
            let _ = tx.send(progress);
        },
        cancel,
    );
    tokio::pin!(upload);

    loop {
        tokio::select! {
            Some(progress) = rx.recv() => {
                let fraction = progress.fraction();
                if let Err(err) = studio.dispatch(StudioEvent::UploadProgress(fraction)) {
                    tracing::debug!("progress ignored: {}", err);
                }
                eprint!("\ruploading {:>3.0}%", fraction * 100.0);
                let _ = std::io::stderr().flush();
            }
            result = &mut upload => return result,
        }
    }
}
