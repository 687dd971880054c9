use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bugrecorder::finalizer::{FileSessionStore, PersistedSessionRecord, SessionStore};
use bugrecorder::report::{format_console_logs, format_network_logs, format_report};
use bugrecorder::session::SessionBuffers;
use bugrecorder::{RecorderConfig, SessionId};
use clap::Parser;
use serde::Serialize;
use tokio::fs;
use tracing::{error, info};

/// Export persisted recordings as plain-text report bundles.
#[derive(Parser, Debug)]
#[command(name = "recordings")]
#[command(about = "Export bugrecorder sessions into report bundles")]
struct Args {
    /// Recording to export (defaults to every recording in the index)
    id: Option<SessionId>,

    /// Output base directory
    #[arg(short, long, default_value = "./reports")]
    output: PathBuf,

    /// Path to bugrecorder configuration file (for the storage path)
    #[arg(short = 'c', long, default_value = "bugrecorder.toml")]
    config: PathBuf,

    /// Overwrite existing bundles instead of skipping
    #[arg(long)]
    overwrite: bool,
}

#[derive(Debug, Serialize, Default)]
struct ExportedFiles {
    report: String,
    console: String,
    network: String,
    record: String,
    media: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = RecorderConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let store = FileSessionStore::new(config.storage_path(), config.storage.max_recent_records);

    let ids = match args.id {
        Some(id) => vec![id],
        None => store
            .list_recent()
            .await
            .context("Failed to read recordings index")?
            .into_iter()
            .map(|summary| summary.id)
            .collect(),
    };

    if ids.is_empty() {
        return Err(anyhow!("No recordings found in {}", store.root().display()));
    }

    info!("Exporting {} recording(s) into {}", ids.len(), args.output.display());

    for id in ids {
        match export_recording(&store, &id, &args.output, args.overwrite).await {
            Ok(files) => println!("{} -> {}", id, files.report),
            Err(e) => error!("Failed to export {}: {:#}", id, e),
        }
    }

    Ok(())
}

async fn export_recording(
    store: &FileSessionStore,
    id: &SessionId,
    output: &Path,
    overwrite: bool,
) -> Result<ExportedFiles> {
    let record = store
        .load_record(id)
        .await
        .with_context(|| format!("Failed to load recording {}", id))?;
    let buffers = store
        .load_buffers(id)
        .await
        .with_context(|| format!("Failed to load buffers for {}", id))?;

    let bundle = output.join(id.storage_key());
    if fs::try_exists(&bundle).await.unwrap_or(false) && !overwrite {
        return Err(anyhow!(
            "Bundle {} exists (use --overwrite to replace)",
            bundle.display()
        ));
    }
    fs::create_dir_all(&bundle)
        .await
        .with_context(|| format!("Failed to create bundle directory {}", bundle.display()))?;

    write_bundle(&bundle, &record, &buffers).await
}

async fn write_bundle(
    bundle: &Path,
    record: &PersistedSessionRecord,
    buffers: &SessionBuffers,
) -> Result<ExportedFiles> {
    let mut files = ExportedFiles {
        report: write_text(bundle, "report.txt", format_report(record, buffers)).await?,
        console: write_text(bundle, "console_logs.txt", format_console_logs(&buffers.console))
            .await?,
        network: write_text(bundle, "network_logs.txt", format_network_logs(&buffers.network))
            .await?,
        record: write_text(bundle, "record.json", serde_json::to_string_pretty(record)?).await?,
        media: None,
    };

    if let Some(media) = &buffers.media {
        let path = bundle.join(format!("recording.{}", media.file_extension()));
        fs::write(&path, &media.buffer)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        files.media = Some(path.display().to_string());
    }

    let manifest = bundle.join("manifest.json");
    fs::write(&manifest, serde_json::to_vec_pretty(&files)?)
        .await
        .with_context(|| format!("Failed to write {}", manifest.display()))?;

    Ok(files)
}

async fn write_text(dir: &Path, name: &str, content: String) -> Result<String> {
    let path = dir.join(name);
    fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugrecorder::session::{ConsoleLogPayload, IngestEvent, MediaCapture, NetworkEventPayload, Session};
    use bugrecorder::{CaptureOptions, TargetContext};
    use bytes::Bytes;
    use serde_json::json;
    use std::time::SystemTime;
    use tempfile::TempDir;

    async fn persist_sample(store: &FileSessionStore) -> Result<SessionId> {
        let mut session = Session::new(TargetContext::new("tab-5"), CaptureOptions::default());
        let now = SystemTime::now();
        session.mark_active(now);
        session.ingest(
            IngestEvent::Console(ConsoleLogPayload {
                level: "error".to_string(),
                args: vec![json!("TypeError: cart is undefined")],
                timestamp: "2024-05-01T10:15:30.000Z".to_string(),
                url: "https://shop.example.com/cart".to_string(),
            }),
            now,
        )?;
        session.ingest(
            IngestEvent::Network(NetworkEventPayload {
                method: "Network.requestWillBeSent".to_string(),
                params: json!({"requestId": "4", "request": {"url": "https://api.example.com/cart", "method": "GET"}}),
            }),
            now,
        )?;
        session.attach_media(MediaCapture::new(Bytes::from_static(b"webm-bytes"), "video/webm"));

        let frozen = session.freeze(now);
        let record = PersistedSessionRecord::from_session(&frozen);
        store.save(&record, &frozen.buffers).await?;
        Ok(frozen.id)
    }

    #[tokio::test]
    async fn export_writes_report_bundle() -> Result<()> {
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let store = FileSessionStore::new(temp_dir.path().join("store"), 10);
        let id = persist_sample(&store).await?;
        let output = temp_dir.path().join("out");

        let files = export_recording(&store, &id, &output, false).await?;

        let report = std::fs::read_to_string(&files.report)?;
        assert!(report.contains("[ERROR] [URL: https://shop.example.com/cart]"));
        assert!(report.contains("URL: https://api.example.com/cart"));

        let media = files.media.context("Expected media file")?;
        assert!(media.ends_with("recording.webm"));
        assert_eq!(std::fs::read(media)?, b"webm-bytes");
        assert!(output.join(id.storage_key()).join("manifest.json").exists());

        Ok(())
    }

    #[tokio::test]
    async fn export_refuses_to_overwrite_without_flag() -> Result<()> {
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let store = FileSessionStore::new(temp_dir.path().join("store"), 10);
        let id = persist_sample(&store).await?;
        let output = temp_dir.path().join("out");

        export_recording(&store, &id, &output, false).await?;
        assert!(export_recording(&store, &id, &output, false).await.is_err());
        assert!(export_recording(&store, &id, &output, true).await.is_ok());

        Ok(())
    }

    #[tokio::test]
    async fn export_unknown_recording_fails() -> Result<()> {
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let store = FileSessionStore::new(temp_dir.path().join("store"), 10);

        let result = export_recording(&store, &SessionId::new(), temp_dir.path(), false).await;

        assert!(result.is_err());
        Ok(())
    }
}
