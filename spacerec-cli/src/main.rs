mod cli;
mod logging;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use spacerec_engine::{
    AuthStatus, CaptureEvent, DownloadOptions, SpaceRecorder, WatcherEventKind, WatcherHandle,
    capture::CaptureEventSink,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::{Args, Command};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _guard = match logging::init_logging(args.verbose, args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let recorder = SpaceRecorder::init(args.recorder_config())
        .context("Failed to initialize recorder")?;

    let AuthStatus {
        has_primary,
        has_secondary,
    } = recorder.auth_status();
    if !(has_primary && has_secondary) {
        warn!(has_primary, has_secondary, "Credentials incomplete, status lookups may be rejected");
    }

    let result = match args.command {
        Command::Watch { targets, .. } => {
            watch(&recorder, &targets, args.sub_dir.clone()).await
        }
        Command::Capture {
            playlist_url,
            filename,
            ..
        } => capture(&recorder, &playlist_url, filename, args.sub_dir.clone()).await,
    };

    recorder.shutdown().await;
    result
}

async fn watch(
    recorder: &SpaceRecorder,
    targets: &[String],
    sub_dir: Option<String>,
) -> anyhow::Result<()> {
    let options = DownloadOptions {
        filename: None,
        sub_dir,
    };

    let mut handles: Vec<Arc<WatcherHandle>> = Vec::with_capacity(targets.len());
    for target in targets {
        let handle = if target.contains('/') {
            recorder.download_by_url(target, options.clone())
        } else {
            recorder.download_by_space_id(target, options.clone())
        }
        .with_context(|| format!("Invalid target: {target}"))?;
        info!(resource_id = %handle.id(), "Watching");
        handles.push(handle);
    }

    let reporter = tokio::spawn(report_watcher_events(handles.clone()));

    tokio::select! {
        states = join_all(handles.iter().map(|handle| handle.wait())) => {
            reporter.abort();
            let failed = states.iter().filter(|state| state.is_failed()).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} watchers failed", states.len());
            }
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping watchers");
            reporter.abort();
            Ok(())
        }
    }
}

async fn report_watcher_events(handles: Vec<Arc<WatcherHandle>>) {
    let receivers = handles.iter().map(|handle| handle.subscribe());
    join_all(receivers.map(|mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let id = &*event.resource_id;
                    match &event.kind {
                        WatcherEventKind::Scheduled => info!(resource_id = %id, "Scheduled"),
                        WatcherEventKind::Live => info!(resource_id = %id, "Live"),
                        WatcherEventKind::Capturing { manifest_url } => {
                            info!(resource_id = %id, manifest_url = %manifest_url, "Capturing")
                        }
                        WatcherEventKind::Progress {
                            bytes_written,
                            total_chunks,
                            chunks_written,
                        } => info!(
                            resource_id = %id,
                            bytes_written,
                            chunks_written,
                            total_chunks,
                            "Progress"
                        ),
                        WatcherEventKind::Complete { output_path } => {
                            info!(resource_id = %id, path = %output_path.display(), "Recorded")
                        }
                        WatcherEventKind::Error { cause } => {
                            error!(resource_id = %id, error = %cause, "Watcher failed")
                        }
                        WatcherEventKind::Cancelled => info!(resource_id = %id, "Cancelled"),
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped watcher events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }))
    .await;
}

async fn capture(
    recorder: &SpaceRecorder,
    playlist_url: &str,
    filename: Option<String>,
    sub_dir: Option<String>,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_event: CaptureEventSink = Arc::new(|event: CaptureEvent| match event {
        CaptureEvent::Started {
            output_path, live, ..
        } => info!(path = %output_path.display(), live, "Capture started"),
        CaptureEvent::Progress {
            bytes_written,
            total_chunks,
            chunks_written,
        } => info!(bytes_written, chunks_written, total_chunks, "Progress"),
        _ => {}
    });

    let download = recorder.download_by_playlist_url(
        playlist_url,
        DownloadOptions { filename, sub_dir },
        Some(on_event),
        cancel.clone(),
    );
    tokio::pin!(download);

    let result = tokio::select! {
        result = &mut download => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling capture");
            cancel.cancel();
            download.await
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_cancelled() => {
            info!("Capture cancelled, partial output removed");
            return Ok(());
        }
        Err(e) => return Err(e).context("Capture failed"),
    };

    info!(
        path = %outcome.output_path.display(),
        bytes = outcome.bytes_written,
        chunks = outcome.chunks_written,
        "Capture complete"
    );
    Ok(())
}
