//! Control socket: server (during `gleaner load start|resume`) and client
//! (for `gleaner load pause|skip|cancel|status`).
//! Protocol: one command per line (`pause`, `resume`, `skip`, `cancel`,
//! `status`); the server answers each with one line.

use anyhow::Result;
use gleaner_core::phase::PhaseController;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Spawns a task that listens on `path` and applies each command line to `controller`.
pub fn spawn_control_listener(
    controller: Arc<PhaseController>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let controller = Arc::clone(&controller);
                    tokio::spawn(async move {
                        let (read, mut write) = stream.into_split();
                        let mut lines = BufReader::new(read).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            let reply = apply(&controller, line.trim());
                            if write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Run one command against the live controller; the reply is `ok`, `error: ...` or JSON.
pub fn apply(controller: &PhaseController, command: &str) -> String {
    let result = match command {
        "pause" => controller.pause_loading().map(|_| "ok".to_string()),
        "resume" => controller.resume_loading().map(|_| "ok".to_string()),
        "skip" => controller.skip_phase().map(|key| format!("ok skipped {key}")),
        "cancel" => {
            controller.cancel_loading();
            Ok("ok".to_string())
        }
        "status" => {
            return serde_json::to_string(&controller.get_current_status())
                .unwrap_or_else(|e| format!("error: {e}"));
        }
        other => return format!("error: unknown command '{other}'"),
    };
    result.unwrap_or_else(|e| format!("error: {e}"))
}

/// Sends one command to a live runner. `None` when no runner is listening.
pub async fn send_command(socket_path: &Path, command: &str) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) => {
            // Stale socket file from a runner that exited uncleanly.
            tracing::debug!(path = %socket_path.display(), "control socket connect: {}", e);
            return Ok(None);
        }
    };
    let (read, mut write) = stream.into_split();
    write.write_all(format!("{command}\n").as_bytes()).await?;
    let mut lines = BufReader::new(read).lines();
    Ok(lines.next_line().await?)
}
