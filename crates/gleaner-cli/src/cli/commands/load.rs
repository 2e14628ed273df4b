//! `gleaner load ...` – drive and control a phased rollout.

use anyhow::{bail, Result};
use gleaner_core::config::GleanerConfig;
use gleaner_core::phase::{PhaseController, PhaseOutcome, Strategy};
use std::sync::Arc;

use crate::cli::control_socket;
use crate::cli::runtime::{control_socket_path, Runtime};
use crate::cli::LoadAction;

pub async fn run_load(cfg: &GleanerConfig, action: LoadAction) -> Result<()> {
    match action {
        LoadAction::Start { strategy, manual } => start(cfg, strategy, manual).await,
        LoadAction::Resume => resume(cfg).await,
        LoadAction::Pause => control(cfg, "pause").await,
        LoadAction::Skip => control(cfg, "skip").await,
        LoadAction::Cancel => control(cfg, "cancel").await,
        LoadAction::Status => control(cfg, "status").await,
        LoadAction::Preview { phase } => preview(cfg, &phase).await,
    }
}

async fn ensure_no_runner() -> Result<()> {
    let socket = control_socket_path()?;
    if control_socket::send_command(&socket, "status").await?.is_some() {
        bail!("a loader is already running (control socket {})", socket.display());
    }
    Ok(())
}

async fn start(cfg: &GleanerConfig, strategy: Strategy, manual: bool) -> Result<()> {
    ensure_no_runner().await?;
    let rt = Runtime::build(cfg).await?;
    if rt.plan.is_empty() {
        bail!("no [[phase]] tables in the jobs file");
    }
    let controller = Arc::new(rt.controller());
    if controller.restore_session().is_some() {
        bail!("a loading session is already active; use `gleaner load resume` or `gleaner load cancel`");
    }
    let session = controller.start_phased_loading(strategy, manual)?;
    println!(
        "Started session {} ({}, {} phases).",
        session.id,
        strategy,
        rt.plan.len()
    );
    drive(controller).await
}

async fn resume(cfg: &GleanerConfig) -> Result<()> {
    ensure_no_runner().await?;
    let rt = Runtime::build(cfg).await?;
    let controller = Arc::new(rt.controller());
    let Some(session) = controller.restore_session() else {
        bail!("no loading session; start one with `gleaner load start`");
    };
    if session.is_paused() {
        controller.resume_loading()?;
    }
    println!(
        "Resuming session {} at phase {} of {}.",
        session.id,
        session.current_phase + 1,
        rt.plan.len()
    );
    drive(controller).await
}

/// Run phases until the rollout stops, serving the control socket meanwhile.
/// Ctrl-C pauses the session.
async fn drive(controller: Arc<PhaseController>) -> Result<()> {
    let socket = control_socket_path()?;
    let listener = match control_socket::spawn_control_listener(Arc::clone(&controller), &socket) {
        Ok(handle) => {
            tracing::debug!(path = %socket.display(), "control socket listening");
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(path = %socket.display(), "control socket unavailable: {:#}", e);
            None
        }
    };
    let ctrl_c = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted; pausing");
                if let Err(e) = controller.pause_loading() {
                    tracing::warn!("pause on interrupt: {}", e);
                }
            }
        })
    };

    let outcome = controller.run_to_completion().await;

    ctrl_c.abort();
    if let Some(handle) = listener {
        handle.abort();
        let _ = std::fs::remove_file(&socket);
    }
    match outcome? {
        PhaseOutcome::Finished => println!("All phases completed."),
        PhaseOutcome::Completed { phase } => println!("Phase {phase} completed."),
        PhaseOutcome::Paused { phase } => {
            println!("Paused in phase {phase}; `gleaner load resume` re-runs it.")
        }
        PhaseOutcome::Failed { phase, reason } => {
            println!("Phase {phase} failed: {reason}");
            println!("`gleaner load resume` retries it.");
        }
        PhaseOutcome::Cancelled => println!("Loading cancelled."),
    }
    Ok(())
}

/// Send `command` to a live runner, or apply it to the persisted session.
async fn control(cfg: &GleanerConfig, command: &str) -> Result<()> {
    let socket = control_socket_path()?;
    let reply = match control_socket::send_command(&socket, command).await? {
        Some(reply) => reply,
        None => {
            let rt = Runtime::build(cfg).await?;
            let controller = rt.controller();
            controller.restore_session();
            control_socket::apply(&controller, command)
        }
    };
    if let Some(message) = reply.strip_prefix("error: ") {
        bail!("{}", message);
    }
    if command == "status" {
        // Re-indent the single-line JSON reply.
        let value: serde_json::Value = serde_json::from_str(&reply)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{reply}");
    }
    Ok(())
}

async fn preview(cfg: &GleanerConfig, phase: &str) -> Result<()> {
    let rt = Runtime::build(cfg).await?;
    let controller = rt.controller();
    controller.restore_session();
    let preview = controller.get_phase_preview(phase)?;
    println!("{}", serde_json::to_string_pretty(&preview)?);
    Ok(())
}
