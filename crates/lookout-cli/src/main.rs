use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookout_core::provision;
use lookout_core::{
    FrameLoop, MatchState, OnnxMatcher, ReferenceGallery, SamplingScheduler, VerificationWorker,
};
use lookout_hw::{Camera, DeviceInfo};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod input;

use config::Config;
use display::ConsoleRenderer;
use input::ConsoleInput;

/// How long to wait for in-flight verification attempts after the loop stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "lookout", about = "Live face identification over a camera stream")]
struct Cli {
    /// Config file (default: ./lookout.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frames and overlay the identified user until quit
    Run,
    /// Load the config and reference gallery, then print a summary
    Check,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run(cfg).await,
        Commands::Check => check(cfg).await,
        Commands::Devices => {
            println!("{}", devices_json(&Camera::list_devices())?);
            Ok(())
        }
    }
}

async fn run(cfg: Config) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));

    let stop_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping");
            stop_signal.store(true, Ordering::SeqCst);
        }
    });

    let frames = tokio::task::spawn_blocking(move || run_loop(&cfg, stop))
        .await
        .context("frame loop task panicked")??;

    tracing::info!(frames, "lookout stopped");
    Ok(())
}

fn run_loop(cfg: &Config, stop: Arc<AtomicBool>) -> Result<u64> {
    let model_dir = cfg.model_dir();
    provision::ensure_assets(&model_dir, &cfg.matcher.assets, cfg.matcher.model.name());

    let gallery = ReferenceGallery::load(&cfg.gallery).context("loading reference gallery")?;
    tracing::info!(
        identities = gallery.len(),
        images = gallery.image_count(),
        "reference gallery loaded"
    );
    if gallery.is_empty() {
        tracing::warn!("reference gallery is empty; every attempt will report no match");
    }

    let matcher = OnnxMatcher::new(
        cfg.matcher.model,
        cfg.matcher.distance_metric,
        cfg.model_path(),
        cfg.matcher.threshold,
    );
    tracing::info!(
        model = matcher.model().name(),
        metric = ?matcher.metric(),
        threshold = matcher.threshold(),
        "matcher configured"
    );

    let mut camera = Camera::open(cfg.camera.device_index, cfg.camera.backend)
        .context("opening capture device")?;
    camera
        .configure(cfg.camera.width, cfg.camera.height)
        .context("configuring capture resolution")?;

    let state = Arc::new(MatchState::new(Arc::new(gallery)));
    let worker = VerificationWorker::new(state, Arc::new(matcher));
    let scheduler = SamplingScheduler::new(worker, cfg.sampling.period, cfg.sampling.dispatch)?;

    let renderer = ConsoleRenderer::new(
        cfg.display.snapshot_path.clone(),
        cfg.display.snapshot_every,
    );
    let input = ConsoleInput::spawn(stop, cfg.display.quit_key)
        .context("starting keyboard reader")?;
    println!(
        "Press '{}' then Enter (or Ctrl-C) to quit",
        cfg.display.quit_key
    );

    let mut frame_loop = FrameLoop::new(camera, renderer, input, scheduler, cfg.loop_settings());
    let frames = frame_loop.run();

    if !frame_loop.scheduler().wait_idle_timeout(DRAIN_TIMEOUT) {
        tracing::warn!(
            in_flight = frame_loop.scheduler().in_flight(),
            "verification attempts still running at exit"
        );
    }
    Ok(frames)
}

async fn check(cfg: Config) -> Result<()> {
    let summary = tokio::task::spawn_blocking(move || -> Result<serde_json::Value> {
        let gallery = ReferenceGallery::load(&cfg.gallery).context("loading reference gallery")?;
        let model_path = cfg.model_path();
        let identities: Vec<String> = gallery
            .identities()
            .iter()
            .map(|id| id.to_string())
            .collect();

        Ok(serde_json::json!({
            "camera": {
                "device_index": cfg.camera.device_index,
                "backend": cfg.camera.backend,
                "width": cfg.camera.width,
                "height": cfg.camera.height,
            },
            "sampling": {
                "period": cfg.sampling.period,
                "dispatch": cfg.sampling.dispatch,
            },
            "matcher": {
                "model": cfg.matcher.model.name(),
                "distance_metric": cfg.matcher.distance_metric,
                "threshold": cfg.matcher.threshold
                    .unwrap_or_else(|| cfg.matcher.model.threshold(cfg.matcher.distance_metric)),
                "model_path": model_path.display().to_string(),
                "model_present": model_path.exists(),
            },
            "gallery": {
                "identities": identities,
                "images": gallery.image_count(),
            },
        }))
    })
    .await
    .context("check task panicked")??;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn devices_json(devices: &[DeviceInfo]) -> Result<String> {
    Ok(serde_json::to_string_pretty(devices)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devices_json() {
        let devices = vec![DeviceInfo {
            path: "/dev/video0".into(),
            name: "Integrated Camera".into(),
            driver: "uvcvideo".into(),
            bus: "usb-0000:00:14.0-8".into(),
        }];
        let parsed: serde_json::Value = serde_json::from_str(&devices_json(&devices).unwrap()).unwrap();
        assert_eq!(parsed[0]["path"], "/dev/video0");
        assert_eq!(parsed[0]["driver"], "uvcvideo");

        assert_eq!(devices_json(&[]).unwrap(), "[]");
    }
}
