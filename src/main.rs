//! mda-stream demo
//!
//! Runs a simulated acquisition through the streaming pipeline with a headless
//! viewer on its own UI thread, then prints the run report. An optional first
//! argument names a plan JSON file; without it a small time-lapse is used.

use anyhow::Context;
use mda_stream::{
    acquisition::SimulatedAcquisition,
    config::StreamConfig,
    display::{DisplayBridge, HeadlessViewer},
    sequence::{SequencePlan, AXIS_CHANNEL, AXIS_TIME, AXIS_Z},
    stream::StreamingEngine,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn demo_plan() -> SequencePlan {
    SequencePlan::builder()
        .axis(AXIS_TIME, 5)
        .axis(AXIS_CHANNEL, 2)
        .axis(AXIS_Z, 3)
        .channels(["DAPI", "FITC"])
        .z_step(0.5)
        .split_channels(true)
        .build()
}

fn load_plan(path: &str) -> anyhow::Result<SequencePlan> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read plan {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse plan {}", path))
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mda_stream=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting mda-stream demo");

    let config = StreamConfig::load_or_default();
    let plan = match std::env::args().nth(1) {
        Some(path) => load_plan(&path)?,
        None => demo_plan(),
    };

    // UI thread owning the viewer
    let (bridge, receiver) = DisplayBridge::new(&config.display);
    let running = Arc::new(AtomicBool::new(true));
    let running_ui = Arc::clone(&running);
    let ui = std::thread::Builder::new()
        .name("viewer".to_string())
        .spawn(move || {
            let mut viewer = HeadlessViewer::default();
            while running_ui.load(Ordering::SeqCst) {
                receiver.pump_timeout(&mut viewer, Duration::from_millis(20));
            }
            receiver.pump(&mut viewer);
            viewer
        })
        .context("Failed to spawn viewer thread")?;

    let camera = Arc::new(
        SimulatedAcquisition::new((512, 512), 12)
            .with_pixel_size(0.65)
            .with_interval(Duration::from_millis(5)),
    );
    let engine = StreamingEngine::new(config, camera.clone(), Arc::new(bridge));

    let simulated = camera.run(plan, &engine)?;
    tracing::info!("Acquisition delivered {} frames", simulated.frames_delivered);

    let report = engine
        .wait_idle(Duration::from_secs(60))?
        .context("No run was recorded")?;
    for failure in engine.errors() {
        tracing::error!(
            "Write failed at {:?} in {}: {}",
            failure.coordinate,
            failure.layer_id,
            failure.message
        );
    }

    running.store(false, Ordering::SeqCst);
    let viewer = ui
        .join()
        .map_err(|_| anyhow::anyhow!("Viewer thread panicked"))?;
    for name in viewer.surface_names() {
        if let Some(surface) = viewer.surface(name) {
            tracing::info!("Layer {}: {} stage positions", name, surface.positions.len());
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!("Shutting down...");
    engine.shutdown();
    Ok(())
}
