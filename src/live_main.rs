use anyhow::{anyhow, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;

use mmpa_audio::audio::processor::list_input_devices;
use mmpa_audio::audio::{probe_capabilities, spawn_analysis, LatestSlot, LiveInput};
use mmpa_audio::config::{load_config, resolve_config_path, PipelineConfig};
use mmpa_audio::telemetry::server;
use mmpa_audio::AudioPipeline;

#[derive(Parser)]
#[command(name = "mmpa-live")]
#[command(about = "Analyze live audio input and stream telemetry to visualisation clients")]
struct Args {
    /// Input device name (default device when omitted)
    #[arg(short, long)]
    device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Pipeline configuration (TOML); defaults to ./mmpa.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Samples per analysis block
    #[arg(long, default_value = "2048")]
    block_size: usize,

    /// Captured blocks allowed to queue before new ones are dropped
    #[arg(long, default_value = "4")]
    queue_depth: usize,

    /// Telemetry listen address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Telemetry rate in Hz (overrides config)
    #[arg(long)]
    rate: Option<f32>,

    /// Analyze without serving telemetry
    #[arg(long)]
    no_telemetry: bool,

    /// Disable harmonic-change events
    #[arg(long)]
    no_harmonics: bool,

    /// Compute mel spectrum and MFCCs for each block
    #[arg(long)]
    mel: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let args = Args::parse();

    if args.list_devices {
        for name in list_input_devices() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = match resolve_config_path(args.config.clone()) {
        Some(path) => {
            info!("Loading config from {}", path.display());
            load_config(&path)?
        }
        None => PipelineConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.telemetry.bind = bind.clone();
    }
    if let Some(rate) = args.rate {
        config.telemetry.rate_hz = rate;
    }

    let capabilities = probe_capabilities(!args.no_harmonics, args.mel);
    if !capabilities.audio_input && args.device.is_none() {
        return Err(anyhow!("No audio input device available; use mmpa-analyze for files"));
    }

    let input = LiveInput::open(args.device.as_deref(), args.block_size, args.queue_depth)?;
    if input.sample_rate() != config.analysis.sample_rate {
        info!(
            "Device runs at {} Hz, adjusting analysis from {} Hz",
            input.sample_rate(),
            config.analysis.sample_rate
        );
        config.analysis.sample_rate = input.sample_rate();
    }

    let pipeline = AudioPipeline::new(config.clone(), capabilities)?;
    let slot = LatestSlot::new();
    let worker = spawn_analysis(pipeline, input.receiver(), slot.clone());
    info!("Capturing from {} in blocks of {}", input.device_name(), args.block_size);

    if args.no_telemetry {
        tokio::signal::ctrl_c().await?;
    } else {
        let listener = server::bind(&config.telemetry.bind).await?;
        tokio::select! {
            result = server::serve(listener, config.telemetry.rate_hz, slot.clone()) => result?,
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    info!("Shutting down");
    drop(input);
    match tokio::time::timeout(Duration::from_secs(2), tokio::task::spawn_blocking(move || worker.join())).await {
        Ok(Ok(Ok(blocks))) => info!("Analyzed {} blocks, {} results superseded before use", blocks, slot.dropped()),
        _ => warn!("Analysis thread did not stop cleanly"),
    }

    Ok(())
}
