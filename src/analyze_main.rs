use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use mmpa_audio::audio::OfflineAnalyzer;
use mmpa_audio::config::{load_config, resolve_config_path, PipelineConfig};
use mmpa_audio::telemetry::TelemetryPacer;
use mmpa_audio::Capabilities;

#[derive(Parser)]
#[command(name = "mmpa-analyze")]
#[command(about = "Analyze a WAV file and write a feature, event and tempo report")]
struct Args {
    /// WAV file to analyze
    #[arg()]
    input_file: PathBuf,

    /// Output file for the JSON report
    #[arg(short, long, default_value = "analysis_report.json")]
    output: PathBuf,

    /// Pipeline configuration (TOML); defaults to ./mmpa.toml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Samples per analysis frame
    #[arg(long, default_value = "2048")]
    frame_size: usize,

    /// Include every per-frame analysis in the report
    #[arg(long)]
    frames: bool,

    /// Also write paced telemetry frames as JSON lines
    #[arg(long)]
    telemetry: Option<PathBuf>,

    /// Disable harmonic-change events
    #[arg(long)]
    no_harmonics: bool,

    /// Include mel spectrum and MFCCs in per-frame data
    #[arg(long)]
    mel: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let args = Args::parse();

    let config = match resolve_config_path(args.config.clone()) {
        Some(path) => {
            info!("Loading config from {}", path.display());
            load_config(&path)?
        }
        None => PipelineConfig::default(),
    };

    let capabilities = Capabilities {
        audio_input: false,
        harmonic_analysis: !args.no_harmonics,
        mel_features: args.mel,
    };
    let analyzer = OfflineAnalyzer::new(config.clone(), capabilities, args.frame_size).keep_frames(args.frames);

    info!("Input file: {}", args.input_file.display());
    info!("Frame size: {}", args.frame_size);

    let report = match &args.telemetry {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create telemetry file {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let mut pacer = TelemetryPacer::new(config.telemetry.rate_hz);
            let mut write_result: Result<()> = Ok(());

            let report = analyzer.analyze_wav_with(&args.input_file, |analysis| {
                if write_result.is_err() {
                    return;
                }
                if let Some(frame) = pacer.offer(analysis) {
                    write_result = frame
                        .to_json_line()
                        .map_err(anyhow::Error::from)
                        .and_then(|line| writeln!(writer, "{}", line).map_err(anyhow::Error::from));
                }
            })?;

            write_result.context("Failed to write telemetry")?;
            writer.flush()?;
            info!("Wrote {} telemetry frames to {}", pacer.emitted(), path.display());
            report
        }
        None => analyzer.analyze_wav(&args.input_file)?,
    };

    let stats = &report.statistics;
    info!("=== ANALYSIS RESULTS ===");
    info!("Duration: {:.2} seconds", report.file_info.duration_seconds);
    info!("Frames: {} at {:.2} Hz", stats.frame_count, report.file_info.frame_rate);
    info!("Onsets: {}, beats: {}, harmonic changes: {}", stats.onset_count, stats.beat_count, stats.harmonic_change_count);
    match stats.final_bpm {
        Some(bpm) => info!("Tempo: {:.1} BPM ({:?}, {:?})", bpm, stats.final_pattern, stats.final_state),
        None => info!("Tempo: not established"),
    }
    if let Some((low, high)) = stats.bpm_range {
        info!("BPM range: {:.1} - {:.1}", low, high);
    }
    if let Some(band) = &stats.loudest_band {
        info!("Loudest band: {}", band);
    }

    OfflineAnalyzer::save_report(&report, &args.output)?;
    info!("Report saved to {}", args.output.display());

    Ok(())
}
