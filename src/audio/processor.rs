use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use std::thread::{self, JoinHandle};

use super::{Analysis, AudioFrame, AudioPipeline, Capabilities, EventKind, LatestSlot};

/// Reports what the host offers. Audio input is true only when cpal finds a
/// default input device.
pub fn probe_capabilities(harmonic_analysis: bool, mel_features: bool) -> Capabilities {
    let host = cpal::default_host();
    let audio_input = host.default_input_device().is_some();
    debug!("Host {:?}: default input device present = {}", host.id(), audio_input);
    Capabilities {
        audio_input,
        harmonic_analysis,
        mel_features,
    }
}

pub fn list_input_devices() -> Vec<String> {
    cpal::default_host()
        .input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// A running capture stream that delivers fixed-size mono blocks.
/// Dropping it stops capture and disconnects the receiver.
pub struct LiveInput {
    #[allow(dead_code)]
    stream: Stream,
    receiver: Receiver<AudioFrame>,
    sample_rate: f32,
    device_name: String,
}

impl LiveInput {
    pub fn open(device_name: Option<&str>, block_size: usize, queue_depth: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(anyhow!("Block size must be positive"));
        }

        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .context("Failed to enumerate input devices")?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("No input device named '{}'", name))?,
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?,
        };

        let supported = device
            .default_input_config()
            .map_err(|e| anyhow!("Failed to get default input config: {}", e))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio device: {}", device_name);
        info!("Audio config: {:?}", supported);

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0 as f32;

        let (sender, receiver) = crossbeam_channel::bounded(queue_depth.max(1));
        let blocks = BlockAccumulator::new(block_size, sample_rate, sender);

        let stream = match sample_format {
            SampleFormat::F32 => Self::create_input_stream::<f32>(&device, &config, blocks)?,
            SampleFormat::I16 => Self::create_input_stream::<i16>(&device, &config, blocks)?,
            SampleFormat::U16 => Self::create_input_stream::<u16>(&device, &config, blocks)?,
            other => return Err(anyhow!("Unsupported sample format: {:?}", other)),
        };
        stream.play().context("Failed to start input stream")?;

        Ok(Self {
            stream,
            receiver,
            sample_rate,
            device_name,
        })
    }

    fn create_input_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut blocks: BlockAccumulator,
    ) -> Result<Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let channels = config.channels as usize;

        info!("Creating input stream with {} channels at {} Hz", channels, config.sample_rate.0);

        let stream = device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                blocks.push_interleaved(data, channels);
            },
            |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )?;

        Ok(stream)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn receiver(&self) -> Receiver<AudioFrame> {
        self.receiver.clone()
    }
}

/// Downmixes interleaved input to mono and cuts it into fixed-size blocks.
/// Full queue means the analysis side is behind; the block is dropped.
struct BlockAccumulator {
    buffer: Vec<f32>,
    block_size: usize,
    sample_rate: f32,
    sender: Sender<AudioFrame>,
    dropped: u64,
}

impl BlockAccumulator {
    fn new(block_size: usize, sample_rate: f32, sender: Sender<AudioFrame>) -> Self {
        Self {
            buffer: Vec::with_capacity(block_size),
            block_size,
            sample_rate,
            sender,
            dropped: 0,
        }
    }

    fn push_interleaved<T>(&mut self, data: &[T], channels: usize)
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let channels = channels.max(1);
        for frame in data.chunks(channels) {
            let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
            self.buffer.push(sum / frame.len() as f32);

            if self.buffer.len() == self.block_size {
                let samples = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.block_size));
                self.send(AudioFrame::new(samples, self.sample_rate));
            }
        }
    }

    fn send(&mut self, frame: AudioFrame) {
        match self.sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    warn!("Analysis falling behind, {} capture blocks dropped", self.dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Capture block discarded, analysis side has gone away");
            }
        }
    }
}

/// Runs `pipeline` over every captured block in order on a dedicated thread,
/// publishing each result to `slot`. Returns the number of blocks analysed
/// once the capture side disconnects.
pub fn spawn_analysis(
    mut pipeline: AudioPipeline,
    receiver: Receiver<AudioFrame>,
    slot: LatestSlot<Analysis>,
) -> JoinHandle<u64> {
    thread::spawn(move || {
        let mut processed = 0u64;
        for frame in receiver.iter() {
            let analysis = pipeline.process_frame(&frame);
            for event in &analysis.events {
                if event.kind != EventKind::Onset {
                    debug!("{:?} at {:.3}s ({:.2})", event.kind, event.timestamp, event.intensity);
                }
            }
            slot.publish(analysis);
            processed += 1;
        }
        info!("Capture closed after {} blocks, analysis thread exiting", processed);
        processed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn test_accumulator_downmixes_and_blocks() {
        let (sender, receiver) = crossbeam_channel::bounded(4);
        let mut blocks = BlockAccumulator::new(3, 48000.0, sender);

        // stereo: L=1.0, R=0.0 averages to 0.5
        let data = [1.0f32, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        blocks.push_interleaved(&data, 2);

        let frame = receiver.try_recv().unwrap();
        assert_eq!(frame.samples, vec![0.5, 0.5, 0.5]);
        assert_eq!(frame.sample_rate, 48000.0);
        assert!(receiver.try_recv().is_err());
        assert_eq!(blocks.buffer.len(), 1);
    }

    #[test]
    fn test_accumulator_converts_integer_samples() {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let mut blocks = BlockAccumulator::new(2, 44100.0, sender);
        blocks.push_interleaved(&[i16::MAX, 0i16], 1);

        let frame = receiver.try_recv().unwrap();
        assert!((frame.samples[0] - 1.0).abs() < 1e-3);
        assert_eq!(frame.samples[1], 0.0);
    }

    #[test]
    fn test_accumulator_drops_when_full() {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let mut blocks = BlockAccumulator::new(1, 44100.0, sender);
        blocks.push_interleaved(&[0.1f32, 0.2, 0.3], 1);

        assert_eq!(blocks.dropped, 2);
        assert_eq!(receiver.try_recv().unwrap().samples, vec![0.1]);
    }

    #[test]
    fn test_spawn_analysis_publishes_in_order() {
        let pipeline = AudioPipeline::new(PipelineConfig::default(), Capabilities::offline()).unwrap();
        let (sender, receiver) = crossbeam_channel::bounded(8);
        let slot = LatestSlot::new();
        let handle = spawn_analysis(pipeline, receiver, slot.clone());

        for _ in 0..5 {
            sender.send(AudioFrame::new(vec![0.0; 1024], 44100.0)).unwrap();
        }
        drop(sender);

        assert_eq!(handle.join().unwrap(), 5);
        let latest = slot.take().unwrap();
        assert_eq!(latest.frame, 4);
        assert!((latest.timestamp - 4.0 * 1024.0 / 44100.0).abs() < 1e-9);
    }
}
