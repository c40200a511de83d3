//! TCP feed that pushes one JSON line per telemetry frame to every client.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::TelemetryFrame;
use crate::audio::{Analysis, LatestSlot};

/// Frames a slow client may fall behind before it skips ahead.
const CLIENT_BACKLOG: usize = 8;

/// Aborts the wrapped task when dropped, including when the owning future
/// is cancelled.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind telemetry listener on {}", addr))?;
    info!("Telemetry listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Samples the newest analysis from `slot` at `rate_hz` and broadcasts it
/// to all connected clients. Runs until the listener fails; the sampling
/// task stops when this future returns or is dropped.
pub async fn serve(listener: TcpListener, rate_hz: f32, slot: LatestSlot<Analysis>) -> Result<()> {
    let (sender, _) = broadcast::channel::<Arc<str>>(CLIENT_BACKLOG);

    let producer = sender.clone();
    let _producer_task = AbortOnDrop(tokio::spawn(async move {
        let period = Duration::from_secs_f64(1.0 / rate_hz.max(1.0) as f64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut frame = 0u64;

        loop {
            ticker.tick().await;
            let Some(analysis) = slot.take() else {
                continue;
            };
            match TelemetryFrame::from_analysis(&analysis, frame).to_json_line() {
                Ok(line) => {
                    frame += 1;
                    // no subscribers is fine
                    let _ = producer.send(Arc::from(line));
                }
                Err(e) => warn!("Failed to encode telemetry frame: {}", e),
            }
        }
    }));

    loop {
        let (stream, addr) = listener.accept().await.context("Telemetry accept failed")?;
        info!("Telemetry client connected from {}", addr);
        let receiver = sender.subscribe();
        tokio::spawn(async move {
            match stream_frames(stream, receiver).await {
                Ok(()) => info!("Telemetry client {} finished", addr),
                Err(e) => debug!("Telemetry client {} dropped: {}", addr, e),
            }
        });
    }
}

async fn stream_frames(mut stream: TcpStream, mut receiver: broadcast::Receiver<Arc<str>>) -> Result<()> {
    loop {
        match receiver.recv().await {
            Ok(line) => {
                stream.write_all(line.as_bytes()).await?;
                stream.write_all(b"\n").await?;
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!("Telemetry client lagging, skipped {} frames", skipped);
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioPipeline, Capabilities};
    use crate::config::PipelineConfig;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_client_receives_json_lines() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let slot = LatestSlot::new();
        tokio::spawn(serve(listener, 60.0, slot.clone()));

        let mut pipeline = AudioPipeline::new(PipelineConfig::default(), Capabilities::offline()).unwrap();
        let tone: Vec<f32> = (0..2048)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();
        let analysis = pipeline.process(&tone);

        let client = TcpStream::connect(addr).await.unwrap();
        let publisher = tokio::spawn(async move {
            for _ in 0..200 {
                slot.publish(analysis.clone());
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let mut lines = BufReader::new(client).lines();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        publisher.abort();

        let frame: TelemetryFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(frame.c.len(), 4);
        assert!(frame.c.iter().any(|&c| c == 1.0));
        assert_eq!(frame.timestamp, 0.0);

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["c", "frame", "pmw", "timestamp"]);
    }

    #[tokio::test]
    async fn test_cancelled_serve_stops_sampling() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let slot = LatestSlot::new();
        let server = tokio::spawn(serve(listener, 100.0, slot.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        server.abort();
        assert!(server.await.unwrap_err().is_cancelled());

        let mut pipeline = AudioPipeline::new(PipelineConfig::default(), Capabilities::offline()).unwrap();
        slot.publish(pipeline.process(&[0.0; 256]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(slot.take().is_some(), "sampling task still running");
    }
}
