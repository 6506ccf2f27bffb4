use crate::data::config::{PlayoutConfig, SoundcardConfig};
use crate::playback::ring::ChunkRing;
use crate::playback::CHUNK_FRAMES;
use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{info, warn};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Pull-mode local audio sink. The cpal stream is owned by a dedicated
/// thread (cpal streams are not Send); `start` hands back the build result
/// over a channel, then the thread parks holding the stream alive until
/// shutdown.
pub struct SoundcardSink {
    shutdown: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SoundcardSink {
    pub fn start(
        playout: &PlayoutConfig,
        cfg: &SoundcardConfig,
        ring: Arc<ChunkRing>,
    ) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let device_name = cfg.device.clone();
        let sample_rate = playout.sample_rate;
        let channels = playout.channels;

        let thread = thread::spawn(move || {
            let stream = match build_stream(device_name.as_deref(), sample_rate, channels, ring) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Recv error means the sink struct is gone; stop either way.
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown: shutdown_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(anyhow!("soundcard thread died during startup")),
        }
    }

    pub fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SoundcardSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    channels: u16,
    ring: Arc<ChunkRing>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => pick_device(&host, name)?,
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"))?,
    };
    if let Ok(name) = device.name() {
        info!("soundcard output device: {name}");
    }

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Fixed(CHUNK_FRAMES as u32),
    };
    let err_fn = |err| {
        warn!("cpal stream error: {err}");
    };

    let stream = device.build_output_stream(
        &config,
        move |out: &mut [f32], _| fill_output(&ring, out),
        err_fn,
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

fn pick_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
    for device in host.output_devices()? {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(anyhow!("output device '{name}' not found"))
}

/// Realtime callback body: non-blocking pop, signed-16 → float conversion,
/// silence on an empty ring or the sentinel. Must never block.
fn fill_output(ring: &ChunkRing, out: &mut [f32]) {
    match ring.try_get() {
        Some(Some(chunk)) => {
            let samples = chunk.len() / 2;
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = if i < samples {
                    i16::from_le_bytes([chunk[2 * i], chunk[2 * i + 1]]) as f32 / 32768.0
                } else {
                    0.0
                };
            }
        }
        _ => out.fill(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn fill_output_converts_and_pads() {
        let ring = ChunkRing::new(4);
        let live = AtomicBool::new(false);
        // Two samples: +16384 (0.5), -32768 (-1.0); output block of 4.
        ring.put(Some(vec![0x00, 0x40, 0x00, 0x80]), Duration::ZERO, &live)
            .unwrap();
        let mut out = [9.0f32; 4];
        fill_output(&ring, &mut out);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], -1.0);
        assert_eq!(out[2], 0.0);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn fill_output_zero_fills_on_empty_ring() {
        let ring = ChunkRing::new(2);
        let mut out = [1.0f32; 8];
        fill_output(&ring, &mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn fill_output_treats_sentinel_as_silence() {
        let ring = ChunkRing::new(2);
        let live = AtomicBool::new(false);
        ring.put(None, Duration::ZERO, &live).unwrap();
        let mut out = [1.0f32; 8];
        fill_output(&ring, &mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }
}
