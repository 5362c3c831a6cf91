//! Microphone capture using cpal
//!
//! The stream runs on a dedicated thread because cpal streams cannot move
//! between threads. Input samples are downmixed to mono 16-bit PCM and
//! delivered as fixed-size chunks through the session's frame channel.

use super::source::AudioSource;
use super::types::{AudioChunk, CaptureError, FrameSink};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Samples per delivered chunk, ~23ms at 44.1kHz.
const CHUNK_SAMPLES: usize = 1024;

/// Default microphone pipeline.
pub struct CpalAudioSource {
    sink: Option<FrameSink>,
    running: Arc<AtomicBool>,
    stream_thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalAudioSource {
    pub fn new() -> Self {
        Self {
            sink: None,
            running: Arc::new(AtomicBool::new(false)),
            stream_thread: None,
        }
    }
}

impl Default for CpalAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates downmixed samples and emits fixed-size chunks.
struct ChunkAssembler {
    sink: FrameSink,
    channels: usize,
    sample_rate: u32,
    pending: Vec<i16>,
    samples_sent: u64,
}

impl ChunkAssembler {
    fn new(sink: FrameSink, channels: usize, sample_rate: u32) -> Self {
        Self {
            sink,
            channels,
            sample_rate,
            pending: Vec::with_capacity(CHUNK_SAMPLES),
            samples_sent: 0,
        }
    }

    /// Push interleaved f32 samples; averages channels down to mono.
    fn push(&mut self, data: &[f32]) {
        for frame in data.chunks_exact(self.channels) {
            let sum: f32 = frame.iter().sum();
            let mono = (sum / self.channels as f32).clamp(-1.0, 1.0);
            self.pending.push((mono * i16::MAX as f32) as i16);

            if self.pending.len() >= CHUNK_SAMPLES {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let samples = std::mem::take(&mut self.pending);
        let pts = Duration::from_secs_f64(self.samples_sent as f64 / self.sample_rate as f64);
        self.samples_sent += samples.len() as u64;
        self.sink.send_audio(AudioChunk {
            samples,
            sample_rate: self.sample_rate,
            pts,
        });
        self.pending = Vec::with_capacity(CHUNK_SAMPLES);
    }
}

#[async_trait]
impl AudioSource for CpalAudioSource {
    async fn attach(&mut self, sink: FrameSink) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }
        self.sink = Some(sink);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| CaptureError::Attach("audio source has no sink".to_string()))?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        let handle = std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_input_device() {
                Some(d) => d,
                None => {
                    tracing::warn!("No microphone available");
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let supported = match device.default_input_config() {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Failed to get microphone config: {}", e);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };
            let sample_format = supported.sample_format();
            let config: StreamConfig = supported.into();
            let channels = config.channels as usize;
            let sample_rate = config.sample_rate.0;

            let assembler = std::sync::Mutex::new(ChunkAssembler::new(sink, channels, sample_rate));
            let err_fn = |err| tracing::warn!("Audio capture error: {}", err);

            // Callbacks must never panic; a poisoned lock just drops samples.
            let stream = match sample_format {
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut a) = assembler.lock() {
                            a.push(data);
                        }
                    },
                    err_fn,
                    None,
                ),
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut a) = assembler.lock() {
                            let floats: Vec<f32> =
                                data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                            a.push(&floats);
                        }
                    },
                    err_fn,
                    None,
                ),
                other => {
                    tracing::warn!("Unsupported microphone sample format: {:?}", other);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to build microphone stream: {}", e);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            if let Err(e) = stream.play() {
                tracing::warn!("Failed to start microphone stream: {}", e);
                running.store(false, Ordering::SeqCst);
                return;
            }

            tracing::info!("Microphone capture started ({}Hz, {} ch)", sample_rate, channels);

            while running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }

            drop(stream);
            tracing::info!("Microphone capture stopped");
        });

        self.stream_thread = Some(handle);
        Ok(())
    }

    async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::{SinkKind, SourceEvent};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_assembler_downmixes_and_chunks() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = FrameSink::new(SinkKind::Audio, tx);
        let mut assembler = ChunkAssembler::new(sink, 2, 44_100);

        // Stereo full-scale opposite-phase cancels to silence
        let frame = [1.0f32, -1.0];
        for _ in 0..CHUNK_SAMPLES {
            assembler.push(&frame);
        }

        match rx.recv().await {
            Some(SourceEvent::Audio(chunk)) => {
                assert_eq!(chunk.samples.len(), CHUNK_SAMPLES);
                assert_eq!(chunk.sample_rate, 44_100);
                assert_eq!(chunk.pts, Duration::ZERO);
                assert!(chunk.samples.iter().all(|&s| s == 0));
            }
            other => panic!("expected audio chunk, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_assembler_pts_advances_with_samples() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = FrameSink::new(SinkKind::Audio, tx);
        let mut assembler = ChunkAssembler::new(sink, 1, 1024);

        let data = vec![0.5f32; CHUNK_SAMPLES * 2];
        assembler.push(&data);

        let first = rx.recv().await;
        let second = rx.recv().await;
        match (first, second) {
            (Some(SourceEvent::Audio(a)), Some(SourceEvent::Audio(b))) => {
                assert_eq!(a.pts, Duration::ZERO);
                // 1024 samples at 1024Hz is exactly one second
                assert_eq!(b.pts, Duration::from_secs(1));
            }
            other => panic!("expected two audio chunks, got {:?}", other),
        }
    }
}
