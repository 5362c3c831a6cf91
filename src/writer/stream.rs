//! FFmpeg-backed MP4 writer
//!
//! Raw BGRA frames are piped into an FFmpeg child process encoding H.264;
//! microphone audio is staged to a WAV file and muxed in at finalize time.
//! A dedicated worker thread owns the child process so the per-frame
//! `append_*` calls never block on pipe writes.

use super::{MediaWriter, RecordingArtifacts, WriterError, WriterFactory, WriterOptions};
use crate::capture::types::{AudioChunk, VideoFrame};
use crate::writer::encoding_dimensions;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::time::Duration;

/// One recording at a time, process-wide.
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Depth of the frame queue between the router and the encoder thread.
/// Frames arriving while it is full are dropped, not queued.
const QUEUE_DEPTH: usize = 4;

fn ffmpeg_available() -> bool {
    Command::new("ffmpeg").arg("-version").output().is_ok()
}

enum WriterMsg {
    Video(VideoFrame, Duration),
    Audio(AudioChunk),
}

/// Releases the process-wide recording slot when the worker exits.
struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Streaming MP4 writer; see module docs.
pub struct StreamWriter {
    tx: Option<SyncSender<WriterMsg>>,
    worker: Option<std::thread::JoinHandle<Result<RecordingArtifacts, WriterError>>>,
    expected_len: usize,
}

impl StreamWriter {
    fn start(options: &WriterOptions) -> Result<Self, WriterError> {
        if !ffmpeg_available() {
            return Err(WriterError::FfmpegMissing);
        }
        if ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WriterError::AlreadyWriting);
        }
        let guard = ActiveGuard;

        std::fs::create_dir_all(&options.output_dir)?;

        let (width, height) = encoding_dimensions(options.orientation_hint);
        let base = uuid::Uuid::new_v4().to_string();
        let paths = RecordingPaths::new(&options.output_dir, &base);

        let child = spawn_video_encoder(width, height, options.fps, &paths.video_temp)
            .map_err(|e| WriterError::Spawn(e.to_string()))?;

        tracing::info!(
            "Recording started: {}x{} @ {}fps, audio={}, output {:?}",
            width,
            height,
            options.fps,
            options.audio_enabled,
            paths.final_video
        );

        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        let audio_enabled = options.audio_enabled;
        let worker = std::thread::spawn(move || {
            let _guard = guard;
            encode_loop(rx, child, paths, audio_enabled)
        });

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            expected_len: width as usize * height as usize * 4,
        })
    }
}

impl MediaWriter for StreamWriter {
    fn append_video(&self, frame: &VideoFrame, pts: Duration) {
        if frame.bytes().len() != self.expected_len {
            tracing::warn!(
                "Dropping frame with unexpected size {} (expected {})",
                frame.bytes().len(),
                self.expected_len
            );
            return;
        }
        if let Some(tx) = &self.tx {
            match tx.try_send(WriterMsg::Video(frame.clone(), pts)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!("Encoder queue full, dropping frame at {:?}", pts);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    fn append_audio(&self, chunk: &AudioChunk) {
        if let Some(tx) = &self.tx {
            // Audio is small; a dropped chunk is an audible glitch, so it
            // shares the same queue and drop policy as video.
            if let Err(TrySendError::Full(_)) = tx.try_send(WriterMsg::Audio(chunk.clone())) {
                tracing::trace!("Encoder queue full, dropping audio chunk");
            }
        }
    }

    fn finish(mut self: Box<Self>) -> Result<RecordingArtifacts, WriterError> {
        // Closing the channel tells the worker to flush and finalize.
        drop(self.tx.take());
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| WriterError::Finalize("encoder thread panicked".to_string()))?,
            None => Err(WriterError::NotStarted),
        }
    }
}

struct RecordingPaths {
    video_temp: PathBuf,
    audio_temp: PathBuf,
    final_video: PathBuf,
    thumbnail: PathBuf,
}

impl RecordingPaths {
    fn new(dir: &Path, base: &str) -> Self {
        Self {
            video_temp: dir.join(format!("{base}_video.mp4")),
            audio_temp: dir.join(format!("{base}_audio.wav")),
            final_video: dir.join(format!("{base}_dual.mp4")),
            thumbnail: dir.join(format!("{base}_thumb.jpg")),
        }
    }
}

fn spawn_video_encoder(
    width: u32,
    height: u32,
    fps: u32,
    output: &Path,
) -> std::io::Result<Child> {
    Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "rawvideo",
            "-pixel_format",
            "bgra",
            "-video_size",
            &format!("{width}x{height}"),
            "-framerate",
            &fps.to_string(),
            "-i",
            "-",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-pix_fmt",
            "yuv420p",
            "-crf",
            "18",
            "-g",
            &(fps * 2).to_string(),
            "-movflags",
            "+faststart",
        ])
        .arg(output)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
}

/// Worker loop: drains the queue into FFmpeg and the WAV stage, then
/// finalizes when the channel closes.
fn encode_loop(
    rx: Receiver<WriterMsg>,
    mut child: Child,
    paths: RecordingPaths,
    audio_enabled: bool,
) -> Result<RecordingArtifacts, WriterError> {
    let mut wav: Option<WavWriter<std::io::BufWriter<std::fs::File>>> = None;
    let mut base_pts: Option<Duration> = None;
    let mut frames_written: u64 = 0;
    let mut pipe_broken = false;

    while let Ok(msg) = rx.recv() {
        match msg {
            WriterMsg::Video(frame, pts) => {
                if base_pts.is_none() {
                    // First accepted frame anchors the timeline; audio that
                    // arrived earlier has already been discarded.
                    base_pts = Some(pts);
                    tracing::debug!("Recording timeline anchored at {:?}", pts);
                }
                if pipe_broken {
                    continue;
                }
                if let Some(stdin) = child.stdin.as_mut() {
                    if let Err(e) = stdin.write_all(frame.bytes()) {
                        tracing::error!("Encoder pipe write failed: {}", e);
                        pipe_broken = true;
                        continue;
                    }
                    frames_written += 1;
                }
            }
            WriterMsg::Audio(chunk) => {
                if !audio_enabled || base_pts.is_none() {
                    continue;
                }
                if wav.is_none() {
                    let spec = WavSpec {
                        channels: 1,
                        sample_rate: chunk.sample_rate,
                        bits_per_sample: 16,
                        sample_format: SampleFormat::Int,
                    };
                    match WavWriter::create(&paths.audio_temp, spec) {
                        Ok(w) => wav = Some(w),
                        Err(e) => {
                            tracing::warn!("Failed to create audio stage file: {}", e);
                            continue;
                        }
                    }
                }
                if let Some(w) = wav.as_mut() {
                    for &sample in &chunk.samples {
                        if let Err(e) = w.write_sample(sample) {
                            tracing::warn!("Audio stage write failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    }

    // Close stdin to signal EOF, then wait for the encode to flush.
    drop(child.stdin.take());
    let output = child.wait_with_output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WriterError::Finalize(format!(
            "video encoder exited with {}: {}",
            output.status, stderr
        )));
    }
    tracing::info!("Video encode finished: {} frames", frames_written);

    let have_audio = match wav {
        Some(w) => {
            w.finalize()
                .map_err(|e| WriterError::Finalize(format!("audio stage: {}", e)))?;
            true
        }
        None => false,
    };

    if have_audio {
        mux_audio(&paths)?;
        let _ = std::fs::remove_file(&paths.video_temp);
        let _ = std::fs::remove_file(&paths.audio_temp);
    } else {
        std::fs::rename(&paths.video_temp, &paths.final_video)?;
    }

    let thumbnail_path = extract_thumbnail(&paths.final_video, &paths.thumbnail);

    Ok(RecordingArtifacts {
        video_path: paths.final_video,
        thumbnail_path,
    })
}

/// Remux the encoded video with the staged audio into the final file.
fn mux_audio(paths: &RecordingPaths) -> Result<(), WriterError> {
    let output = Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(&paths.video_temp)
        .arg("-i")
        .arg(&paths.audio_temp)
        .args([
            "-c:v", "copy", "-c:a", "aac", "-b:a", "64k", "-ac", "1", "-ar", "44100", "-shortest",
        ])
        .arg(&paths.final_video)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WriterError::Finalize(format!(
            "audio mux exited with {}: {}",
            output.status, stderr
        )));
    }
    Ok(())
}

/// Grab a JPEG near the one-second mark. Failure is logged, never fatal.
fn extract_thumbnail(video: &Path, thumbnail: &Path) -> Option<PathBuf> {
    let result = Command::new("ffmpeg")
        .args(["-y", "-ss", "1", "-i"])
        .arg(video)
        .args(["-frames:v", "1", "-q:v", "2"])
        .arg(thumbnail)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match result {
        Ok(status) if status.success() && thumbnail.exists() => Some(thumbnail.to_path_buf()),
        Ok(status) => {
            tracing::warn!("Thumbnail extraction exited with {}", status);
            None
        }
        Err(e) => {
            tracing::warn!("Thumbnail extraction failed to run: {}", e);
            None
        }
    }
}

/// Builds a [`StreamWriter`] per recording.
pub struct StreamWriterFactory;

impl WriterFactory for StreamWriterFactory {
    fn create(&self, options: &WriterOptions) -> Result<Box<dyn MediaWriter>, WriterError> {
        Ok(Box::new(StreamWriter::start(options)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::{FrameFormat, VideoFrame};
    use crate::geometry::Orientation;
    use std::sync::Mutex;

    // Recording is exclusive process-wide; tests claiming the slot run
    // one at a time.
    static SLOT: Mutex<()> = Mutex::new(());

    fn options(dir: &Path, audio_enabled: bool) -> WriterOptions {
        WriterOptions {
            output_dir: dir.to_path_buf(),
            audio_enabled,
            orientation_hint: Orientation::LandscapeLeft,
            fps: 30,
        }
    }

    fn landscape_frame(ms: u64) -> VideoFrame {
        let format = FrameFormat::bgra(1920, 1080);
        VideoFrame::new(
            format,
            vec![0x30; format.byte_len()],
            Duration::from_millis(ms),
        )
    }

    #[test]
    fn test_second_writer_rejected_while_active() {
        if !ffmpeg_available() {
            return;
        }
        let _guard = SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();

        let first = StreamWriter::start(&options(dir.path(), false)).unwrap();
        assert!(matches!(
            StreamWriter::start(&options(dir.path(), false)),
            Err(WriterError::AlreadyWriting)
        ));

        // Finalizing, successfully or not, must free the slot.
        let _ = Box::new(first).finish();
        let again = StreamWriter::start(&options(dir.path(), false)).unwrap();
        let _ = Box::new(again).finish();
    }

    #[test]
    fn test_video_only_recording_finalizes_to_mp4() {
        if !ffmpeg_available() {
            return;
        }
        let _guard = SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();

        let writer = StreamWriter::start(&options(dir.path(), false)).unwrap();
        for i in 0..10 {
            writer.append_video(&landscape_frame(i * 33), Duration::from_millis(i * 33));
            std::thread::sleep(Duration::from_millis(5));
        }

        let artifacts = Box::new(writer).finish().unwrap();
        assert!(artifacts.video_path.exists());
        assert!(artifacts
            .video_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap()
            .ends_with("_dual.mp4"));
    }

    #[test]
    fn test_frames_with_wrong_size_are_dropped_before_the_queue() {
        if !ffmpeg_available() {
            return;
        }
        let _guard = SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();

        let writer = StreamWriter::start(&options(dir.path(), false)).unwrap();
        let tiny = FrameFormat::bgra(2, 2);
        writer.append_video(
            &VideoFrame::new(tiny, vec![0u8; tiny.byte_len()], Duration::ZERO),
            Duration::ZERO,
        );
        for i in 0..5 {
            writer.append_video(&landscape_frame(i * 33), Duration::from_millis(i * 33));
            std::thread::sleep(Duration::from_millis(5));
        }
        // The mis-sized frame never reached the encoder pipe, so the
        // encode still finalizes cleanly.
        assert!(Box::new(writer).finish().is_ok());
    }
}

