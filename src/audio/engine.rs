//! Continuous capture engine with a pre-roll ring buffer.
//!
//! A single input stream runs from startup, feeding a [`SampleRouter`] that
//! keeps a short pre-roll window of recent audio. Starting an episode splices
//! that window onto the front of the recording, so speech that begins a beat
//! before the shortcut lands is not clipped.
//!
//! `cpal::Stream` is not `Send`, so a dedicated thread owns the stream and is
//! commanded over a channel. Everything the rest of the app touches is a
//! `Send` handle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::conditioning::{fade_in, high_pass_filter};
use super::levels::{LevelMeter, LevelVector};
use crate::permission::{PermissionGate, PermissionStatus};

/// All episode audio is mono at this rate, whatever the device delivers.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// High-pass cutoff removing rumble and DC offset.
pub const HIGHPASS_CUTOFF_HZ: f32 = 80.0;

/// Fade-in ramp applied to the start of each episode.
pub const FADE_IN_SECS: f32 = 0.02;

/// Default pre-roll window spliced onto the front of an episode.
pub const DEFAULT_PREROLL_SECS: f32 = 0.25;

/// Cadence of level-meter updates while capture runs.
pub const LEVEL_INTERVAL_MS: u64 = 50;

/// Capacity of the callback-to-meter block channel.
const LEVEL_CHANNEL_CAPACITY: usize = 100;

/// Errors that can occur while setting up or running capture.
#[derive(Debug, Clone)]
pub enum CaptureError {
    PermissionDenied,
    NoInputDevice,
    NoSupportedConfig,
    StreamStart(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::PermissionDenied => write!(f, "microphone access denied"),
            CaptureError::NoInputDevice => write!(f, "no audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "no supported audio configuration"),
            CaptureError::StreamStart(e) => write!(f, "failed to start audio stream: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Average interleaved frames down to mono, converting as we go.
fn append_downmixed_samples<T, F>(buf: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

/// Linear interpolation resampler. `ratio` is output rate over input rate.
fn resample_linear(input: &[f32], ratio: f32) -> Vec<f32> {
    let input_len = input.len();
    let output_len = (input_len as f32 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f32 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx - idx as f32;

        if idx + 1 < input_len {
            output.push(input[idx] * (1.0 - frac) + input[idx + 1] * frac);
        } else {
            output.push(input.last().copied().unwrap_or(0.0));
        }
    }

    output
}

/// Routes each incoming block into the pre-roll ring and, while an episode is
/// active, into the episode buffer. Pure state behind a lock; the capture
/// callback holds that lock only long enough to append.
pub struct SampleRouter {
    preroll: VecDeque<f32>,
    preroll_cap: usize,
    episode: Option<Vec<f32>>,
}

impl SampleRouter {
    pub fn new(preroll_secs: f32) -> Self {
        let preroll_cap = (preroll_secs.max(0.0) * TARGET_SAMPLE_RATE as f32) as usize;
        Self {
            preroll: VecDeque::with_capacity(preroll_cap),
            preroll_cap,
            episode: None,
        }
    }

    /// Append one block of mono target-rate samples. Exactly one buffer is
    /// fed at a time: the episode while one is active, the ring otherwise.
    pub fn push(&mut self, samples: &[f32]) {
        if let Some(episode) = self.episode.as_mut() {
            episode.extend_from_slice(samples);
            return;
        }

        self.preroll.extend(samples.iter().copied());
        while self.preroll.len() > self.preroll_cap {
            self.preroll.pop_front();
        }
    }

    /// Start collecting an episode, seeded with the pre-roll window. The ring
    /// is drained in the same step so no window is ever delivered twice.
    /// A second call while an episode is active is a no-op.
    pub fn begin_episode(&mut self) {
        if self.episode.is_some() {
            return;
        }
        let seed: Vec<f32> = self.preroll.drain(..).collect();
        log::debug!("Episode started with {} pre-roll samples", seed.len());
        self.episode = Some(seed);
    }

    /// Stop collecting and hand back the raw episode audio.
    /// Returns `None` when no episode is active.
    pub fn end_episode(&mut self) -> Option<Vec<f32>> {
        self.episode.take()
    }

    /// Drop any in-progress episode audio.
    pub fn abort_episode(&mut self) {
        if self.episode.take().is_some() {
            log::debug!("Episode audio discarded");
        }
    }

    pub fn episode_active(&self) -> bool {
        self.episode.is_some()
    }

    #[cfg(test)]
    fn preroll_len(&self) -> usize {
        self.preroll.len()
    }
}

/// Signal conditioning applied once, when an episode ends.
pub fn condition_episode(samples: &[f32]) -> Vec<f32> {
    let filtered = high_pass_filter(samples, HIGHPASS_CUTOFF_HZ, TARGET_SAMPLE_RATE);
    fade_in(&filtered, FADE_IN_SECS, TARGET_SAMPLE_RATE)
}

struct TapHandle {
    shutdown: std::sync::mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Owns the capture topology: the tap thread, the sample router, and the
/// channel feeding the level meter.
pub struct CaptureEngine {
    router: Arc<Mutex<SampleRouter>>,
    permission: Arc<dyn PermissionGate>,
    level_tx: mpsc::Sender<Vec<f32>>,
    tap: Mutex<Option<TapHandle>>,
}

impl CaptureEngine {
    /// Returns the engine and the receiver end of the level-block channel,
    /// which should be handed to [`run_level_publisher`].
    pub fn new(
        permission: Arc<dyn PermissionGate>,
        preroll_secs: f32,
    ) -> (Self, mpsc::Receiver<Vec<f32>>) {
        let (level_tx, level_rx) = mpsc::channel(LEVEL_CHANNEL_CAPACITY);
        let engine = Self {
            router: Arc::new(Mutex::new(SampleRouter::new(preroll_secs))),
            permission,
            level_tx,
            tap: Mutex::new(None),
        };
        (engine, level_rx)
    }

    /// Install the input tap and start filling the pre-roll ring.
    /// Idempotent: a second call while the tap is alive does nothing.
    pub fn start_preroll_capture(&self) -> Result<(), CaptureError> {
        let mut tap = self.tap.lock().unwrap();
        if tap.is_some() {
            return Ok(());
        }

        let router = self.router.clone();
        let level_tx = self.level_tx.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("audio-tap".to_string())
            .spawn(move || {
                let stream = match build_tap_stream(router, level_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::StreamStart(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until shutdown. recv() also returns
                // when the engine is dropped and the sender goes with it.
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("Audio tap thread exiting");
            })
            .map_err(|e| CaptureError::StreamStart(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Pre-roll capture running");
                *tap = Some(TapHandle {
                    shutdown: shutdown_tx,
                    thread,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(CaptureError::StreamStart(
                "audio tap thread died during setup".to_string(),
            )),
        }
    }

    /// Begin a recording episode. Checks the microphone permission first and
    /// lazily installs the tap if it is not running yet.
    pub async fn begin_episode(&self) -> Result<(), CaptureError> {
        let status = match self.permission.status().await {
            PermissionStatus::Undetermined => self.permission.request().await,
            known => known,
        };
        if status != PermissionStatus::Granted {
            return Err(CaptureError::PermissionDenied);
        }

        self.start_preroll_capture()?;
        self.router.lock().unwrap().begin_episode();
        Ok(())
    }

    /// End the active episode and return its conditioned audio. Capture keeps
    /// running in pre-roll mode. Returns an empty buffer when no episode was
    /// active.
    pub fn end_episode(&self) -> Vec<f32> {
        let raw = self.router.lock().unwrap().end_episode();
        match raw {
            Some(samples) => {
                log::info!(
                    "Episode ended: {:.2}s of audio",
                    samples.len() as f32 / TARGET_SAMPLE_RATE as f32
                );
                condition_episode(&samples)
            }
            None => Vec::new(),
        }
    }

    /// Discard the active episode without producing audio.
    pub fn abort_episode(&self) {
        self.router.lock().unwrap().abort_episode();
    }

    #[cfg(test)]
    pub(crate) fn test_begin_episode(&self) {
        self.router.lock().unwrap().begin_episode();
    }

    #[cfg(test)]
    pub(crate) fn test_push(&self, samples: &[f32]) {
        self.router.lock().unwrap().push(samples);
    }

    #[cfg(test)]
    pub(crate) fn test_episode_active(&self) -> bool {
        self.router.lock().unwrap().episode_active()
    }

    /// Tear down the input tap. Blocks briefly while the tap thread exits.
    pub fn shutdown(&self) {
        if let Some(handle) = self.tap.lock().unwrap().take() {
            let _ = handle.shutdown.send(());
            let _ = handle.thread.join();
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_tap_stream(
    router: Arc<Mutex<SampleRouter>>,
    level_tx: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|_| CaptureError::NoSupportedConfig)?;

    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: cpal::StreamConfig = supported_config.into();

    match sample_format {
        SampleFormat::I16 => build_tap_stream_typed::<i16>(&device, &config, router, level_tx),
        SampleFormat::U16 => build_tap_stream_typed::<u16>(&device, &config, router, level_tx),
        SampleFormat::F32 => build_tap_stream_typed::<f32>(&device, &config, router, level_tx),
        _ => Err(CaptureError::NoSupportedConfig),
    }
}

fn build_tap_stream_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    router: Arc<Mutex<SampleRouter>>,
    level_tx: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample + cpal::Sample<Float = f32> + Send + 'static,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;
    let ratio = TARGET_SAMPLE_RATE as f32 / device_rate as f32;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut mono = Vec::with_capacity(data.len() / channels.max(1) + 1);
                append_downmixed_samples(&mut mono, data, channels, |s| s.to_float_sample());

                let block = if device_rate == TARGET_SAMPLE_RATE {
                    mono
                } else {
                    resample_linear(&mono, ratio)
                };

                router.lock().unwrap().push(&block);

                // Level updates are best-effort; never block the audio thread.
                let _ = level_tx.try_send(block);
            },
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamStart(e.to_string()))?;

    Ok(stream)
}

/// Fold captured blocks through the level meter on a fixed cadence and
/// publish the result. Silence (no blocks) decays the meter toward zero.
pub async fn run_level_publisher(
    mut block_rx: mpsc::Receiver<Vec<f32>>,
    level_tx: watch::Sender<LevelVector>,
    cancel: CancellationToken,
) {
    let mut meter = LevelMeter::new();
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(LEVEL_INTERVAL_MS));

    log::debug!("Level publisher started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let mut window = Vec::new();
                while let Ok(block) = block_rx.try_recv() {
                    window.extend_from_slice(&block);
                }

                let levels = meter.update(&window);
                if level_tx.send(levels).is_err() {
                    break;
                }
            }
        }
    }

    let _ = level_tx.send(meter.reset());
    log::debug!("Level publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(value: f32, len: usize) -> Vec<f32> {
        vec![value; len]
    }

    #[test]
    fn preroll_ring_is_bounded() {
        let mut router = SampleRouter::new(0.25);
        let cap = (0.25 * TARGET_SAMPLE_RATE as f32) as usize;

        router.push(&block(0.1, cap * 3));
        assert_eq!(router.preroll_len(), cap);
    }

    #[test]
    fn episode_is_seeded_with_preroll_tail() {
        let mut router = SampleRouter::new(0.25);
        let cap = (0.25 * TARGET_SAMPLE_RATE as f32) as usize;

        // Older audio that should be trimmed out, then the window that
        // should survive.
        router.push(&block(9.0, cap));
        router.push(&block(0.5, cap));

        router.begin_episode();
        router.push(&block(0.7, 100));

        let episode = router.end_episode().unwrap();
        assert_eq!(episode.len(), cap + 100);
        assert!(episode[..cap].iter().all(|&s| s == 0.5));
        assert!(episode[cap..].iter().all(|&s| s == 0.7));
    }

    #[test]
    fn short_preroll_seeds_whatever_exists() {
        let mut router = SampleRouter::new(0.25);
        router.push(&block(0.3, 10));

        router.begin_episode();
        let episode = router.end_episode().unwrap();
        assert_eq!(episode.len(), 10);
    }

    #[test]
    fn begin_episode_is_idempotent() {
        let mut router = SampleRouter::new(0.25);
        router.push(&block(0.2, 50));

        router.begin_episode();
        router.push(&block(0.4, 25));
        router.begin_episode(); // must not reset the buffer

        let episode = router.end_episode().unwrap();
        assert_eq!(episode.len(), 75);
    }

    #[test]
    fn end_without_begin_yields_nothing() {
        let mut router = SampleRouter::new(0.25);
        router.push(&block(0.2, 50));
        assert!(router.end_episode().is_none());
    }

    #[test]
    fn abort_discards_episode_audio() {
        let mut router = SampleRouter::new(0.25);
        router.push(&block(0.2, 50));
        router.begin_episode();
        router.abort_episode();

        assert!(!router.episode_active());
        assert!(router.end_episode().is_none());
    }

    #[test]
    fn episode_start_drains_the_preroll_window() {
        let mut router = SampleRouter::new(0.25);
        router.push(&block(0.6, 200));

        router.begin_episode();
        router.push(&block(0.7, 100));
        let first = router.end_episode().unwrap();
        assert_eq!(first.len(), 300);

        // Nothing arrived between the episodes, so nothing already returned
        // by the first episode may reappear in the second.
        router.begin_episode();
        let second = router.end_episode().unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn ring_is_not_fed_while_an_episode_is_active() {
        let mut router = SampleRouter::new(0.25);
        router.begin_episode();
        router.push(&block(0.5, 200));
        router.end_episode();
        assert_eq!(router.preroll_len(), 0);

        // Pre-roll collection resumes once the episode ends.
        router.push(&block(0.2, 50));
        assert_eq!(router.preroll_len(), 50);
    }

    #[test]
    fn downmix_averages_stereo_frames() {
        let mut buf = Vec::new();
        append_downmixed_samples(&mut buf, &[1.0f32, -1.0, 0.5, 0.5], 2, |s| s);
        assert_eq!(buf, vec![0.0, 0.5]);
    }

    #[test]
    fn downmix_passes_mono_through() {
        let mut buf = Vec::new();
        append_downmixed_samples(&mut buf, &[0.1f32, 0.2, 0.3], 1, |s| s);
        assert_eq!(buf, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn resample_halves_length_at_half_ratio() {
        let input = vec![0.0f32, 1.0, 2.0, 3.0];
        let result = resample_linear(&input, 0.5);
        assert_eq!(result.len(), 2);
        assert!((result[0] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn conditioning_preserves_length_and_fades_start() {
        let samples = vec![0.5f32; TARGET_SAMPLE_RATE as usize];
        let out = condition_episode(&samples);
        assert_eq!(out.len(), samples.len());
        assert!(out[0].abs() < 1e-3, "start should be faded to silence");
    }
}
