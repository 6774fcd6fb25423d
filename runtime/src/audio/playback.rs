//! Speech playback and the per-frame mouth sync that follows it.
//!
//! Overlapping utterances resolve last-start-wins: starting a playback
//! supersedes whatever was speaking, and only the newest [`Playback`] drives
//! the mouth.

use crate::animation::AnimationDriver;
use crate::audio::analysis::{MouthShaper, SpectrumAnalyser};
use crate::config::AnalysisConfig;
use crate::error::{RuntimeError, RuntimeResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

/// Speech audio received from the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundAudioPayload {
    Bytes(Vec<u8>),
    Url(String),
}

/// Anything that can be asked to speak. Calls return immediately; resolution,
/// decoding and output happen in the background.
pub trait SpeechPlayer: Send + Sync {
    fn play(&self, payload: InboundAudioPayload);
    /// Called on the first user gesture; playback waits for it.
    fn unlock(&self);
    fn is_speaking(&self) -> bool;
}

/// State of one utterance, shared between the output callback that advances
/// it and the mouth-sync tick that reads it.
pub struct Playback {
    id: u64,
    samples: Vec<f32>,
    sample_rate: u32,
    cursor: AtomicUsize,
    finished: AtomicBool,
    superseded: AtomicBool,
}

impl Playback {
    pub fn new(id: u64, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            id,
            samples,
            sample_rate,
            cursor: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            superseded: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_at(&self, index: usize) -> Option<f32> {
        self.samples.get(index).copied()
    }

    pub fn advance_to(&self, index: usize) {
        self.cursor.store(index.min(self.samples.len()), Ordering::Release);
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Marks natural end of playback.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn supersede(&self) {
        self.superseded.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }

    pub fn is_speaking(&self) -> bool {
        !self.is_finished() && !self.is_superseded()
    }

    /// The `n` most recently played samples.
    pub fn recent(&self, n: usize) -> &[f32] {
        let end = self.cursor();
        &self.samples[end.saturating_sub(n)..end]
    }
}

/// Audio sink for decoded speech. Starting a new playback stops the previous one.
pub trait AudioOutput: Send + Sync {
    fn start(&self, playback: Arc<Playback>) -> RuntimeResult<()>;
}

struct StreamSlot(Option<Stream>);

// The stream is only created, replaced and dropped under the slot mutex.
unsafe impl Send for StreamSlot {}

/// Default output device via cpal.
pub struct CpalOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    slot: Mutex<StreamSlot>,
}

impl CpalOutput {
    pub fn new() -> RuntimeResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| RuntimeError::Device("No default output device found".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| RuntimeError::Device(e.to_string()))?;

        info!(
            "Using output device: {} ({}Hz, {} channel(s))",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string()),
            supported.sample_rate().0,
            supported.channels()
        );

        Ok(Self {
            sample_format: supported.sample_format(),
            config: supported.into(),
            device,
            slot: Mutex::new(StreamSlot(None)),
        })
    }
}

impl AudioOutput for CpalOutput {
    fn start(&self, playback: Arc<Playback>) -> RuntimeResult<()> {
        let channels = self.config.channels.max(1) as usize;
        let step = playback.sample_rate() as f64 / self.config.sample_rate.0 as f64;
        let mut position = 0.0f64;

        // Nearest-sample resampling onto the device rate.
        let mut next_sample = move || -> f32 {
            if !playback.is_speaking() {
                return 0.0;
            }
            let index = position as usize;
            position += step;
            match playback.sample_at(index) {
                Some(sample) => {
                    playback.advance_to(index + 1);
                    sample
                }
                None => {
                    playback.finish();
                    0.0
                }
            }
        };

        let error_callback = |err| {
            warn!("Output stream error: {}", err);
        };

        let stream = match self.sample_format {
            SampleFormat::F32 => self.device.build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &_| {
                    for frame in data.chunks_mut(channels) {
                        frame.fill(next_sample());
                    }
                },
                error_callback,
                None,
            ),
            SampleFormat::I16 => self.device.build_output_stream(
                &self.config,
                move |data: &mut [i16], _: &_| {
                    for frame in data.chunks_mut(channels) {
                        frame.fill((next_sample() * i16::MAX as f32) as i16);
                    }
                },
                error_callback,
                None,
            ),
            format => {
                return Err(RuntimeError::Device(format!(
                    "Unsupported output sample format: {:?}",
                    format
                )));
            }
        }
        .map_err(|e| RuntimeError::Device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| RuntimeError::Device(e.to_string()))?;

        // Dropping the old stream silences the superseded playback.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).0 = Some(stream);
        Ok(())
    }
}

/// Output with no device behind it. Advances the cursor in real time so
/// mouth sync still runs when audio cannot be heard.
pub struct SilentOutput;

impl AudioOutput for SilentOutput {
    fn start(&self, playback: Arc<Playback>) -> RuntimeResult<()> {
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut interval = tokio::time::interval(Duration::from_millis(10));
            loop {
                interval.tick().await;
                if playback.is_superseded() {
                    break;
                }
                let elapsed = started.elapsed().as_secs_f64();
                let index = (elapsed * playback.sample_rate() as f64) as usize;
                playback.advance_to(index);
                if index >= playback.len() {
                    playback.finish();
                    break;
                }
            }
        });
        Ok(())
    }
}

/// Decodes a WAV buffer to mono f32.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), hound::Error> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

struct EngineInner {
    output: Arc<dyn AudioOutput>,
    driver: Arc<AnimationDriver>,
    http: reqwest::Client,
    base_url: Url,
    current: Mutex<Option<Arc<Playback>>>,
    analyser: Mutex<SpectrumAnalyser>,
    shaper: MouthShaper,
    unlocked: watch::Sender<bool>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn wall_clock_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
        * 1000.0
}

impl PlaybackEngine {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        driver: Arc<AnimationDriver>,
        http: reqwest::Client,
        base_url: Url,
        analysis: &AnalysisConfig,
    ) -> Self {
        let (unlocked, _) = watch::channel(false);
        Self {
            inner: Arc::new(EngineInner {
                output,
                driver,
                http,
                base_url,
                current: Mutex::new(None),
                analyser: Mutex::new(SpectrumAnalyser::new(analysis.fft_size)),
                shaper: MouthShaper::new(analysis),
                unlocked,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        *self.inner.unlocked.borrow()
    }

    pub fn current(&self) -> Option<Arc<Playback>> {
        lock(&self.inner.current).clone()
    }

    /// Resolves, decodes and starts one utterance. Returns `Ok(None)` when
    /// the payload could not be decoded; nothing is left speaking in that case.
    pub async fn play_now(&self, payload: InboundAudioPayload) -> RuntimeResult<Option<Arc<Playback>>> {
        if !self.is_unlocked() {
            debug!("Playback waiting for first user gesture");
            let mut unlocked = self.inner.unlocked.subscribe();
            let released = unlocked.wait_for(|ready| *ready).await.is_ok();
            if !released {
                return Ok(None);
            }
        }

        let bytes = match payload {
            InboundAudioPayload::Bytes(bytes) => bytes,
            InboundAudioPayload::Url(url) => self.fetch(&url).await?,
        };

        let (samples, sample_rate) = match decode_wav(&bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Skipping undecodable audio ({} bytes): {}", bytes.len(), e);
                return Ok(None);
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let playback = Arc::new(Playback::new(id, samples, sample_rate));

        if let Some(previous) = lock(&self.inner.current).replace(Arc::clone(&playback)) {
            if previous.is_speaking() {
                debug!("Playback {} superseded by {}", previous.id(), id);
            }
            previous.supersede();
        }

        if let Err(e) = self.inner.output.start(Arc::clone(&playback)) {
            warn!("Failed to start playback {}: {}", id, e);
            playback.finish();
            self.clear_if_current(&playback);
            // The previous playback is already superseded, so no tick will reset the mouth.
            self.inner.driver.set_mouth_open(0.0);
            return Err(e);
        }

        info!(
            "Playing utterance {} ({:.2}s)",
            id,
            playback.len() as f64 / sample_rate.max(1) as f64
        );
        self.inner.driver.speak();
        Ok(Some(playback))
    }

    async fn fetch(&self, url: &str) -> RuntimeResult<Vec<u8>> {
        let resolved = self.inner.base_url.join(url)?;
        debug!("Fetching audio from {}", resolved);
        let bytes = self
            .inner
            .http
            .get(resolved)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    fn clear_if_current(&self, playback: &Arc<Playback>) {
        let mut current = lock(&self.inner.current);
        if current.as_ref().is_some_and(|p| Arc::ptr_eq(p, playback)) {
            *current = None;
        }
    }

    /// One animation frame. While the newest playback is speaking, pushes the
    /// analysed mouth value to the driver; once it ends naturally, resets the
    /// mouth to closed.
    pub fn tick(&self, now_ms: f64) {
        let Some(playback) = self.current() else {
            return;
        };

        if playback.is_finished() || playback.is_superseded() {
            self.clear_if_current(&playback);
            self.inner.driver.set_mouth_open(0.0);
            return;
        }

        let spectrum = {
            let mut analyser = lock(&self.inner.analyser);
            let window = analyser.fft_size();
            analyser.byte_spectrum(playback.recent(window))
        };
        let value = self.inner.shaper.mouth_open(&spectrum, now_ms);
        self.inner.driver.set_mouth_open(value);
    }

    pub async fn run_mouth_sync(self, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.tick(wall_clock_ms());
        }
    }
}

impl SpeechPlayer for PlaybackEngine {
    fn play(&self, payload: InboundAudioPayload) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.play_now(payload).await {
                warn!("Playback failed: {}", e);
            }
        });
    }

    fn unlock(&self) {
        if !self.inner.unlocked.send_replace(true) {
            info!("Audio playback unlocked");
        }
    }

    fn is_speaking(&self) -> bool {
        self.current().is_some_and(|p| p.is_speaking())
    }
}
