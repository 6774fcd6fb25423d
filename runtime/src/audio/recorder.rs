//! Push-to-talk recording state machine.
//!
//! The controller is a plain value: the task that owns it feeds it capture
//! chunks and input events in arrival order and it hands finished clips to
//! a [`ClipSink`]. Nothing here touches the device or the network.

use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
}

/// Finalized recording, encoded as 16-bit PCM WAV.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    bytes: Vec<u8>,
    samples: usize,
}

impl AudioClip {
    pub fn encode(samples: &[f32], sample_rate: u32) -> Result<Self, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for &sample in samples {
                let clamped = sample.clamp(-1.0, 1.0);
                writer.write_sample((clamped * i16::MAX as f32) as i16)?;
            }
            writer.finalize()?;
        }
        Ok(Self {
            bytes: cursor.into_inner(),
            samples: samples.len(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }
}

/// Where finalized clips go. The orchestrator implements this by sending a
/// binary frame when the channel is open.
pub trait ClipSink: Send + Sync {
    fn submit(&self, clip: AudioClip);
}

/// Whether keyboard focus is inside a text-entry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    TextEntry,
    Elsewhere,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    PointerDown,
    PointerUp,
    KeyDown { key: String, repeat: bool },
    KeyUp { key: String },
}

pub struct CaptureController {
    state: RecordingState,
    clip: Vec<f32>,
    device_ready: bool,
    sample_rate: u32,
    record_key: String,
    sink: Arc<dyn ClipSink>,
}

impl CaptureController {
    pub fn new(
        device_ready: bool,
        sample_rate: u32,
        record_key: impl Into<String>,
        sink: Arc<dyn ClipSink>,
    ) -> Self {
        if !device_ready {
            warn!("No capture device, recording controls are inert");
        }
        Self {
            state: RecordingState::Idle,
            clip: Vec::new(),
            device_ready,
            sample_rate,
            record_key: record_key.into(),
            sink,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    pub fn start_recording(&mut self) {
        if self.state != RecordingState::Idle || !self.device_ready {
            return;
        }
        self.clip.clear();
        self.state = RecordingState::Recording;
        info!("Recording started");
    }

    pub fn stop_recording(&mut self) {
        if self.state != RecordingState::Recording {
            return;
        }
        self.state = RecordingState::Idle;

        let samples = std::mem::take(&mut self.clip);
        match AudioClip::encode(&samples, self.sample_rate) {
            Ok(clip) => {
                info!("Recording stopped: {} samples", clip.sample_count());
                self.sink.submit(clip);
            }
            Err(e) => warn!("Failed to encode recorded clip: {}", e),
        }
    }

    /// Appends a capture chunk to the open clip. Chunks delivered while idle
    /// are discarded.
    pub fn push_chunk(&mut self, chunk: &[f32]) {
        if self.state == RecordingState::Recording {
            self.clip.extend_from_slice(chunk);
        }
    }

    pub fn handle_input(&mut self, event: InputEvent, focus: Focus) {
        match event {
            InputEvent::PointerDown => self.start_recording(),
            InputEvent::PointerUp => self.stop_recording(),
            InputEvent::KeyDown { key, repeat } => {
                if !self.is_record_key(&key, focus) {
                    return;
                }
                if repeat {
                    debug!("Ignoring auto-repeat of {}", key);
                    return;
                }
                self.start_recording();
            }
            InputEvent::KeyUp { key } => {
                if self.is_record_key(&key, focus) {
                    self.stop_recording();
                }
            }
        }
    }

    fn is_record_key(&self, key: &str, focus: Focus) -> bool {
        focus == Focus::Elsewhere && key.eq_ignore_ascii_case(&self.record_key)
    }
}

/// Drives a controller from capture chunks and UI input until the input
/// side closes. Chunks are drained first so a stop never loses audio that
/// was already delivered.
pub async fn run_recorder(
    mut controller: CaptureController,
    mut chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    mut inputs: mpsc::Receiver<(InputEvent, Focus)>,
    state_tx: watch::Sender<RecordingState>,
) {
    let mut chunks_open = true;
    loop {
        tokio::select! {
            biased;
            chunk = chunks.recv(), if chunks_open => match chunk {
                Some(chunk) => controller.push_chunk(&chunk),
                None => {
                    debug!("Capture stream ended");
                    chunks_open = false;
                }
            },
            input = inputs.recv() => match input {
                Some((event, focus)) => {
                    while let Ok(chunk) = chunks.try_recv() {
                        controller.push_chunk(&chunk);
                    }
                    controller.handle_input(event, focus);
                    state_tx.send_replace(controller.state());
                }
                None => break,
            },
        }
    }
    controller.stop_recording();
    debug!("Recorder task ended");
}
