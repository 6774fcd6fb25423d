use crate::error::{RuntimeError, RuntimeResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use tokio::sync::mpsc;

/// Microphone handle. Owns the cpal input stream and forwards every
/// delivered chunk, in order, to the recorder.
pub struct AudioCapture {
    device: Device,
    sample_rate: u32,
    channels: u16,
    stream: Option<Stream>,
}

impl AudioCapture {
    pub fn new(sample_rate: u32, channels: u16) -> RuntimeResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| RuntimeError::Device("No default input device found".to_string()))?;

        tracing::info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "<unnamed>".to_string())
        );

        Ok(Self {
            device,
            sample_rate,
            channels,
            stream: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn start(&mut self, chunk_tx: mpsc::UnboundedSender<Vec<f32>>) -> RuntimeResult<()> {
        tracing::info!(
            "Configuring capture stream: {}Hz, {} channel(s)",
            self.sample_rate,
            self.channels
        );

        let supported_configs: Vec<SupportedStreamConfigRange> = self
            .device
            .supported_input_configs()
            .map_err(|e| RuntimeError::Device(e.to_string()))?
            .collect();
        for supported in &supported_configs {
            tracing::debug!("Supported config: {:?}", supported);
        }

        let (final_config, sample_format) =
            pick_config(supported_configs, self.channels, self.sample_rate).ok_or_else(|| {
                RuntimeError::Device("No suitable capture configuration found".to_string())
            })?;
        tracing::debug!("Capturing {:?} samples", sample_format);

        let error_callback = |err| {
            tracing::error!("Capture stream error: {}", err);
        };

        let stream = match sample_format {
            SampleFormat::F32 => self.device.build_input_stream(
                &final_config,
                move |data: &[f32], _: &_| {
                    let _ = chunk_tx.send(data.to_vec());
                },
                error_callback,
                None,
            ),
            SampleFormat::I16 => self.device.build_input_stream(
                &final_config,
                move |data: &[i16], _: &_| {
                    let converted = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    let _ = chunk_tx.send(converted);
                },
                error_callback,
                None,
            ),
            SampleFormat::U16 => self.device.build_input_stream(
                &final_config,
                move |data: &[u16], _: &_| {
                    let converted = data
                        .iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0)
                        .collect();
                    let _ = chunk_tx.send(converted);
                },
                error_callback,
                None,
            ),
            format => {
                return Err(RuntimeError::Device(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        }
        .map_err(|e| RuntimeError::Device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| RuntimeError::Device(e.to_string()))?;
        self.stream = Some(stream);

        tracing::info!("Audio capture started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("Audio capture stopped");
        }
    }
}

// cpal streams are !Send on some hosts; the handle is only ever moved into
// the task that owns it and never shared.
unsafe impl Send for AudioCapture {}

/// First range with the wanted channel count and rate whose sample format
/// the capture callback can convert. The stream is built with that range's
/// own format.
fn pick_config(
    ranges: impl IntoIterator<Item = SupportedStreamConfigRange>,
    channels: u16,
    sample_rate: u32,
) -> Option<(StreamConfig, SampleFormat)> {
    ranges.into_iter().find_map(|range| {
        let convertible = matches!(
            range.sample_format(),
            SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
        );
        let fits = range.channels() == channels
            && range.min_sample_rate().0 <= sample_rate
            && range.max_sample_rate().0 >= sample_rate;
        if !(convertible && fits) {
            return None;
        }
        let format = range.sample_format();
        Some((
            range.with_sample_rate(cpal::SampleRate(sample_rate)).into(),
            format,
        ))
    })
}
