//! Turns the audio that is currently playing into a mouth-openness value.

use crate::config::AnalysisConfig;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Fixed-window magnitude spectrum on the 0..=255 decibel byte scale.
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Self {
            fft,
            window: blackman(fft_size),
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Byte magnitudes for the first `fft_size / 2` bins. Input shorter than
    /// the window is zero-padded at the front.
    pub fn byte_spectrum(&mut self, samples: &[f32]) -> Vec<u8> {
        let n = self.window.len();
        let tail = &samples[samples.len().saturating_sub(n)..];
        let pad = n - tail.len();

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { tail[i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        self.scratch[..n / 2]
            .iter()
            .map(|c| {
                let magnitude = c.norm() / n as f32;
                let db = if magnitude > 0.0 {
                    20.0 * magnitude.log10()
                } else {
                    f32::NEG_INFINITY
                };
                let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

fn blackman(n: usize) -> Vec<f32> {
    let alpha = 0.16;
    let a0 = 0.5 * (1.0 - alpha);
    let a1 = 0.5;
    let a2 = 0.5 * alpha;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Per-frame mouth value derived from a byte spectrum and wall-clock time.
#[derive(Debug, Clone)]
pub struct MouthShaper {
    volume_divisor: f32,
    silence_gate: f32,
    flutter_period_ms: f64,
    flutter_weight: f32,
}

impl MouthShaper {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            volume_divisor: config.volume_divisor,
            silence_gate: config.silence_gate,
            flutter_period_ms: config.flutter_period_ms,
            flutter_weight: config.flutter_weight.clamp(0.0, 1.0),
        }
    }

    /// Mean magnitude over the divisor, with values under the gate snapped to 0.
    pub fn volume(&self, spectrum: &[u8]) -> f32 {
        if spectrum.is_empty() {
            return 0.0;
        }
        let sum: u32 = spectrum.iter().map(|&b| b as u32).sum();
        let mean = sum as f32 / spectrum.len() as f32;
        let volume = mean / self.volume_divisor;
        if volume < self.silence_gate {
            0.0
        } else {
            volume
        }
    }

    pub fn flutter(&self, now_ms: f64) -> f32 {
        (((now_ms / self.flutter_period_ms).sin() + 1.0) / 2.0) as f32
    }

    /// Gated silence stays closed; otherwise the flutter is blended in and
    /// the result clamped to [0, 1].
    pub fn mouth_open(&self, spectrum: &[u8], now_ms: f64) -> f32 {
        let volume = self.volume(spectrum);
        if volume == 0.0 {
            return 0.0;
        }
        let blended =
            self.flutter(now_ms) * self.flutter_weight + volume * (1.0 - self.flutter_weight);
        blended.clamp(0.0, 1.0)
    }
}
