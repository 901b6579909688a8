//! Frequency analyser.
//!
//! The processor only records the most recent `fft_size` input samples and
//! passes its input through. The spectrum is computed on demand when the
//! byte frequency data is read, so readers pay for the FFT and the render
//! thread does not.

use parking_lot::Mutex;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use mictest_core::{Frames, SampleRate};
use mictest_node::{AudioBuffer, NodeError, NodeKind, Processor};

pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32768;

/// Smoothing time constant applied between successive reads
pub const DEFAULT_SMOOTHING: f32 = 0.8;
/// Magnitude mapped to byte 0
pub const DEFAULT_MIN_DECIBELS: f32 = -100.0;
/// Magnitude mapped to byte 255
pub const DEFAULT_MAX_DECIBELS: f32 = -30.0;

/// Whether `fft_size` is a power of two within the supported range
pub fn is_valid_fft_size(fft_size: usize) -> bool {
    fft_size.is_power_of_two() && (MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size)
}

/// Analysis state shared between the processor and its readers
pub struct AnalyserState {
    fft_size: usize,
    time_data: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
}

impl AnalyserState {
    /// Callers validate `fft_size` with [`is_valid_fft_size`] first.
    pub fn new(fft_size: usize) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        // Blackman window
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / fft_size as f32;
                0.08f32.mul_add(
                    (4.0 * PI * x).cos(),
                    0.5f32.mul_add(-(2.0 * PI * x).cos(), 0.42),
                )
            })
            .collect();

        Self {
            fft_size,
            time_data: vec![0.0; fft_size],
            write_pos: 0,
            window,
            fft,
            spectrum: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            smoothed: vec![0.0; fft_size / 2],
            smoothing: DEFAULT_SMOOTHING,
            min_decibels: DEFAULT_MIN_DECIBELS,
            max_decibels: DEFAULT_MAX_DECIBELS,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    fn push(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.time_data[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// Compute the current spectrum into `out`, one byte per bin
    ///
    /// Writes `min(out.len(), frequency_bin_count())` bytes. Does not allocate.
    pub fn byte_frequency_data(&mut self, out: &mut [u8]) {
        let n = self.fft_size;

        // Oldest sample first
        for (i, bin) in self.spectrum.iter_mut().enumerate() {
            let sample = self.time_data[(self.write_pos + i) % n];
            *bin = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let norm = 1.0 / n as f32;
        let range = self.max_decibels - self.min_decibels;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[k].norm() * norm;
            *smoothed = self
                .smoothing
                .mul_add(*smoothed, (1.0 - self.smoothing) * magnitude);

            if let Some(byte) = out.get_mut(k) {
                let db = 20.0 * smoothed.log10();
                let scaled = 255.0 * (db - self.min_decibels) / range;
                // log10(0) is -inf, which clamps to 0
                *byte = if scaled.is_nan() {
                    0
                } else {
                    scaled.clamp(0.0, 255.0) as u8
                };
            }
        }
    }
}

/// Graph node feeding an [`AnalyserState`]
pub struct AnalyserProcessor {
    state: Arc<Mutex<AnalyserState>>,
}

impl AnalyserProcessor {
    pub fn new(state: Arc<Mutex<AnalyserState>>) -> Self {
        Self { state }
    }
}

impl Processor for AnalyserProcessor {
    fn kind(&self) -> NodeKind {
        NodeKind::Analyser
    }

    fn initialize(&mut self, _sample_rate: SampleRate, _max_block_size: Frames) -> Result<(), NodeError> {
        Ok(())
    }

    fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), NodeError> {
        audio.pass_through();

        // A reader holding the lock skips this block rather than stalling the render
        if let Some(mut state) = self.state.try_lock() {
            state.push(&audio.input[..audio.frames]);
        }
        Ok(())
    }
}
