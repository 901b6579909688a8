//! Decoded audio and pull-based sample sources.

use std::sync::Arc;

use crate::{Frames, Sample, SampleRate};

/// A pull-based mono sample source.
///
/// Implemented by capture rings, graph stream destinations and fixture
/// players. Readers are polled from render callbacks, so `read` must not
/// block or allocate.
pub trait SampleReader: Send {
    /// Fill `out` with the next samples and return how many were real data.
    ///
    /// Any tail the reader could not fill is written as silence.
    fn read(&mut self, out: &mut [Sample]) -> usize;
}

/// Reader that only ever produces silence.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilenceReader;

impl SampleReader for SilenceReader {
    fn read(&mut self, out: &mut [Sample]) -> usize {
        out.fill(0.0);
        0
    }
}

/// Fully decoded mono audio at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    samples: Box<[Sample]>,
    sample_rate: SampleRate,
}

impl DecodedAudio {
    pub fn new(samples: Vec<Sample>, sample_rate: SampleRate) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn frames(&self) -> Frames {
        self.samples.len()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Endless reader over a shared decoded buffer.
pub struct LoopingReader {
    audio: Arc<DecodedAudio>,
    position: usize,
}

impl LoopingReader {
    pub fn new(audio: Arc<DecodedAudio>) -> Self {
        Self { audio, position: 0 }
    }
}

impl SampleReader for LoopingReader {
    fn read(&mut self, out: &mut [Sample]) -> usize {
        let samples = self.audio.samples();
        if samples.is_empty() {
            out.fill(0.0);
            return 0;
        }

        for sample in out.iter_mut() {
            *sample = samples[self.position];
            self.position = (self.position + 1) % samples.len();
        }
        out.len()
    }
}
