//! Fixture decoding.
//!
//! WAV bytes are decoded with `hound`, downmixed to mono and resampled to
//! the context rate with `dasp` linear interpolation.

use dasp::interpolate::linear::Linear;
use dasp::{Signal, signal};
use std::io::Cursor;

use mictest_core::{DecodedAudio, Error, Result, Sample, SampleRate};

/// Decode a complete WAV file into mono audio at `target_rate`
pub fn decode_wav(bytes: &[u8], target_rate: SampleRate) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::DecodeFailure(format!("Invalid WAV data: {e}")))?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(Error::DecodeFailure("WAV file has no channels".to_string()));
    }
    if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
        return Err(Error::DecodeFailure(format!(
            "Unsupported bit depth: {} bits (supported: 1-32)",
            spec.bits_per_sample
        )));
    }

    let interleaved: Vec<Sample> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::DecodeFailure(format!("Failed to read samples: {e}")))?,
        hound::SampleFormat::Int => {
            // 2^31 for 32-bit to avoid shift overflow
            let max_value = if spec.bits_per_sample == 32 {
                2_147_483_648.0_f32
            } else {
                (1_i32 << (spec.bits_per_sample - 1)) as f32
            };
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::DecodeFailure(format!("Failed to read samples: {e}")))?
        }
    };

    let mono = downmix(&interleaved, usize::from(spec.channels));
    let samples = resample(mono, spec.sample_rate, target_rate);

    tracing::debug!(
        "Decoded {} Hz x{} WAV into {} frames at {} Hz",
        spec.sample_rate,
        spec.channels,
        samples.len(),
        target_rate
    );

    Ok(DecodedAudio::new(samples, target_rate))
}

fn downmix(interleaved: &[Sample], channels: usize) -> Vec<Sample> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<Sample>() * scale)
        .collect()
}

fn resample(samples: Vec<Sample>, from: SampleRate, to: SampleRate) -> Vec<Sample> {
    if from == to || from == 0 || samples.len() < 2 {
        return samples;
    }

    let frames_out = (samples.len() as u64 * u64::from(to) / u64::from(from)) as usize;

    let mut source = signal::from_iter(samples.into_iter());
    let left = source.next();
    let right = source.next();
    let interpolator = Linear::new(left, right);

    source
        .from_hz_to_hz(interpolator, f64::from(from), f64::from(to))
        .take(frames_out)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<Cursor<&mut Vec<u8>>>)) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        bytes
    }

    #[test]
    fn test_decode_int16_mono() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, |w| {
            w.write_sample(16384_i16).unwrap();
            w.write_sample(-32768_i16).unwrap();
        });

        let audio = decode_wav(&bytes, 48000).unwrap();
        assert_eq!(audio.sample_rate(), 48000);
        assert_eq!(audio.samples(), &[0.5, -1.0]);
    }

    #[test]
    fn test_decode_stereo_float_downmixes() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let bytes = wav_bytes(spec, |w| {
            for _ in 0..4 {
                w.write_sample(0.5_f32).unwrap();
                w.write_sample(-0.25_f32).unwrap();
            }
        });

        let audio = decode_wav(&bytes, 44100).unwrap();
        assert_eq!(audio.frames(), 4);
        assert!(audio.samples().iter().all(|&s| (s - 0.125).abs() < 1e-6));
    }

    #[test]
    fn test_decode_resamples_to_target_rate() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let bytes = wav_bytes(spec, |w| {
            for _ in 0..2400 {
                w.write_sample(0.25_f32).unwrap();
            }
        });

        let audio = decode_wav(&bytes, 48000).unwrap();
        assert_eq!(audio.sample_rate(), 48000);
        assert_eq!(audio.frames(), 4800);
        assert!((audio.samples()[1000] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_garbage_is_decode_failure() {
        let result = decode_wav(b"definitely not a wav file", 48000);
        assert!(matches!(result, Err(Error::DecodeFailure(_))));
    }
}
