//! Generate the fixture WAV files used by `mictest monitor`
//!
//! Writes `guitar.wav` (the looping background track) and `beat.wav` (the
//! decoded buffer fixture) into one directory.

use anyhow::{Context, Result};
use clap::Parser;
use hound::{WavSpec, WavWriter};
use std::f32::consts::TAU;
use std::path::{Path, PathBuf};

/// Generate the mictest fixture files
#[derive(Parser, Debug)]
#[command(name = "generate-fixtures")]
#[command(about = "Generate the background and buffer fixture WAV files", long_about = None)]
struct Args {
    /// Output directory
    #[arg(short, long, default_value = "fixtures")]
    out: PathBuf,

    /// Sample rate (Hz)
    #[arg(short, long, default_value_t = 44100)]
    sample_rate: u32,

    /// Amplitude (0.0-1.0)
    #[arg(short, long, default_value_t = 0.5)]
    amplitude: f32,
}

/// Plucked G3 with two overtones, re-struck every half second
fn guitar(t: f32) -> f32 {
    let since_pluck = t % 0.5;
    let envelope = (-6.0 * since_pluck).exp();
    let fundamental = 196.0;
    envelope
        * (0.6 * (TAU * fundamental * t).sin()
            + 0.3 * (TAU * 2.0 * fundamental * t).sin()
            + 0.1 * (TAU * 3.0 * fundamental * t).sin())
}

/// Kick drum: a fast-decaying 60 Hz thump every half second
fn beat(t: f32) -> f32 {
    let since_hit = t % 0.5;
    let envelope = (-20.0 * since_hit).exp();
    envelope * (TAU * 60.0 * since_hit).sin()
}

fn write_fixture(
    path: &Path,
    sample_rate: u32,
    seconds: f32,
    amplitude: f32,
    signal: fn(f32) -> f32,
) -> Result<usize> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;

    let num_frames = (sample_rate as f32 * seconds) as usize;
    for frame in 0..num_frames {
        let t = frame as f32 / sample_rate as f32;
        writer
            .write_sample(amplitude * signal(t))
            .context("Failed to write sample")?;
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(num_frames)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let amplitude = args.amplitude.clamp(0.0, 1.0);

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create directory: {}", args.out.display()))?;

    println!("Generating fixtures:");
    println!("  Output: {}", args.out.display());
    println!("  Sample rate: {} Hz", args.sample_rate);
    println!("  Amplitude: {amplitude:.2}");

    let fixtures: [(&str, f32, fn(f32) -> f32); 2] =
        [("guitar.wav", 4.0, guitar), ("beat.wav", 2.0, beat)];
    for (name, seconds, signal) in fixtures {
        let path = args.out.join(name);
        let frames = write_fixture(&path, args.sample_rate, seconds, amplitude, signal)?;
        println!("  Wrote {frames} frames to {}", path.display());
    }

    Ok(())
}
