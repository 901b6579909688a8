//! mictest - live diagnostics for audio input and output devices
//!
//! Lists devices, reports supported capture constraints and monitors the
//! level of a selected input while routing output and fixtures.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use futures_lite::future::block_on;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mictest_audio::DriverKind;
use mictest_comms::create_level_channel;
use mictest_core::DeviceKind;
use mictest_manager::{AudioDeviceManager, ManagerConfig, MeterTask};
use mictest_media::{CpalPlatform, MediaPlatform, SimulatedPlatform};

/// Width of the level bar in characters
const METER_WIDTH: usize = 40;

/// Live diagnostics for audio input and output devices
#[derive(Parser, Debug)]
#[command(name = "mictest")]
#[command(about = "Test microphones and speakers", long_about = None)]
struct Cli {
    /// Use scripted demo devices instead of the audio hardware
    #[arg(long, global = true)]
    simulated: bool,

    /// Manager config file (RON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the fixture WAV files
    #[arg(long, global = true, default_value = "fixtures")]
    assets: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List input or output devices
    Devices {
        #[arg(long, value_enum, default_value_t = KindArg::Input)]
        kind: KindArg,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show which capture constraints the platform supports
    Constraints,

    /// Watch the level of an input device
    Monitor {
        /// Input device id (default: first device by label)
        #[arg(long)]
        input: Option<String>,

        /// Output device id for the graph output and background track
        #[arg(long)]
        output: Option<String>,

        /// How long to monitor
        #[arg(long, default_value_t = 10.0)]
        seconds: f32,

        /// Route the input through the delay line
        #[arg(long)]
        delay: bool,

        /// Request echo cancellation on the input
        #[arg(long)]
        echo_cancellation: bool,

        /// Play the looping background track
        #[arg(long)]
        background: bool,

        /// Play the decoded buffer fixture
        #[arg(long)]
        buffer: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Input,
    Output,
}

impl From<KindArg> for DeviceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Input => Self::AudioInput,
            KindArg::Output => Self::AudioOutput,
        }
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mictest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ManagerConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ManagerConfig::default(),
    };

    if cli.simulated {
        // Scripted devices have nothing to play through
        if config.driver == DriverKind::Device {
            config.driver = DriverKind::Clock;
        }
        let platform = SimulatedPlatform::demo().context("Failed to build demo platform")?;
        block_on(run(platform, config, cli.command))
    } else {
        block_on(run(CpalPlatform::new(cli.assets), config, cli.command))
    }
}

async fn run<P>(platform: P, config: ManagerConfig, command: Command) -> Result<()>
where
    P: MediaPlatform + 'static,
{
    let manager = Arc::new(AudioDeviceManager::new(platform, config));

    match command {
        Command::Devices { kind, json } => list_devices(&manager, kind.into(), json).await,
        Command::Constraints => {
            let constraints = manager.get_constraints();
            for (name, supported) in [
                ("deviceId", constraints.device_id),
                ("echoCancellation", constraints.echo_cancellation),
                ("sampleRate", constraints.sample_rate),
                ("channelCount", constraints.channel_count),
            ] {
                println!("  {name:<18} {}", if supported { "yes" } else { "no" });
            }
            Ok(())
        }
        Command::Monitor {
            input,
            output,
            seconds,
            delay,
            echo_cancellation,
            background,
            buffer,
        } => {
            let options = MonitorOptions {
                input,
                output,
                duration: Duration::from_secs_f32(seconds.max(0.0)),
                delay,
                echo_cancellation,
                background,
                buffer,
            };
            monitor(manager, options).await
        }
    }
}

async fn list_devices<P: MediaPlatform>(
    manager: &AudioDeviceManager<P>,
    kind: DeviceKind,
    json: bool,
) -> Result<()> {
    let devices = manager
        .get_devices(kind)
        .await
        .context("Failed to list devices")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    println!("{kind} devices:");
    if devices.is_empty() {
        println!("  - no devices -");
    }
    for device in &devices {
        println!("  {:<32} {}", device.device_id, device.label);
        println!("  {:<32} group: {}", "", device.group_id);
    }
    Ok(())
}

struct MonitorOptions {
    input: Option<String>,
    output: Option<String>,
    duration: Duration,
    delay: bool,
    echo_cancellation: bool,
    background: bool,
    buffer: bool,
}

/// Print a status line for a failed optional step and carry on
fn report<T>(step: &str, result: mictest_core::Result<T>) {
    if let Err(e) = result {
        tracing::warn!("{} failed: {}", step, e);
        println!("status: {step} failed ({e})");
    }
}

async fn monitor<P>(manager: Arc<AudioDeviceManager<P>>, options: MonitorOptions) -> Result<()>
where
    P: MediaPlatform + 'static,
{
    manager
        .create_context()
        .await
        .context("Failed to create audio context")?;

    if options.delay {
        report("enable delay", manager.toggle_delay());
    }
    if options.echo_cancellation {
        report(
            "enable echo cancellation",
            manager.toggle_echo_cancellation().await,
        );
    }

    let input = match options.input {
        Some(id) => id,
        None => {
            let inputs = manager
                .get_devices(DeviceKind::AudioInput)
                .await
                .context("Failed to list input devices")?;
            match inputs.into_iter().next() {
                Some(device) => device.device_id,
                None => bail!("No input devices available"),
            }
        }
    };
    manager
        .set_input_device(&input)
        .await
        .with_context(|| format!("Failed to open input device '{input}'"))?;

    if let Some(output) = &options.output {
        report("select output", manager.set_output_device(output));
    }
    if options.background {
        report("play background track", manager.toggle_audio_element().await);
    }
    if options.buffer {
        report("play buffer", manager.toggle_audio_buffer().await);
    }

    for track in manager.get_input_tracks() {
        println!(
            "track {} [{}] {} ({}, echo cancellation {})",
            track.id,
            track.kind,
            track.label,
            track.ready_state,
            if track.settings.echo_cancellation { "on" } else { "off" }
        );
    }

    let (publisher, mut reader) = create_level_channel();
    let interval = manager.config().meter_interval();
    let mut meter = MeterTask::spawn(Arc::clone(&manager), interval, publisher)
        .context("Failed to start level meter")?;

    let started = Instant::now();
    let mut stdout = std::io::stdout();
    while started.elapsed() < options.duration {
        let reading = reader.latest();
        let filled = ((reading.level * METER_WIDTH as f32).round() as usize).min(METER_WIDTH);
        write!(
            stdout,
            "\r[{}{}] {:.2}",
            "#".repeat(filled),
            " ".repeat(METER_WIDTH - filled),
            reading.level
        )?;
        stdout.flush()?;
        std::thread::sleep(interval);
    }
    writeln!(stdout)?;

    meter.cancel();
    tracing::info!("Monitoring finished after {:.1}s", started.elapsed().as_secs_f32());
    Ok(())
}
