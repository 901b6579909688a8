//! Level metering.
//!
//! [`mean_level`] reduces analyser bytes to one scalar. [`MeterTask`] polls a
//! [`LevelSource`] at a fixed cadence on its own thread and publishes every
//! reading to a [`LevelPublisher`]; the view reads the other end of the
//! channel whenever it redraws.

use crossbeam_channel::{Sender, bounded, select, tick};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mictest_comms::{LevelPublisher, MeterReading};

/// Mean of `byte / 255` over `bytes`; 0 for an empty slice
pub fn mean_level(bytes: &[u8]) -> f32 {
    if bytes.is_empty() {
        return 0.0;
    }
    let sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
    (sum as f32 / (bytes.len() as f32 * 255.0)).clamp(0.0, 1.0)
}

/// Anything that can report a level in `[0, 1]`
pub trait LevelSource: Send + Sync {
    fn level(&self) -> f32;
}

/// A repeating meter on its own thread
///
/// Dropping the task cancels it.
pub struct MeterTask {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MeterTask {
    /// Read `source` every `interval` and publish the result
    pub fn spawn<S>(
        source: Arc<S>,
        interval: Duration,
        mut publisher: LevelPublisher,
    ) -> std::io::Result<Self>
    where
        S: LevelSource + ?Sized + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let ticker = tick(interval);

        let handle = thread::Builder::new()
            .name("mictest-meter".to_string())
            .spawn(move || {
                let mut count = 0_u64;
                loop {
                    select! {
                        // A message or a dropped sender both mean stop
                        recv(cancel_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            count += 1;
                            publisher.publish(MeterReading {
                                level: source.level().clamp(0.0, 1.0),
                                tick: count,
                            });
                        }
                    }
                }
                tracing::debug!("Meter task stopped after {} readings", count);
            })?;

        tracing::debug!("Meter task started ({:?} interval)", interval);

        Ok(Self {
            cancel: Some(cancel_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the task and wait for its thread. Idempotent.
    pub fn cancel(&mut self) {
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Meter task panicked");
            }
        }
    }
}

impl Drop for MeterTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mictest_comms::create_level_channel;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedLevel(AtomicU32);

    impl LevelSource for FixedLevel {
        fn level(&self) -> f32 {
            f32::from_bits(self.0.load(Ordering::Relaxed))
        }
    }

    #[test]
    fn test_mean_level() {
        assert_eq!(mean_level(&[]), 0.0);
        assert_eq!(mean_level(&[0; 16]), 0.0);
        assert_eq!(mean_level(&[255; 16]), 1.0);
        assert!((mean_level(&[0, 255]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_meter_publishes_until_cancelled() {
        let source = Arc::new(FixedLevel(AtomicU32::new(0.25_f32.to_bits())));
        let (publisher, mut reader) = create_level_channel();

        let mut task =
            MeterTask::spawn(Arc::clone(&source), Duration::from_millis(2), publisher).unwrap();
        assert!(task.is_running());

        thread::sleep(Duration::from_millis(50));
        let reading = reader.latest();
        assert!(reading.tick > 0);
        assert_eq!(reading.level, 0.25);

        task.cancel();
        assert!(!task.is_running());
        let last = reader.latest().tick;
        thread::sleep(Duration::from_millis(20));
        assert_eq!(reader.latest().tick, last);
    }

    #[test]
    fn test_meter_clamps_out_of_range_levels() {
        let source = Arc::new(FixedLevel(AtomicU32::new(3.0_f32.to_bits())));
        let (publisher, mut reader) = create_level_channel();

        let _task = MeterTask::spawn(source, Duration::from_millis(2), publisher).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(reader.latest().level, 1.0);
    }
}
