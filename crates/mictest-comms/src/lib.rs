//! Lockless communication primitives for render-thread-safe data exchange.
//!
//! Two channels live here:
//! - sample rings (`rtrb`) that carry audio from capture callbacks or graph
//!   destinations to whoever renders them next
//! - the level channel (`triple_buffer`) that carries the latest meter
//!   reading from the meter task to the view

pub use rtrb;
pub use triple_buffer;

use mictest_core::{Sample, SampleReader};

/// Producing half of a sample ring. Never blocks; drops samples when full.
pub struct SampleWriter {
    producer: rtrb::Producer<Sample>,
}

impl SampleWriter {
    /// Push as many samples as fit and return how many were written.
    pub fn write(&mut self, samples: &[Sample]) -> usize {
        let mut written = 0;
        for &sample in samples {
            if self.producer.push(sample).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    /// Whether the reading half has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.producer.is_abandoned()
    }
}

/// Consuming half of a sample ring. Underruns are filled with silence.
pub struct RingReader {
    consumer: rtrb::Consumer<Sample>,
}

impl RingReader {
    /// Samples currently buffered
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }
}

impl SampleReader for RingReader {
    fn read(&mut self, out: &mut [Sample]) -> usize {
        let mut filled = 0;
        for sample in out.iter_mut() {
            match self.consumer.pop() {
                Ok(value) => {
                    *sample = value;
                    filled += 1;
                }
                Err(_) => *sample = 0.0,
            }
        }
        filled
    }
}

/// Create a sample ring holding up to `capacity` samples
pub fn sample_ring(capacity: usize) -> (SampleWriter, RingReader) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    (SampleWriter { producer }, RingReader { consumer })
}

/// One level reading published by the meter task
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterReading {
    /// Mean analyser level in `[0, 1]`
    pub level: f32,
    /// Tick counter, increases by one per published reading
    pub tick: u64,
}

/// Writing half of the level channel (meter task side)
pub struct LevelPublisher {
    input: triple_buffer::Input<MeterReading>,
}

impl LevelPublisher {
    pub fn publish(&mut self, reading: MeterReading) {
        self.input.write(reading);
    }
}

/// Reading half of the level channel (view side)
pub struct LevelReader {
    output: triple_buffer::Output<MeterReading>,
}

impl LevelReader {
    /// Latest published reading
    pub fn latest(&mut self) -> MeterReading {
        *self.output.read()
    }
}

/// Create the level channel between the meter task and the view
pub fn create_level_channel() -> (LevelPublisher, LevelReader) {
    let (input, output) = triple_buffer::triple_buffer(&MeterReading::default());
    (LevelPublisher { input }, LevelReader { output })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_ring_underrun_is_silence() {
        let (mut writer, mut reader) = sample_ring(8);
        assert_eq!(writer.write(&[0.5, -0.5]), 2);
        assert_eq!(reader.available(), 2);

        let mut out = [1.0; 4];
        assert_eq!(reader.read(&mut out), 2);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_sample_ring_drops_when_full() {
        let (mut writer, _reader) = sample_ring(4);
        assert_eq!(writer.write(&[0.1; 6]), 4);
    }

    #[test]
    fn test_sample_ring_abandoned() {
        let (writer, reader) = sample_ring(4);
        assert!(!writer.is_abandoned());
        drop(reader);
        assert!(writer.is_abandoned());
    }

    #[test]
    fn test_level_channel_latest_wins() {
        let (mut publisher, mut reader) = create_level_channel();
        assert_eq!(reader.latest(), MeterReading::default());

        publisher.publish(MeterReading { level: 0.2, tick: 1 });
        publisher.publish(MeterReading { level: 0.4, tick: 2 });
        assert_eq!(reader.latest(), MeterReading { level: 0.4, tick: 2 });
    }
}
