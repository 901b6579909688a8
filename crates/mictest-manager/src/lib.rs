//! Audio device manager.
//!
//! [`AudioDeviceManager`] is the single object the view layer talks to: it
//! lists devices, switches input and output, reports the input level and
//! drives the playback fixtures. [`MeterTask`] polls its level at display
//! cadence, and [`ManagerConfig`] holds the tunables.
//!
//! # Example
//!
//! ```no_run
//! use futures_lite::future::block_on;
//! use mictest_core::DeviceKind;
//! use mictest_manager::{AudioDeviceManager, ManagerConfig};
//! use mictest_media::SimulatedPlatform;
//!
//! # fn main() -> mictest_core::Result<()> {
//! let manager = AudioDeviceManager::new(SimulatedPlatform::demo()?, ManagerConfig::default());
//! block_on(async {
//!     manager.create_context().await?;
//!     let inputs = manager.get_devices(DeviceKind::AudioInput).await?;
//!     manager.set_input_device(&inputs[0].device_id).await
//! })?;
//! println!("level: {:.2}", manager.get_analyser_level());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod meter;

pub use config::{ConfigError, ManagerConfig};
pub use manager::{AudioDeviceManager, InputRoute, OutputRoutes};
pub use meter::{LevelSource, MeterTask, mean_level};
