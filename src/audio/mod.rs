//! Audio output subsystem

pub mod cpal_output;
pub mod device;
pub mod output;
pub mod virtual_output;

pub use cpal_output::CpalOutput;
pub use device::{get_output_device, list_output_devices, OutputDeviceInfo};
pub use output::{OutputDevice, ScheduledUnit};
pub use virtual_output::{ManualClock, UnitRecord, UnitStatus, VirtualOutput};
