//! Device seams and simulated devices.

pub mod capabilities;
pub mod mock;

pub use capabilities::{Actuator, Detector};
