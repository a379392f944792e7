pub mod poller;
pub mod trill;

use crate::data_structure::TouchReading;

pub use poller::SensorPoller;
pub use trill::{Device, Trill, TrillError};

/// A multi-touch peripheral polled once per sensor cycle.
pub trait TouchSensor {
    type Error: std::fmt::Display;

    /// Fetches a fresh frame from the hardware.
    fn read(&mut self) -> Result<(), Self::Error>;

    fn num_touches(&self) -> usize;

    /// (location, size) of touch `i`; only meaningful for `i < num_touches()`.
    fn touch(&self, i: usize) -> (f32, f32);

    fn details(&self) -> String {
        "touch sensor".to_string()
    }
}

/// Where per-slot touch values end up, one addressable instance per slot.
pub trait TouchSink {
    fn push(&mut self, slot: usize, reading: TouchReading);

    fn release(&mut self, slot: usize);
}
