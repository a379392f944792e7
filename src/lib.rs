//! Trill Bar to mapping-network bridge.
//!
//! A sensor loop reads up to five touches over I2C and writes them into the
//! instances of one outgoing signal; a network loop keeps the mapping
//! device serviced so those values reach subscribers.

pub mod config;
pub mod data_structure;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod network_module;
pub mod sensor_module;
pub mod setup;
pub mod stop;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use setup::{setup, Bridge};
pub use stop::StopSignal;
