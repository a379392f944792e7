use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

use crate::data_structure::NUM_TOUCH;
use crate::mapper::{Direction, MapperConfig, SignalInfo, SignalType};
use crate::sensor_module::Device as TrillDevice;

pub const ENV_I2C_BUS: &str = "TRILL_MAPPER_I2C_BUS";
pub const ENV_ADMIN: &str = "TRILL_MAPPER_ADMIN";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub device_name: String,
    pub signal_name: String,
    pub unit: String,
    pub min: f32,
    pub max: f32,
    pub i2c_bus: String,
    pub sensor: TrillDevice,
    pub sensor_address: u8,
    pub sensor_interval: Duration,
    pub network_interval: Duration,
    /// Per-poll budget while waiting for the device to become ready.
    pub ready_poll_timeout: Duration,
    /// Per-poll budget inside the network poller loop.
    pub poll_timeout: Duration,
    pub mapper: MapperConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_name: "bela".to_string(),
            signal_name: "trill-bar".to_string(),
            unit: "pos".to_string(),
            min: 0.0,
            max: 1.0,
            i2c_bus: "/dev/i2c-1".to_string(),
            sensor: TrillDevice::Bar,
            sensor_address: TrillDevice::Bar.default_address(),
            sensor_interval: Duration::from_micros(12_000),
            network_interval: Duration::from_micros(12_000),
            ready_poll_timeout: Duration::from_millis(500),
            poll_timeout: Duration::ZERO,
            mapper: MapperConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Defaults, with the bus path and admin group overridable from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(bus) = std::env::var(ENV_I2C_BUS) {
            config.i2c_bus = bus;
        }
        if let Ok(admin) = std::env::var(ENV_ADMIN) {
            match admin.parse::<SocketAddr>() {
                Ok(addr) => config.mapper.admin = addr,
                Err(e) => warn!("ignoring {}={}: {}", ENV_ADMIN, admin, e),
            }
        }
        config
    }

    /// The touch signal: one (location, size) vector per touch slot.
    pub fn touch_signal(&self) -> SignalInfo {
        SignalInfo {
            direction: Direction::Outgoing,
            name: self.signal_name.clone(),
            length: 2,
            signal_type: SignalType::Float,
            unit: Some(self.unit.clone()),
            min: Some(self.min),
            max: Some(self.max),
            num_instances: NUM_TOUCH,
        }
    }
}
