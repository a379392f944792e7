//! Minimal mapping-network device: name allocation on a shared admin bus,
//! signal announcement, and instance updates pushed to subscribers.

pub mod device;
pub mod messages;
pub mod signal;

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

pub use device::Device;
pub use messages::{Direction, Message, SignalInfo, SignalType};
pub use signal::{Instance, Signal};

#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("signal {signal} expects {expected} values, got {found}")]
    VectorLength {
        signal: String,
        expected: usize,
        found: usize,
    },
    #[error("signal {signal} has {available} instances, no instance {index}")]
    InstanceOutOfRange {
        signal: String,
        index: usize,
        available: usize,
    },
    #[error("signal {0} is already declared")]
    DuplicateSignal(String),
}

/// What the network loop needs from a device on the mapping bus.
pub trait MappingDevice {
    fn name(&self) -> String;

    /// True once the device owns its name on the bus.
    fn ready(&self) -> bool;

    fn poll(&mut self, timeout: Duration) -> impl Future<Output = Result<usize, MapperError>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapperConfig {
    /// Shared admin bus; a multicast group in production.
    pub admin: SocketAddr,
    pub interface: Ipv4Addr,
    /// Quiet period without name collisions before the device is ready.
    pub settle: Duration,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            admin: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(224, 0, 1, 3), 7570)),
            interface: Ipv4Addr::UNSPECIFIED,
            settle: Duration::from_millis(500),
        }
    }
}

impl MapperConfig {
    /// Single-host bus on an ephemeral loopback port.
    pub fn loopback() -> Self {
        Self {
            admin: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)),
            interface: Ipv4Addr::LOCALHOST,
            settle: Duration::from_millis(20),
        }
    }
}
