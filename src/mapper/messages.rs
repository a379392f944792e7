//! Datagrams exchanged on the mapping bus.
//!
//! Every datagram carries exactly one JSON-encoded [`Message`].

use serde::{Deserialize, Serialize};

use super::MapperError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Float,
    Int32,
    Double,
}

/// Signal metadata as published in device announcements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub direction: Direction,
    pub name: String,
    pub length: usize,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub unit: Option<String>,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub num_instances: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Claim attempt for `<name>.<ordinal>`.
    Probe { name: String, ordinal: u32, id: u64 },
    /// Reply from the current owner of `<name>.<ordinal>`.
    NameTaken { name: String, ordinal: u32, id: u64 },
    Who,
    Device {
        name: String,
        id: u64,
        port: u16,
        signals: Vec<SignalInfo>,
    },
    Subscribe { signal: String },
    Unsubscribe { signal: String },
    /// A `None` value releases the instance.
    Update {
        signal: String,
        instance: usize,
        value: Option<Vec<f32>>,
    },
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, MapperError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, MapperError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
