use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::data_structure::TouchReading;
use crate::sensor_module::TouchSink;

use super::messages::{Direction, SignalInfo};
use super::MapperError;

#[derive(Debug, Clone, Default)]
pub(crate) struct InstanceSlot {
    pub value: Option<Vec<f32>>,
    pub dirty: bool,
}

#[derive(Debug)]
pub(crate) struct SignalState {
    pub info: SignalInfo,
    pub instances: Vec<InstanceSlot>,
    pub subscribers: BTreeSet<SocketAddr>,
}

/// Cloneable handle to a signal owned by a [`Device`](super::Device).
#[derive(Debug, Clone)]
pub struct Signal {
    state: Arc<Mutex<SignalState>>,
}

impl Signal {
    pub(crate) fn new(info: SignalInfo) -> Self {
        let instances = vec![InstanceSlot::default(); info.num_instances];
        Self {
            state: Arc::new(Mutex::new(SignalState {
                info,
                instances,
                subscribers: BTreeSet::new(),
            })),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SignalState> {
        // a poisoned table is still a valid table of values
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn info(&self) -> SignalInfo {
        self.lock().info.clone()
    }

    pub fn name(&self) -> String {
        self.lock().info.name.clone()
    }

    pub fn instance(&self, index: usize) -> Instance<'_> {
        Instance {
            signal: self,
            index,
        }
    }

    pub fn value(&self, index: usize) -> Option<Vec<f32>> {
        self.lock()
            .instances
            .get(index)
            .and_then(|slot| slot.value.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// One value stream of a signal.
pub struct Instance<'a> {
    signal: &'a Signal,
    index: usize,
}

impl Instance<'_> {
    pub fn set_value(&self, value: &[f32]) -> Result<(), MapperError> {
        let mut state = self.signal.lock();
        if value.len() != state.info.length {
            return Err(MapperError::VectorLength {
                signal: state.info.name.clone(),
                expected: state.info.length,
                found: value.len(),
            });
        }
        let slot = slot_mut(&mut state, self.index)?;
        slot.value = Some(value.to_vec());
        slot.dirty = true;
        Ok(())
    }

    /// Marks the instance absent; peers see a release on the next flush.
    pub fn release(&self) -> Result<(), MapperError> {
        let mut state = self.signal.lock();
        let slot = slot_mut(&mut state, self.index)?;
        if slot.value.is_some() {
            slot.value = None;
            slot.dirty = true;
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.signal.value(self.index).is_some()
    }
}

fn slot_mut(state: &mut SignalState, index: usize) -> Result<&mut InstanceSlot, MapperError> {
    let name = state.info.name.clone();
    let available = state.instances.len();
    state
        .instances
        .get_mut(index)
        .ok_or_else(|| MapperError::InstanceOutOfRange {
            signal: name,
            index,
            available,
        })
}

impl TouchSink for Signal {
    fn push(&mut self, slot: usize, reading: TouchReading) {
        if let Err(e) = self.instance(slot).set_value(&reading.as_vector()) {
            warn!("dropping touch {}: {}", slot, e);
        }
    }

    fn release(&mut self, slot: usize) {
        if let Err(e) = self.instance(slot).release() {
            warn!("cannot release touch {}: {}", slot, e);
        }
    }
}

impl SignalState {
    pub(crate) fn is_outgoing(&self) -> bool {
        self.info.direction == Direction::Outgoing
    }
}
