/// Number of simultaneous touches tracked on the bar.
pub const NUM_TOUCH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TouchReading {
    pub location: f32,
    pub size: f32,
}

impl TouchReading {
    pub const ZERO: TouchReading = TouchReading {
        location: 0.0,
        size: 0.0,
    };

    pub fn as_vector(&self) -> [f32; 2] {
        [self.location, self.size]
    }
}

/// Per-slot touch state, overwritten in place on every sensor cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchSlotSet {
    slots: [TouchReading; NUM_TOUCH],
    active: usize,
}

impl TouchSlotSet {
    pub fn new() -> Self {
        Self {
            slots: [TouchReading::ZERO; NUM_TOUCH],
            active: 0,
        }
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn get(&self, slot: usize) -> Option<&TouchReading> {
        self.slots.get(slot)
    }

    pub fn as_slice(&self) -> &[TouchReading] {
        &self.slots
    }

    pub fn set_active(&mut self, active: usize) {
        self.active = active.min(NUM_TOUCH);
    }

    pub fn set(&mut self, slot: usize, reading: TouchReading) {
        self.slots[slot] = reading;
    }

    pub fn clear(&mut self, slot: usize) {
        self.slots[slot] = TouchReading::ZERO;
    }
}

impl Default for TouchSlotSet {
    fn default() -> Self {
        Self::new()
    }
}
