//! Blocking driver for Trill capacitive touch sensors.
//!
//! Only centroid mode on one-axis sensors is decoded; that is all the
//! bar needs.

use std::thread::sleep;
use std::time::Duration;

use embedded_hal::i2c::{ErrorKind, I2c};

use crate::data_structure::NUM_TOUCH;

use super::TouchSensor;

const OFFSET_COMMAND: u8 = 0;
const OFFSET_DATA: u8 = 4;

const COMMAND_MODE: u8 = 1;
const COMMAND_SCAN_SETTINGS: u8 = 2;
const COMMAND_PRESCALER: u8 = 3;
const COMMAND_NOISE_THRESHOLD: u8 = 4;
const COMMAND_BASELINE_UPDATE: u8 = 6;
const COMMAND_IDENTIFY: u8 = 255;

const IDENTIFY_ACK: u8 = 0xFE;
const NO_TOUCH: u16 = 0xFFFF;

// 5 locations then 5 sizes, big-endian u16 each
const CENTROID_LENGTH: usize = NUM_TOUCH * 4;

const COMMAND_SLEEP: Duration = Duration::from_millis(15);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TrillError {
    #[error("i2c bus error: {0:?}")]
    Bus(ErrorKind),
    #[error("no response from sensor at {0:#04x}")]
    NoResponse(u8),
    #[error("wrong device type: expected {expected:?}, found {found:?}")]
    WrongDevice { expected: Device, found: Device },
    #[error("touch index {0} out of range")]
    IndexOutOfRange(usize),
    #[error("cannot decode touches in {0:?} mode")]
    UnsupportedMode(Mode),
}

impl TrillError {
    fn bus<E: embedded_hal::i2c::Error>(e: E) -> Self {
        TrillError::Bus(e.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    None,
    Bar,
    Square,
    Craft,
    Ring,
    Hex,
    Flex,
    Unknown(u8),
}

impl Device {
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => Device::None,
            1 => Device::Bar,
            2 => Device::Square,
            3 => Device::Craft,
            4 => Device::Ring,
            5 => Device::Hex,
            6 => Device::Flex,
            other => Device::Unknown(other),
        }
    }

    pub fn default_address(&self) -> u8 {
        match self {
            Device::Bar => 0x20,
            Device::Square => 0x28,
            Device::Craft => 0x30,
            Device::Ring => 0x38,
            Device::Hex => 0x40,
            Device::Flex => 0x48,
            Device::None | Device::Unknown(_) => 0xFF,
        }
    }

    /// (location, size) divisors mapping raw centroid values to 0..1.
    fn rescale(&self) -> (f32, f32) {
        match self {
            Device::Bar => (3200.0, 4566.0),
            Device::Square => (1792.0, 3780.0),
            Device::Craft => (4096.0, 1.0),
            Device::Ring => (3584.0, 5000.0),
            Device::Hex => (1920.0, 4000.0),
            Device::Flex => (3712.0, 1200.0),
            Device::None | Device::Unknown(_) => (1.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Centroid = 0,
    Raw = 1,
    Baseline = 2,
    Diff = 3,
}

pub struct Trill<I2C> {
    i2c: I2C,
    address: u8,
    device: Device,
    firmware_version: u8,
    mode: Mode,
    num_touches: usize,
    locations: [f32; NUM_TOUCH],
    sizes: [f32; NUM_TOUCH],
}

impl<I2C> Trill<I2C>
where
    I2C: I2c,
{
    /// Identifies the sensor, puts it in centroid mode and resets its baseline.
    pub fn setup(i2c: I2C, device: Device, address: u8) -> Result<Self, TrillError> {
        let mut trill = Self {
            i2c,
            address,
            device,
            firmware_version: 0,
            mode: Mode::Centroid,
            num_touches: 0,
            locations: [0.0; NUM_TOUCH],
            sizes: [0.0; NUM_TOUCH],
        };

        trill.identify()?;
        trill.set_mode(Mode::Centroid)?;
        trill.set_scan_settings(0, 12)?;
        trill.update_baseline()?;
        Ok(trill)
    }

    fn identify(&mut self) -> Result<(), TrillError> {
        self.send_command(&[COMMAND_IDENTIFY])?;
        let mut rx = [0u8; 4];
        self.read_data(&mut rx)?;

        if rx[0] != IDENTIFY_ACK {
            return Err(TrillError::NoResponse(self.address));
        }
        let found = Device::from_id(rx[1]);
        if found != self.device {
            return Err(TrillError::WrongDevice {
                expected: self.device,
                found,
            });
        }
        self.firmware_version = rx[2];
        Ok(())
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), TrillError> {
        self.send_command(&[COMMAND_MODE, mode as u8])?;
        self.mode = mode;
        Ok(())
    }

    pub fn set_scan_settings(&mut self, speed: u8, num_bits: u8) -> Result<(), TrillError> {
        self.send_command(&[COMMAND_SCAN_SETTINGS, speed.min(3), num_bits.clamp(9, 16)])
    }

    pub fn set_prescaler(&mut self, prescaler: u8) -> Result<(), TrillError> {
        self.send_command(&[COMMAND_PRESCALER, prescaler])
    }

    pub fn set_noise_threshold(&mut self, threshold: u8) -> Result<(), TrillError> {
        self.send_command(&[COMMAND_NOISE_THRESHOLD, threshold])
    }

    pub fn update_baseline(&mut self) -> Result<(), TrillError> {
        self.send_command(&[COMMAND_BASELINE_UPDATE])
    }

    fn send_command(&mut self, command: &[u8]) -> Result<(), TrillError> {
        let mut tx = Vec::with_capacity(command.len() + 1);
        tx.push(OFFSET_COMMAND);
        tx.extend_from_slice(command);
        self.i2c.write(self.address, &tx).map_err(TrillError::bus)?;
        sleep(COMMAND_SLEEP);
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<(), TrillError> {
        self.i2c
            .write(self.address, &[OFFSET_DATA])
            .map_err(TrillError::bus)?;
        self.i2c.read(self.address, buf).map_err(TrillError::bus)
    }

    /// Reads one centroid frame and updates the touch accessors.
    pub fn read_i2c(&mut self) -> Result<(), TrillError> {
        if self.mode != Mode::Centroid {
            return Err(TrillError::UnsupportedMode(self.mode));
        }
        let mut rx = [0u8; CENTROID_LENGTH];
        self.read_data(&mut rx)?;
        self.decode_centroids(&rx);
        Ok(())
    }

    fn decode_centroids(&mut self, rx: &[u8; CENTROID_LENGTH]) {
        let word = |i: usize| u16::from_be_bytes([rx[2 * i], rx[2 * i + 1]]);
        let (location_scale, size_scale) = self.device.rescale();

        self.num_touches = (0..NUM_TOUCH)
            .position(|i| word(i) == NO_TOUCH)
            .unwrap_or(NUM_TOUCH);

        for i in 0..NUM_TOUCH {
            if i < self.num_touches {
                self.locations[i] = word(i) as f32 / location_scale;
                self.sizes[i] = word(i + NUM_TOUCH) as f32 / size_scale;
            } else {
                self.locations[i] = 0.0;
                self.sizes[i] = 0.0;
            }
        }
    }

    pub fn num_touches(&self) -> usize {
        self.num_touches
    }

    pub fn touch_location(&self, i: usize) -> Result<f32, TrillError> {
        self.locations
            .get(i)
            .copied()
            .ok_or(TrillError::IndexOutOfRange(i))
    }

    pub fn touch_size(&self, i: usize) -> Result<f32, TrillError> {
        self.sizes.get(i).copied().ok_or(TrillError::IndexOutOfRange(i))
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn details(&self) -> String {
        format!(
            "Trill {:?} at {:#04x}, firmware v{}, mode {:?}",
            self.device, self.address, self.firmware_version, self.mode
        )
    }

    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C> TouchSensor for Trill<I2C>
where
    I2C: I2c,
{
    type Error = TrillError;

    fn read(&mut self) -> Result<(), TrillError> {
        self.read_i2c()
    }

    fn num_touches(&self) -> usize {
        self.num_touches
    }

    fn touch(&self, i: usize) -> (f32, f32) {
        (self.locations[i], self.sizes[i])
    }

    fn details(&self) -> String {
        Trill::details(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorType, Operation};

    #[derive(Debug)]
    struct BusError;

    impl embedded_hal::i2c::Error for BusError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    /// Replays canned read responses and records every write.
    struct FakeBus {
        reads: Vec<Vec<u8>>,
        writes: Vec<(u8, Vec<u8>)>,
        fail: bool,
    }

    impl FakeBus {
        fn new(reads: Vec<Vec<u8>>) -> Self {
            Self {
                reads,
                writes: Vec::new(),
                fail: false,
            }
        }
    }

    impl ErrorType for FakeBus {
        type Error = BusError;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), BusError> {
            if self.fail {
                return Err(BusError);
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.writes.push((address, bytes.to_vec())),
                    Operation::Read(buf) => {
                        let next = if self.reads.is_empty() {
                            Vec::new()
                        } else {
                            self.reads.remove(0)
                        };
                        for (dst, src) in buf.iter_mut().zip(next) {
                            *dst = src;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn centroid_frame(touches: &[(u16, u16)]) -> Vec<u8> {
        let mut frame = vec![0xFF; CENTROID_LENGTH];
        for (i, (loc, size)) in touches.iter().enumerate() {
            frame[2 * i..2 * i + 2].copy_from_slice(&loc.to_be_bytes());
            let s = 2 * (i + NUM_TOUCH);
            frame[s..s + 2].copy_from_slice(&size.to_be_bytes());
        }
        frame
    }

    fn bar() -> Trill<FakeBus> {
        let bus = FakeBus::new(vec![vec![IDENTIFY_ACK, 1, 3, 0]]);
        Trill::setup(bus, Device::Bar, 0x20).unwrap()
    }

    #[test]
    fn setup_identifies_and_enters_centroid_mode() {
        let trill = bar();
        assert_eq!(trill.device(), Device::Bar);
        assert_eq!(trill.mode(), Mode::Centroid);
        assert!(trill.details().contains("firmware v3"));

        let bus = trill.release();
        assert_eq!(bus.writes[0], (0x20, vec![OFFSET_COMMAND, COMMAND_IDENTIFY]));
        assert_eq!(bus.writes[1], (0x20, vec![OFFSET_DATA]));
        assert_eq!(
            bus.writes[2],
            (0x20, vec![OFFSET_COMMAND, COMMAND_MODE, Mode::Centroid as u8])
        );
    }

    #[test]
    fn setup_rejects_wrong_device() {
        let bus = FakeBus::new(vec![vec![IDENTIFY_ACK, 4, 3, 0]]);
        let err = Trill::setup(bus, Device::Bar, 0x20).err();
        assert_eq!(
            err,
            Some(TrillError::WrongDevice {
                expected: Device::Bar,
                found: Device::Ring
            })
        );
    }

    #[test]
    fn setup_rejects_silent_bus() {
        let bus = FakeBus::new(vec![vec![0, 0, 0, 0]]);
        let err = Trill::setup(bus, Device::Bar, 0x21).err();
        assert_eq!(err, Some(TrillError::NoResponse(0x21)));
    }

    #[test]
    fn bus_failure_maps_to_error_kind() {
        let mut bus = FakeBus::new(Vec::new());
        bus.fail = true;
        let err = Trill::setup(bus, Device::Bar, 0x20).err();
        assert_eq!(err, Some(TrillError::Bus(ErrorKind::Other)));
    }

    #[test]
    fn read_decodes_active_touches_until_sentinel() {
        let mut trill = bar();
        trill
            .i2c
            .reads
            .push(centroid_frame(&[(1600, 4566), (3200, 0)]));
        trill.read_i2c().unwrap();

        assert_eq!(trill.num_touches(), 2);
        assert_eq!(trill.touch_location(0), Ok(0.5));
        assert_eq!(trill.touch_size(0), Ok(1.0));
        assert_eq!(trill.touch_location(1), Ok(1.0));
        assert_eq!(trill.touch_location(2), Ok(0.0));
        assert_eq!(trill.touch_size(7), Err(TrillError::IndexOutOfRange(7)));
    }

    #[test]
    fn read_refuses_non_centroid_modes() {
        let mut trill = bar();
        trill.set_mode(Mode::Diff).unwrap();
        trill.i2c.reads.push(centroid_frame(&[(1600, 100)]));

        assert_eq!(trill.read_i2c(), Err(TrillError::UnsupportedMode(Mode::Diff)));
        assert_eq!(trill.num_touches(), 0);
    }

    #[test]
    fn tuning_commands_are_written_at_command_offset() {
        let mut trill = bar();
        trill.set_prescaler(4).unwrap();
        trill.set_noise_threshold(60).unwrap();

        let bus = trill.release();
        let tail = &bus.writes[bus.writes.len() - 2..];
        assert_eq!(tail[0], (0x20, vec![OFFSET_COMMAND, COMMAND_PRESCALER, 4]));
        assert_eq!(tail[1], (0x20, vec![OFFSET_COMMAND, COMMAND_NOISE_THRESHOLD, 60]));
    }

    #[test]
    fn read_with_no_touches_reports_zero() {
        let mut trill = bar();
        trill.i2c.reads.push(centroid_frame(&[]));
        trill.read_i2c().unwrap();
        assert_eq!(trill.num_touches(), 0);
    }
}
