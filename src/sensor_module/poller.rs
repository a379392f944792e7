use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::data_structure::{TouchReading, TouchSlotSet, NUM_TOUCH};
use crate::stop::StopSignal;

use super::{TouchSensor, TouchSink};

/// Reads the sensor and forwards every slot to the sink, one cycle per interval.
pub struct SensorPoller<S, O> {
    sensor: S,
    sink: O,
    slots: TouchSlotSet,
    interval: Duration,
}

impl<S, O> SensorPoller<S, O>
where
    S: TouchSensor,
    O: TouchSink,
{
    pub fn new(sensor: S, sink: O, interval: Duration) -> Self {
        Self {
            sensor,
            sink,
            slots: TouchSlotSet::new(),
            interval,
        }
    }

    pub fn slots(&self) -> &TouchSlotSet {
        &self.slots
    }

    /// One read-and-forward pass. Every slot is either pushed or released.
    pub fn cycle(&mut self) -> Result<(), S::Error> {
        self.sensor.read()?;
        self.slots.set_active(self.sensor.num_touches());
        let active = self.slots.active();

        for i in 0..active {
            let (location, size) = self.sensor.touch(i);
            let reading = TouchReading { location, size };
            self.slots.set(i, reading);
            self.sink.push(i, reading);
        }

        for i in active..NUM_TOUCH {
            self.slots.clear(i);
            self.sink.release(i);
        }
        Ok(())
    }

    /// Blocking loop; returns once `stop` is raised.
    pub fn run(mut self, stop: StopSignal) -> Self {
        info!(interval_us = self.interval.as_micros() as u64, "sensor poller started");
        let mut failures = 0u64;

        while !stop.is_stop_requested() {
            if let Err(e) = self.cycle() {
                failures += 1;
                // keep the previous frame, try again next interval
                if failures == 1 || failures % 1000 == 0 {
                    warn!(failures, "sensor read failed: {}", e);
                }
            } else if failures > 0 {
                debug!(failures, "sensor read recovered");
                failures = 0;
            }
            sleep(self.interval);
        }

        info!("sensor poller stopped");
        self
    }

    pub fn into_parts(self) -> (S, O) {
        (self.sensor, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSensor {
        frames: Vec<Vec<(f32, f32)>>,
        current: Vec<(f32, f32)>,
        fail: bool,
    }

    impl FakeSensor {
        fn with_touches(touches: &[(f32, f32)]) -> Self {
            Self {
                frames: vec![touches.to_vec()],
                current: Vec::new(),
                fail: false,
            }
        }
    }

    impl TouchSensor for FakeSensor {
        type Error = String;

        fn read(&mut self) -> Result<(), String> {
            if self.fail {
                return Err("bus timeout".to_string());
            }
            if !self.frames.is_empty() {
                self.current = self.frames.remove(0);
            }
            Ok(())
        }

        fn num_touches(&self) -> usize {
            self.current.len()
        }

        fn touch(&self, i: usize) -> (f32, f32) {
            self.current[i]
        }
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Push(usize, TouchReading),
        Release(usize),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<Event>,
    }

    impl TouchSink for RecordingSink {
        fn push(&mut self, slot: usize, reading: TouchReading) {
            self.events.push(Event::Push(slot, reading));
        }

        fn release(&mut self, slot: usize) {
            self.events.push(Event::Release(slot));
        }
    }

    fn poller(touches: &[(f32, f32)]) -> SensorPoller<FakeSensor, RecordingSink> {
        SensorPoller::new(
            FakeSensor::with_touches(touches),
            RecordingSink::default(),
            Duration::from_millis(1),
        )
    }

    #[test]
    fn three_touches_push_three_and_release_two() {
        let mut p = poller(&[(0.1, 0.2), (0.3, 0.4), (0.5, 0.6)]);
        p.cycle().unwrap();

        assert_eq!(p.slots().get(3), Some(&TouchReading::ZERO));
        assert_eq!(p.slots().get(4), Some(&TouchReading::ZERO));
        let (_, sink) = p.into_parts();
        assert_eq!(
            sink.events,
            vec![
                Event::Push(0, TouchReading { location: 0.1, size: 0.2 }),
                Event::Push(1, TouchReading { location: 0.3, size: 0.4 }),
                Event::Push(2, TouchReading { location: 0.5, size: 0.6 }),
                Event::Release(3),
                Event::Release(4),
            ]
        );
    }

    #[test]
    fn no_touches_releases_every_slot() {
        let mut p = poller(&[]);
        p.cycle().unwrap();
        let (_, sink) = p.into_parts();
        let expected: Vec<Event> = (0..NUM_TOUCH).map(Event::Release).collect();
        assert_eq!(sink.events, expected);
    }

    #[test]
    fn every_active_count_covers_each_slot_once() {
        for k in 0..=NUM_TOUCH {
            let touches: Vec<(f32, f32)> = (0..k).map(|i| (i as f32 / 10.0, 0.5)).collect();
            let mut p = poller(&touches);
            p.cycle().unwrap();
            let (_, sink) = p.into_parts();

            assert_eq!(sink.events.len(), NUM_TOUCH);
            for (slot, event) in sink.events.iter().enumerate() {
                match event {
                    Event::Push(i, _) => assert!(*i == slot && slot < k),
                    Event::Release(i) => assert!(*i == slot && slot >= k),
                }
            }
        }
    }

    #[test]
    fn stale_values_are_cleared_when_touch_lifts() {
        let mut p = poller(&[(0.1, 0.2), (0.3, 0.4)]);
        p.sensor.frames.push(vec![(0.9, 0.8)]);
        p.cycle().unwrap();
        p.cycle().unwrap();

        assert_eq!(p.slots().active(), 1);
        assert_eq!(p.slots().get(0), Some(&TouchReading { location: 0.9, size: 0.8 }));
        assert_eq!(p.slots().get(1), Some(&TouchReading::ZERO));
    }

    #[test]
    fn read_error_leaves_slots_untouched() {
        let mut p = poller(&[(0.1, 0.2)]);
        p.cycle().unwrap();
        p.sensor.fail = true;
        let before = p.slots().clone();

        assert!(p.cycle().is_err());
        assert_eq!(p.slots(), &before);
        assert_eq!(p.sink.events.len(), NUM_TOUCH);
    }

    #[test]
    fn run_returns_once_stop_is_raised() {
        let stop = StopSignal::new();
        stop.request_stop();
        let p = poller(&[(0.1, 0.2)]).run(stop);
        assert!(p.sink.events.is_empty());
    }

    struct TimedSensor {
        reads: Vec<std::time::Instant>,
    }

    impl TouchSensor for TimedSensor {
        type Error = String;

        fn read(&mut self) -> Result<(), String> {
            self.reads.push(std::time::Instant::now());
            Ok(())
        }

        fn num_touches(&self) -> usize {
            0
        }

        fn touch(&self, _i: usize) -> (f32, f32) {
            (0.0, 0.0)
        }
    }

    #[test]
    fn run_sleeps_the_interval_between_cycles() {
        let interval = Duration::from_millis(10);
        let stop = StopSignal::new();
        let stopper = stop.clone();
        let started = std::time::Instant::now();
        let timer = std::thread::spawn(move || {
            sleep(Duration::from_millis(200));
            stopper.request_stop();
        });

        let p = SensorPoller::new(
            TimedSensor { reads: Vec::new() },
            RecordingSink::default(),
            interval,
        )
        .run(stop);
        let elapsed = started.elapsed();
        timer.join().unwrap();

        let (sensor, sink) = p.into_parts();
        let cycles = sensor.reads.len();
        assert!(cycles >= 5, "only {} cycles in {:?}", cycles, elapsed);
        assert!(cycles as u128 <= elapsed.as_millis() / interval.as_millis() + 1);
        assert_eq!(sink.events.len(), cycles * NUM_TOUCH);
        for pair in sensor.reads.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }
}
