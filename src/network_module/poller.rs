use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::mapper::{Device, MappingDevice};
use crate::stop::StopSignal;

/// Keeps the mapping device serviced so announcements and updates go out.
pub struct NetworkPoller<D = Device> {
    device: D,
    poll_timeout: Duration,
    interval: Duration,
}

impl<D> NetworkPoller<D>
where
    D: MappingDevice,
{
    pub fn new(device: D, poll_timeout: Duration, interval: Duration) -> Self {
        Self {
            device,
            poll_timeout,
            interval,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub async fn run(mut self, stop: StopSignal) -> D {
        info!(
            device = %self.device.name(),
            interval_us = self.interval.as_micros() as u64,
            "network poller started"
        );

        while !stop.is_stop_requested() {
            if let Err(e) = self.device.poll(self.poll_timeout).await {
                warn!("device poll failed: {}", e);
            }
            sleep(self.interval).await;
        }

        info!("network poller stopped");
        self.device
    }
}
