use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::mapper::{Device, MappingDevice, Signal};
use crate::network_module::NetworkPoller;
use crate::sensor_module::{SensorPoller, TouchSensor};
use crate::stop::StopSignal;

/// Both polling loops, running until `stop` is raised.
pub struct Bridge<S> {
    pub device_name: String,
    pub data_addr: SocketAddr,
    pub signal: Signal,
    stop: StopSignal,
    network: JoinHandle<Device>,
    sensor: JoinHandle<SensorPoller<S, Signal>>,
}

/// Registers the device and its touch signal, waits until the device is
/// ready, then starts the network poller and, once the sensor is up, the
/// sensor poller. A sensor init failure stops the network poller again and
/// is returned as [`BridgeError::SensorInit`].
pub async fn setup<S, E, F>(
    config: &BridgeConfig,
    stop: StopSignal,
    init_sensor: F,
) -> Result<Bridge<S>, BridgeError>
where
    S: TouchSensor + Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce() -> Result<S, E> + Send + 'static,
{
    let mut device = Device::bind(&config.device_name, &config.mapper).await?;
    let signal = device.add_signal(config.touch_signal())?;

    wait_until_ready(&mut device, config.ready_poll_timeout).await;

    for sig in device.signals() {
        let info = sig.info();
        info!(
            signal = %info.name,
            length = info.length,
            instances = info.num_instances,
            "signal declared"
        );
    }

    let device_name = device.name();
    let data_addr = device.data_addr()?;
    let poller = NetworkPoller::new(device, config.poll_timeout, config.network_interval);
    let network = tokio::spawn(poller.run(stop.clone()));
    info!(device = %device_name, %data_addr, "device is ready");

    let sensor = match tokio::task::spawn_blocking(init_sensor).await {
        Ok(Ok(sensor)) => sensor,
        Ok(Err(e)) => {
            error!("Unable to initialise touch sensor: {}", e);
            network.abort();
            let _ = network.await;
            return Err(BridgeError::SensorInit(e.to_string()));
        }
        Err(e) => {
            network.abort();
            let _ = network.await;
            return Err(e.into());
        }
    };
    info!("{}", sensor.details());

    let poller = SensorPoller::new(sensor, signal.clone(), config.sensor_interval);
    let sensor_stop = stop.clone();
    let sensor = tokio::task::spawn_blocking(move || poller.run(sensor_stop));
    info!("sensor is ready");

    Ok(Bridge {
        device_name,
        data_addr,
        signal,
        stop,
        network,
        sensor,
    })
}

/// Polls until the device owns its name. Poll failures are logged and the
/// wait carries on; there is no deadline.
pub async fn wait_until_ready<D: MappingDevice>(device: &mut D, poll_timeout: Duration) {
    let mut failures = 0u64;
    while !device.ready() {
        if let Err(e) = device.poll(poll_timeout).await {
            failures += 1;
            warn!(failures, "device poll failed while waiting for ready: {}", e);
        }
    }
}

impl<S> Bridge<S> {
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Waits for both loops to wind down after a stop request.
    pub async fn join(self) -> Result<(Device, SensorPoller<S, Signal>), BridgeError> {
        let device = self.network.await?;
        let sensor = self.sensor.await?;
        Ok((device, sensor))
    }

    pub async fn shutdown(self) -> Result<(Device, SensorPoller<S, Signal>), BridgeError> {
        self.stop.request_stop();
        self.join().await
    }
}
