use anyhow::Context;
use linux_embedded_hal::I2cdev;
use tracing::{error, info};
use trill_mapper::sensor_module::Trill;
use trill_mapper::{logging, setup, BridgeConfig, StopSignal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    info!("trill-mapper starting");

    let config = BridgeConfig::from_env();
    let stop = StopSignal::new();

    let bus = config.i2c_bus.clone();
    let kind = config.sensor;
    let address = config.sensor_address;
    let bridge = setup(&config, stop.clone(), move || -> anyhow::Result<_> {
        let i2c = I2cdev::new(&bus).with_context(|| format!("opening {}", bus))?;
        Ok(Trill::setup(i2c, kind, address)?)
    })
    .await;

    let bridge = match bridge {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("startup failed: {}", e);
            return Err(e.into());
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("stop requested");
    stop.request_stop();
    bridge.join().await?;

    info!("shutdown complete");
    Ok(())
}
