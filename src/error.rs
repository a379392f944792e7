use crate::mapper::MapperError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("mapping device: {0}")]
    Mapper(#[from] MapperError),
    #[error("unable to initialise touch sensor: {0}")]
    SensorInit(String),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
