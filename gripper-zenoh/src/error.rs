use thiserror::Error;

#[derive(Error, Debug)]
pub enum WrapperError {
    #[error("Zenoh error {0:?}")]
    ZenohError(#[from] zenoh::Error),
    #[error("Failed to serialize message")]
    SerdeError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WrapperError>;
