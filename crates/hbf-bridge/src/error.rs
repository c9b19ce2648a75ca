//! Bridge error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error(transparent)]
    Core(#[from] hbf_core::Error),
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(e: rumqttc::ClientError) -> Self {
        BridgeError::Publish(e.to_string())
    }
}

impl From<rumqttc::ConnectionError> for BridgeError {
    fn from(e: rumqttc::ConnectionError) -> Self {
        BridgeError::ConnectionFailed(e.to_string())
    }
}
