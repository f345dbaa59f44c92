//! Error types for the TCP/JSON broker.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to bind TCP listener on {0}: {1}")]
    Bind(String, std::io::Error),

    #[error("failed to bind UDP discovery socket: {0}")]
    UdpBind(std::io::Error),
}
