use rtmpd_core::transport::TransportError;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Invalid RTMP version
    #[error("Not support version {0}")]
    InvalidVersion(u8),

    #[error("Complex handshake does not apply, try simple handshake")]
    TrySimpleHandshake,

    /// C1 carries a nonzero version but no valid digest at either schema
    #[error("C1 digest verify failed")]
    DigestMismatch,

    #[error("Handshake timeout: {0}")]
    Timeout(#[from] Elapsed),

    #[error("Transport IO: {0}")]
    TransportIO(#[from] TransportError),
}
