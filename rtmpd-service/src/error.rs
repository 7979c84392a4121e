use crate::stream::{error::StreamError, session::SessionEvent};
use rtmp::chunk::error::ChunkError;
use rtmp::codec::TagError;
use rtmp::connection::error::ConnectionError;
use rtmp::handshake::error::HandshakeError;
use rtmp::message::error::MetadataReformError;
use rtmpd_core::transport::TransportError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),

    #[error("Stream error: {0}")]
    StreamError(#[from] StreamError),

    #[error("Register failed: {0}")]
    RegisterFailed(String),

    #[error("The token is invalid")]
    InvalidToken,

    #[error("Publish is done")]
    PublishDone,

    #[error("Demux media tag failed: {0}")]
    Demux(#[from] TagError),

    #[error("Reform metadata failed: {0}")]
    MetadataReform(#[from] MetadataReformError),

    #[error("Session channel send failed: {0}")]
    SendCh(#[from] SendError<SessionEvent>),

    #[error("Wait publish/play command timeout")]
    IdentifyTimeout,
}

impl ServiceError {
    /// A peer hanging up is a normal end of service, logged at debug.
    pub fn is_normal_eof(&self) -> bool {
        let transport = match self {
            ServiceError::ConnectionError(ConnectionError::ChunkIo(
                ChunkError::TransportIO(e),
            )) => e,
            ServiceError::ConnectionError(ConnectionError::Handshake(
                HandshakeError::TransportIO(e),
            )) => e,
            _ => return false,
        };
        matches!(transport, TransportError::EndOfFile)
    }
}
