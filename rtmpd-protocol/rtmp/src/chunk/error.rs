use crate::message::error::MessageDecodeError;
use rtmpd_core::transport::TransportError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("Fresh chunk stream csid={1} must start with fmt=0, got fmt={0}")]
    InvalidFmtRule1(u8, u32),

    #[error("Partial message on csid={1} continued with fmt={0}")]
    InvalidFmtRule2(u8, u32),

    #[error("Message length mismatch on continuation, expect {0}, got {1}")]
    InvalidMsgLengthRule1(usize, usize),

    #[error("Invalid csid {0}, must range from 2 to 65599")]
    InvalidCsid(u32),

    #[error("Flush size mismatch, queued {queued} bytes, flushed {flushed}")]
    FlushSizeMismatch { queued: usize, flushed: usize },

    #[error("Transport IO: {0}")]
    TransportIO(#[from] TransportError),

    #[error("Decode rtmp message failed: {0}")]
    MessageDecode(#[from] MessageDecodeError),

    #[error("An IO error occurred: {0}")]
    Io(#[from] io::Error),
}
