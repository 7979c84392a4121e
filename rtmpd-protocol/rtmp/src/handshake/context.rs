use bytes::BytesMut;
use rtmpd_core::transport::Transport;

use super::{error::HandshakeError, RTMP_HANDSHAKE_SIZE};

/// Exchange buffers shared by the simple and complex paths. Reads are
/// idempotent so the complex attempt and the simple fallback see the same
/// bytes.
pub struct Context {
    // [1+1536]
    pub c0c1: BytesMut,
    // [1+1536+1536]
    pub s0s1s2: BytesMut,
    // [1536]
    pub c2: BytesMut,
}

impl Context {
    pub fn new() -> Self {
        Self {
            c0c1: BytesMut::new(),
            s0s1s2: BytesMut::new(),
            c2: BytesMut::new(),
        }
    }

    pub async fn read_c0c1(&mut self, io: &mut Transport) -> Result<(), HandshakeError> {
        if self.c0c1.is_empty() {
            self.c0c1
                .extend_from_slice(io.read_exact(RTMP_HANDSHAKE_SIZE + 1).await?);
        }
        Ok(())
    }

    pub async fn read_c2(&mut self, io: &mut Transport) -> Result<(), HandshakeError> {
        if self.c2.is_empty() {
            self.c2
                .extend_from_slice(io.read_exact(RTMP_HANDSHAKE_SIZE).await?);
        }
        Ok(())
    }
}
