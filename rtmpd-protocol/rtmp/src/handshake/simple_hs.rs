use rtmpd_core::transport::Transport;
use tracing::info;

use super::{context::Context, error::HandshakeError, RTMP_HANDSHAKE_SIZE, RTMP_VERSION};

pub struct SimpleHandshake {}

impl SimpleHandshake {
    /// Plain handshake: mirror the peer buffers. S1 echoes the c2 buffer
    /// (still zeroed, the client answers C2 only after seeing S0S1S2) and
    /// S2 echoes C1, matching what old flash clients expect back.
    pub async fn handshake_with_client(
        &self,
        ctx: &mut Context,
        io: &mut Transport,
    ) -> Result<(), HandshakeError> {
        ctx.read_c0c1(io).await?;

        if ctx.c0c1[0] != RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(ctx.c0c1[0]));
        }

        if ctx.s0s1s2.is_empty() {
            ctx.s0s1s2.extend_from_slice(&[RTMP_VERSION]);
            if ctx.c2.is_empty() {
                ctx.s0s1s2.extend_from_slice(&[0; RTMP_HANDSHAKE_SIZE]);
            } else {
                ctx.s0s1s2.extend_from_slice(&ctx.c2[..]);
            }
            ctx.s0s1s2.extend_from_slice(&ctx.c0c1[1..]);
        }

        io.write_all(&ctx.s0s1s2).await?;
        io.flush().await?;

        ctx.read_c2(io).await?;

        info!("Simple handshake completed");

        Ok(())
    }
}
