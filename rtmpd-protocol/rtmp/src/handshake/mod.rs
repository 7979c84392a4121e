use rtmpd_core::transport::Transport;
use std::time::Duration;
use tokio::time::timeout;

use self::error::HandshakeError;

mod complex_hs;
mod context;
pub mod error;
mod simple_hs;

const RTMP_VERSION: u8 = 3;
const RTMP_HANDSHAKE_SIZE: usize = 1536;

/// Server-side handshake: the digest variant is attempted first and falls
/// back to the plain mirror exchange for zero-version clients. The whole
/// exchange runs under one deadline.
pub struct Server {
    simple: simple_hs::SimpleHandshake,
    complex: complex_hs::ComplexHandshake,
    ctx: context::Context,
}

impl Server {
    pub fn new() -> Self {
        Self {
            simple: simple_hs::SimpleHandshake {},
            complex: complex_hs::ComplexHandshake {},
            ctx: context::Context::new(),
        }
    }

    pub async fn handshake(
        &mut self,
        io: &mut Transport,
        tm: Duration,
    ) -> Result<(), HandshakeError> {
        timeout(tm, self.do_handshake(io)).await??;
        Ok(())
    }

    async fn do_handshake(&mut self, io: &mut Transport) -> Result<(), HandshakeError> {
        match self.complex.handshake_with_client(&mut self.ctx, io).await {
            Ok(_) => Ok(()),
            Err(HandshakeError::TrySimpleHandshake) => {
                self.simple.handshake_with_client(&mut self.ctx, io).await
            }
            Err(err) => Err(err),
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn simple_handshake_mirrors_c1_into_s2() {
        let (mut client, server) = tcp_pair().await;
        let server_task = tokio::spawn(async move {
            let mut io = Transport::new(server);
            Server::new()
                .handshake(&mut io, Duration::from_secs(3))
                .await
        });

        // C0 + C1 with a zeroed version field
        let mut c0c1 = vec![3u8];
        let mut c1 = [0xAA_u8; RTMP_HANDSHAKE_SIZE];
        c1[0..8].copy_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        c0c1.extend_from_slice(&c1);
        client.write_all(&c0c1).await.unwrap();

        let mut s0s1s2 = vec![0u8; 1 + RTMP_HANDSHAKE_SIZE * 2];
        client.read_exact(&mut s0s1s2).await.unwrap();
        assert_eq!(s0s1s2[0], 3);
        // S2 echoes C1
        assert_eq!(&s0s1s2[1 + RTMP_HANDSHAKE_SIZE..], &c1[..]);
        // S1 mirrors the (not yet received) C2 buffer
        assert_eq!(
            &s0s1s2[1..1 + RTMP_HANDSHAKE_SIZE],
            &[0u8; RTMP_HANDSHAKE_SIZE][..]
        );

        let c2 = [0xBB_u8; RTMP_HANDSHAKE_SIZE];
        client.write_all(&c2).await.unwrap();

        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn complex_handshake_accepts_signed_c1() {
        let (mut client, server) = tcp_pair().await;
        let server_task = tokio::spawn(async move {
            let mut io = Transport::new(server);
            Server::new()
                .handshake(&mut io, Duration::from_secs(3))
                .await
        });

        let mut c1 = [0x11_u8; RTMP_HANDSHAKE_SIZE];
        BigEndian::write_u32(&mut c1[0..4], 1000);
        BigEndian::write_u32(&mut c1[4..8], 0x80000702);
        complex_hs::sign_c1_schema0(&mut c1);

        let mut c0c1 = vec![3u8];
        c0c1.extend_from_slice(&c1);
        client.write_all(&c0c1).await.unwrap();

        let mut s0s1s2 = vec![0u8; 1 + RTMP_HANDSHAKE_SIZE * 2];
        client.read_exact(&mut s0s1s2).await.unwrap();
        assert_eq!(s0s1s2[0], 3);

        let s1 = &s0s1s2[1..1 + RTMP_HANDSHAKE_SIZE];
        assert_eq!(BigEndian::read_u32(&s1[0..4]), 1000);
        assert_eq!(BigEndian::read_u32(&s1[4..8]), 0x0D0E0A0D);

        // S2's trailing digest is keyed by the client digest
        let s2 = &s0s1s2[1 + RTMP_HANDSHAKE_SIZE..];
        assert!(complex_hs::verify_s2(&c1, s2));
        // digest-derived, not an echo of C1
        assert_ne!(s2, &c1[..]);

        let c2 = [0u8; RTMP_HANDSHAKE_SIZE];
        client.write_all(&c2).await.unwrap();

        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn nonzero_version_with_bad_digest_is_rejected() {
        let (mut client, server) = tcp_pair().await;
        let server_task = tokio::spawn(async move {
            let mut io = Transport::new(server);
            Server::new()
                .handshake(&mut io, Duration::from_secs(3))
                .await
        });

        let mut c1 = [0x22_u8; RTMP_HANDSHAKE_SIZE];
        BigEndian::write_u32(&mut c1[4..8], 0x80000702);
        let mut c0c1 = vec![3u8];
        c0c1.extend_from_slice(&c1);
        client.write_all(&c0c1).await.unwrap();

        match server_task.await.unwrap() {
            Err(HandshakeError::DigestMismatch) => {}
            other => panic!("expected digest mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_version_byte_is_rejected() {
        let (mut client, server) = tcp_pair().await;
        let server_task = tokio::spawn(async move {
            let mut io = Transport::new(server);
            Server::new()
                .handshake(&mut io, Duration::from_secs(3))
                .await
        });

        let mut c0c1 = vec![6u8];
        c0c1.extend_from_slice(&[0u8; RTMP_HANDSHAKE_SIZE]);
        client.write_all(&c0c1).await.unwrap();

        match server_task.await.unwrap() {
            Err(HandshakeError::InvalidVersion(6)) => {}
            other => panic!("expected version error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_times_out_without_client_bytes() {
        let (_client, server) = tcp_pair().await;
        let mut io = Transport::new(server);
        match Server::new()
            .handshake(&mut io, Duration::from_secs(3))
            .await
        {
            Err(HandshakeError::Timeout(_)) => {}
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
