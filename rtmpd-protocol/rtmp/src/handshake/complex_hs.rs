use byteorder::{BigEndian, ByteOrder};
use hmac::{Hmac, Mac};
use rand::Rng;
use rtmpd_core::transport::Transport;
use sha2::Sha256;
use tracing::{info, trace};

use super::{context::Context, error::HandshakeError, RTMP_HANDSHAKE_SIZE, RTMP_VERSION};

type HmacSha256 = Hmac<Sha256>;

const SERVER_VERSION: u32 = 0x0D0E_0A0D;
const DIGEST_LEN: usize = 32;

// "Genuine Adobe Flash Player 001" + binary tail
const HS_CLIENT_FULL_KEY: [u8; 62] = [
    b'G', b'e', b'n', b'u', b'i', b'n', b'e', b' ', b'A', b'd', b'o', b'b', b'e', b' ', b'F',
    b'l', b'a', b's', b'h', b' ', b'P', b'l', b'a', b'y', b'e', b'r', b' ', b'0', b'0', b'1',
    0xF0, 0xEE, 0xC2, 0x4A, 0x80, 0x68, 0xBE, 0xE8, 0x2E, 0x00, 0xD0, 0xD1, 0x02, 0x9E, 0x7E,
    0x57, 0x6E, 0xEC, 0x5D, 0x2D, 0x29, 0x80, 0x6F, 0xAB, 0x93, 0xB8, 0xE6, 0x36, 0xCF, 0xEB,
    0x31, 0xAE,
];
// "Genuine Adobe Flash Media Server 001" + binary tail
const HS_SERVER_FULL_KEY: [u8; 68] = [
    b'G', b'e', b'n', b'u', b'i', b'n', b'e', b' ', b'A', b'd', b'o', b'b', b'e', b' ', b'F',
    b'l', b'a', b's', b'h', b' ', b'M', b'e', b'd', b'i', b'a', b' ', b'S', b'e', b'r', b'v',
    b'e', b'r', b' ', b'0', b'0', b'1', 0xF0, 0xEE, 0xC2, 0x4A, 0x80, 0x68, 0xBE, 0xE8, 0x2E,
    0x00, 0xD0, 0xD1, 0x02, 0x9E, 0x7E, 0x57, 0x6E, 0xEC, 0x5D, 0x2D, 0x29, 0x80, 0x6F, 0xAB,
    0x93, 0xB8, 0xE6, 0x36, 0xCF, 0xEB, 0x31, 0xAE,
];
const HS_CLIENT_PARTIAL_LEN: usize = 30;
const HS_SERVER_PARTIAL_LEN: usize = 36;

pub struct ComplexHandshake {}

impl ComplexHandshake {
    /// Digest handshake for clients announcing a nonzero version in C1.
    /// Schema 1 places the digest offset region at byte 772, schema 0 at
    /// byte 8; both are probed, schema 1 first.
    pub async fn handshake_with_client(
        &self,
        ctx: &mut Context,
        io: &mut Transport,
    ) -> Result<(), HandshakeError> {
        ctx.read_c0c1(io).await?;

        if ctx.c0c1[0] != RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(ctx.c0c1[0]));
        }

        let cli_time;
        let s2_key;
        {
            let c1 = &ctx.c0c1[1..];
            cli_time = BigEndian::read_u32(&c1[0..4]);
            let cli_ver = BigEndian::read_u32(&c1[4..8]);
            if cli_ver == 0 {
                trace!("C1 version is zero, fall back to simple handshake");
                return Err(HandshakeError::TrySimpleHandshake);
            }

            let client_key = &HS_CLIENT_FULL_KEY[..HS_CLIENT_PARTIAL_LEN];
            let pos = find_digest(c1, client_key, 772)
                .or_else(|| find_digest(c1, client_key, 8))
                .ok_or(HandshakeError::DigestMismatch)?;

            // S2 is keyed by the client digest under the full server key.
            s2_key = make_digest(&HS_SERVER_FULL_KEY, &c1[pos..pos + DIGEST_LEN], None);
        }

        create_s0s1s2(ctx, cli_time, &s2_key);

        io.write_all(&ctx.s0s1s2).await?;
        io.flush().await?;

        ctx.read_c2(io).await?;

        info!("Complex handshake completed");

        Ok(())
    }
}

fn create_s0s1s2(ctx: &mut Context, cli_time: u32, s2_key: &[u8; DIGEST_LEN]) {
    let mut rng = rand::thread_rng();
    let mut buf = vec![0u8; 1 + RTMP_HANDSHAKE_SIZE * 2];
    buf[0] = RTMP_VERSION;
    {
        let s1 = &mut buf[1..RTMP_HANDSHAKE_SIZE + 1];
        rng.fill(&mut s1[8..]);
        BigEndian::write_u32(&mut s1[0..4], cli_time);
        BigEndian::write_u32(&mut s1[4..8], SERVER_VERSION);

        let gap = calc_digest_pos(s1, 8);
        let digest = make_digest(&HS_SERVER_FULL_KEY[..HS_SERVER_PARTIAL_LEN], s1, Some(gap));
        s1[gap..gap + DIGEST_LEN].copy_from_slice(&digest);
    }
    {
        let s2 = &mut buf[RTMP_HANDSHAKE_SIZE + 1..];
        rng.fill(&mut s2[..]);

        let gap = RTMP_HANDSHAKE_SIZE - DIGEST_LEN;
        let digest = make_digest(s2_key, &s2[..gap], None);
        s2[gap..].copy_from_slice(&digest);
    }

    ctx.s0s1s2.clear();
    ctx.s0s1s2.extend_from_slice(&buf);
}

/// HMAC-SHA256 over `src`, excluding the 32-byte digest window at `skip`
/// when present.
fn make_digest(key: &[u8], src: &[u8], skip: Option<usize>) -> [u8; DIGEST_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    match skip {
        Some(gap) => {
            mac.update(&src[..gap]);
            mac.update(&src[gap + DIGEST_LEN..]);
        }
        None => mac.update(src),
    }
    mac.finalize().into_bytes().into()
}

/// Offset = (sum of the 4 offset bytes) mod 728 + base + 4.
fn calc_digest_pos(p: &[u8], base: usize) -> usize {
    let mut pos = 0_usize;
    for i in 0..4 {
        pos += p[base + i] as usize;
    }
    pos % 728 + base + 4
}

fn find_digest(p: &[u8], key: &[u8], base: usize) -> Option<usize> {
    let gap = calc_digest_pos(p, base);
    let digest = make_digest(key, p, Some(gap));
    if p[gap..gap + DIGEST_LEN] == digest {
        Some(gap)
    } else {
        None
    }
}

/// Writes a valid schema-0 digest into a C1 buffer. Test helper for driving
/// the server side of the complex handshake.
#[cfg(test)]
pub(crate) fn sign_c1_schema0(c1: &mut [u8]) {
    let gap = calc_digest_pos(c1, 8);
    let digest = make_digest(&HS_CLIENT_FULL_KEY[..HS_CLIENT_PARTIAL_LEN], c1, Some(gap));
    c1[gap..gap + DIGEST_LEN].copy_from_slice(&digest);
}

#[cfg(test)]
pub(crate) fn verify_s2(c1: &[u8], s2: &[u8]) -> bool {
    let gap = calc_digest_pos(c1, 8);
    let client_digest = &c1[gap..gap + DIGEST_LEN];
    let key = make_digest(&HS_SERVER_FULL_KEY, client_digest, None);
    let expect = make_digest(&key, &s2[..RTMP_HANDSHAKE_SIZE - DIGEST_LEN], None);
    s2[RTMP_HANDSHAKE_SIZE - DIGEST_LEN..] == expect
}
