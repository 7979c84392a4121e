use std::{io, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufStream},
    net::TcpStream,
    time::{error::Elapsed, timeout},
};
use tracing::trace;

pub static NOTIMEOUT: Duration = Duration::MAX;

// Staging buffer must hold the largest single read, which is one chunk
// payload (at most 65536 bytes after SetChunkSize validation).
const STAGING_BUF_SIZE: usize = 131072;
const WRITE_BUF_SIZE: usize = 131072;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Read closed by peer")]
    EndOfFile,

    #[error("An IO error occurred: {0}")]
    Io(#[from] io::Error),

    #[error("Timeout: {0}")]
    Timeout(#[from] Elapsed),
}

type Result<T> = std::result::Result<T, TransportError>;

/// Buffered TCP transport.
///
/// The read side stages bytes in an internal buffer so `read_exact` can hand
/// out borrowed slices, and `peek_exact`/`advance` can probe bytes without
/// consuming them. The write side queues everything into the `BufStream`
/// write buffer; nothing hits the socket until `flush`, which reports how
/// many queued bytes went out so callers can enforce the strict
/// queued-equals-flushed check.
pub struct Transport {
    io: BufStream<TcpStream>,
    recv_timeout: Duration,
    send_timeout: Duration,
    recv_bytes: u64,
    send_bytes: u64,

    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    unflushed: usize,
}

impl Transport {
    pub fn new(io: TcpStream) -> Self {
        Self::with_read_buffer(io, 0)
    }

    pub fn with_read_buffer(io: TcpStream, read_buf_size: usize) -> Self {
        Self {
            io: BufStream::with_capacity(read_buf_size, WRITE_BUF_SIZE, io),
            recv_timeout: NOTIMEOUT,
            send_timeout: NOTIMEOUT,
            recv_bytes: 0,
            send_bytes: 0,

            buf: vec![0u8; STAGING_BUF_SIZE],
            read_pos: 0,
            write_pos: 0,
            unflushed: 0,
        }
    }

    pub fn set_recv_timeout(&mut self, tm: Duration) {
        self.recv_timeout = tm;
    }

    pub fn set_send_timeout(&mut self, tm: Duration) {
        self.send_timeout = tm;
    }

    pub fn get_recv_bytes(&self) -> u64 {
        self.recv_bytes
    }

    pub fn get_send_bytes(&self) -> u64 {
        self.send_bytes
    }

    fn buf_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    fn buf_left(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    fn buf_move_to_head(&mut self) {
        trace!(
            "Readbuf moved, len={}, move={}",
            self.buf_len(),
            self.read_pos
        );
        self.buf.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    fn buf_reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    async fn fill_to(&mut self, size: usize) -> Result<()> {
        while self.buf_len() < size {
            if self.buf_len() + self.buf_left() < size {
                self.buf_move_to_head();
            }
            let nread = if self.recv_timeout == NOTIMEOUT {
                self.io.read(&mut self.buf[self.write_pos..]).await?
            } else {
                timeout(self.recv_timeout, self.io.read(&mut self.buf[self.write_pos..])).await??
            };
            match nread {
                0 => return Err(TransportError::EndOfFile),
                n => self.write_pos += n,
            }
        }
        Ok(())
    }

    pub async fn read_exact(&mut self, size: usize) -> Result<&[u8]> {
        if self.read_pos == self.write_pos {
            self.buf_reset();
        }
        self.fill_to(size).await?;
        self.recv_bytes += size as u64;
        self.read_pos += size;
        Ok(&self.buf[self.read_pos - size..self.read_pos])
    }

    /// Stages `size` bytes without consuming them; a later `advance` commits.
    pub async fn peek_exact(&mut self, size: usize) -> Result<&[u8]> {
        if self.read_pos == self.write_pos {
            self.buf_reset();
        }
        self.fill_to(size).await?;
        Ok(&self.buf[self.read_pos..self.read_pos + size])
    }

    /// Consumes bytes previously staged by `peek_exact`.
    pub fn advance(&mut self, size: usize) {
        debug_assert!(self.buf_len() >= size);
        self.recv_bytes += size as u64;
        self.read_pos += size;
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1).await?[0])
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        let v = self.read_exact(4).await?;
        Ok((v[0] as u32) << 24 | (v[1] as u32) << 16 | (v[2] as u32) << 8 | (v[3] as u32))
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.send_timeout == NOTIMEOUT {
            self.io.write_all(buf).await?;
        } else {
            timeout(self.send_timeout, self.io.write_all(buf)).await??;
        }
        self.send_bytes += buf.len() as u64;
        self.unflushed += buf.len();
        Ok(())
    }

    /// Flushes the queued write buffer and returns how many bytes it held.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.send_timeout == NOTIMEOUT {
            self.io.flush().await?;
        } else {
            timeout(self.send_timeout, self.io.flush()).await??;
        }
        Ok(std::mem::take(&mut self.unflushed))
    }
}
