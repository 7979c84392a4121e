use crate::{
    chunk::ChunkCodec,
    message::{types::*, RtmpMessage},
};

use std::time::Duration;
use tracing::trace;

use super::error::ConnectionError;

#[derive(Default)]
struct AckWindowSize {
    window: u32,
}

/// Connection-level context: the chunk codec plus protocol-control state
/// that both command handling and the streaming cycles share.
pub struct Context {
    chunk_io: ChunkCodec,
    in_ack_size: AckWindowSize,
    out_ack_size: AckWindowSize,
    in_buffer_length: u32,
    in_audio_count: u64,
    in_video_count: u64,
    out_audio_count: u64,
    out_video_count: u64,
}

impl Context {
    pub fn new(chunk_io: ChunkCodec) -> Self {
        Self {
            chunk_io,
            in_ack_size: AckWindowSize::default(),
            out_ack_size: AckWindowSize::default(),
            in_buffer_length: 0,
            in_audio_count: 0,
            in_video_count: 0,
            out_audio_count: 0,
            out_video_count: 0,
        }
    }

    pub fn set_recv_timeout(&mut self, tm: Duration) {
        self.chunk_io.set_recv_timeout(tm);
    }

    pub fn set_send_timeout(&mut self, tm: Duration) {
        self.chunk_io.set_send_timeout(tm);
    }

    pub fn get_recv_bytes(&self) -> u64 {
        self.chunk_io.get_recv_bytes()
    }

    pub fn get_send_bytes(&self) -> u64 {
        self.chunk_io.get_send_bytes()
    }

    pub fn get_in_audio_count(&self) -> u64 {
        self.in_audio_count
    }

    pub fn get_in_video_count(&self) -> u64 {
        self.in_video_count
    }

    pub fn get_out_audio_count(&self) -> u64 {
        self.out_audio_count
    }

    pub fn get_out_video_count(&self) -> u64 {
        self.out_video_count
    }

    pub fn set_in_window_ack_size(&mut self, ack_size: u32) {
        self.in_ack_size.window = ack_size;
    }

    pub fn get_in_window_ack_size(&self) -> u32 {
        self.in_ack_size.window
    }

    pub fn get_out_window_ack_size(&self) -> u32 {
        self.out_ack_size.window
    }

    pub fn get_in_buffer_length(&self) -> u32 {
        self.in_buffer_length
    }

    /// Cancel-safe readiness probe for multiplexing loops.
    pub async fn readable(&mut self) -> Result<(), ConnectionError> {
        Ok(self.chunk_io.readable().await?)
    }

    pub async fn recv_message(&mut self) -> Result<RtmpMessage, ConnectionError> {
        let msg = self.chunk_io.recv_rtmp_message().await?;
        self.on_recv_message(&msg).await?;
        Ok(msg)
    }

    async fn on_recv_message(&mut self, msg: &RtmpMessage) -> Result<(), ConnectionError> {
        trace!("Recv {}", msg);
        match msg {
            RtmpMessage::AudioData { .. } => self.in_audio_count += 1,
            RtmpMessage::VideoData { .. } => self.in_video_count += 1,
            RtmpMessage::SetChunkSize { chunk_size } => {
                let chunk_size = *chunk_size as usize;
                if !(128..=65536).contains(&chunk_size) {
                    return Err(ConnectionError::InvalidChunkSize(chunk_size));
                }
                self.chunk_io.set_in_chunk_size(chunk_size);
            }
            RtmpMessage::SetWindowAckSize { ack_window_size } => {
                self.in_ack_size.window = *ack_window_size;
            }
            RtmpMessage::SetPeerBandwidth { size, .. } => {
                self.out_ack_size.window = *size;
            }
            RtmpMessage::Acknowledgement { sequence_number } => {
                // bookkeeping only, no action required
                trace!("Peer acknowledged {} bytes", sequence_number);
            }
            RtmpMessage::Abort { chunk_stream_id } => {
                self.chunk_io.abort_chunk_stream(*chunk_stream_id);
            }
            RtmpMessage::UserControl {
                event_type,
                event_data,
                extra_data,
            } => match *event_type {
                user_ctrl_ev_type::SET_BUFFER_LENGTH => self.in_buffer_length = *extra_data,
                user_ctrl_ev_type::PING_REQUEST => {
                    self.send_message(
                        RtmpMessage::UserControl {
                            event_type: user_ctrl_ev_type::PING_RESPONSE,
                            event_data: *event_data,
                            extra_data: 0,
                        },
                        0,
                        0,
                    )
                    .await?
                }
                _ => {}
            },
            _ => {}
        }
        Ok(())
    }

    pub async fn send_message(
        &mut self,
        msg: RtmpMessage,
        timestamp: u32,
        stream_id: u32,
    ) -> Result<(), ConnectionError> {
        self.on_send_message(&msg);
        let payload = crate::message::encode(msg, timestamp, stream_id)?;
        self.chunk_io.send_rtmp_message(payload).await?;
        Ok(())
    }

    /// Encodes and queues all messages, then issues one gathered flush.
    pub async fn send_messages(
        &mut self,
        msgs: &[RtmpMessage],
        timestamp: u32,
        stream_id: u32,
    ) -> Result<(), ConnectionError> {
        let mut payloads = Vec::with_capacity(msgs.len());
        for msg in msgs {
            self.on_send_message(msg);
            payloads.push(crate::message::encode(msg.clone(), timestamp, stream_id)?);
        }
        self.chunk_io.send_rtmp_messages(&payloads).await?;
        Ok(())
    }

    /// Queues without flushing; the merged-write path of the player loop.
    pub async fn queue_message(
        &mut self,
        msg: RtmpMessage,
        timestamp: u32,
        stream_id: u32,
    ) -> Result<usize, ConnectionError> {
        self.on_send_message(&msg);
        let payload = crate::message::encode(msg, timestamp, stream_id)?;
        Ok(self.chunk_io.queue_rtmp_message(&payload).await?)
    }

    pub async fn flush(&mut self) -> Result<usize, ConnectionError> {
        Ok(self.chunk_io.flush().await?)
    }

    fn on_send_message(&mut self, msg: &RtmpMessage) {
        trace!("Send {}", msg);
        match msg {
            RtmpMessage::AudioData { .. } => self.out_audio_count += 1,
            RtmpMessage::VideoData { .. } => self.out_video_count += 1,
            RtmpMessage::SetChunkSize { chunk_size } => {
                self.chunk_io.set_out_chunk_size(*chunk_size as usize)
            }
            RtmpMessage::SetWindowAckSize { ack_window_size } => {
                self.out_ack_size.window = *ack_window_size
            }
            _ => {}
        }
    }

    /// Receives until an AMF command (optionally restricted to the given
    /// names) arrives. Media messages here mean the peer streams before
    /// publishing, which is a protocol violation.
    pub async fn expect_amf_command(
        &mut self,
        specified_cmds: &[&str],
    ) -> Result<RtmpMessage, ConnectionError> {
        loop {
            let msg = self.recv_message().await?;
            if msg.expect_amf(specified_cmds) {
                return Ok(msg);
            }
            match msg {
                RtmpMessage::AudioData { .. } | RtmpMessage::VideoData { .. } => {
                    return Err(ConnectionError::UnexpectedMessage);
                }
                _ => continue,
            }
        }
    }
}
