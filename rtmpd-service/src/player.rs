use rtmp::connection::server as rtmp_conn;
use rtmp::message::{metadata_reform, MetadataReform, RtmpMessage};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ServiceError;
use crate::packet::{Packet, PacketKind};
use crate::{MERGE_WRITE_WAIT, TIMESTAMP_JUMP_GAP};

/// Consumer side of one play subscription: the bounded packet queue handle,
/// the base-timestamp rewrite keeping the outgoing timeline monotonic, and
/// the merged-write accounting that batches sends into one flush per wait
/// interval.
pub struct Player {
    queue: mpsc::Receiver<Packet>,

    base_timestamp: u32,
    base_audio_timestamp: u32,
    base_video_timestamp: u32,

    msg_count: u32,
    bytes_count: usize,
    last_flush: Instant,
    paused: bool,
}

impl Player {
    pub fn new(queue: mpsc::Receiver<Packet>) -> Self {
        Self {
            queue,
            base_timestamp: 0,
            base_audio_timestamp: 0,
            base_video_timestamp: 0,
            msg_count: 0,
            bytes_count: 0,
            last_flush: Instant::now(),
            paused: false,
        }
    }

    /// Blocks until a packet arrives or the queue closes (publisher gone
    /// and the session finalized).
    pub async fn recv(&mut self) -> Option<Packet> {
        self.queue.recv().await
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Queues one packet onto the connection without flushing.
    pub async fn send_packet(
        &mut self,
        rtmp: &mut rtmp_conn::Server,
        pkt: Packet,
    ) -> Result<(), ServiceError> {
        let timestamp = self.rewrite_timestamp(pkt.kind, pkt.timestamp);

        let msg = match pkt.kind {
            PacketKind::Audio => RtmpMessage::AudioData {
                stream_id: pkt.stream_id,
                timestamp,
                payload: pkt.data,
            },
            PacketKind::Video => RtmpMessage::VideoData {
                stream_id: pkt.stream_id,
                timestamp,
                payload: pkt.data,
            },
            PacketKind::Metadata => {
                // strip the @setDataFrame tag before it reaches a player
                let reformed = metadata_reform(&pkt.data, MetadataReform::Del)?;
                RtmpMessage::Amf0Data {
                    stream_id: pkt.stream_id,
                    timestamp,
                    payload: reformed,
                    values: vec![],
                }
            }
        };

        let queued = rtmp.queue_message(msg, timestamp, pkt.stream_id).await?;
        self.bytes_count += queued;
        self.msg_count += 1;
        Ok(())
    }

    pub fn should_flush(&self) -> bool {
        self.msg_count > 0 && self.last_flush.elapsed() >= MERGE_WRITE_WAIT
    }

    pub async fn flush(&mut self, rtmp: &mut rtmp_conn::Server) -> Result<(), ServiceError> {
        let flushed = rtmp.flush().await?;
        debug!(
            "Merge write messages, count={} bytes={} flushed={}",
            self.msg_count, self.bytes_count, flushed
        );
        self.last_flush = Instant::now();
        self.msg_count = 0;
        self.bytes_count = 0;
        Ok(())
    }

    fn update_base_timestamp(&mut self, kind: PacketKind, timestamp: u32) {
        match kind {
            PacketKind::Audio => self.base_audio_timestamp = timestamp,
            PacketKind::Video => self.base_video_timestamp = timestamp,
            PacketKind::Metadata => {}
        }
        // keep the whole stream's base the max of both tracks
        self.base_timestamp = self
            .base_audio_timestamp
            .max(self.base_video_timestamp);
    }

    /// Enforces a monotonic outgoing timeline: a packet running behind the
    /// stream position is lifted just past the base.
    fn rewrite_timestamp(&mut self, kind: PacketKind, timestamp: u32) -> u32 {
        let timestamp = if timestamp < self.base_timestamp {
            self.base_timestamp + TIMESTAMP_JUMP_GAP
        } else {
            timestamp
        };
        self.update_base_timestamp(kind, timestamp);
        timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_stay_monotonic_across_a_restart() {
        let (_tx, rx) = mpsc::channel(4);
        let mut player = Player::new(rx);

        assert_eq!(player.rewrite_timestamp(PacketKind::Video, 1000), 1000);
        assert_eq!(player.rewrite_timestamp(PacketKind::Audio, 1020), 1020);
        // publisher restarted, timestamps rewound
        assert_eq!(
            player.rewrite_timestamp(PacketKind::Video, 40),
            1020 + TIMESTAMP_JUMP_GAP
        );
        // and the new base carries forward
        assert_eq!(
            player.rewrite_timestamp(PacketKind::Audio, 50),
            1020 + TIMESTAMP_JUMP_GAP + TIMESTAMP_JUMP_GAP
        );
    }

    #[test]
    fn base_timestamp_is_max_of_audio_and_video() {
        let (_tx, rx) = mpsc::channel(4);
        let mut player = Player::new(rx);

        player.update_base_timestamp(PacketKind::Audio, 500);
        player.update_base_timestamp(PacketKind::Video, 300);
        assert_eq!(player.base_timestamp, 500);

        player.update_base_timestamp(PacketKind::Video, 700);
        assert_eq!(player.base_timestamp, 700);
    }
}
