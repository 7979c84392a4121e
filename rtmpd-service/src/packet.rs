use bytes::Bytes;
use rtmp::codec::{TagError, TagHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Video,
    Metadata,
}

/// A demuxed audio/video frame or metadata unit. The payload is shared
/// read-only across every player queue once published.
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketKind,
    pub data: Bytes,
    pub timestamp: u32,
    pub stream_id: u32,
    pub header: Option<TagHeader>,
}

impl Packet {
    pub fn demux_audio(stream_id: u32, timestamp: u32, data: Bytes) -> Result<Self, TagError> {
        let header = TagHeader::decode_audio(&data)?;
        Ok(Self {
            kind: PacketKind::Audio,
            data,
            timestamp,
            stream_id,
            header: Some(header),
        })
    }

    pub fn demux_video(stream_id: u32, timestamp: u32, data: Bytes) -> Result<Self, TagError> {
        let header = TagHeader::decode_video(&data)?;
        Ok(Self {
            kind: PacketKind::Video,
            data,
            timestamp,
            stream_id,
            header: Some(header),
        })
    }

    pub fn metadata(stream_id: u32, timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: PacketKind::Metadata,
            data,
            timestamp,
            stream_id,
            header: None,
        }
    }

    pub fn is_audio_sequence_header(&self) -> bool {
        self.kind == PacketKind::Audio
            && self
                .header
                .map(|h| h.is_audio_sequence_header())
                .unwrap_or(false)
    }

    pub fn is_video_sequence_header(&self) -> bool {
        self.kind == PacketKind::Video
            && self
                .header
                .map(|h| h.is_video_sequence_header())
                .unwrap_or(false)
    }
}
