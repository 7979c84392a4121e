use bytes::Bytes;
use thiserror::Error;

pub const SOUND_FORMAT_AAC: u8 = 10;
pub const CODEC_ID_H264: u8 = 7;
pub const FRAME_TYPE_KEY: u8 = 1;
pub const FRAME_TYPE_INTER: u8 = 2;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("Invalid audio data len={0}")]
    InvalidAudioData(usize),

    #[error("Invalid video data len={0}")]
    InvalidVideoData(usize),
}

/// Decoded FLV media tag header, the 1-byte (audio) or up to 5-byte (video)
/// prefix inside an RTMP audio/video payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagHeader {
    pub sound_format: u8,
    pub sound_rate: u8,
    pub sound_size: u8,
    pub sound_type: u8,
    // 0: sequence header, 1: aac raw
    pub aac_packet_type: u8,

    // 1: keyframe, 2: inter frame
    pub frame_type: u8,
    pub codec_id: u8,
    // 0: sequence header, 1: NALU, 2: end of sequence
    pub avc_packet_type: u8,
    pub composition_time: i32,
}

impl TagHeader {
    pub fn decode_audio(data: &Bytes) -> Result<Self, TagError> {
        if data.is_empty() {
            return Err(TagError::InvalidAudioData(data.len()));
        }

        let mut tag = TagHeader::default();
        let flags = data[0];
        tag.sound_format = flags >> 4;
        tag.sound_rate = (flags >> 2) & 0x3;
        tag.sound_size = (flags >> 1) & 0x1;
        tag.sound_type = flags & 0x1;

        if tag.sound_format == SOUND_FORMAT_AAC {
            if data.len() < 2 {
                return Err(TagError::InvalidAudioData(data.len()));
            }
            tag.aac_packet_type = data[1];
        }

        Ok(tag)
    }

    pub fn decode_video(data: &Bytes) -> Result<Self, TagError> {
        if data.len() < 5 {
            return Err(TagError::InvalidVideoData(data.len()));
        }

        let mut tag = TagHeader::default();
        let flags = data[0];
        tag.frame_type = flags >> 4;
        tag.codec_id = flags & 0xf;

        if tag.codec_id == CODEC_ID_H264
            && (tag.frame_type == FRAME_TYPE_KEY || tag.frame_type == FRAME_TYPE_INTER)
        {
            tag.avc_packet_type = data[1];
            for i in 2..5 {
                tag.composition_time = (tag.composition_time << 8) + data[i] as i32;
            }
        }

        Ok(tag)
    }

    pub fn is_key_frame(&self) -> bool {
        self.frame_type == FRAME_TYPE_KEY
    }

    pub fn is_video_sequence_header(&self) -> bool {
        self.is_key_frame() && self.codec_id == CODEC_ID_H264 && self.avc_packet_type == 0
    }

    pub fn is_audio_sequence_header(&self) -> bool {
        self.sound_format == SOUND_FORMAT_AAC && self.aac_packet_type == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aac_sequence_header() {
        let tag = TagHeader::decode_audio(&Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10])).unwrap();
        assert_eq!(tag.sound_format, SOUND_FORMAT_AAC);
        assert_eq!(tag.aac_packet_type, 0);
        assert!(tag.is_audio_sequence_header());
    }

    #[test]
    fn aac_raw_frame() {
        let tag = TagHeader::decode_audio(&Bytes::from_static(&[0xAF, 0x01, 0x21])).unwrap();
        assert!(!tag.is_audio_sequence_header());
    }

    #[test]
    fn non_aac_audio_has_no_packet_type() {
        // MP3 (sound format 2), single header byte is enough
        let tag = TagHeader::decode_audio(&Bytes::from_static(&[0x2F])).unwrap();
        assert_eq!(tag.sound_format, 2);
        assert!(!tag.is_audio_sequence_header());
    }

    #[test]
    fn avc_sequence_header() {
        let tag =
            TagHeader::decode_video(&Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00])).unwrap();
        assert!(tag.is_key_frame());
        assert!(tag.is_video_sequence_header());
        assert_eq!(tag.composition_time, 0);
    }

    #[test]
    fn avc_inter_frame_with_composition_time() {
        let tag =
            TagHeader::decode_video(&Bytes::from_static(&[0x27, 0x01, 0x00, 0x01, 0x02])).unwrap();
        assert_eq!(tag.frame_type, FRAME_TYPE_INTER);
        assert!(!tag.is_video_sequence_header());
        assert_eq!(tag.composition_time, 0x0102);
    }

    #[test]
    fn short_video_payload_is_rejected() {
        assert!(TagHeader::decode_video(&Bytes::from_static(&[0x17])).is_err());
    }
}
