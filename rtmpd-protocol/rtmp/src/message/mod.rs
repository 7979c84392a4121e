use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Buf, Bytes};
use rml_amf0::Amf0Value;
use std::{collections::HashMap, fmt, io::Cursor};
use tracing::{trace, warn};

use self::error::{MessageDecodeError, MessageEncodeError, MetadataReformError};
use self::types::{amf0_command_type::*, rtmp_sig::*, rtmp_status::*, *};

pub mod error;
pub mod request;
pub mod types;

/// An integral RTMP message before chunking (outbound) or after
/// reassembly (inbound).
#[derive(Debug, Clone)]
pub struct RtmpPayload {
    pub message_type: u8,
    pub stream_id: u32,
    pub timestamp: u32,
    pub raw_data: Bytes,
}

#[derive(Debug, Clone)]
pub enum RtmpMessage {
    Amf0Command {
        command_name: String,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_arguments: Vec<Amf0Value>,
    },
    Amf0Data {
        stream_id: u32,
        timestamp: u32,
        /// Raw AMF0 bytes as received; empty for locally built messages.
        payload: Bytes,
        values: Vec<Amf0Value>,
    },
    UserControl {
        event_type: u16,
        event_data: u32,
        extra_data: u32,
    },
    SetWindowAckSize {
        ack_window_size: u32,
    },
    Acknowledgement {
        sequence_number: u32,
    },
    SetChunkSize {
        chunk_size: u32,
    },
    AudioData {
        stream_id: u32,
        timestamp: u32,
        payload: Bytes,
    },
    VideoData {
        stream_id: u32,
        timestamp: u32,
        payload: Bytes,
    },
    Abort {
        chunk_stream_id: u32,
    },
    SetPeerBandwidth {
        size: u32,
        limit_type: u8,
    },
    Unknown {
        type_id: u8,
        data: Bytes,
    },
}

impl fmt::Display for RtmpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtmpMessage::Amf0Command { command_name, transaction_id, .. } => {
                write!(f, "Amf0Command({}, tid={})", command_name, transaction_id)
            }
            RtmpMessage::Amf0Data { payload, .. } => write!(f, "Amf0Data(len={})", payload.len()),
            RtmpMessage::UserControl { event_type, event_data, .. } => {
                write!(f, "UserControl(ev={}, data={})", event_type, event_data)
            }
            RtmpMessage::SetWindowAckSize { ack_window_size } => {
                write!(f, "SetWindowAckSize({})", ack_window_size)
            }
            RtmpMessage::Acknowledgement { sequence_number } => {
                write!(f, "Acknowledgement({})", sequence_number)
            }
            RtmpMessage::SetChunkSize { chunk_size } => write!(f, "SetChunkSize({})", chunk_size),
            RtmpMessage::AudioData { timestamp, payload, .. } => {
                write!(f, "AudioData(ts={}, len={})", timestamp, payload.len())
            }
            RtmpMessage::VideoData { timestamp, payload, .. } => {
                write!(f, "VideoData(ts={}, len={})", timestamp, payload.len())
            }
            RtmpMessage::Abort { chunk_stream_id } => write!(f, "Abort(csid={})", chunk_stream_id),
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                write!(f, "SetPeerBandwidth({}, limit={})", size, limit_type)
            }
            RtmpMessage::Unknown { type_id, data } => {
                write!(f, "Unknown(type={}, len={})", type_id, data.len())
            }
        }
    }
}

impl RtmpMessage {
    pub fn new_null(transaction_id: f64) -> Self {
        RtmpMessage::Amf0Command {
            command_name: "".to_string(),
            transaction_id,
            command_object: Amf0Value::Null,
            additional_arguments: vec![],
        }
    }
    pub fn new_create_stream_res(transaction_id: f64) -> Self {
        RtmpMessage::Amf0Command {
            command_name: COMMAND_RESULT.to_string(),
            transaction_id,
            command_object: Amf0Value::Null,
            additional_arguments: vec![Amf0Value::Number(DEFAULT_SID)],
        }
    }
    pub fn new_release_stream_res(transaction_id: f64) -> Self {
        RtmpMessage::Amf0Command {
            command_name: COMMAND_RESULT.to_string(),
            transaction_id,
            command_object: Amf0Value::Null,
            additional_arguments: vec![Amf0Value::Undefined],
        }
    }
    pub fn new_fcpublish_res(transaction_id: f64) -> Self {
        RtmpMessage::Amf0Command {
            command_name: COMMAND_RESULT.to_string(),
            transaction_id,
            command_object: Amf0Value::Null,
            additional_arguments: vec![Amf0Value::Undefined],
        }
    }
    pub fn new_on_fcpublish() -> Self {
        RtmpMessage::Amf0Command {
            command_name: COMMAND_ON_FC_PUBLISH.to_string(),
            transaction_id: 0.0,
            command_object: Amf0Value::Null,
            additional_arguments: vec![fast_create_amf0_obj(vec![
                (
                    STATUS_CODE,
                    Amf0Value::Utf8String(STATUS_CODE_PUBLISH_START.to_string()),
                ),
                (
                    STATUS_DESCRIPTION,
                    Amf0Value::Utf8String("Started publishing stream.".to_string()),
                ),
            ])],
        }
    }
    pub fn new_on_fcunpublish() -> Self {
        RtmpMessage::Amf0Command {
            command_name: COMMAND_ON_FC_UNPUBLISH.to_string(),
            transaction_id: 0.0,
            command_object: Amf0Value::Null,
            additional_arguments: vec![fast_create_amf0_obj(vec![
                (
                    STATUS_CODE,
                    Amf0Value::Utf8String(STATUS_CODE_UNPUBLISH_SUCCESS.to_string()),
                ),
                (
                    STATUS_DESCRIPTION,
                    Amf0Value::Utf8String("Stopped publishing stream.".to_string()),
                ),
            ])],
        }
    }
    pub fn new_on_status_publish_start() -> Self {
        Self::new_on_status(vec![
            (
                STATUS_LEVEL,
                Amf0Value::Utf8String(STATUS_LEVEL_STATUS.to_string()),
            ),
            (
                STATUS_CODE,
                Amf0Value::Utf8String(STATUS_CODE_PUBLISH_START.to_string()),
            ),
            (
                STATUS_DESCRIPTION,
                Amf0Value::Utf8String("Started publishing stream.".to_string()),
            ),
            (
                STATUS_CLIENT_ID,
                Amf0Value::Utf8String(RTMP_SIG_CLIENT_ID.to_string()),
            ),
        ])
    }
    pub fn new_on_status_unpublish() -> Self {
        Self::new_on_status(vec![
            (
                STATUS_LEVEL,
                Amf0Value::Utf8String(STATUS_LEVEL_STATUS.to_string()),
            ),
            (
                STATUS_CODE,
                Amf0Value::Utf8String(STATUS_CODE_UNPUBLISH_SUCCESS.to_string()),
            ),
            (
                STATUS_DESCRIPTION,
                Amf0Value::Utf8String("Stopped publishing stream.".to_string()),
            ),
        ])
    }
    pub fn new_on_status_play_reset() -> Self {
        Self::new_on_status(vec![
            (
                STATUS_LEVEL,
                Amf0Value::Utf8String(STATUS_LEVEL_STATUS.to_string()),
            ),
            (
                STATUS_CODE,
                Amf0Value::Utf8String(STATUS_CODE_STREAM_RESET.to_string()),
            ),
            (
                STATUS_DESCRIPTION,
                Amf0Value::Utf8String("Playing and resetting stream.".to_string()),
            ),
            (STATUS_DETAILS, Amf0Value::Utf8String("stream".to_string())),
            (
                STATUS_CLIENT_ID,
                Amf0Value::Utf8String(RTMP_SIG_CLIENT_ID.to_string()),
            ),
        ])
    }
    pub fn new_on_status_play_start() -> Self {
        Self::new_on_status(vec![
            (
                STATUS_LEVEL,
                Amf0Value::Utf8String(STATUS_LEVEL_STATUS.to_string()),
            ),
            (
                STATUS_CODE,
                Amf0Value::Utf8String(STATUS_CODE_STREAM_START.to_string()),
            ),
            (
                STATUS_DESCRIPTION,
                Amf0Value::Utf8String("Started playing stream.".to_string()),
            ),
            (STATUS_DETAILS, Amf0Value::Utf8String("stream".to_string())),
            (
                STATUS_CLIENT_ID,
                Amf0Value::Utf8String(RTMP_SIG_CLIENT_ID.to_string()),
            ),
        ])
    }
    pub fn new_on_status_publish_notify() -> Self {
        Self::new_on_status(vec![
            (
                STATUS_LEVEL,
                Amf0Value::Utf8String(STATUS_LEVEL_STATUS.to_string()),
            ),
            (
                STATUS_CODE,
                Amf0Value::Utf8String(STATUS_CODE_PUBLISH_NOTIFY.to_string()),
            ),
            (
                STATUS_DESCRIPTION,
                Amf0Value::Utf8String("Started playing notify.".to_string()),
            ),
        ])
    }
    pub fn new_on_status_pause() -> Self {
        Self::new_on_status(vec![
            (
                STATUS_LEVEL,
                Amf0Value::Utf8String(STATUS_LEVEL_STATUS.to_string()),
            ),
            (
                STATUS_CODE,
                Amf0Value::Utf8String(STATUS_CODE_STREAM_PAUSE.to_string()),
            ),
            (
                STATUS_DESCRIPTION,
                Amf0Value::Utf8String("Paused stream.".to_string()),
            ),
        ])
    }
    pub fn new_on_status_unpause() -> Self {
        Self::new_on_status(vec![
            (
                STATUS_LEVEL,
                Amf0Value::Utf8String(STATUS_LEVEL_STATUS.to_string()),
            ),
            (
                STATUS_CODE,
                Amf0Value::Utf8String(STATUS_CODE_STREAM_UNPAUSE.to_string()),
            ),
            (
                STATUS_DESCRIPTION,
                Amf0Value::Utf8String("Unpaused stream.".to_string()),
            ),
        ])
    }
    fn new_on_status(status: Vec<(&str, Amf0Value)>) -> Self {
        RtmpMessage::Amf0Command {
            command_name: COMMAND_ON_STATUS.to_string(),
            transaction_id: 0.0,
            command_object: Amf0Value::Null,
            additional_arguments: vec![fast_create_amf0_obj(status)],
        }
    }
    pub fn new_on_status_data_start() -> Self {
        RtmpMessage::Amf0Data {
            stream_id: 0,
            timestamp: 0,
            payload: Bytes::new(),
            values: vec![
                Amf0Value::Utf8String(COMMAND_ON_STATUS.to_string()),
                fast_create_amf0_obj(vec![(
                    STATUS_CODE,
                    Amf0Value::Utf8String(STATUS_CODE_DATA_START.to_string()),
                )]),
            ],
        }
    }
    pub fn new_connect_app_res(object_encoding: f64) -> Self {
        RtmpMessage::Amf0Command {
            command_name: COMMAND_RESULT.to_string(),
            transaction_id: 1.0,
            command_object: fast_create_amf0_obj(vec![
                (
                    "fmsVer",
                    Amf0Value::Utf8String(RTMP_SIG_FMS_VER.to_string()),
                ),
                ("capabilities", Amf0Value::Number(RTMP_SIG_CAPABILITIES)),
            ]),
            additional_arguments: vec![fast_create_amf0_obj(vec![
                (
                    STATUS_LEVEL,
                    Amf0Value::Utf8String(STATUS_LEVEL_STATUS.to_string()),
                ),
                (
                    STATUS_CODE,
                    Amf0Value::Utf8String(STATUS_CODE_CONNECT_SUCCESS.to_string()),
                ),
                (
                    STATUS_DESCRIPTION,
                    Amf0Value::Utf8String("Connection succeeded.".to_string()),
                ),
                ("objectEncoding", Amf0Value::Number(object_encoding)),
            ])],
        }
    }

    pub fn expect_amf(&self, specified_cmds: &[&str]) -> bool {
        if let RtmpMessage::Amf0Command { command_name, .. } = self {
            if specified_cmds.is_empty() {
                return true;
            }
            return specified_cmds.iter().any(|cmd| command_name == cmd);
        }
        false
    }

    /// Whether this is an `@setDataFrame` data message carrying onMetaData.
    pub fn is_metadata(&self) -> bool {
        if let RtmpMessage::Amf0Data { values, .. } = self {
            if let Some(Amf0Value::Utf8String(cmd)) = values.first() {
                return cmd == DATA_SET_DATA_FRAME;
            }
        }
        false
    }
}

pub fn decode(payload: RtmpPayload) -> Result<RtmpMessage, MessageDecodeError> {
    match payload.message_type {
        msg_type::SET_CHUNK_SIZE => {
            trace!("Recv message <set_chunk_size>");
            let mut cursor = Cursor::new(payload.raw_data);
            let chunk_size = cursor.read_u32::<BigEndian>()?;

            Ok(RtmpMessage::SetChunkSize { chunk_size })
        }
        msg_type::ABORT => {
            trace!("Recv message <abort>");
            let mut cursor = Cursor::new(payload.raw_data);
            let chunk_stream_id = cursor.read_u32::<BigEndian>()?;

            Ok(RtmpMessage::Abort { chunk_stream_id })
        }
        msg_type::ACK => {
            trace!("Recv message <ack>");
            let mut cursor = Cursor::new(payload.raw_data);
            let sequence_number = cursor.read_u32::<BigEndian>()?;

            Ok(RtmpMessage::Acknowledgement { sequence_number })
        }
        msg_type::USER_CONTROL => {
            trace!("Recv message <user_control>");
            let mut cursor = Cursor::new(payload.raw_data);
            let mut extra_data: u32 = 0;
            let event_type = cursor.read_u16::<BigEndian>()?;
            let event_data = cursor.read_u32::<BigEndian>()?;
            if event_type == user_ctrl_ev_type::SET_BUFFER_LENGTH {
                extra_data = cursor.read_u32::<BigEndian>()?;
            }

            Ok(RtmpMessage::UserControl {
                event_type,
                event_data,
                extra_data,
            })
        }
        msg_type::WIN_ACK_SIZE => {
            trace!("Recv message <win_ack_size>");
            let mut cursor = Cursor::new(payload.raw_data);
            let ack_window_size = cursor.read_u32::<BigEndian>()?;

            Ok(RtmpMessage::SetWindowAckSize { ack_window_size })
        }
        msg_type::SET_PEER_BW => {
            trace!("Recv message <set_peer_bw>");
            let mut cursor = Cursor::new(payload.raw_data);
            let size = cursor.read_u32::<BigEndian>()?;
            let limit_type = cursor.read_u8()?;

            Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
        }
        msg_type::AUDIO => {
            trace!("Recv message <audio>");
            Ok(RtmpMessage::AudioData {
                stream_id: payload.stream_id,
                timestamp: payload.timestamp,
                payload: payload.raw_data,
            })
        }
        msg_type::VIDEO => {
            trace!("Recv message <video>");
            Ok(RtmpMessage::VideoData {
                stream_id: payload.stream_id,
                timestamp: payload.timestamp,
                payload: payload.raw_data,
            })
        }
        msg_type::AMF3_DATA | msg_type::AMF0_DATA => {
            trace!("Recv message <amf_data>");
            let raw = if payload.message_type == msg_type::AMF3_DATA && payload.raw_data.len() > 1 {
                payload.raw_data.slice(1..)
            } else {
                payload.raw_data
            };
            let mut cursor = Cursor::new(&raw[..]);
            let values = rml_amf0::deserialize(&mut cursor)?;

            Ok(RtmpMessage::Amf0Data {
                stream_id: payload.stream_id,
                timestamp: payload.timestamp,
                payload: raw,
                values,
            })
        }
        msg_type::AMF3_CMD | msg_type::AMF0_CMD => {
            trace!("Recv message <amf_cmd>");
            let amf3 = payload.message_type == msg_type::AMF3_CMD;
            let mut cursor = Cursor::new(payload.raw_data);
            if amf3 && cursor.remaining() > 1 {
                cursor.advance(1);
            }
            let mut arguments = rml_amf0::deserialize(&mut cursor)?;
            if arguments.len() < 3 {
                return Err(MessageDecodeError::InvalidFormat("command".to_string()));
            }

            let command_name: String;
            let transaction_id: f64;
            let command_object: Amf0Value;
            {
                let mut arg_iterator = arguments.drain(..3);

                command_name = match arg_iterator
                    .next()
                    .ok_or_else(|| MessageDecodeError::InvalidFormat("command".to_string()))?
                {
                    Amf0Value::Utf8String(value) => value,
                    _ => return Err(MessageDecodeError::InvalidFormat("command".to_string())),
                };

                transaction_id = match arg_iterator.next().ok_or_else(|| {
                    MessageDecodeError::InvalidFormat("transaction_id".to_string())
                })? {
                    Amf0Value::Number(value) => value,
                    _ => {
                        return Err(MessageDecodeError::InvalidFormat(
                            "transaction_id".to_string(),
                        ))
                    }
                };

                command_object = arg_iterator
                    .next()
                    .ok_or_else(|| MessageDecodeError::InvalidFormat("command_obj".to_string()))?;
            }

            Ok(RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                command_object,
                additional_arguments: arguments,
            })
        }
        other => {
            trace!("Recv message <unknown {}>", other);
            Ok(RtmpMessage::Unknown {
                type_id: payload.message_type,
                data: payload.raw_data,
            })
        }
    }
}

pub fn encode(
    msg: RtmpMessage,
    timestamp: u32,
    stream_id: u32,
) -> Result<RtmpPayload, MessageEncodeError> {
    match msg {
        RtmpMessage::Amf0Command {
            command_name,
            transaction_id,
            command_object,
            mut additional_arguments,
        } => {
            let cmd = match command_name.is_empty() {
                true => Amf0Value::Null,
                false => Amf0Value::Utf8String(command_name),
            };
            let mut values = vec![cmd, Amf0Value::Number(transaction_id), command_object];
            values.append(&mut additional_arguments);

            let bytes = rml_amf0::serialize(&values)?;
            Ok(RtmpPayload {
                message_type: msg_type::AMF0_CMD,
                stream_id,
                timestamp,
                raw_data: Bytes::from(bytes),
            })
        }
        RtmpMessage::Amf0Data {
            payload, values, ..
        } => {
            let raw_data = if payload.is_empty() {
                Bytes::from(rml_amf0::serialize(&values)?)
            } else {
                payload
            };
            Ok(RtmpPayload {
                message_type: msg_type::AMF0_DATA,
                stream_id,
                timestamp,
                raw_data,
            })
        }
        RtmpMessage::UserControl {
            event_type,
            event_data,
            extra_data,
        } => {
            let mut cursor = Cursor::new(Vec::new());
            cursor.write_u16::<BigEndian>(event_type)?;
            cursor.write_u32::<BigEndian>(event_data)?;
            if event_type == user_ctrl_ev_type::SET_BUFFER_LENGTH {
                cursor.write_u32::<BigEndian>(extra_data)?;
            }
            Ok(RtmpPayload {
                message_type: msg_type::USER_CONTROL,
                stream_id,
                timestamp,
                raw_data: Bytes::from(cursor.into_inner()),
            })
        }
        RtmpMessage::SetWindowAckSize { ack_window_size } => Ok(RtmpPayload {
            message_type: msg_type::WIN_ACK_SIZE,
            stream_id,
            timestamp,
            raw_data: fast_u32_encode(ack_window_size)?,
        }),
        RtmpMessage::Acknowledgement { sequence_number } => Ok(RtmpPayload {
            message_type: msg_type::ACK,
            stream_id,
            timestamp,
            raw_data: fast_u32_encode(sequence_number)?,
        }),
        RtmpMessage::SetChunkSize { chunk_size } => Ok(RtmpPayload {
            message_type: msg_type::SET_CHUNK_SIZE,
            stream_id,
            timestamp,
            raw_data: fast_u32_encode(chunk_size)?,
        }),
        RtmpMessage::AudioData {
            stream_id,
            timestamp,
            payload,
        } => Ok(RtmpPayload {
            message_type: msg_type::AUDIO,
            stream_id,
            timestamp,
            raw_data: payload,
        }),
        RtmpMessage::VideoData {
            stream_id,
            timestamp,
            payload,
        } => Ok(RtmpPayload {
            message_type: msg_type::VIDEO,
            stream_id,
            timestamp,
            raw_data: payload,
        }),
        RtmpMessage::Abort { chunk_stream_id } => Ok(RtmpPayload {
            message_type: msg_type::ABORT,
            stream_id,
            timestamp,
            raw_data: fast_u32_encode(chunk_stream_id)?,
        }),
        RtmpMessage::SetPeerBandwidth { size, limit_type } => {
            let mut cursor = Cursor::new(Vec::new());
            cursor.write_u32::<BigEndian>(size)?;
            cursor.write_u8(limit_type)?;
            Ok(RtmpPayload {
                message_type: msg_type::SET_PEER_BW,
                stream_id,
                timestamp,
                raw_data: Bytes::from(cursor.into_inner()),
            })
        }
        RtmpMessage::Unknown { type_id, data } => Ok(RtmpPayload {
            message_type: type_id,
            stream_id,
            timestamp,
            raw_data: data,
        }),
    }
}

pub enum MetadataReform {
    Del,
    Add,
}

/// Rewrites an AMF0 metadata payload's leading `@setDataFrame` tag.
pub fn metadata_reform(
    data: &Bytes,
    mode: MetadataReform,
) -> Result<Bytes, MetadataReformError> {
    let mut cursor = Cursor::new(&data[..]);
    let mut values = rml_amf0::deserialize(&mut cursor)?;

    let has_tag = matches!(
        values.first(),
        Some(Amf0Value::Utf8String(cmd)) if cmd == DATA_SET_DATA_FRAME
    );
    match mode {
        MetadataReform::Del => {
            if has_tag {
                values.remove(0);
            }
        }
        MetadataReform::Add => {
            if !has_tag {
                values.insert(
                    0,
                    Amf0Value::Utf8String(DATA_SET_DATA_FRAME.to_string()),
                );
            }
        }
    }

    Ok(Bytes::from(rml_amf0::serialize(&values)?))
}

fn fast_u32_encode(value: u32) -> Result<Bytes, MessageEncodeError> {
    let mut cursor = Cursor::new(Vec::new());
    cursor.write_u32::<BigEndian>(value)?;

    Ok(Bytes::from(cursor.into_inner()))
}

fn fast_create_amf0_obj(values: Vec<(&str, Amf0Value)>) -> Amf0Value {
    let mut map = HashMap::new();
    for (k, v) in values {
        if map.insert(k.to_string(), v).is_some() {
            warn!("Duplicate amf0 object field {}", k);
        }
    }
    Amf0Value::Object(map)
}
