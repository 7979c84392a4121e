use rml_amf0::Amf0Value;
use rtmpd_core::transport::Transport;
use std::time::Duration;
use tracing::{info, trace, warn};

use crate::{
    chunk::ChunkCodec,
    handshake,
    message::{
        request::Request,
        types::{
            amf0_command_type::*, peer_bw_limit_type, rtmp_sig::*, user_ctrl_ev_type::*,
            DEFAULT_SID,
        },
        RtmpMessage,
    },
};

use super::{context::Context, error::ConnectionError, RtmpConnType, RtmpCtrlAction};

/// Server side of one RTMP connection: drives the handshake, identifies the
/// client with the connect/createStream/publish/play command flow, and then
/// exposes the message plumbing the streaming cycles run on.
pub struct Server {
    ctx: Context,
    conn_type: RtmpConnType,
    local_chunk_size: u32,
}

impl Server {
    pub async fn new(
        mut io: Transport,
        handshake_timeout: Duration,
        local_chunk_size: u32,
    ) -> Result<Self, ConnectionError> {
        let mut hs = handshake::Server::new();
        hs.handshake(&mut io, handshake_timeout).await?;
        Ok(Self {
            ctx: Context::new(ChunkCodec::new(io)),
            conn_type: RtmpConnType::Unknow,
            local_chunk_size,
        })
    }

    pub fn conn_type(&self) -> RtmpConnType {
        self.conn_type.clone()
    }

    pub fn get_recv_bytes(&self) -> u64 {
        self.ctx.get_recv_bytes()
    }

    pub fn get_send_bytes(&self) -> u64 {
        self.ctx.get_send_bytes()
    }

    pub fn get_audio_count(&self) -> u64 {
        self.ctx.get_in_audio_count() + self.ctx.get_out_audio_count()
    }

    pub fn get_video_count(&self) -> u64 {
        self.ctx.get_in_video_count() + self.ctx.get_out_video_count()
    }

    /// Cancel-safe readiness probe; pair with `recv_message` in select loops.
    pub async fn readable(&mut self) -> Result<(), ConnectionError> {
        self.ctx.readable().await
    }

    pub async fn recv_message(&mut self) -> Result<RtmpMessage, ConnectionError> {
        self.ctx.recv_message().await
    }

    pub async fn send_message(
        &mut self,
        msg: RtmpMessage,
        timestamp: u32,
        stream_id: u32,
    ) -> Result<(), ConnectionError> {
        self.ctx.send_message(msg, timestamp, stream_id).await
    }

    pub async fn send_messages(
        &mut self,
        msgs: &[RtmpMessage],
        timestamp: u32,
        stream_id: u32,
    ) -> Result<(), ConnectionError> {
        self.ctx.send_messages(msgs, timestamp, stream_id).await
    }

    pub async fn queue_message(
        &mut self,
        msg: RtmpMessage,
        timestamp: u32,
        stream_id: u32,
    ) -> Result<usize, ConnectionError> {
        self.ctx.queue_message(msg, timestamp, stream_id).await
    }

    pub async fn flush(&mut self) -> Result<usize, ConnectionError> {
        self.ctx.flush().await
    }

    /// Walks the client through connect and the publish/play command flow
    /// until its role is known.
    pub async fn identify_client(&mut self) -> Result<Request, ConnectionError> {
        let mut req = self.connect_app().await?;
        loop {
            if let RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                additional_arguments,
                ..
            } = self.ctx.expect_amf_command(&[]).await?
            {
                match command_name.as_str() {
                    COMMAND_PLAY => {
                        self.process_play(&mut req, additional_arguments)?;
                    }
                    COMMAND_CREATE_STREAM => {
                        self.process_create_stream(&mut req, transaction_id).await?;
                    }
                    COMMAND_RELEASE_STREAM => {
                        self.process_fmle_publish(&mut req, transaction_id, additional_arguments)
                            .await?
                    }
                    _ => {
                        // Response null first for the other call msg
                        self.send_message(RtmpMessage::new_null(transaction_id), 0, 0)
                            .await?;
                        continue;
                    }
                };
                self.conn_type = req.conn_type.clone();
                info!(
                    "Identify {:?} app={} stream={:?} param={:?}",
                    req.conn_type,
                    req.app,
                    req.stream,
                    req.tc_url.query()
                );
                return Ok(req);
            }
            return Err(ConnectionError::UnexpectedMessage);
        }
    }

    async fn connect_app(&mut self) -> Result<Request, ConnectionError> {
        if let RtmpMessage::Amf0Command {
            transaction_id,
            command_object,
            ..
        } = self.ctx.expect_amf_command(&[COMMAND_CONNECT]).await?
        {
            if transaction_id != 1.0 {
                warn!("Invalid transaction_id={} of connect_app", transaction_id);
            }

            let mut properties = match command_object {
                Amf0Value::Object(properties) => properties,
                _ => return Err(ConnectionError::InvalidConnectApp),
            };
            let tc_url = match properties.remove("tcUrl") {
                Some(Amf0Value::Utf8String(tc_url)) => tc_url,
                _ => return Err(ConnectionError::InvalidConnectApp),
            };
            let app = match properties.remove("app") {
                Some(Amf0Value::Utf8String(app)) if !app.is_empty() => app,
                _ => return Err(ConnectionError::InvalidConnectApp),
            };
            if let Some(Amf0Value::Utf8String(flash_ver)) = properties.remove("flashVer") {
                trace!("Client flashVer={}", flash_ver);
            }

            let object_encoding = match properties.remove("objectEncoding") {
                Some(Amf0Value::Number(number)) => number,
                _ => RTMP_SIG_AMF0_VER,
            };

            let mut request = Request::parse_from(tc_url)?;
            request.app = app.trim_matches('/').to_string();
            request.object_encoding = object_encoding;

            // Set in_win_ack, default = 0
            self.ctx.set_in_window_ack_size(0);

            // The whole connect reply goes out as one gathered write; the
            // chunk codec verifies the flushed byte count.
            let msgs = [
                RtmpMessage::SetWindowAckSize {
                    ack_window_size: 2500000,
                },
                RtmpMessage::SetPeerBandwidth {
                    size: 2500000,
                    limit_type: peer_bw_limit_type::DYNAMIC,
                },
                RtmpMessage::SetChunkSize {
                    chunk_size: self.local_chunk_size,
                },
                RtmpMessage::new_connect_app_res(object_encoding),
            ];
            self.ctx.send_messages(&msgs, 0, 0).await?;

            return Ok(request);
        }
        Err(ConnectionError::UnexpectedMessage)
    }

    async fn process_create_stream(
        &mut self,
        req: &mut Request,
        transaction_id: f64,
    ) -> Result<(), ConnectionError> {
        let mut res_transaction_id = transaction_id;
        for _ in 0..3 {
            // Response CreateStream
            self.send_message(RtmpMessage::new_create_stream_res(res_transaction_id), 0, 0)
                .await?;

            if let RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                additional_arguments,
                ..
            } = self
                .ctx
                .expect_amf_command(&[
                    COMMAND_PLAY,
                    COMMAND_PUBLISH,
                    COMMAND_CREATE_STREAM,
                    COMMAND_FC_PUBLISH,
                ])
                .await?
            {
                return match command_name.as_str() {
                    COMMAND_PLAY => self.process_play(req, additional_arguments),
                    COMMAND_PUBLISH => self.process_flash_publish(req, additional_arguments),
                    COMMAND_FC_PUBLISH => {
                        self.process_haivision_publish(req, transaction_id, additional_arguments)
                            .await
                    }
                    COMMAND_CREATE_STREAM => {
                        res_transaction_id = transaction_id;
                        continue;
                    }
                    _ => Err(ConnectionError::UnexpectedMessage),
                };
            }
            return Err(ConnectionError::UnexpectedMessage);
        }
        Err(ConnectionError::CreateStreamDepth)
    }

    async fn process_fmle_publish(
        &mut self,
        req: &mut Request,
        transaction_id: f64,
        additional_arguments: Vec<Amf0Value>,
    ) -> Result<(), ConnectionError> {
        req.conn_type = RtmpConnType::FmlePublish;
        match additional_arguments.first() {
            Some(Amf0Value::Utf8String(stream)) => req.stream = Some(stream.clone()),
            _ => return Err(ConnectionError::ReleaseStreamWithoutStream),
        }
        // Response releaseStream
        self.send_message(RtmpMessage::new_release_stream_res(transaction_id), 0, 0)
            .await?;
        Ok(())
    }

    fn process_flash_publish(
        &mut self,
        req: &mut Request,
        additional_arguments: Vec<Amf0Value>,
    ) -> Result<(), ConnectionError> {
        req.conn_type = RtmpConnType::FlashPublish;
        match additional_arguments.first() {
            Some(Amf0Value::Utf8String(stream)) => req.stream = Some(stream.clone()),
            _ => return Err(ConnectionError::InvalidPublish),
        }
        Ok(())
    }

    async fn process_haivision_publish(
        &mut self,
        req: &mut Request,
        transaction_id: f64,
        additional_arguments: Vec<Amf0Value>,
    ) -> Result<(), ConnectionError> {
        req.conn_type = RtmpConnType::HaivisionPublish;
        match additional_arguments.first() {
            Some(Amf0Value::Utf8String(stream)) => req.stream = Some(stream.clone()),
            _ => return Err(ConnectionError::InvalidPublish),
        }
        // Response FCPublish
        self.send_message(RtmpMessage::new_fcpublish_res(transaction_id), 0, 0)
            .await?;
        Ok(())
    }

    fn process_play(
        &mut self,
        req: &mut Request,
        additional_arguments: Vec<Amf0Value>,
    ) -> Result<(), ConnectionError> {
        req.conn_type = RtmpConnType::Play;
        match additional_arguments.first() {
            Some(Amf0Value::Utf8String(stream)) => req.stream = Some(stream.clone()),
            _ => return Err(ConnectionError::InvalidPlay),
        }
        if additional_arguments.len() >= 3 {
            match &additional_arguments[2] {
                Amf0Value::Number(n) => req.duration = *n as u32,
                _ => return Err(ConnectionError::InvalidPlay),
            }
        }
        Ok(())
    }

    /// The whole play preamble goes out in one flush: stream state events,
    /// then the onStatus ladder ending in PublishNotify.
    pub async fn start_play(&mut self) -> Result<(), ConnectionError> {
        let msgs = [
            RtmpMessage::UserControl {
                event_type: STREAM_IS_RECORDED,
                event_data: DEFAULT_SID as u32,
                extra_data: 0,
            },
            RtmpMessage::UserControl {
                event_type: STREAM_BEGIN,
                event_data: DEFAULT_SID as u32,
                extra_data: 0,
            },
            RtmpMessage::new_on_status_play_reset(),
            RtmpMessage::new_on_status_play_start(),
            RtmpMessage::new_on_status_data_start(),
            RtmpMessage::new_on_status_publish_notify(),
        ];
        self.ctx.send_messages(&msgs, 0, 0).await?;
        Ok(())
    }

    pub async fn start_fmle_publish(&mut self) -> Result<(), ConnectionError> {
        // FCPublish
        if let RtmpMessage::Amf0Command { transaction_id, .. } =
            self.ctx.expect_amf_command(&[COMMAND_FC_PUBLISH]).await?
        {
            self.send_message(RtmpMessage::new_fcpublish_res(transaction_id), 0, 0)
                .await?;
        } else {
            return Err(ConnectionError::UnexpectedMessage);
        }

        // createStream
        if let RtmpMessage::Amf0Command { transaction_id, .. } = self
            .ctx
            .expect_amf_command(&[COMMAND_CREATE_STREAM])
            .await?
        {
            self.send_message(RtmpMessage::new_create_stream_res(transaction_id), 0, 0)
                .await?;
        } else {
            return Err(ConnectionError::UnexpectedMessage);
        }

        // publish
        if let RtmpMessage::Amf0Command { .. } =
            self.ctx.expect_amf_command(&[COMMAND_PUBLISH]).await?
        {
            self.send_message(RtmpMessage::new_on_fcpublish(), 0, 0)
                .await?;
            self.send_message(RtmpMessage::new_on_status_publish_start(), 0, 0)
                .await?;
        } else {
            return Err(ConnectionError::UnexpectedMessage);
        }
        Ok(())
    }

    pub async fn start_haivision_publish(&mut self) -> Result<(), ConnectionError> {
        if let RtmpMessage::Amf0Command { .. } =
            self.ctx.expect_amf_command(&[COMMAND_PUBLISH]).await?
        {
            self.send_message(RtmpMessage::new_on_fcpublish(), 0, 0)
                .await?;
            self.send_message(RtmpMessage::new_on_status_publish_start(), 0, 0)
                .await?;
        } else {
            return Err(ConnectionError::UnexpectedMessage);
        }
        Ok(())
    }

    pub async fn start_flash_publish(&mut self) -> Result<(), ConnectionError> {
        self.send_message(RtmpMessage::new_on_status_publish_start(), 0, 0)
            .await?;
        Ok(())
    }

    /// Post-start AMF commands: pause/close from players, unpublish from
    /// publishers. Anything else gets a null response when it carries a
    /// transaction id.
    pub async fn process_amf_command(
        &mut self,
        msg: RtmpMessage,
    ) -> Result<Option<RtmpCtrlAction>, ConnectionError> {
        let (command_name, transaction_id, additional_arguments) = match msg {
            RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                additional_arguments,
                ..
            } => (command_name, transaction_id, additional_arguments),
            _ => return Ok(None),
        };
        match self.conn_type {
            RtmpConnType::Play => match command_name.as_str() {
                COMMAND_CLOSE_STREAM | COMMAND_DELETE_STREAM => Ok(Some(RtmpCtrlAction::Close)),
                COMMAND_PAUSE => {
                    let pause = match additional_arguments.first() {
                        Some(Amf0Value::Boolean(pause)) => *pause,
                        _ => return Ok(None),
                    };
                    if pause {
                        self.send_message(RtmpMessage::new_on_status_pause(), 0, 0)
                            .await?;
                        self.send_message(
                            RtmpMessage::UserControl {
                                event_type: STREAM_EOF,
                                event_data: DEFAULT_SID as u32,
                                extra_data: 0,
                            },
                            0,
                            0,
                        )
                        .await?;
                    } else {
                        self.send_message(RtmpMessage::new_on_status_unpause(), 0, 0)
                            .await?;
                        self.send_message(
                            RtmpMessage::UserControl {
                                event_type: STREAM_BEGIN,
                                event_data: DEFAULT_SID as u32,
                                extra_data: 0,
                            },
                            0,
                            0,
                        )
                        .await?;
                    }
                    Ok(Some(RtmpCtrlAction::Pause(pause)))
                }
                _ => {
                    if transaction_id as u32 > 0 {
                        self.send_message(RtmpMessage::new_null(transaction_id), 0, 0)
                            .await?;
                    }
                    Ok(None)
                }
            },
            RtmpConnType::FmlePublish | RtmpConnType::HaivisionPublish => {
                if command_name == COMMAND_UNPUBLISH || command_name == COMMAND_DELETE_STREAM {
                    self.send_message(RtmpMessage::new_on_fcunpublish(), 0, 0)
                        .await?;
                    self.send_message(RtmpMessage::new_fcpublish_res(transaction_id), 0, 0)
                        .await?;
                    self.send_message(RtmpMessage::new_on_status_unpublish(), 0, 0)
                        .await?;
                    return Ok(Some(RtmpCtrlAction::Republish));
                }
                Ok(None)
            }
            // for flash, any command after start is a republish
            RtmpConnType::FlashPublish => Ok(Some(RtmpCtrlAction::Republish)),
            _ => Ok(None),
        }
    }
}
