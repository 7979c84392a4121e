use rtmp::connection::{server as rtmp_conn, RtmpConnType, RtmpCtrlAction};
use rtmp::message::{request::Request, RtmpMessage};
use rtmpd_core::{transport::Transport, utils};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    packet::Packet,
    player::Player,
    stream::{
        session::SessionEvent, ConnToMgrChanTx, RegisterEv, RoleType, StreamEvent, Token,
        UnregisterEv,
    },
    CONN_PRINT_INTVAL, MERGE_WRITE_WAIT,
};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub handshake_timeout: Duration,
    pub play_or_publish_timeout: Duration,
    pub local_chunk_size: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(3),
            play_or_publish_timeout: Duration::from_secs(3),
            local_chunk_size: 60000,
        }
    }
}

/// One task per accepted TCP connection: handshake and identification up
/// front, then either the publish cycle (demux and forward to the session)
/// or the play cycle (drain the packet queue with merged writes).
pub struct RtmpService {
    uid: String,
    rtmp: rtmp_conn::Server,
    mgr_tx: ConnToMgrChanTx,
    play_or_publish_timeout: Duration,
}

impl RtmpService {
    pub async fn new(
        io: Transport,
        uid: Option<String>,
        mgr_tx: ConnToMgrChanTx,
        config: ServiceConfig,
    ) -> Result<Self, ServiceError> {
        let rtmp =
            rtmp_conn::Server::new(io, config.handshake_timeout, config.local_chunk_size).await?;
        let uid = uid.unwrap_or_else(utils::gen_uid);
        Ok(Self {
            uid,
            rtmp,
            mgr_tx,
            play_or_publish_timeout: config.play_or_publish_timeout,
        })
    }

    pub async fn run(&mut self) -> Result<(), ServiceError> {
        // the client must reach publish/play before the acquisition deadline
        let req = match timeout(
            self.play_or_publish_timeout,
            self.rtmp.identify_client(),
        )
        .await
        {
            Ok(req) => req?,
            Err(_) => return Err(ServiceError::IdentifyTimeout),
        };

        match req.conn_type {
            RtmpConnType::Play => {
                info!("Start play...");
                self.rtmp.start_play().await?;
                self.play_cycle(&req).await
            }
            RtmpConnType::FmlePublish => {
                info!("Start fmle publish...");
                self.rtmp.start_fmle_publish().await?;
                self.publish_cycle(&req).await
            }
            RtmpConnType::FlashPublish => {
                info!("Start flash publish...");
                self.rtmp.start_flash_publish().await?;
                self.publish_cycle(&req).await
            }
            RtmpConnType::HaivisionPublish => {
                info!("Start haivision publish...");
                self.rtmp.start_haivision_publish().await?;
                self.publish_cycle(&req).await
            }
            RtmpConnType::Unknow => Err(ServiceError::ConnectionError(
                rtmp::connection::error::ConnectionError::UnexpectedMessage,
            )),
        }
    }

    async fn register(
        &self,
        role: RoleType,
        stream_key: &str,
        session_id: Option<String>,
    ) -> Result<Token, ServiceError> {
        let (reg_tx, reg_rx) = oneshot::channel();
        let msg = StreamEvent::Register(RegisterEv {
            uid: self.uid.clone(),
            role,
            stream_key: stream_key.to_string(),
            session_id,
            ret: reg_tx,
        });
        if self.mgr_tx.send(msg).is_err() {
            return Err(ServiceError::RegisterFailed(
                "send register event failed".to_string(),
            ));
        }

        match reg_rx.await {
            Ok(Token::Failure(e)) => Err(ServiceError::RegisterFailed(e.to_string())),
            Ok(token) => Ok(token),
            Err(_) => Err(ServiceError::RegisterFailed(
                "recv register ret failed".to_string(),
            )),
        }
    }

    fn unregister(&self, role: RoleType, stream_key: &str) {
        let msg = StreamEvent::Unregister(UnregisterEv {
            uid: self.uid.clone(),
            role,
            stream_key: stream_key.to_string(),
        });
        if let Err(e) = self.mgr_tx.send(msg) {
            warn!("send unregister event failed: {}", e);
        }
    }

    async fn publish_cycle(&mut self, req: &Request) -> Result<(), ServiceError> {
        let stream_key = req.stream_key();
        let session_id = utils::gen_uid();
        let session_tx = match self
            .register(RoleType::Publisher, &stream_key, Some(session_id))
            .await?
        {
            Token::PublisherToken(tx) => tx,
            _ => return Err(ServiceError::InvalidToken),
        };

        let ret = self.publishing(&session_tx).await;
        // soft delete: the session holds its players through the grace window
        self.unregister(RoleType::Publisher, &stream_key);
        ret
    }

    async fn publishing(
        &mut self,
        session_tx: &tokio::sync::mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(), ServiceError> {
        let mut last_report = Instant::now();
        loop {
            let msg = self.rtmp.recv_message().await?;
            match msg {
                RtmpMessage::AudioData {
                    stream_id,
                    timestamp,
                    payload,
                } => {
                    let pkt = Packet::demux_audio(stream_id, timestamp, payload)?;
                    session_tx.send(SessionEvent::Frame(pkt))?;
                }
                RtmpMessage::VideoData {
                    stream_id,
                    timestamp,
                    payload,
                } => {
                    let pkt = Packet::demux_video(stream_id, timestamp, payload)?;
                    session_tx.send(SessionEvent::Frame(pkt))?;
                }
                data_msg @ RtmpMessage::Amf0Data { .. } => {
                    if !data_msg.is_metadata() {
                        debug!("Publisher ignore data message {}", data_msg);
                    } else if let RtmpMessage::Amf0Data {
                        stream_id,
                        timestamp,
                        payload,
                        ..
                    } = data_msg
                    {
                        let pkt = Packet::metadata(stream_id, timestamp, payload);
                        session_tx.send(SessionEvent::Metadata(pkt))?;
                    }
                }
                other => {
                    if let Some(RtmpCtrlAction::Republish) =
                        self.rtmp.process_amf_command(other).await?
                    {
                        info!("Publisher unpublished, stop publish cycle");
                        return Ok(());
                    }
                }
            }

            if last_report.elapsed() >= CONN_PRINT_INTVAL {
                debug!(
                    "Publish recv_bytes={} audio={} video={}",
                    self.rtmp.get_recv_bytes(),
                    self.rtmp.get_audio_count(),
                    self.rtmp.get_video_count()
                );
                last_report = Instant::now();
            }
        }
    }

    async fn play_cycle(&mut self, req: &Request) -> Result<(), ServiceError> {
        let stream_key = req.stream_key();
        let queue = match self.register(RoleType::Subscriber, &stream_key, None).await? {
            Token::SubscriberToken(rx) => rx,
            _ => return Err(ServiceError::InvalidToken),
        };

        let mut player = Player::new(queue);
        let ret = self.playing(&mut player).await;
        self.unregister(RoleType::Subscriber, &stream_key);
        ret
    }

    async fn playing(&mut self, player: &mut Player) -> Result<(), ServiceError> {
        let mut flush_tick = interval(MERGE_WRITE_WAIT);
        let mut stat_report = interval(CONN_PRINT_INTVAL);
        loop {
            tokio::select! {
                pkt = player.recv() => {
                    match pkt {
                        Some(pkt) => {
                            if !player.is_paused() {
                                player.send_packet(&mut self.rtmp, pkt).await?;
                            }
                            if player.should_flush() {
                                player.flush(&mut self.rtmp).await?;
                            }
                        }
                        // queue closed: publisher gone and session finalized
                        None => return Err(ServiceError::PublishDone),
                    }
                }
                readable = self.rtmp.readable() => {
                    readable?;
                    // bytes are pending so this completes without stalling
                    // the queue for long
                    let msg = self.rtmp.recv_message().await?;
                    match msg {
                        RtmpMessage::AudioData { .. } | RtmpMessage::VideoData { .. } => {
                            // a playing client must not stream media
                            return Err(ServiceError::ConnectionError(
                                rtmp::connection::error::ConnectionError::UnexpectedMessage,
                            ));
                        }
                        msg => match self.rtmp.process_amf_command(msg).await? {
                            Some(RtmpCtrlAction::Close) => {
                                info!("Player closed the stream");
                                return Ok(());
                            }
                            Some(RtmpCtrlAction::Pause(pause)) => player.set_paused(pause),
                            _ => {}
                        }
                    }
                }
                _ = flush_tick.tick() => {
                    if player.should_flush() {
                        player.flush(&mut self.rtmp).await?;
                    }
                }
                _ = stat_report.tick() => {
                    debug!(
                        "Play send_bytes={} audio={} video={}",
                        self.rtmp.get_send_bytes(),
                        self.rtmp.get_audio_count(),
                        self.rtmp.get_video_count()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Broker;
    use bytes::Bytes;
    use rml_amf0::Amf0Value;
    use rtmp::chunk::ChunkCodec;
    use rtmp::message::types::{amf0_command_type::*, msg_type};
    use rtmp::message::{encode, RtmpPayload};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tracing::error;

    const HS_SIZE: usize = 1536;

    async fn start_server(config: ServiceConfig) -> SocketAddr {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut broker = Broker::new(tx.clone(), rx);
        tokio::spawn(async move {
            let _ = broker.run().await;
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((inbound, _)) = listener.accept().await {
                let tx = tx.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let service =
                        RtmpService::new(Transport::new(inbound), None, tx, config).await;
                    match service {
                        Ok(mut service) => {
                            if let Err(e) = service.run().await {
                                if !e.is_normal_eof() {
                                    error!("service error: {}", e);
                                }
                            }
                        }
                        Err(e) => error!("service setup error: {}", e),
                    }
                });
            }
        });
        addr
    }

    struct TestClient {
        codec: ChunkCodec,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut io = Transport::new(stream);

            // plain handshake
            let mut c0c1 = vec![3u8];
            c0c1.extend_from_slice(&[0u8; HS_SIZE]);
            io.write_all(&c0c1).await.unwrap();
            io.flush().await.unwrap();
            io.read_exact(1 + HS_SIZE * 2).await.unwrap();
            io.write_all(&[0u8; HS_SIZE]).await.unwrap();
            io.flush().await.unwrap();

            Self {
                codec: ChunkCodec::new(io),
            }
        }

        async fn send_command(
            &mut self,
            name: &str,
            transaction_id: f64,
            command_object: Amf0Value,
            args: Vec<Amf0Value>,
        ) {
            let msg = RtmpMessage::Amf0Command {
                command_name: name.to_string(),
                transaction_id,
                command_object,
                additional_arguments: args,
            };
            let payload = encode(msg, 0, 0).unwrap();
            self.codec.send_rtmp_message(payload).await.unwrap();
        }

        async fn send_media(&mut self, message_type: u8, timestamp: u32, data: &'static [u8]) {
            let payload = RtmpPayload {
                message_type,
                stream_id: 1,
                timestamp,
                raw_data: Bytes::from_static(data),
            };
            self.codec.send_rtmp_message(payload).await.unwrap();
        }

        /// Receives one message, tracking the server's SetChunkSize.
        async fn recv(&mut self) -> RtmpMessage {
            let msg = timeout(Duration::from_secs(5), self.codec.recv_rtmp_message())
                .await
                .expect("timed out waiting for message")
                .unwrap();
            if let RtmpMessage::SetChunkSize { chunk_size } = &msg {
                self.codec.set_in_chunk_size(*chunk_size as usize);
            }
            msg
        }

        async fn recv_command(&mut self) -> (String, Vec<Amf0Value>) {
            loop {
                if let RtmpMessage::Amf0Command {
                    command_name,
                    additional_arguments,
                    ..
                } = self.recv().await
                {
                    return (command_name, additional_arguments);
                }
            }
        }

        fn connect_object(app: &str, tc_url: &str) -> Amf0Value {
            let mut props = HashMap::new();
            props.insert(
                "app".to_string(),
                Amf0Value::Utf8String(app.to_string()),
            );
            props.insert(
                "tcUrl".to_string(),
                Amf0Value::Utf8String(tc_url.to_string()),
            );
            Amf0Value::Object(props)
        }
    }

    fn status_code(args: &[Amf0Value]) -> String {
        for arg in args {
            if let Amf0Value::Object(props) = arg {
                if let Some(Amf0Value::Utf8String(code)) = props.get("code") {
                    return code.clone();
                }
            }
        }
        String::new()
    }

    async fn do_connect(client: &mut TestClient, app: &str) {
        client
            .send_command(
                COMMAND_CONNECT,
                1.0,
                TestClient::connect_object(app, &format!("rtmp://127.0.0.1/{}", app)),
                vec![],
            )
            .await;

        match client.recv().await {
            RtmpMessage::SetWindowAckSize { ack_window_size } => {
                assert_eq!(ack_window_size, 2500000)
            }
            other => panic!("expected WindowAckSize, got {}", other),
        }
        match client.recv().await {
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                assert_eq!(size, 2500000);
                assert_eq!(limit_type, 2);
            }
            other => panic!("expected SetPeerBandwidth, got {}", other),
        }
        match client.recv().await {
            RtmpMessage::SetChunkSize { chunk_size } => assert_eq!(chunk_size, 60000),
            other => panic!("expected SetChunkSize, got {}", other),
        }
        match client.recv().await {
            RtmpMessage::Amf0Command {
                command_name,
                additional_arguments,
                ..
            } => {
                assert_eq!(command_name, COMMAND_RESULT);
                assert_eq!(
                    status_code(&additional_arguments),
                    "NetConnection.Connect.Success"
                );
            }
            other => panic!("expected connect _result, got {}", other),
        }
    }

    async fn do_publish(client: &mut TestClient, stream: &str) {
        client
            .send_command(
                COMMAND_RELEASE_STREAM,
                2.0,
                Amf0Value::Null,
                vec![Amf0Value::Utf8String(stream.to_string())],
            )
            .await;
        let (name, _) = client.recv_command().await;
        assert_eq!(name, COMMAND_RESULT);

        client
            .send_command(
                COMMAND_FC_PUBLISH,
                3.0,
                Amf0Value::Null,
                vec![Amf0Value::Utf8String(stream.to_string())],
            )
            .await;
        let (name, _) = client.recv_command().await;
        assert_eq!(name, COMMAND_RESULT);

        client
            .send_command(COMMAND_CREATE_STREAM, 4.0, Amf0Value::Null, vec![])
            .await;
        let (name, args) = client.recv_command().await;
        assert_eq!(name, COMMAND_RESULT);
        assert_eq!(args, vec![Amf0Value::Number(1.0)]);

        client
            .send_command(
                COMMAND_PUBLISH,
                5.0,
                Amf0Value::Null,
                vec![
                    Amf0Value::Utf8String(stream.to_string()),
                    Amf0Value::Utf8String("live".to_string()),
                ],
            )
            .await;
        let (name, _) = client.recv_command().await;
        assert_eq!(name, COMMAND_ON_FC_PUBLISH);
        let (name, args) = client.recv_command().await;
        assert_eq!(name, COMMAND_ON_STATUS);
        assert_eq!(status_code(&args), "NetStream.Publish.Start");
    }

    #[tokio::test]
    async fn connect_create_stream_publish_flow() {
        let addr = start_server(ServiceConfig::default()).await;
        let mut publisher = TestClient::connect(addr).await;
        do_connect(&mut publisher, "live").await;
        do_publish(&mut publisher, "room").await;
    }

    #[tokio::test]
    async fn play_of_unknown_stream_closes_the_connection() {
        let addr = start_server(ServiceConfig::default()).await;
        let mut player = TestClient::connect(addr).await;
        do_connect(&mut player, "live").await;

        player
            .send_command(COMMAND_CREATE_STREAM, 2.0, Amf0Value::Null, vec![])
            .await;
        let (name, _) = player.recv_command().await;
        assert_eq!(name, COMMAND_RESULT);

        player
            .send_command(
                COMMAND_PLAY,
                3.0,
                Amf0Value::Null,
                vec![Amf0Value::Utf8String("missing".to_string())],
            )
            .await;

        // The play preamble may arrive, then the server hangs up on the
        // not-live stream key.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match timeout(Duration::from_secs(5), raw_recv(&mut player)).await {
                Ok(Ok(_)) => {
                    assert!(Instant::now() < deadline, "server never closed");
                    continue;
                }
                Ok(Err(_)) => break, // closed
                Err(_) => panic!("server never closed the connection"),
            }
        }
    }

    async fn raw_recv(
        client: &mut TestClient,
    ) -> Result<RtmpMessage, rtmp::chunk::error::ChunkError> {
        client.codec.recv_rtmp_message().await
    }

    #[tokio::test]
    async fn identify_timeout_drops_idle_connections() {
        let config = ServiceConfig {
            play_or_publish_timeout: Duration::from_millis(200),
            ..ServiceConfig::default()
        };
        let addr = start_server(config).await;
        let mut client = TestClient::connect(addr).await;

        // no connect command: the server must hang up on its own
        match timeout(Duration::from_secs(5), raw_recv(&mut client)).await {
            Ok(Err(_)) => {}
            Ok(Ok(msg)) => panic!("unexpected message {}", msg),
            Err(_) => panic!("server never closed the idle connection"),
        }
    }

    #[tokio::test]
    async fn late_player_gets_sequence_headers_then_live_frames() {
        let addr = start_server(ServiceConfig::default()).await;

        let mut publisher = TestClient::connect(addr).await;
        do_connect(&mut publisher, "live").await;
        do_publish(&mut publisher, "room").await;

        // AAC sequence header, AVC sequence header, then five inter frames
        publisher
            .send_media(msg_type::AUDIO, 0, &[0xAF, 0x00, 0x12, 0x10])
            .await;
        publisher
            .send_media(msg_type::VIDEO, 0, &[0x17, 0x00, 0x00, 0x00, 0x00])
            .await;
        for ts in [40_u32, 80, 120, 160, 200] {
            publisher
                .send_media(msg_type::VIDEO, ts, &[0x27, 0x01, 0x00, 0x00, 0x00])
                .await;
        }

        // give the fan-out a moment to cache the headers
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut player = TcpPlayer::start(addr, "room").await;
        // the play preamble is sent before the broker registration lands,
        // wait for the join to settle before publishing more
        tokio::time::sleep(Duration::from_millis(200)).await;

        // frames published after the join
        for ts in [240_u32, 280, 320] {
            publisher
                .send_media(msg_type::VIDEO, ts, &[0x27, 0x01, 0x00, 0x00, 0x00])
                .await;
        }

        let first = player.recv_media().await;
        assert_eq!(first.0, msg_type::AUDIO);
        assert_eq!(&first.2[..2], &[0xAF, 0x00]);

        let second = player.recv_media().await;
        assert_eq!(second.0, msg_type::VIDEO);
        assert_eq!(&second.2[..2], &[0x17, 0x00]);

        // only frames 6..8, never the five sent before the join
        for want_ts in [240_u32, 280, 320] {
            let (typ, ts, data) = player.recv_media().await;
            assert_eq!(typ, msg_type::VIDEO);
            assert_eq!(ts, want_ts);
            assert_eq!(&data[..2], &[0x27, 0x01]);
        }
    }

    struct TcpPlayer {
        client: TestClient,
    }

    impl TcpPlayer {
        async fn start(addr: SocketAddr, stream: &str) -> Self {
            let mut client = TestClient::connect(addr).await;
            do_connect(&mut client, "live").await;

            client
                .send_command(COMMAND_CREATE_STREAM, 2.0, Amf0Value::Null, vec![])
                .await;
            let (name, _) = client.recv_command().await;
            assert_eq!(name, COMMAND_RESULT);

            client
                .send_command(
                    COMMAND_PLAY,
                    3.0,
                    Amf0Value::Null,
                    vec![Amf0Value::Utf8String(stream.to_string())],
                )
                .await;

            // play preamble: two user controls and the onStatus ladder
            match client.recv().await {
                RtmpMessage::UserControl { event_type, .. } => assert_eq!(event_type, 4),
                other => panic!("expected streamIsRecorded, got {}", other),
            }
            match client.recv().await {
                RtmpMessage::UserControl { event_type, .. } => assert_eq!(event_type, 0),
                other => panic!("expected streamBegin, got {}", other),
            }
            let (name, args) = client.recv_command().await;
            assert_eq!(name, COMMAND_ON_STATUS);
            assert_eq!(status_code(&args), "NetStream.Play.Reset");
            let (name, args) = client.recv_command().await;
            assert_eq!(name, COMMAND_ON_STATUS);
            assert_eq!(status_code(&args), "NetStream.Play.Start");
            match client.recv().await {
                RtmpMessage::Amf0Data { values, .. } => {
                    assert_eq!(
                        values.first(),
                        Some(&Amf0Value::Utf8String("onStatus".to_string()))
                    );
                }
                other => panic!("expected data start, got {}", other),
            }
            let (name, args) = client.recv_command().await;
            assert_eq!(name, COMMAND_ON_STATUS);
            assert_eq!(status_code(&args), "NetStream.Play.PublishNotify");

            Self { client }
        }

        async fn recv_media(&mut self) -> (u8, u32, Bytes) {
            loop {
                match self.client.recv().await {
                    RtmpMessage::AudioData {
                        timestamp, payload, ..
                    } => return (msg_type::AUDIO, timestamp, payload),
                    RtmpMessage::VideoData {
                        timestamp, payload, ..
                    } => return (msg_type::VIDEO, timestamp, payload),
                    _ => continue,
                }
            }
        }
    }
}
