use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{ExpireEv, StreamEvent};
use crate::packet::Packet;
use crate::SESSION_OFFLINE_GRACE;

#[derive(Debug)]
pub enum SessionEvent {
    /// Audio/video frame from the publisher.
    Frame(Packet),
    /// `@setDataFrame` payload from the publisher.
    Metadata(Packet),
    PlayerJoin(String, mpsc::Sender<Packet>),
    PlayerLeave(String),
    PublisherGone,
    PublisherResume,
    Shutdown,
}

/// One task per live `(vhost, app, stream)` key. Owns the player set and the
/// cached metadata and sequence headers, fans frames out to every player
/// queue, and watches the offline grace window when the publisher drops.
pub struct Session {
    id: String,
    stream_key: String,
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
    broker_tx: mpsc::UnboundedSender<StreamEvent>,

    players: HashMap<String, mpsc::Sender<Packet>>,
    metadata: Option<Packet>,
    audio_sh: Option<Packet>,
    video_sh: Option<Packet>,
}

impl Session {
    pub fn new(
        id: String,
        stream_key: String,
        receiver: mpsc::UnboundedReceiver<SessionEvent>,
        broker_tx: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            id,
            stream_key,
            receiver,
            broker_tx,
            players: HashMap::new(),
            metadata: None,
            audio_sh: None,
            video_sh: None,
        }
    }

    pub async fn run(mut self) {
        info!("Session {} start, stream={}", self.id, self.stream_key);

        let grace = sleep(SESSION_OFFLINE_GRACE);
        tokio::pin!(grace);
        let mut offline = false;

        loop {
            tokio::select! {
                ev = self.receiver.recv() => {
                    match ev {
                        Some(SessionEvent::Frame(pkt)) => self.on_frame(pkt),
                        Some(SessionEvent::Metadata(pkt)) => self.on_metadata(pkt),
                        Some(SessionEvent::PlayerJoin(uid, queue)) => self.on_player_join(uid, queue),
                        Some(SessionEvent::PlayerLeave(uid)) => {
                            self.players.remove(&uid);
                        }
                        Some(SessionEvent::PublisherGone) => {
                            info!(
                                "Session {} publisher gone, hold for {:?}",
                                self.id, SESSION_OFFLINE_GRACE
                            );
                            offline = true;
                            grace.as_mut().reset(Instant::now() + SESSION_OFFLINE_GRACE);
                        }
                        Some(SessionEvent::PublisherResume) => {
                            info!("Session {} publisher resumed", self.id);
                            offline = false;
                        }
                        Some(SessionEvent::Shutdown) | None => break,
                    }
                }
                _ = &mut grace, if offline => {
                    // No resume within the grace window; the broker decides,
                    // a racing resume simply wins.
                    offline = false;
                    let _ = self.broker_tx.send(StreamEvent::Expire(ExpireEv {
                        stream_key: self.stream_key.clone(),
                        session_id: self.id.clone(),
                    }));
                }
            }
        }

        // Dropping the player senders closes every queue and unblocks the
        // player send loops.
        info!(
            "Session {} closed, evict {} players",
            self.id,
            self.players.len()
        );
    }

    fn on_frame(&mut self, pkt: Packet) {
        if pkt.is_audio_sequence_header() {
            debug!("Session {} cache audio sequence header", self.id);
            self.audio_sh = Some(pkt.clone());
        } else if pkt.is_video_sequence_header() {
            debug!("Session {} cache video sequence header", self.id);
            self.video_sh = Some(pkt.clone());
        }
        self.fan_out(pkt);
    }

    fn on_metadata(&mut self, pkt: Packet) {
        debug!("Session {} cache metadata, len={}", self.id, pkt.data.len());
        self.metadata = Some(pkt.clone());
        self.fan_out(pkt);
    }

    fn fan_out(&mut self, pkt: Packet) {
        let mut gone: Vec<String> = Vec::new();
        for (uid, queue) in self.players.iter() {
            match queue.try_send(pkt.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // frame-drop policy for slow players, never retried
                    debug!("Player {} queue full, drop {:?} frame", uid, pkt.kind);
                }
                Err(TrySendError::Closed(_)) => gone.push(uid.clone()),
            }
        }
        for uid in gone {
            self.players.remove(&uid);
        }
    }

    /// A fresh player first gets the cached metadata, then the audio and
    /// video sequence headers, before any live frame.
    fn on_player_join(&mut self, uid: String, queue: mpsc::Sender<Packet>) {
        let cached = [&self.metadata, &self.audio_sh, &self.video_sh];
        for pkt in cached.into_iter().flatten() {
            if queue.try_send(pkt.clone()).is_err() {
                warn!("Replay cached {:?} to player {} failed", pkt.kind, uid);
            }
        }
        debug!("Session {} add player {}", self.id, uid);
        self.players.insert(uid, queue);
    }
}
