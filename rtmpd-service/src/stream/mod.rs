use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn, Instrument};

use self::{
    error::StreamError,
    session::{Session, SessionEvent},
};
use crate::packet::Packet;
use crate::PLAYER_QUEUE_CAPACITY;

pub mod error;
pub mod session;

pub type ConnToMgrChanTx = mpsc::UnboundedSender<StreamEvent>;

#[derive(Debug)]
pub enum RoleType {
    Publisher,
    Subscriber,
}

#[derive(Debug)]
pub enum Token {
    Failure(StreamError),
    PublisherToken(mpsc::UnboundedSender<SessionEvent>),
    SubscriberToken(mpsc::Receiver<Packet>),
}

#[derive(Debug)]
pub struct RegisterEv {
    pub uid: String,
    pub role: RoleType,
    pub stream_key: String,
    /// Session id offered by a publisher; ignored for subscribers.
    pub session_id: Option<String>,
    pub ret: oneshot::Sender<Token>,
}

#[derive(Debug)]
pub struct UnregisterEv {
    pub uid: String,
    pub role: RoleType,
    pub stream_key: String,
}

/// Sent by a session's offline watchdog when the grace window passed
/// without the publisher returning.
#[derive(Debug)]
pub struct ExpireEv {
    pub stream_key: String,
    pub session_id: String,
}

#[derive(Debug)]
pub enum StreamEvent {
    Register(RegisterEv),
    Unregister(UnregisterEv),
    Expire(ExpireEv),
}

struct SessionEntry {
    id: String,
    tx: mpsc::UnboundedSender<SessionEvent>,
    /// uid of the live publisher connection; None during the grace window.
    publisher: Option<String>,
    start_time: u32,
}

/// The session broker daemon. Owns the `stream_key -> session` registry and
/// is the single arbiter for create, adopt, soft-delete and finalize, so a
/// publisher returning during the grace window can never race the watchdog.
pub struct Broker {
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
    sessions: HashMap<String, SessionEntry>,
    session_total: i64,
}

impl Broker {
    pub fn new(
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        receiver: mpsc::UnboundedReceiver<StreamEvent>,
    ) -> Self {
        Self {
            event_tx,
            receiver,
            sessions: HashMap::new(),
            session_total: 0,
        }
    }

    pub async fn run(&mut self) -> Result<(), StreamError> {
        info!("Session broker daemon start...");
        while let Some(ev) = self.receiver.recv().await {
            match ev {
                StreamEvent::Register(ev) => self.register(ev),
                StreamEvent::Unregister(ev) => self.unregister(ev),
                StreamEvent::Expire(ev) => self.expire(ev),
            }
        }
        Ok(())
    }

    pub fn session_total(&self) -> i64 {
        self.session_total
    }

    fn register(&mut self, ev: RegisterEv) {
        info!(
            "received register [{}]: {:?} {:?} {:?}",
            self.sessions.contains_key(&ev.stream_key),
            ev.uid,
            ev.role,
            ev.stream_key
        );
        let token = match ev.role {
            RoleType::Publisher => self.register_publisher(&ev),
            RoleType::Subscriber => self.register_subscriber(&ev),
        };
        if ev.ret.send(token).is_err() {
            error!("Response token failed");
        }
    }

    fn register_publisher(&mut self, ev: &RegisterEv) -> Token {
        let session_id = ev
            .session_id
            .clone()
            .unwrap_or_else(rtmpd_core::utils::gen_uid);
        match self.sessions.get_mut(&ev.stream_key) {
            Some(entry) => {
                if entry.publisher.is_some() {
                    return Token::Failure(StreamError::DuplicatePublish);
                }
                // The session lost its publisher inside the grace window;
                // adopt it, players stay untouched.
                entry.publisher = Some(ev.uid.clone());
                if entry.id != session_id {
                    warn!(
                        "Session {} resumed under new id {}",
                        entry.id, session_id
                    );
                    entry.id = session_id;
                }
                if entry.tx.send(SessionEvent::PublisherResume).is_err() {
                    return Token::Failure(StreamError::SessionClosed);
                }
                Token::PublisherToken(entry.tx.clone())
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                let session = Session::new(
                    session_id.clone(),
                    ev.stream_key.clone(),
                    rx,
                    self.event_tx.clone(),
                );
                tokio::spawn(
                    session
                        .run()
                        .instrument(tracing::info_span!("SESSION", stream = %ev.stream_key)),
                );
                self.sessions.insert(
                    ev.stream_key.clone(),
                    SessionEntry {
                        id: session_id,
                        tx: tx.clone(),
                        publisher: Some(ev.uid.clone()),
                        start_time: rtmpd_core::utils::current_time(),
                    },
                );
                self.session_total += 1;
                Token::PublisherToken(tx)
            }
        }
    }

    fn register_subscriber(&mut self, ev: &RegisterEv) -> Token {
        match self.sessions.get(&ev.stream_key) {
            Some(entry) => {
                let (tx, rx) = mpsc::channel(PLAYER_QUEUE_CAPACITY);
                if entry
                    .tx
                    .send(SessionEvent::PlayerJoin(ev.uid.clone(), tx))
                    .is_err()
                {
                    return Token::Failure(StreamError::SessionClosed);
                }
                Token::SubscriberToken(rx)
            }
            // stream not live is a hard failure
            None => Token::Failure(StreamError::NoPublish),
        }
    }

    fn unregister(&mut self, ev: UnregisterEv) {
        info!(
            "received unregister [{}]: {:?} {:?} {:?}",
            self.sessions.contains_key(&ev.stream_key),
            ev.uid,
            ev.role,
            ev.stream_key
        );
        let entry = match self.sessions.get_mut(&ev.stream_key) {
            Some(entry) => entry,
            None => {
                warn!("unregister failed for no publish");
                return;
            }
        };
        match ev.role {
            RoleType::Publisher => {
                // Soft delete: clear the publisher and let the session's
                // watchdog run down the grace window. A stale disconnect
                // must not clobber a resumed publisher.
                if entry.publisher.as_deref() != Some(ev.uid.as_str()) {
                    warn!(
                        "Ignore unpublish from {}, session owned by {:?}",
                        ev.uid, entry.publisher
                    );
                    return;
                }
                entry.publisher = None;
                let _ = entry.tx.send(SessionEvent::PublisherGone);
            }
            RoleType::Subscriber => {
                let _ = entry.tx.send(SessionEvent::PlayerLeave(ev.uid));
            }
        }
    }

    /// Finalize after the grace window, unless the publisher came back (or
    /// a new publisher generation replaced the session) in the meantime.
    fn expire(&mut self, ev: ExpireEv) {
        let entry = match self.sessions.get(&ev.stream_key) {
            Some(entry) => entry,
            None => return,
        };
        if entry.publisher.is_some() || entry.id != ev.session_id {
            info!("Session {} resumed, ignore expire", ev.stream_key);
            return;
        }
        if let Some(entry) = self.sessions.remove(&ev.stream_key) {
            let _ = entry.tx.send(SessionEvent::Shutdown);
            self.session_total -= 1;
            info!(
                "Session {} finalized after {}s, {} sessions live",
                ev.stream_key,
                rtmpd_core::utils::current_time().saturating_sub(entry.start_time),
                self.session_total
            );
        }
    }
}
