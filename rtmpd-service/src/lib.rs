use std::time::Duration;

pub mod error;
pub mod packet;
pub mod player;
pub mod rtmp_service;
pub mod stream;

const CONN_PRINT_INTVAL: Duration = Duration::from_secs(5);

/// Merged-write wait: how long header/payload pairs batch up in the write
/// buffer before one gathered flush.
const MERGE_WRITE_WAIT: Duration = Duration::from_millis(350);

/// Per-player bounded packet queue; a full queue drops the incoming frame.
const PLAYER_QUEUE_CAPACITY: usize = 150;

/// How long a session keeps its players after the publisher drops before
/// the broker finalizes it.
const SESSION_OFFLINE_GRACE: Duration = Duration::from_secs(30);

/// Bump applied when a packet timestamp runs behind the stream position,
/// keeping the outgoing timeline monotonic.
const TIMESTAMP_JUMP_GAP: u32 = 40;
