use anyhow::Result;
use serde_derive::Deserialize;
use std::{fs, time::Duration};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Listen address; a bare ":1935" binds every interface.
    pub addr: String,
    pub read_buf_size: usize,
    /// Outbound chunk size announced to every client after connect.
    pub local_chunk_size: u32,
    /// Seconds.
    pub handshake_timeout: u64,
    /// Seconds until a connected client must reach publish/play.
    pub play_or_publish_timeout: u64,
    pub enable_pprof: bool,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: ":1935".to_string(),
            read_buf_size: 8192,
            local_chunk_size: 60000,
            handshake_timeout: 3,
            play_or_publish_timeout: 3,
            enable_pprof: false,
            log: LogConfig::default(),
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    pub fn play_or_publish_timeout(&self) -> Duration {
        Duration::from_secs(self.play_or_publish_timeout)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// Log to this file (daily rotation) instead of stdout.
    pub path: Option<String>,
    pub level: String,
    pub rotation_time: Option<String>,
    /// Days of logs worth keeping; advisory.
    pub age: Option<u32>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: None,
            level: "info".to_string(),
            rotation_time: None,
            age: None,
        }
    }
}

pub fn load(path: &str) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}
