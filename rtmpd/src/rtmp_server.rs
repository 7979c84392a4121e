use anyhow::Result;
use futures::FutureExt;
use rtmpd_core::{transport::Transport, utils};
use rtmpd_service::{
    error::ServiceError,
    rtmp_service::{RtmpService, ServiceConfig},
    stream::ConnToMgrChanTx,
};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, Instrument};

use crate::config::Config;

pub async fn serve(listener: TcpListener, config: Config, stream_tx: ConnToMgrChanTx) -> Result<()> {
    let service_config = ServiceConfig {
        handshake_timeout: config.handshake_timeout(),
        play_or_publish_timeout: config.play_or_publish_timeout(),
        local_chunk_size: config.local_chunk_size,
    };

    while let Ok((inbound, _)) = listener.accept().await {
        let uid = utils::gen_uid();
        let rtmp_service = rtmp_service(
            inbound,
            uid.clone(),
            stream_tx.clone(),
            config.read_buf_size,
            service_config.clone(),
        )
        .map(|r| {
            if let Err(e) = r {
                if e.is_normal_eof() {
                    debug!("Connection closed by peer");
                } else {
                    error!("Failed to serve connection; error={}", e);
                }
            }
        });

        tokio::spawn(rtmp_service.instrument(tracing::info_span!("RTMP-CONN", uid = %uid)));
    }

    Ok(())
}

async fn rtmp_service(
    inbound: TcpStream,
    uid: String,
    stream_tx: ConnToMgrChanTx,
    read_buf_size: usize,
    service_config: ServiceConfig,
) -> Result<(), ServiceError> {
    let io = Transport::with_read_buffer(inbound, read_buf_size);
    RtmpService::new(io, Some(uid), stream_tx, service_config)
        .await?
        .run()
        .await
}
