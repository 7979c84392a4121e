#![warn(rust_2018_idioms)]

mod config;
mod rtmp_server;

use anyhow::Result;
use rtmpd_service::stream::{Broker, StreamEvent};
use std::env;
use std::path::Path;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Instrument};
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = match env::args().nth(1) {
        Some(path) => config::load(&path)?,
        None => config::Config::default(),
    };

    let _log_guard = init_tracing(&cfg)?;

    if cfg.enable_pprof {
        warn!("enable_pprof is set but this build carries no pprof endpoint");
    }

    // bind before anything else so a taken port fails the process
    let listener = TcpListener::bind(cfg.listen_addr()).await?;
    info!("Listening on: {}", cfg.listen_addr());

    let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();
    let mut broker = Broker::new(tx.clone(), rx);
    tokio::spawn(
        async move {
            if let Err(e) = broker.run().await {
                error!("Session broker error={}", e);
            }
        }
        .instrument(tracing::info_span!("STREAM-MGR")),
    );

    tokio::spawn(proc_stat());

    tokio::spawn(async move {
        if let Err(err) = rtmp_server::serve(listener, cfg, tx).await {
            error!("Rtmp server error: {}", err);
        }
    });

    wait_for_signal().await?;
    info!("rtmpd exit...");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    Ok(())
}

fn init_tracing(cfg: &config::Config) -> Result<Option<WorkerGuard>> {
    let level: tracing::Level = cfg.log.level.parse()?;

    let guard = match &cfg.log.path {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let prefix = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("rtmpd.log");
            let appender = tracing_appender::rolling::daily(dir, prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(non_blocking)
                .with_ansi(false) // no color codes in files
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).init();
            None
        }
    };

    if let Some(rotation) = &cfg.log.rotation_time {
        if rotation != "daily" {
            warn!("log.rotation_time={} unsupported, rotating daily", rotation);
        }
    }
    if let Some(age) = cfg.log.age {
        info!("log.age={}d is advisory, old files are not pruned", age);
    }

    Ok(guard)
}

#[cfg(target_os = "linux")]
async fn proc_stat() {
    use procfs::process::Stat;
    use std::time::Duration;

    let intval = 5;
    let mut interval = tokio::time::interval(Duration::from_secs(intval));
    let mut last_stat: Option<Stat> = None;
    loop {
        interval.tick().await;
        let curr = match procfs::process::Process::myself().and_then(|p| p.stat()) {
            Ok(stat) => stat,
            Err(_) => return,
        };
        let memory = curr.rss * procfs::page_size();
        if let Some(last) = last_stat {
            let cpu = (100 * (curr.utime + curr.stime - last.utime - last.stime)) as f32
                / intval as f32
                / procfs::ticks_per_second() as f32;
            info!("CPU {}% MEM {}MB", cpu, memory / 1024 / 1024);
        }

        last_stat = Some(curr);
    }
}

#[cfg(not(target_os = "linux"))]
async fn proc_stat() {}
