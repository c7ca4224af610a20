//! # TCP Serial Bridge Runner
//!
//! Drives a [`Session`] against a modem whose UART is exposed over TCP.
//!
//! ```text
//!  TcpStream ──► reader task ──► SharedSerial::on_receive ──► notify ─┐
//!                                                                     ▼
//!  interval ─────────────────────────────────► timed_tick      main loop ──► poll_tick
//!                                                                     │
//!  TcpStream ◄── writer task ◄── mpsc ◄── ChannelSink ◄───────────────┘
//! ```
//!
//! The reader task stands in for the receive interrupt, the writer task for
//! the transmit interrupt. The reader waits while the ring buffer is full, so
//! the TCP connection provides the flow control a real UART lacks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use esp_link::{ByteSink, ConfigStore, LinkSettings, Session, SharedSerial};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::app::{self, AppStats, EchoApp};
use crate::config::HostConfig;
use crate::error::HostError;
use crate::store::FileStore;

const READ_CHUNK: usize = 256;

/// Hands each outbound transmission to the writer task
pub struct ChannelSink {
    serial: &'static SharedSerial,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new(serial: &'static SharedSerial, tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { serial, tx }
    }
}

impl ByteSink for ChannelSink {
    fn start_transmit(&mut self, first: u8) {
        let mut bytes = vec![first];
        while let Some(byte) = self.serial.on_tx_ready() {
            bytes.push(byte);
        }
        if self.tx.send(bytes).is_err() {
            warn!("Writer task gone, transmission discarded");
        }
    }
}

/// Connect to the configured bridge and run until Ctrl-C or disconnect
pub async fn run(serial: &'static SharedSerial, config: &HostConfig) -> Result<AppStats, HostError> {
    info!("Connecting to modem bridge at {}", config.modem_addr);
    let stream = TcpStream::connect(&config.modem_addr).await?;
    stream.set_nodelay(true)?;

    let store = FileStore::open(&config.state_path);
    info!(
        "Modem {} configured",
        if store.read_configured() { "already" } else { "not yet" }
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    run_link(
        serial,
        stream,
        store,
        config.link.clone(),
        config.heartbeat_ticks,
        shutdown,
    )
    .await
}

/// Run the session over `stream` until `shutdown` resolves or the peer
/// disconnects
pub async fn run_link<S, F>(
    serial: &'static SharedSerial,
    stream: TcpStream,
    store: S,
    settings: LinkSettings,
    heartbeat_ticks: u32,
    shutdown: F,
) -> Result<AppStats, HostError>
where
    S: ConfigStore,
    F: Future<Output = ()>,
{
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let received = Arc::new(Notify::new());

    let writer_task: JoinHandle<Result<(), HostError>> = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            writer.write_all(&bytes).await?;
        }
        Ok(())
    });

    let notify = Arc::clone(&received);
    let mut reader_task: JoinHandle<Result<(), HostError>> = tokio::spawn(async move {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(HostError::Disconnected);
            }
            for &byte in &chunk[..n] {
                while serial.space() == 0 {
                    notify.notify_one();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                serial.on_receive(byte);
            }
            notify.notify_one();
        }
    });

    let period = Duration::from_millis(u64::from(settings.timing.tick_period_ms.max(1)));
    let sink = ChannelSink::new(serial, tx);
    let mut session = Session::new(serial, sink, store, EchoApp::new(), settings);

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u32 = 0;
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break Ok(());
            }
            joined = &mut reader_task => {
                break match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(e) => Err(HostError::Task(e.to_string())),
                };
            }
            _ = ticker.tick() => {
                session.timed_tick();
                ticks = ticks.wrapping_add(1);
                if heartbeat_ticks > 0 && ticks % heartbeat_ticks == 0 {
                    session.handler_mut().schedule_heartbeat();
                }
            }
            _ = received.notified() => {}
        }

        session.poll_tick();
        app::service(&mut session);
    };

    reader_task.abort();
    writer_task.abort();

    let stats = session.handler().stats();
    debug!(
        "Link stopped in {:?}: {:?}, {} bytes echoed, {} dropped",
        session.state(),
        stats,
        serial.echoed(),
        serial.dropped()
    );
    result.map(|()| stats)
}
