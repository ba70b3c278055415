// Event source: polls packets from a live device or a pcap file list,
// decodes them on a bounded worker pool, and feeds the pipeline
// through bounded channels.

pub mod decode;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pcap::{Activated, Capture, Linktype};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dnspipe_common::event::DnsEvent;

use decode::{decode_packet, LinkLayer};

/// Capacity of the event and error channels toward the orchestrator.
pub const CHANNEL_CAPACITY: usize = 10;

const SNAPLEN: i32 = 1500;
const READ_TIMEOUT_MS: i32 = 1000;

/// What the source reads from.
#[derive(Debug, Clone)]
pub enum SourceMode {
    Capture { device: String },
    Files { paths: Vec<String> },
}

/// A running packet source. Receivers are taken by the orchestrator;
/// the source closes them when capture ends or shutdown fires.
pub struct PacketSource {
    pub events: mpsc::Receiver<DnsEvent>,
    pub errors: mpsc::Receiver<()>,
    driver: JoinHandle<()>,
}

impl PacketSource {
    /// Open the capture up front (device open and BPF compile failures
    /// are load-fatal) and start the capture + decode tasks.
    pub fn spawn(
        mode: SourceMode,
        bpf_filter: String,
        decode_workers: usize,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (raw_tx, raw_rx) = mpsc::channel::<RawPacket>(CHANNEL_CAPACITY);

        let stop = Arc::new(AtomicBool::new(false));
        let stop_setter = stop.clone();
        let mut stop_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = stop_rx.recv().await;
            stop_setter.store(true, Ordering::Relaxed);
        });

        match &mode {
            SourceMode::Capture { device } => {
                let capture = open_device(device, &bpf_filter)?;
                let link = link_layer_for(capture.get_datalink());
                info!(device = %device, filter = %bpf_filter, "live capture opened");
                let stop = stop.clone();
                tokio::task::spawn_blocking(move || {
                    stream_capture(capture, link, &raw_tx, &stop);
                    info!("live capture loop exited");
                });
            }
            SourceMode::Files { paths } => {
                // Compile the filter once against a dead handle so a bad
                // expression fails startup rather than every file.
                Capture::dead(Linktype::ETHERNET)
                    .context("open dead capture for filter check")?
                    .compile(&bpf_filter, true)
                    .with_context(|| format!("compile bpf filter [{bpf_filter}]"))?;

                let paths = paths.clone();
                let stop = stop.clone();
                tokio::task::spawn_blocking(move || {
                    info!("total {} pcap files need to handle", paths.len());
                    for path in &paths {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        info!(file = %path, "begin handling pcap file");
                        if let Err(err) = stream_file(path, &bpf_filter, &raw_tx, &stop) {
                            error!(file = %path, %err, "handling pcap file failed");
                        }
                        info!(file = %path, "end handling pcap file");
                    }
                    info!("all pcap files handled");
                });
            }
        }

        let driver = tokio::spawn(decode_loop(
            raw_rx,
            event_tx,
            error_tx,
            decode_workers,
            shutdown.subscribe(),
        ));

        Ok(Self { events: event_rx, errors: error_rx, driver })
    }

    /// Wait for the decode stage to finish draining.
    pub async fn join(self) {
        let _ = self.driver.await;
    }
}

struct RawPacket {
    link: LinkLayer,
    timestamp: DateTime<Utc>,
    data: Vec<u8>,
}

fn open_device(device: &str, bpf_filter: &str) -> Result<Capture<pcap::Active>> {
    let mut capture = Capture::from_device(device)
        .with_context(|| format!("lookup capture device {device}"))?
        .promisc(true)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .open()
        .with_context(|| format!("open capture device {device}"))?;
    capture
        .filter(bpf_filter, true)
        .with_context(|| format!("set bpf filter [{bpf_filter}]"))?;
    Ok(capture)
}

fn link_layer_for(linktype: Linktype) -> LinkLayer {
    match linktype {
        Linktype::LINUX_SLL => LinkLayer::LinuxSll,
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => LinkLayer::RawIp,
        _ => LinkLayer::Ethernet,
    }
}

fn packet_timestamp(header: &pcap::PacketHeader) -> DateTime<Utc> {
    DateTime::from_timestamp(
        header.ts.tv_sec as i64,
        (header.ts.tv_usec as u32).saturating_mul(1000),
    )
    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Blocking read loop shared by the live path; exits on shutdown or
/// when the downstream channel closes.
fn stream_capture<S: Activated>(
    mut capture: Capture<S>,
    link: LinkLayer,
    raw_tx: &mpsc::Sender<RawPacket>,
    stop: &AtomicBool,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match capture.next_packet() {
            Ok(packet) => {
                let raw = RawPacket {
                    link,
                    timestamp: packet_timestamp(packet.header),
                    data: packet.data.to_vec(),
                };
                if raw_tx.blocking_send(raw).is_err() {
                    return;
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => return,
            Err(err) => {
                warn!(%err, "capture read failed");
                return;
            }
        }
    }
}

fn stream_file(
    path: &str,
    bpf_filter: &str,
    raw_tx: &mpsc::Sender<RawPacket>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut capture =
        Capture::from_file(path).with_context(|| format!("open pcap file {path}"))?;
    capture
        .filter(bpf_filter, true)
        .with_context(|| format!("set bpf filter [{bpf_filter}]"))?;
    let link = link_layer_for(capture.get_datalink());
    stream_capture(capture, link, raw_tx, stop);
    Ok(())
}

/// Decode stage: a semaphore-bounded worker pool. One permit keeps
/// event order identical to capture order.
async fn decode_loop(
    mut raw_rx: mpsc::Receiver<RawPacket>,
    event_tx: mpsc::Sender<DnsEvent>,
    error_tx: mpsc::Sender<()>,
    workers: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let pool = Arc::new(Semaphore::new(workers.max(1)));

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("decode loop exiting by shutdown signal");
                break;
            }

            maybe_raw = raw_rx.recv() => {
                let Some(raw) = maybe_raw else {
                    info!("decode loop exiting by capture end");
                    break;
                };
                let permit = match pool.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let event_tx = event_tx.clone();
                let error_tx = error_tx.clone();
                tokio::spawn(async move {
                    match decode_packet(raw.link, raw.timestamp, &raw.data) {
                        Ok(event) => {
                            let _ = event_tx.send(event).await;
                        }
                        Err(err) => {
                            debug!(%err, "packet decode failed");
                            let _ = error_tx.send(()).await;
                        }
                    }
                    drop(permit);
                });
            }
        }
    }

    // Let in-flight decode tasks finish before the channels close.
    let _ = pool.acquire_many(workers.max(1) as u32).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linktype_mapping_covers_common_captures() {
        assert_eq!(link_layer_for(Linktype::ETHERNET), LinkLayer::Ethernet);
        assert_eq!(link_layer_for(Linktype::LINUX_SLL), LinkLayer::LinuxSll);
        assert_eq!(link_layer_for(Linktype::RAW), LinkLayer::RawIp);
        assert_eq!(link_layer_for(Linktype::IPV4), LinkLayer::RawIp);
    }

    #[tokio::test]
    async fn missing_files_are_soft_and_channels_close() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut source = PacketSource::spawn(
            SourceMode::Files { paths: vec!["/nonexistent/never.pcap".into()] },
            "udp and port 53".into(),
            1,
            shutdown_tx,
        )
        .unwrap();

        // The file fails to open (logged, soft) and the source winds
        // down, closing the event channel.
        assert!(source.events.recv().await.is_none());
        source.join().await;
    }

    #[tokio::test]
    async fn bad_bpf_filter_is_load_fatal_in_file_mode() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let result = PacketSource::spawn(
            SourceMode::Files { paths: vec![] },
            "not a valid bpf ((".into(),
            1,
            shutdown_tx,
        );
        assert!(result.is_err());
    }
}
