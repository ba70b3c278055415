// Rolling text sink: a dedicated worker drains a bounded channel and
// writes one line per event, JSON or CSV, through a small byte buffer
// in front of the rotating file writer.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use dnspipe_common::event::DnsEvent;

use crate::config::{DnslogConfig, LogFormat};

use super::rollfile::RollingFileWriter;

pub const CHANNEL_CAPACITY: usize = 10;

const WRITE_BUFFER_SIZE: usize = 8 * 1024;
const FLUSH_WATERMARK: usize = 2 * 1024;
const FLUSH_TIMEOUT_SECS: u64 = 3;

#[derive(Clone)]
pub struct DnsLogHandle {
    tx: mpsc::Sender<Arc<DnsEvent>>,
}

impl DnsLogHandle {
    /// Back-pressuring send into the sink's channel.
    pub async fn send(&self, event: Arc<DnsEvent>) {
        let _ = self.tx.send(event).await;
    }
}

/// Start the sink worker. The returned join handle resolves once the
/// worker has drained and flushed; a write failure resolves to an
/// error, which the runtime treats as fatal.
pub fn spawn(
    cfg: &DnslogConfig,
    shutdown: broadcast::Sender<()>,
) -> Result<(DnsLogHandle, JoinHandle<Result<()>>)> {
    let writer = RollingFileWriter::open(
        &cfg.filename,
        cfg.max_file_size,
        cfg.max_file_count,
        cfg.max_file_age,
    )?;
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let format = cfg.format;
    let task = tokio::spawn(worker(rx, writer, format, shutdown.subscribe()));
    Ok((DnsLogHandle { tx }, task))
}

async fn worker(
    mut rx: mpsc::Receiver<Arc<DnsEvent>>,
    writer: RollingFileWriter,
    format: LogFormat,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut sink = BufferedSink::new(writer, format);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("dnslog sink exiting by shutdown signal");
                break;
            }

            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else {
                    info!("dnslog sink exiting by event channel closed");
                    break;
                };
                sink.write_event(&event)?;
            }
        }
    }

    // Drain whatever is still queued, then flush.
    while let Ok(event) = rx.try_recv() {
        sink.write_event(&event)?;
    }
    sink.flush()?;
    info!("dnslog sink flushed and closed");
    Ok(())
}

/// The batching policy in front of the rotator: a fixed-size byte
/// buffer flushed when free space runs low or the flush timeout has
/// passed since the last flush.
struct BufferedSink {
    writer: RollingFileWriter,
    format: LogFormat,
    buffer: Vec<u8>,
    last_flush: Instant,
}

impl BufferedSink {
    fn new(writer: RollingFileWriter, format: LogFormat) -> Self {
        Self {
            writer,
            format,
            buffer: Vec::with_capacity(WRITE_BUFFER_SIZE),
            last_flush: Instant::now(),
        }
    }

    fn write_event(&mut self, event: &DnsEvent) -> Result<()> {
        match self.format {
            LogFormat::Json => {
                self.buffer.extend_from_slice(event.json_string().as_bytes());
                self.buffer.push(b'\n');
            }
            LogFormat::Csv => {
                let mut csv_writer = csv::Writer::from_writer(Vec::new());
                csv_writer
                    .write_record(event.csv_record())
                    .context("encode csv record")?;
                let row = csv_writer.into_inner().context("finish csv record")?;
                self.buffer.extend_from_slice(&row);
            }
        }

        if WRITE_BUFFER_SIZE.saturating_sub(self.buffer.len()) < FLUSH_WATERMARK {
            self.flush()?;
        } else if self.last_flush.elapsed().as_secs() > FLUSH_TIMEOUT_SECS {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        self.writer.flush()?;
        self.last_flush = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample_event(domain: &str) -> Arc<DnsEvent> {
        Arc::new(DnsEvent {
            domain: domain.into(),
            query_type: "A".into(),
            query_class: "IN".into(),
            ..Default::default()
        })
    }

    fn test_config(dir: &TempDir, format: LogFormat) -> DnslogConfig {
        DnslogConfig {
            enable: true,
            filename: dir.path().join("dnslog.log").to_string_lossy().into_owned(),
            max_file_size: 10,
            max_file_count: 3,
            max_file_age: 0,
            format,
        }
    }

    #[tokio::test]
    async fn writes_json_lines_on_shutdown_flush() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir, LogFormat::Json);
        let (shutdown_tx, _keep) = broadcast::channel(1);
        let (handle, task) = spawn(&cfg, shutdown_tx.clone()).unwrap();

        handle.send(sample_event("a.test.")).await;
        handle.send(sample_event("b.test.")).await;
        drop(handle);
        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("dnslog.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"Domain\":\"a.test.\""));
        assert!(lines[1].contains("\"Domain\":\"b.test.\""));
    }

    #[tokio::test]
    async fn closing_the_channel_also_drains_and_flushes() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir, LogFormat::Json);
        let (shutdown_tx, _keep) = broadcast::channel(1);
        let (handle, task) = spawn(&cfg, shutdown_tx).unwrap();

        handle.send(sample_event("c.test.")).await;
        drop(handle); // sender gone, channel closes

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let contents = std::fs::read_to_string(dir.path().join("dnslog.log")).unwrap();
        assert!(contents.contains("c.test."));
    }

    #[tokio::test]
    async fn csv_mode_writes_fixed_width_rows() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir, LogFormat::Csv);
        let (shutdown_tx, _keep) = broadcast::channel(1);
        let (handle, task) = spawn(&cfg, shutdown_tx.clone()).unwrap();

        handle.send(sample_event("csv.test.")).await;
        drop(handle);
        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("dnslog.log")).unwrap();
        let line = contents.lines().next().unwrap();
        // Nested list/record columns are quoted by the csv writer
        // because they contain commas, so count via the csv reader.
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(line.as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(record.len(), 38);
        assert_eq!(&record[7], "csv.test.");
        assert_eq!(&record[20], "[]");
    }
}
