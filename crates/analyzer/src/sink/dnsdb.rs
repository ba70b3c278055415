// Rolling database sink: append-only SQLite segments rotated by row
// count or by the span of event time they cover, with bounded
// retention of rotated files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use dnspipe_common::event::DnsEvent;

use crate::config::DnsdbConfig;

pub const CHANNEL_CAPACITY: usize = 10;

const COMMIT_EVERY_ROWS: u32 = 512;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS dnsevent (
    EventTime             TEXT,
    SourceIP              TEXT,
    SourcePort            INTEGER,
    DestinationIP         TEXT,
    DestinationPort       INTEGER,
    TranscationID         INTEGER,
    View                  TEXT,
    Domain                TEXT,
    QueryClass            TEXT,
    QueryType             TEXT,
    Rcode                 TEXT,
    Response              INTEGER,
    Authoritative         INTEGER,
    Truncated             INTEGER,
    RecursionDesired      INTEGER,
    RecursionAvailable    INTEGER,
    Zero                  INTEGER,
    AuthenticatedData     INTEGER,
    CheckingDisabled      INTEGER,
    DelayMicrosecond      INTEGER,
    Answer                TEXT,
    Authority             TEXT,
    Additional            TEXT,
    Edns                  TEXT,
    EdnsClientSubnet      TEXT,
    EdnsClientSubnetInfo  TEXT,
    SourceIpInfo          TEXT,
    AnswerIP              TEXT,
    AnswerIpInfo          TEXT,
    SecondLevelDomain     TEXT,
    ByteLength            INTEGER,
    QueryByteLength       INTEGER,
    SubdomainByteLength   INTEGER,
    LabelCount            INTEGER,
    SubdomainLabelCount   INTEGER,
    SubdomainEntropy      REAL,
    SubdomainLabelEncoded INTEGER,
    TrafficDirection      TEXT
)
"#;

const INSERT_SQL: &str = "INSERT INTO dnsevent VALUES (\
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
    ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, \
    ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, \
    ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38)";

#[derive(Clone)]
pub struct DnsDbHandle {
    tx: mpsc::Sender<Arc<DnsEvent>>,
}

impl DnsDbHandle {
    pub async fn send(&self, event: Arc<DnsEvent>) {
        let _ = self.tx.send(event).await;
    }
}

/// Start the sink worker. A database error resolves the join handle
/// to an error, which the runtime treats as fatal.
pub fn spawn(
    cfg: &DnsdbConfig,
    max_interval: std::time::Duration,
    shutdown: broadcast::Sender<()>,
) -> Result<(DnsDbHandle, JoinHandle<Result<()>>)> {
    let writer = DbRollingWriter::open(
        &cfg.filename,
        cfg.max_file_row_count,
        ChronoDuration::from_std(max_interval).context("rolling interval out of range")?,
        cfg.max_file_count,
    )?;
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(worker(rx, writer, shutdown.subscribe()));
    Ok((DnsDbHandle { tx }, task))
}

async fn worker(
    mut rx: mpsc::Receiver<Arc<DnsEvent>>,
    mut writer: DbRollingWriter,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("dnsdb sink exiting by shutdown signal");
                break;
            }

            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else {
                    info!("dnsdb sink exiting by event channel closed");
                    break;
                };
                writer.write(&event)?;
            }
        }
    }

    while let Ok(event) = rx.try_recv() {
        writer.write(&event)?;
    }
    writer.close()?;
    info!("dnsdb sink flushed and closed");
    Ok(())
}

/// One segment = one SQLite file plus its connection. Row counts and
/// the segment's time span drive rotation; the begin time is the
/// event time of the first row, not the wall clock at open.
pub struct DbRollingWriter {
    path: PathBuf,
    max_rows: u64,
    max_interval: ChronoDuration,
    max_files: usize,
    conn: Option<Connection>,
    rows: u64,
    rows_since_commit: u32,
    tx_open: bool,
    begin_at: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
}

impl DbRollingWriter {
    pub fn open(
        path: impl Into<PathBuf>,
        max_rows: u64,
        max_interval: ChronoDuration,
        max_files: usize,
    ) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create database directory `{}`", parent.display()))?;
        }
        let conn = open_segment(&path)?;
        Ok(Self {
            path,
            max_rows,
            max_interval,
            max_files,
            conn: Some(conn),
            rows: 0,
            rows_since_commit: 0,
            tx_open: false,
            begin_at: None,
            last_update: None,
        })
    }

    pub fn write(&mut self, event: &DnsEvent) -> Result<()> {
        if self.should_roll() {
            debug!(
                rows = self.rows,
                max_rows = self.max_rows,
                "rolling database segment"
            );
            self.roll()?;
        }

        if self.begin_at.is_none() {
            self.begin_at = Some(event.event_time);
        }
        self.insert(event)?;
        self.rows += 1;
        self.last_update = Some(event.event_time);
        Ok(())
    }

    fn should_roll(&self) -> bool {
        if self.rows >= self.max_rows {
            return true;
        }
        match (self.begin_at, self.last_update) {
            (Some(begin), Some(last)) => last - begin >= self.max_interval,
            _ => false,
        }
    }

    fn insert(&mut self, event: &DnsEvent) -> Result<()> {
        let conn = self.conn.as_mut().ok_or_else(|| anyhow!("segment already closed"))?;
        if !self.tx_open {
            conn.execute_batch("BEGIN").context("begin segment transaction")?;
            self.tx_open = true;
        }

        let mut stmt = conn
            .prepare_cached(INSERT_SQL)
            .context("prepare dnsevent insert")?;
        stmt.execute(params![
            event.event_time.to_rfc3339_opts(SecondsFormat::Micros, true),
            event.source_ip.to_string(),
            event.source_port,
            event.destination_ip.to_string(),
            event.destination_port,
            event.transaction_id,
            event.view,
            event.domain,
            event.query_class,
            event.query_type,
            event.rcode,
            event.response,
            event.authoritative,
            event.truncated,
            event.recursion_desired,
            event.recursion_available,
            event.zero,
            event.authenticated_data,
            event.checking_disabled,
            event.delay_microsecond,
            serde_json::to_string(&event.answer).context("encode answer column")?,
            serde_json::to_string(&event.authority).context("encode authority column")?,
            serde_json::to_string(&event.additional).context("encode additional column")?,
            event.edns,
            event.edns_client_subnet,
            serde_json::to_string(&event.edns_client_subnet_info)
                .context("encode ecs info column")?,
            serde_json::to_string(&event.source_ip_info).context("encode source info column")?,
            event.answer_ip,
            serde_json::to_string(&event.answer_ip_info).context("encode answer info column")?,
            event.second_level_domain,
            event.byte_length,
            event.query_byte_length,
            event.subdomain_byte_length,
            event.label_count,
            event.subdomain_label_count,
            event.subdomain_entropy,
            event.subdomain_label_encoded,
            event.traffic_direction,
        ])
        .context("insert dnsevent row")?;
        drop(stmt);

        self.rows_since_commit += 1;
        if self.rows_since_commit >= COMMIT_EVERY_ROWS {
            self.commit()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.tx_open {
            let conn = self.conn.as_mut().ok_or_else(|| anyhow!("segment already closed"))?;
            conn.execute_batch("COMMIT").context("commit segment transaction")?;
            self.tx_open = false;
            self.rows_since_commit = 0;
        }
        Ok(())
    }

    fn roll(&mut self) -> Result<()> {
        self.close_current()?;

        let last = self.last_update.unwrap_or_else(Utc::now);
        let suffix = last
            .with_timezone(&Local)
            .to_rfc3339_opts(SecondsFormat::Secs, false);
        let rotated = rotated_path(&self.path, &suffix);
        std::fs::rename(&self.path, &rotated).with_context(|| {
            format!("rename segment `{}` to `{}`", self.path.display(), rotated.display())
        })?;
        info!(segment = %rotated.display(), rows = self.rows, "database segment rotated");

        let base = self.path.clone();
        let max_files = self.max_files;
        std::thread::spawn(move || {
            if let Err(err) = enforce_retention(&base, max_files) {
                error!(%err, "database retention check failed");
            }
        });

        self.conn = Some(open_segment(&self.path)?);
        self.rows = 0;
        self.rows_since_commit = 0;
        self.begin_at = None;
        self.last_update = None;
        Ok(())
    }

    fn close_current(&mut self) -> Result<()> {
        self.commit()?;
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_, err)| err)
                .context("close segment connection")?;
        }
        Ok(())
    }

    /// Flush and close the active segment without rotating it.
    pub fn close(&mut self) -> Result<()> {
        self.close_current()
    }
}

fn open_segment(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open database segment `{}`", path.display()))?;
    conn.execute_batch(SCHEMA_SQL).context("create dnsevent table")?;
    Ok(conn)
}

fn rotated_path(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!("-{suffix}"));
    PathBuf::from(name)
}

/// Remove the oldest rotated segment once the rotated-file count
/// reaches `max_files - 1`. Files whose timestamp suffix does not
/// parse are counted but never selected for deletion. The off-by-one
/// guard mirrors the long-standing retention behavior and is pinned
/// by tests.
pub fn enforce_retention(base: &Path, max_files: usize) -> Result<()> {
    let parent = base.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let Some(file_name) = base.file_name().and_then(|n| n.to_str()) else {
        return Ok(());
    };
    let prefix = format!("{file_name}-");

    let mut rotated: Vec<(PathBuf, Option<DateTime<chrono::FixedOffset>>)> = Vec::new();
    for entry in std::fs::read_dir(parent)
        .with_context(|| format!("list segment directory `{}`", parent.display()))?
    {
        let entry = entry.context("read segment directory entry")?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix(&prefix) else { continue };
        let parsed = DateTime::parse_from_rfc3339(suffix).ok();
        if parsed.is_none() {
            info!(file = %name, "segment with unparseable timestamp ignored");
        }
        rotated.push((entry.path(), parsed));
    }

    if (rotated.len() as i64) < (max_files as i64 - 1) {
        return Ok(());
    }

    let Some((to_delete, _)) = rotated
        .iter()
        .filter_map(|(path, ts)| ts.map(|t| (path, t)))
        .min_by_key(|(_, ts)| *ts)
    else {
        return Ok(());
    };

    std::fs::remove_file(to_delete)
        .with_context(|| format!("remove old segment `{}`", to_delete.display()))?;
    info!(file = %to_delete.display(), max_files, "removed oldest database segment");
    Ok(())
}
