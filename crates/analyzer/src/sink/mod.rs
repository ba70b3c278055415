// Result sinks and their dispatch. Like the middleware set, the sink
// set is closed, so dispatch is an enum. Each sink owns a dedicated
// worker task fed through a bounded channel; senders never block on
// sink I/O, only on the channel.

pub mod dnsdb;
pub mod dnslog;
pub mod rollfile;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use dnspipe_common::event::DnsEvent;

use crate::config::{Config, ResultKind};

pub use dnsdb::DnsDbHandle;
pub use dnslog::DnsLogHandle;

pub enum ResultSink {
    DnsLog(DnsLogHandle),
    DnsDb(DnsDbHandle),
}

impl ResultSink {
    pub async fn send(&self, event: Arc<DnsEvent>) {
        match self {
            ResultSink::DnsLog(h) => h.send(event).await,
            ResultSink::DnsDb(h) => h.send(event).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResultSink::DnsLog(_) => "dnslog",
            ResultSink::DnsDb(_) => "dnsdb",
        }
    }
}

/// Build the enabled sinks in configured order. Returns the dispatch
/// handles plus the worker join handles the runtime waits on at
/// shutdown; a worker resolving to an error is sink-fatal.
pub fn build_sinks(
    cfg: &Config,
    shutdown: broadcast::Sender<()>,
) -> Result<(Vec<ResultSink>, Vec<JoinHandle<Result<()>>>)> {
    let mut sinks = Vec::new();
    let mut workers = Vec::new();
    for kind in &cfg.result_handlers {
        match kind {
            ResultKind::Dnslog if cfg.dnslog.enable => {
                let (handle, task) = dnslog::spawn(&cfg.dnslog, shutdown.clone())?;
                sinks.push(ResultSink::DnsLog(handle));
                workers.push(task);
            }
            ResultKind::Dnsdb if cfg.dnsdb.enable => {
                let (handle, task) =
                    dnsdb::spawn(&cfg.dnsdb, cfg.dnsdb_rolling_interval()?, shutdown.clone())?;
                sinks.push(ResultSink::DnsDb(handle));
                workers.push(task);
            }
            _ => {}
        }
    }
    Ok((sinks, workers))
}
