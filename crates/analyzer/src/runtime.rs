// Pipeline orchestrator: drains the event source, runs the middleware
// chain on a bounded worker pool, and fans enriched events out to the
// result sinks. Owns the shutdown sequence.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use dnspipe_common::event::DnsEvent;

use crate::config::{Config, InputType};
use crate::handler::{build_middlewares, Middleware};
use crate::introspect;
use crate::report::{spawn_reporter, Counters};
use crate::sink::{build_sinks, ResultSink};
use crate::source::{PacketSource, SourceMode};

const POOL_RELEASE_DEADLINE: Duration = Duration::from_secs(3);

/// Run the pipeline until the source is exhausted, a shutdown signal
/// arrives, or a sink fails.
pub async fn run(cfg: Config) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = ctrl_c_tx.send(());
        }
    });

    let (decode_workers, handler_workers) = cfg.effective_worker_counts();
    if cfg.session_enabled()
        && (cfg.decode_worker_count > 1 || cfg.handler_worker_count > 1)
    {
        warn!(
            "session handler enabled: dns events cannot be processed in parallel, \
             forcing worker counts to 1"
        );
    }

    let middlewares = Arc::new(build_middlewares(&cfg)?);
    info!(
        handlers = ?middlewares.iter().map(|m| m.name()).collect::<Vec<_>>(),
        "middleware chain ready"
    );

    let (sinks, sink_workers) = build_sinks(&cfg, shutdown_tx.clone())?;
    if sinks.is_empty() {
        return Err(anyhow!("should at least one result handler be enabled"));
    }
    info!(
        sinks = ?sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "result sinks ready"
    );
    let sinks = Arc::new(sinks);

    let mode = match cfg.input_type {
        InputType::Capture => SourceMode::Capture { device: cfg.device_name.clone() },
        InputType::File => SourceMode::Files { paths: cfg.capture_files.clone() },
    };
    let mut source =
        PacketSource::spawn(mode, cfg.bpf_filter.clone(), decode_workers, shutdown_tx.clone())?;

    let counters = Counters::new();
    let reporter = spawn_reporter(
        counters.clone(),
        cfg.status_report_interval()?,
        shutdown_tx.clone(),
    );
    let introspect_task = if cfg.pprof_enable {
        Some(introspect::spawn(cfg.pprof_http_port, counters.clone(), shutdown_tx.clone()))
    } else {
        None
    };

    // Sink workers are watched so a sink-fatal error stops the
    // pipeline as soon as it happens, not at shutdown.
    let (failure_tx, mut failure_rx) = mpsc::channel::<anyhow::Error>(sink_workers.len().max(1));
    let mut monitors = Vec::new();
    for worker in sink_workers {
        monitors.push(watch_sink_worker(worker, failure_tx.clone(), shutdown_tx.clone()));
    }
    drop(failure_tx);

    let pool = Arc::new(Semaphore::new(handler_workers));
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut sink_failure: Option<anyhow::Error> = None;

    info!("pipeline running");
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                info!("orchestrator exiting by shutdown signal");
                break;
            }

            failure = failure_rx.recv() => {
                if let Some(err) = failure {
                    sink_failure = Some(err);
                }
                break;
            }

            maybe_event = source.events.recv() => {
                let Some(event) = maybe_event else {
                    info!("orchestrator exiting by event channel closed");
                    break;
                };
                counters.record_event(event.event_time);
                dispatch(event, &pool, &middlewares, &sinks).await;
            }

            maybe_error = source.errors.recv() => {
                if maybe_error.is_none() {
                    info!("orchestrator exiting by error channel closed");
                    break;
                }
                counters.record_error();
            }
        }
    }

    // Shutdown: signal everyone, give the pool a bounded drain window,
    // then wait for the source and sinks to flush and close.
    let _ = shutdown_tx.send(());

    if tokio::time::timeout(
        POOL_RELEASE_DEADLINE,
        pool.acquire_many(handler_workers as u32),
    )
    .await
    .is_err()
    {
        warn!(
            deadline = ?POOL_RELEASE_DEADLINE,
            "handler worker pool release timed out"
        );
    }

    drop(sinks);
    source.join().await;
    for monitor in monitors {
        let _ = monitor.await;
    }
    let _ = reporter.await;
    if let Some(task) = introspect_task {
        let _ = task.await;
    }

    if sink_failure.is_none() {
        if let Some(err) = failure_rx.recv().await {
            sink_failure = Some(err);
        }
    }
    if let Some(err) = sink_failure {
        return Err(err.context("result sink failed"));
    }

    info!("all handlers exited, pipeline closed");
    Ok(())
}

/// Submit one event to the worker pool: middlewares in declared
/// order, then every sink in order.
async fn dispatch(
    event: DnsEvent,
    pool: &Arc<Semaphore>,
    middlewares: &Arc<Vec<Middleware>>,
    sinks: &Arc<Vec<ResultSink>>,
) {
    let Ok(permit) = pool.clone().acquire_owned().await else {
        return;
    };
    let middlewares = middlewares.clone();
    let sinks = sinks.clone();
    tokio::spawn(async move {
        let mut event = event;
        for middleware in middlewares.iter() {
            event = middleware.handle(event);
        }
        let event = Arc::new(event);
        for sink in sinks.iter() {
            sink.send(event.clone()).await;
        }
        drop(permit);
    });
}

fn watch_sink_worker(
    worker: JoinHandle<Result<()>>,
    failure_tx: mpsc::Sender<anyhow::Error>,
    shutdown_tx: broadcast::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let failure = match worker.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(join_err) => Some(anyhow!("sink worker panicked: {join_err}")),
        };
        if let Some(err) = failure {
            error!(%err, "result sink failed, stopping pipeline");
            let _ = failure_tx.send(err).await;
            let _ = shutdown_tx.send(());
        }
    })
}
