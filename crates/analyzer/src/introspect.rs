// Optional HTTP introspection endpoint exposing the status snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::report::{Counters, StatusSnapshot};

pub fn spawn(
    port: u16,
    counters: Arc<Counters>,
    shutdown: broadcast::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new()
            .route("/debug/status", get(status))
            .with_state(counters);

        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(port, %err, "introspection endpoint bind failed");
                return;
            }
        };
        info!(port, "introspection endpoint listening");

        let mut shutdown_rx = shutdown.subscribe();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;
        if let Err(err) = result {
            error!(%err, "introspection endpoint failed");
        }
    })
}

async fn status(State(counters): State<Arc<Counters>>) -> Json<StatusSnapshot> {
    Json(counters.snapshot())
}
