use crate::status_bridge::model::StatusModel;
use crate::workflow::runner::SafetyApp;
use anyhow::Context;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use surakshacore::session::SharingOutcome;
use warp::http::StatusCode;
use warp::Filter;

pub fn bridge_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

#[derive(Debug, Deserialize)]
struct SharingToggle {
    enabled: bool,
}

/// HTTP front for poking a running app: status, SOS, shake, cancel, sharing.
pub struct StatusBridge {
    app: Arc<SafetyApp>,
}

impl StatusBridge {
    pub fn new(app: Arc<SafetyApp>) -> Self {
        Self { app }
    }

    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let app = self.app.clone();
        let app_filter = warp::any().map(move || app.clone());

        let status_route = warp::path("status")
            .and(warp::get())
            .and(app_filter.clone())
            .map(|app: Arc<SafetyApp>| warp::reply::json(&StatusModel::capture(&app)));

        let sos_route = warp::path("sos")
            .and(warp::post())
            .and(app_filter.clone())
            .map(|app: Arc<SafetyApp>| {
                let outcome = app.orchestrator.trigger_button();
                info!("[bridge] SOS button -> {outcome:?}");
                warp::reply::json(&json!({ "outcome": outcome }))
            });

        let shake_route = warp::path("shake")
            .and(warp::post())
            .and(app_filter.clone())
            .map(|app: Arc<SafetyApp>| {
                let event = app.sampler.simulate_shake();
                warp::reply::json(&json!({
                    "shakeCount": event.shake_count,
                    "emergency": app.orchestrator.status().label(),
                }))
            });

        let cancel_route = warp::path("cancel")
            .and(warp::post())
            .and(app_filter.clone())
            .map(|app: Arc<SafetyApp>| {
                let cancelled = app.orchestrator.cancel_pending();
                warp::reply::json(&json!({ "cancelled": cancelled }))
            });

        let sharing_route = warp::path("sharing")
            .and(warp::post())
            .and(warp::body::json())
            .and(app_filter)
            .and_then(|toggle: SharingToggle, app: Arc<SafetyApp>| async move {
                Ok::<_, Infallible>(toggle_sharing(&app, toggle.enabled).await)
            });

        status_route
            .or(sos_route)
            .or(shake_route)
            .or(cancel_route)
            .or(sharing_route)
    }

    /// Serves until `shutdown` resolves.
    pub async fn serve<F>(&self, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (bound, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .with_context(|| format!("binding HTTP bridge on {addr}"))?;
        self.publish_status(&format!("HTTP bridge listening on {bound} (Ctrl+C to stop)"));
        server.await;
        Ok(())
    }

    pub fn publish_status(&self, message: &str) {
        info!("[bridge] {message}");
    }
}

async fn toggle_sharing(
    app: &SafetyApp,
    enabled: bool,
) -> warp::reply::WithStatus<warp::reply::Json> {
    if !enabled {
        app.sharing.disable();
        return warp::reply::with_status(
            warp::reply::json(&json!({ "active": false })),
            StatusCode::OK,
        );
    }
    match app.sharing.enable().await {
        Ok(SharingOutcome::Started(summary)) => warp::reply::with_status(
            warp::reply::json(&json!({ "active": true, "summary": summary })),
            StatusCode::OK,
        ),
        Ok(SharingOutcome::AlreadyActive) => warp::reply::with_status(
            warp::reply::json(&json!({ "active": true })),
            StatusCode::OK,
        ),
        Err(err) => {
            warn!("[bridge] sharing failed: {err}");
            warp::reply::with_status(
                warp::reply::json(&json!({ "active": false, "error": err.to_string() })),
                StatusCode::BAD_GATEWAY,
            )
        }
    }
}
