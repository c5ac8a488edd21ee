//! Local HTTP listener that receives the OAuth redirect.

use super::{AuthBroker, CallbackParams, CALLBACK_PATH};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const CLOSE_WINDOW_PAGE: &str = "<script>window.close();</script>";

/// Default grace period for stopping the listener at process exit.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub fn router(broker: Arc<AuthBroker>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(callback))
        .with_state(broker)
}

async fn callback(
    State(broker): State<Arc<AuthBroker>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match broker.handle_callback(params).await {
        Ok(()) => Html(CLOSE_WINDOW_PAGE).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "OAuth callback rejected");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

/// Listener bound for the lifetime of the run; every login reuses it.
pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl CallbackServer {
    pub async fn bind(addr: SocketAddr, broker: Arc<AuthBroker>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, signal) = oneshot::channel::<()>();

        tracing::debug!(address = %local_addr, "OAuth callback listener bound");

        let handle = tokio::spawn(async move {
            axum::serve(listener, router(broker))
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        Ok(Self {
            local_addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting callbacks, waiting at most `grace` for in-flight requests.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(());
        match tokio::time::timeout(grace, self.handle).await {
            Ok(Ok(Ok(()))) => tracing::debug!("OAuth callback listener stopped"),
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "OAuth callback listener failed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "OAuth callback task panicked"),
            Err(_) => tracing::warn!("OAuth callback listener did not stop within grace period"),
        }
    }
}
