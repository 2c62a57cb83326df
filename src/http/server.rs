//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::enforce;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::{CounterStore, RateLimiter};

/// Body returned by the application handler for admitted requests.
pub const ALLOWED_BODY: &str = "Request Allowed.";

async fn allowed() -> &'static str {
    ALLOWED_BODY
}

/// Build the application router with admission control in front of it.
///
/// Every path and method reaches the same handler, and every request passes
/// through [`enforce`] first.
pub fn router<S: CounterStore + 'static>(limiter: RateLimiter<S>) -> Router {
    Router::new()
        .fallback(allowed)
        .layer(middleware::from_fn_with_state(limiter, enforce::<S>))
}

/// Serve the router on an already bound listener until `signal` resolves.
pub async fn serve_listener<S, F>(
    listener: TcpListener,
    limiter: RateLimiter<S>,
    signal: F,
) -> Result<()>
where
    S: CounterStore + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(limiter).into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        })
}

/// HTTP server for the admission-controlled application.
pub struct HttpServer<S: CounterStore + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: RateLimiter<S>,
}

impl<S: CounterStore + 'static> HttpServer<S> {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: RateLimiter<S>) -> Self {
        Self { addr, rate_limiter }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            TurnstileError::Io(e)
        })?;

        info!(addr = %self.addr, "Starting HTTP server with admission control");

        serve_listener(listener, self.rate_limiter, signal).await
    }
}
