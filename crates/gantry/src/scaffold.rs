//! The HTTP scaffold lifecycle.
//!
//! [`HttpScaffold`] owns the listening socket and the request tracker
//! together. It binds the socket, serves connections through the
//! [`GuardedHandler`], and blocks the caller of [`listen`] until the
//! tracker's completion event fires. At that point the listener is
//! closed and the shutdown reason is returned.
//!
//! # Example
//!
//! ```rust,ignore
//! use gantry::{HttpScaffold, ScaffoldConfig, ShutdownReason};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gantry::ScaffoldError> {
//!     let mut scaffold = HttpScaffold::new(ScaffoldConfig::builder().port(8080).build());
//!
//!     // Catch SIGINT/SIGTERM and trigger a graceful shutdown.
//!     scaffold.catch_signals();
//!
//!     // Blocks until shutdown; the reason tells us why we stopped.
//!     let reason = scaffold.listen(my_handler).await?;
//!     println!("server shut down: {reason}");
//!     Ok(())
//! }
//! ```

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::config::ScaffoldConfig;
use crate::handler::{GuardedHandler, ScaffoldHandler};
use crate::signals;
use crate::tracker::{Completion, RequestTracker, ShutdownReason};

/// Errors surfaced by the scaffold lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ScaffoldError {
    /// The listening socket could not be bound. Fatal; never retried.
    #[error("failed to bind listening socket: {source}")]
    Bind {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// `listen` was already called; the completion event has exactly one
    /// consumer per scaffold.
    #[error("listen was already called on this scaffold")]
    AlreadyListening,
}

/// A clonable handle for triggering shutdown from other tasks.
///
/// `listen` borrows the scaffold for its whole blocking lifetime, so any
/// task that wants to stop the server grabs one of these first.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tracker: RequestTracker,
}

impl ShutdownHandle {
    /// Triggers shutdown with the given reason.
    ///
    /// Safe to call from any task, any number of times; only the first
    /// call's reason is honored.
    pub fn shutdown(&self, reason: ShutdownReason) {
        self.tracker.trigger_shutdown(reason);
    }
}

/// A graceful-shutdown scaffold around a single HTTP listener.
///
/// One scaffold owns one listener and one [`RequestTracker`]. It is
/// single-use: after [`listen`](Self::listen) returns, the scaffold is
/// done.
#[derive(Debug)]
pub struct HttpScaffold {
    config: ScaffoldConfig,
    tracker: RequestTracker,
    completion: Option<Completion>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
}

impl HttpScaffold {
    /// Creates a new scaffold with the given configuration.
    ///
    /// The tracker (and its actor task) is created here, so this must be
    /// called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: ScaffoldConfig) -> Self {
        let (tracker, completion) = RequestTracker::start(config.grace_period());
        Self {
            config,
            tracker,
            completion: Some(completion),
            listener: None,
            local_addr: None,
        }
    }

    /// Creates a scaffold with default configuration (ephemeral port,
    /// 30-second grace period).
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ScaffoldConfig::default())
    }

    /// Binds the listening socket.
    ///
    /// Optional: [`listen`](Self::listen) opens automatically. Calling
    /// `open` first is useful to learn the effective address (an
    /// ephemeral port in particular) before serving starts. A no-op when
    /// already open.
    ///
    /// # Errors
    ///
    /// Returns [`ScaffoldError::Bind`] if the port cannot be bound
    /// (already in use, permission denied). This is fatal and not
    /// retried.
    pub async fn open(&mut self) -> Result<(), ScaffoldError> {
        if self.listener.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.port())).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "listening socket bound");

        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        Ok(())
    }

    /// Returns the effective bound address, or `None` before a
    /// successful [`open`](Self::open).
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns a handle for triggering shutdown from other tasks.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tracker: self.tracker.clone(),
        }
    }

    /// Triggers shutdown with the given reason.
    ///
    /// Equivalent to [`ShutdownHandle::shutdown`]; only the first call's
    /// reason is honored.
    pub fn shutdown(&self, reason: ShutdownReason) {
        self.tracker.trigger_shutdown(reason);
    }

    /// Installs handlers for common process signals.
    ///
    /// SIGINT and SIGTERM trigger `shutdown(ShutdownReason::SignalCaught)`
    /// once; SIGHUP dumps diagnostics to stderr without touching the
    /// tracker. On non-Unix platforms only Ctrl-C is caught.
    pub fn catch_signals(&self) {
        signals::spawn(self.tracker.clone());
    }

    /// Serves HTTP until shutdown, then returns the shutdown reason.
    ///
    /// Opens the listener if [`open`](Self::open) was not called, wraps
    /// `handler` in a [`GuardedHandler`] bound to this scaffold's
    /// tracker, and accepts connections on a spawned task. The calling
    /// task blocks on the tracker's completion event; when it fires the
    /// listener is closed (exactly once) and the stored reason is
    /// returned. In-flight handlers keep running to completion: the
    /// grace deadline stops the waiting, not the work.
    ///
    /// # Errors
    ///
    /// Returns [`ScaffoldError::Bind`] if the implicit open fails, or
    /// [`ScaffoldError::AlreadyListening`] on a second call.
    pub async fn listen<H>(&mut self, handler: H) -> Result<ShutdownReason, ScaffoldError>
    where
        H: ScaffoldHandler<Incoming>,
    {
        if self.completion.is_none() {
            return Err(ScaffoldError::AlreadyListening);
        }
        // Open before consuming the completion so a bind failure leaves
        // the scaffold reporting the real problem on a retry.
        self.open().await?;
        let completion = self
            .completion
            .take()
            .ok_or(ScaffoldError::AlreadyListening)?;
        let listener = self
            .listener
            .take()
            .ok_or(ScaffoldError::AlreadyListening)?;

        let guarded = GuardedHandler::new(self.tracker.clone(), handler);
        let accept = tokio::spawn(accept_loop(listener, guarded));

        let reason = completion.await;

        // Aborting the accept task drops the listener, closing it exactly
        // once and never concurrently with an in-progress accept.
        accept.abort();
        tracing::info!(%reason, "scaffold shut down");
        Ok(reason)
    }
}

/// Accepts connections until aborted, serving each on its own task.
async fn accept_loop(listener: TcpListener, handler: GuardedHandler<Incoming>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let handler = handler.clone();
                        async move { Ok::<_, Infallible>(handler.serve(req).await) }
                    });

                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        tracing::debug!(%remote_addr, error = %e, "connection error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to accept connection");
            }
        }
    }
}
