//! # Gantry
//!
//! Graceful-shutdown scaffolding for HTTP services.
//!
//! Gantry sits in front of an application's request handler and makes
//! process shutdown safe:
//!
//! - in-flight requests are allowed to finish, up to a configurable
//!   grace period;
//! - new requests are rejected with a content-negotiated
//!   `503 Service Unavailable` carrying the shutdown reason;
//! - the owning process learns exactly when it is safe to exit.
//!
//! It does **not** do TLS, authentication, or routing. It wraps exactly
//! one listener and one handler, and everything else stays the
//! application's business.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gantry::{HttpScaffold, ScaffoldConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gantry::ScaffoldError> {
//!     let mut scaffold = HttpScaffold::new(ScaffoldConfig::builder().port(8080).build());
//!     scaffold.catch_signals();
//!
//!     let reason = scaffold.listen(my_handler).await?;
//!     println!("HTTP server shut down: {reason}");
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/gantry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod handler;
pub mod negotiate;
pub mod scaffold;
mod signals;
pub mod tracker;

pub use config::{ScaffoldConfig, ScaffoldConfigBuilder, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_PORT};
pub use handler::{GuardedHandler, HttpResponse, ResponseBody, ScaffoldHandler};
pub use negotiate::select_media_type;
pub use scaffold::{HttpScaffold, ScaffoldError, ShutdownHandle};
pub use tracker::{Completion, RequestGuard, RequestTracker, ShutdownReason};
