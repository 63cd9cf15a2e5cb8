//! Scaffold configuration types.
//!
//! Builder-pattern configuration for [`HttpScaffold`](crate::HttpScaffold):
//! the listening port and the grace period are the whole surface.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use gantry::ScaffoldConfig;
//!
//! let config = ScaffoldConfig::builder()
//!     .port(8080)
//!     .grace_period(Duration::from_secs(10))
//!     .build();
//!
//! assert_eq!(config.port(), 8080);
//! ```

use std::time::Duration;

/// Default listening port. Zero means "assign an ephemeral port".
pub const DEFAULT_PORT: u16 = 0;

/// Default grace period in seconds.
///
/// 30 seconds matches the default termination grace period used by
/// common container orchestrators (Kubernetes in particular), so a
/// scaffold with default settings drains within the window the
/// orchestrator already allows.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;

/// Configuration for an [`HttpScaffold`](crate::HttpScaffold).
///
/// Use [`ScaffoldConfig::builder()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldConfig {
    /// Port to listen on; 0 requests an ephemeral port.
    port: u16,

    /// How long to wait for in-flight requests once draining begins.
    grace_period: Duration,
}

impl ScaffoldConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ScaffoldConfigBuilder {
        ScaffoldConfigBuilder::default()
    }

    /// Returns the configured listening port (0 = ephemeral).
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the grace period for draining.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ScaffoldConfig`].
#[derive(Debug, Clone)]
pub struct ScaffoldConfigBuilder {
    port: u16,
    grace_period: Duration,
}

impl ScaffoldConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
        }
    }

    /// Sets the listening port. Zero requests an ephemeral port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the grace period: the maximum time the scaffold waits for
    /// in-flight requests to finish once shutdown has been triggered.
    #[must_use]
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Builds the [`ScaffoldConfig`].
    #[must_use]
    pub fn build(self) -> ScaffoldConfig {
        ScaffoldConfig {
            port: self.port,
            grace_period: self.grace_period,
        }
    }
}

impl Default for ScaffoldConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
