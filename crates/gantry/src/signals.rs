//! OS signal bridge.
//!
//! Converts process signals into tracker events: SIGINT and SIGTERM
//! trigger one graceful shutdown, SIGHUP dumps diagnostics to stderr.
//! The core never depends on signal delivery semantics; everything goes
//! through [`RequestTracker::trigger_shutdown`].

use crate::tracker::{RequestTracker, ShutdownReason};

/// Spawns the signal-watching task for the given tracker.
pub(crate) fn spawn(tracker: RequestTracker) {
    tokio::spawn(watch(tracker));
}

#[cfg(unix)]
async fn watch(tracker: RequestTracker) {
    use tokio::signal::unix::{signal, SignalKind};

    let streams = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    );
    let (Ok(mut sigint), Ok(mut sigterm), Ok(mut sighup)) = streams else {
        tracing::error!("failed to register signal handlers");
        return;
    };

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
                tracker.trigger_shutdown(ShutdownReason::SignalCaught);
                return;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
                tracker.trigger_shutdown(ShutdownReason::SignalCaught);
                return;
            }
            _ = sighup.recv() => {
                // Purely diagnostic; the tracker is not involved.
                dump_diagnostics(&tracker);
            }
        }
    }
}

#[cfg(not(unix))]
async fn watch(tracker: RequestTracker) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("received Ctrl+C, initiating graceful shutdown");
        tracker.trigger_shutdown(ShutdownReason::SignalCaught);
    } else {
        tracing::error!("failed to wait for Ctrl+C");
    }
}

/// Writes a diagnostic dump to stderr: the captured backtrace plus the
/// live admission count.
#[cfg_attr(not(unix), allow(dead_code))]
fn dump_diagnostics(tracker: &RequestTracker) {
    let backtrace = std::backtrace::Backtrace::force_capture();
    eprintln!("==== gantry diagnostic dump ====");
    eprintln!("active requests: {}", tracker.active_requests());
    eprintln!("draining: {}", tracker.is_draining());
    eprintln!("{backtrace}");
    eprintln!("==== end diagnostic dump ====");
}
