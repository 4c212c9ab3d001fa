//! Change sources
//!
//! A change source tells the sync engine when to re-scan. Three strategies
//! are provided and injected into the engine at construction time:
//!
//! - [`HotplugSource`]: blocking native hotplug event loop on a dedicated thread
//! - [`NotificationSource`]: device-change notifications, coalesced and debounced
//! - [`PollSource`]: fixed-interval timer
//!
//! [`FallbackSource`] pairs a preferred source with one to use when the
//! preferred source cannot register with the platform.
//!
//! Every source owns its background context and hands back a
//! [`CancellationHandle`]. Once the handle is cancelled no further trigger is
//! fired, and the background context exits within one event wait or timer tick.

pub mod fallback;
pub mod hotplug;
pub mod notification;
pub mod poll;

pub use fallback::FallbackSource;
pub use hotplug::{HotplugBackend, HotplugProvider, HotplugSource};
pub use notification::{Notify, NotificationSource, NotificationSubscriber};
pub use poll::PollSource;

use common::EventSink;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Request for a scan-and-emit cycle
///
/// Runs the scan synchronously in the caller's context; callers on the Tokio
/// runtime go through [`fire`] so the scan lands on the blocking pool.
pub type Trigger = Arc<dyn Fn() + Send + Sync>;

/// Cancellation handle of a running source
///
/// Cloning shares the underlying signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Does not wait for the background context to exit.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been signalled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Strategy deciding when the engine re-scans
pub trait ChangeSource: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Start the background context
    ///
    /// Setup failures are returned synchronously. Failures after start are
    /// reported through `sink.on_error`.
    fn start(&mut self, trigger: Trigger, sink: Arc<dyn EventSink>) -> common::Result<CancellationHandle>;
}

/// Run `trigger` on the blocking pool unless `cancel` was signalled
///
/// Awaits the scan so a source never overlaps its own scans.
pub(crate) async fn fire(cancel: &CancellationHandle, trigger: &Trigger) {
    if cancel.is_cancelled() {
        return;
    }
    let trigger = Arc::clone(trigger);
    if let Err(e) = tokio::task::spawn_blocking(move || trigger()).await {
        error!("Scan task failed: {}", e);
    }
}

/// Handle of the Tokio runtime hosting timer-driven sources
pub(crate) fn runtime_handle() -> common::Result<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|e| common::Error::Runtime(e.to_string()))
}
