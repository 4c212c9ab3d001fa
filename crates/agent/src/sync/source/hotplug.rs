//! Native hotplug change source
//!
//! Registers a hotplug callback with the USB subsystem and runs a dedicated
//! worker thread blocked in the subsystem's event handling call. Each wait
//! that reports a hotplug event fires the trigger, then the loop blocks again.
//!
//! The native wait is not cancellable, so it is bounded by `event_timeout`:
//! cancellation is observed within one timeout.

use super::{CancellationHandle, ChangeSource, Trigger};
use common::{EventSink, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on one native event wait
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Back-off after a failed event wait
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// One hotplug registration on the native USB subsystem
pub trait HotplugBackend: Send {
    /// Register the hotplug callback
    fn register(&mut self) -> Result<()>;

    /// Block for at most `timeout` handling native events
    ///
    /// Returns whether a device arrived or left during the wait.
    fn wait_for_events(&mut self, timeout: Duration) -> Result<bool>;

    /// Remove the hotplug callback
    fn deregister(&mut self);
}

/// Creates a fresh [`HotplugBackend`] for every sync session
pub trait HotplugProvider: Send + Sync {
    fn connect(&self) -> Result<Box<dyn HotplugBackend>>;
}

/// Change source driven by native hotplug callbacks
pub struct HotplugSource {
    provider: Arc<dyn HotplugProvider>,
    event_timeout: Duration,
}

impl HotplugSource {
    pub fn new(provider: Arc<dyn HotplugProvider>) -> Self {
        Self {
            provider,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
        }
    }

    pub fn with_event_timeout(mut self, event_timeout: Duration) -> Self {
        self.event_timeout = event_timeout;
        self
    }
}

impl ChangeSource for HotplugSource {
    fn name(&self) -> &'static str {
        "hotplug"
    }

    fn start(&mut self, trigger: Trigger, _sink: Arc<dyn EventSink>) -> Result<CancellationHandle> {
        let mut backend = self.provider.connect()?;
        backend.register()?;

        let cancel = CancellationHandle::new();
        let worker_cancel = cancel.clone();
        let event_timeout = self.event_timeout;

        let spawned = std::thread::Builder::new()
            .name("hotplug-events".to_string())
            .spawn(move || run_event_loop(backend, worker_cancel, trigger, event_timeout));

        if let Err(e) = spawned {
            // The backend moved into the failed closure and was dropped with it
            return Err(common::Error::HotplugRegistration(format!(
                "failed to spawn hotplug worker: {}",
                e
            )));
        }

        debug!("Hotplug worker started");
        Ok(cancel)
    }
}

/// Worker loop: wait for events, trigger, repeat until cancelled
fn run_event_loop(
    mut backend: Box<dyn HotplugBackend>,
    cancel: CancellationHandle,
    trigger: Trigger,
    event_timeout: Duration,
) {
    info!("Hotplug worker thread started");

    while !cancel.is_cancelled() {
        match backend.wait_for_events(event_timeout) {
            Ok(true) => {
                if cancel.is_cancelled() {
                    break;
                }
                debug!("Hotplug event, rescanning");
                trigger();
            }
            Ok(false) => {}
            Err(e) => {
                // Transient: keep the worker alive
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    backend.deregister();
    info!("Hotplug worker thread stopped");
}
