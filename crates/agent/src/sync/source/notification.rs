//! Debounced device-notification change source
//!
//! Device-change notifications can arrive in bursts and can arrive before the
//! device is actually enumerable. Notifications land in a single-slot channel
//! (a pending notification is never duplicated), and a debounce loop turns
//! them into scans:
//!
//! ```text
//! wait for notification -> scan -> quiet period -> scan -> wait ...
//!                                  ^          |
//!                                  +----------+ notification: restart quiet period
//! ```
//!
//! A burst therefore costs one immediate scan plus one scan once the bus has
//! been quiet for `quiet_period`.

use super::{CancellationHandle, ChangeSource, Trigger, fire, runtime_handle};
use async_channel::{Receiver, bounded};
use common::{EventSink, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Default quiet period before the confirmation scan
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Callback a subscriber invokes on each device-change notification
pub type Notify = Arc<dyn Fn() + Send + Sync>;

/// Subscription to an OS-level device-change notification stream
pub trait NotificationSubscriber: Send + Sync {
    /// Deliver notifications through `notify` until `cancel` is signalled
    ///
    /// Blocks for the lifetime of the subscription. Returns an error if the
    /// subscription cannot be established or breaks down.
    fn subscribe(&self, cancel: &CancellationHandle, notify: Notify) -> Result<()>;
}

/// Change source driven by debounced device notifications
pub struct NotificationSource {
    subscriber: Arc<dyn NotificationSubscriber>,
    quiet_period: Duration,
}

impl NotificationSource {
    pub fn new(subscriber: Arc<dyn NotificationSubscriber>) -> Self {
        Self {
            subscriber,
            quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }

    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }
}

impl ChangeSource for NotificationSource {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn start(&mut self, trigger: Trigger, sink: Arc<dyn EventSink>) -> Result<CancellationHandle> {
        let runtime = runtime_handle()?;
        let cancel = CancellationHandle::new();

        // Single slot: a burst collapses into one pending notification
        let (pending_tx, pending_rx) = bounded::<()>(1);
        let notify: Notify = Arc::new(move || {
            let _ = pending_tx.try_send(());
        });

        let subscriber = Arc::clone(&self.subscriber);
        let subscriber_cancel = cancel.clone();
        std::thread::Builder::new()
            .name("device-notifications".to_string())
            .spawn(move || {
                if let Err(e) = subscriber.subscribe(&subscriber_cancel, notify) {
                    if !subscriber_cancel.is_cancelled() {
                        error!("Device notification subscription failed: {}", e);
                        sink.on_error(&e.to_string());
                    }
                }
                debug!("Device notification subscription ended");
            })
            .map_err(|e| {
                common::Error::NotificationStream(format!(
                    "failed to spawn notification thread: {}",
                    e
                ))
            })?;

        runtime.spawn(debounce_loop(pending_rx, cancel.clone(), trigger, self.quiet_period));

        Ok(cancel)
    }
}

/// Consume pending notifications and run debounced scans
///
/// Exits on cancellation, or once the subscriber is gone and the final
/// confirmation scan has run.
async fn debounce_loop(
    pending: Receiver<()>,
    cancel: CancellationHandle,
    trigger: Trigger,
    quiet_period: Duration,
) {
    info!("Device notification loop started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = pending.recv() => {
                if received.is_err() {
                    break;
                }
            }
        }

        fire(&cancel, &trigger).await;

        // The OS may signal a device before it becomes enumerable: scan again
        // once notifications have been quiet for a full period
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Device notification loop stopped");
                    return;
                }
                received = pending.recv() => {
                    if received.is_err() {
                        break;
                    }
                    debug!("Notification during quiet period, restarting wait");
                }
                _ = tokio::time::sleep(quiet_period) => break,
            }
        }

        fire(&cancel, &trigger).await;
    }

    info!("Device notification loop stopped");
}
