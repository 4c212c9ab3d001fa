//! Fixed-interval poll change source
//!
//! Fires once immediately, then every `interval` until cancelled. Used where
//! no native event delivery is available.

use super::{CancellationHandle, ChangeSource, Trigger, fire, runtime_handle};
use common::{EventSink, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Timer-driven change source
pub struct PollSource {
    interval: Duration,
}

impl PollSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for PollSource {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ChangeSource for PollSource {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn start(&mut self, trigger: Trigger, _sink: Arc<dyn EventSink>) -> Result<CancellationHandle> {
        let runtime = runtime_handle()?;
        let cancel = CancellationHandle::new();
        let task_cancel = cancel.clone();
        let period = self.interval;

        runtime.spawn(async move {
            info!("Polling for devices every {:?}", period);

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("Poll tick");
                        fire(&task_cancel, &trigger).await;
                    }
                }
            }

            info!("Poll loop stopped");
        });

        Ok(cancel)
    }
}
