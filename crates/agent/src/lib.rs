//! DFU discovery agent
//!
//! Reports USB devices in DFU mode to a parent process over the
//! pluggable-discovery protocol. The [`sync::SyncEngine`] keeps a snapshot
//! of the attached DFU interfaces and emits add/remove events whenever a
//! change source asks it to re-scan; the [`server::DiscoveryServer`] maps
//! protocol commands onto the engine.

pub mod config;
pub mod server;
pub mod sync;
pub mod usb;

use config::{SyncSettings, SyncStrategy};
use std::sync::Arc;
use sync::source::{ChangeSource, FallbackSource, HotplugSource, NotificationSource, PollSource};
use tracing::info;
use usb::{LibusbBackend, LibusbHotplug, LibusbNotifier};

/// Build the change source for `settings` on top of `backend`
///
/// `auto` prefers native hotplug and falls back to polling when the
/// backend's context refuses the hotplug registration. Nothing here touches
/// libusb; the decision happens when a sync session starts.
pub fn build_change_source(
    settings: &SyncSettings,
    backend: Arc<LibusbBackend>,
) -> Box<dyn ChangeSource> {
    info!("Using {:?} change source", settings.strategy);

    match settings.strategy {
        SyncStrategy::Auto => Box::new(FallbackSource::new(
            hotplug_source(settings, backend),
            Box::new(PollSource::new(settings.poll_interval())),
        )),
        SyncStrategy::Hotplug => hotplug_source(settings, backend),
        SyncStrategy::Notification => Box::new(
            NotificationSource::new(Arc::new(LibusbNotifier::new(
                backend,
                settings.event_timeout(),
            )))
            .with_quiet_period(settings.quiet_period()),
        ),
        SyncStrategy::Poll => Box::new(PollSource::new(settings.poll_interval())),
    }
}

fn hotplug_source(settings: &SyncSettings, backend: Arc<LibusbBackend>) -> Box<dyn ChangeSource> {
    Box::new(
        HotplugSource::new(Arc::new(LibusbHotplug::new(backend)))
            .with_event_timeout(settings.event_timeout()),
    )
}
