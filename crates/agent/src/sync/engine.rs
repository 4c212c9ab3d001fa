//! Synchronization engine
//!
//! Owns the device enumerator and one change source. `start_sync` opens the
//! backend, starts the source and runs an immediate scan; every trigger from
//! the source then runs a scan-and-emit cycle against the cached snapshot.
//!
//! Scans of one session are serialized by the cache lock, so the events of
//! two scans never interleave. Each session gets a fresh cache and a fresh
//! cancellation handle: a trigger from a stopped session is a no-op even if
//! it fires after a new session started.

use crate::sync::diff::diff;
use crate::sync::snapshot::{Snapshot, build_snapshot};
use crate::sync::source::{CancellationHandle, ChangeSource, Trigger};
use common::{DeviceEnumerator, EventSink, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Syncing,
}

/// Scan-and-emit cycle of one sync session
pub(crate) struct Scanner {
    enumerator: Arc<dyn DeviceEnumerator>,
    sink: Arc<dyn EventSink>,
    cache: Mutex<Snapshot>,
    cancel: CancellationHandle,
}

impl Scanner {
    fn new(enumerator: Arc<dyn DeviceEnumerator>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            enumerator,
            sink,
            cache: Mutex::new(Snapshot::new()),
            cancel: CancellationHandle::new(),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, Snapshot> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-enumerate, diff against the cache, emit, replace the cache
    ///
    /// Adds are emitted before removes. A failed enumeration is reported to
    /// the sink and leaves the cache untouched.
    pub(crate) fn scan_and_emit(&self) {
        let mut cache = self.lock_cache();
        if self.cancel.is_cancelled() {
            return;
        }

        let records = match self.enumerator.enumerate() {
            Ok(records) => records,
            Err(e) => {
                warn!("Device scan failed: {}", e);
                self.sink.on_error(&format!("device scan failed: {}", e));
                return;
            }
        };

        let current = build_snapshot(&records);
        let changes = diff(&cache, &current);

        debug!(
            "Scan: {} ports, {} added, {} removed",
            current.len(),
            changes.added.len(),
            changes.removed.len()
        );

        for address in &changes.added {
            if let Some(port) = current.get(address) {
                self.sink.on_port_added(port);
            }
        }
        for address in &changes.removed {
            if let Some(port) = cache.get(address) {
                self.sink.on_port_removed(port);
            }
        }

        *cache = current;
    }

    /// Stop emitting and wait for an in-flight scan to finish
    fn shutdown(&self) {
        self.cancel.cancel();
        drop(self.lock_cache());
    }
}

struct SyncSession {
    scanner: Arc<Scanner>,
    source_cancel: CancellationHandle,
}

/// Discovery synchronization engine
pub struct SyncEngine {
    enumerator: Arc<dyn DeviceEnumerator>,
    source: Box<dyn ChangeSource>,
    session: Option<SyncSession>,
}

impl SyncEngine {
    pub fn new(enumerator: Arc<dyn DeviceEnumerator>, source: Box<dyn ChangeSource>) -> Self {
        Self {
            enumerator,
            source,
            session: None,
        }
    }

    pub fn state(&self) -> EngineState {
        if self.session.is_some() {
            EngineState::Syncing
        } else {
            EngineState::Idle
        }
    }

    /// Diagnostics only, never rejects
    pub fn hello(&self, user_agent: &str, protocol_version: u32) -> Result<()> {
        info!(
            "Discovery client connected: {} (protocol v{})",
            user_agent, protocol_version
        );
        Ok(())
    }

    /// Start synchronizing, reporting to `sink`
    ///
    /// Stops a running session first. On return the events for the devices
    /// already attached have been delivered to `sink`.
    pub fn start_sync(&mut self, sink: Arc<dyn EventSink>) -> Result<()> {
        if self.session.is_some() {
            debug!("Sync already running, restarting");
            self.stop()?;
        }

        self.enumerator.open()?;

        let scanner = Arc::new(Scanner::new(Arc::clone(&self.enumerator), Arc::clone(&sink)));
        let trigger: Trigger = {
            let scanner = Arc::clone(&scanner);
            Arc::new(move || scanner.scan_and_emit())
        };

        let source_cancel = match self.source.start(trigger, sink) {
            Ok(cancel) => cancel,
            Err(e) => {
                warn!("Failed to start {} change source: {}", self.source.name(), e);
                scanner.shutdown();
                self.enumerator.close();
                return Err(e);
            }
        };

        info!("Sync started ({} change source)", self.source.name());
        self.session = Some(SyncSession {
            scanner: Arc::clone(&scanner),
            source_cancel,
        });

        scanner.scan_and_emit();
        Ok(())
    }

    /// Stop synchronizing. Idempotent.
    ///
    /// Signals the change source without waiting for its background context
    /// to exit. A scan already running completes before the backend is
    /// released; no event is emitted after this returns.
    pub fn stop(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        session.source_cancel.cancel();
        session.scanner.shutdown();
        self.enumerator.close();

        info!("Sync stopped");
        Ok(())
    }

    /// Terminal stop
    pub fn quit(&mut self) -> Result<()> {
        self.stop()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
