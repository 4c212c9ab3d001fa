//! Change source with a fallback
//!
//! Starts the preferred source and switches to the fallback when the
//! preferred one cannot register with the platform. The choice is made on
//! every start, after the backend has been opened, so capability checks run
//! against the session's own USB context.

use super::{CancellationHandle, ChangeSource, Trigger};
use common::{Error, EventSink, Result};
use std::sync::Arc;
use tracing::{info, warn};

pub struct FallbackSource {
    preferred: Box<dyn ChangeSource>,
    fallback: Box<dyn ChangeSource>,
    active: Option<&'static str>,
}

impl FallbackSource {
    pub fn new(preferred: Box<dyn ChangeSource>, fallback: Box<dyn ChangeSource>) -> Self {
        Self {
            preferred,
            fallback,
            active: None,
        }
    }
}

impl ChangeSource for FallbackSource {
    fn name(&self) -> &'static str {
        self.active.unwrap_or("auto")
    }

    fn start(&mut self, trigger: Trigger, sink: Arc<dyn EventSink>) -> Result<CancellationHandle> {
        match self.preferred.start(Arc::clone(&trigger), Arc::clone(&sink)) {
            Ok(cancel) => {
                self.active = Some(self.preferred.name());
                Ok(cancel)
            }
            Err(Error::HotplugRegistration(e)) => {
                warn!(
                    "{} change source unavailable ({}), using {}",
                    self.preferred.name(),
                    e,
                    self.fallback.name()
                );
                let cancel = self.fallback.start(trigger, sink)?;
                self.active = Some(self.fallback.name());
                info!("Falling back to {} change source", self.fallback.name());
                Ok(cancel)
            }
            Err(e) => {
                self.active = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::RecordingSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        name: &'static str,
        error: Option<fn() -> Error>,
        starts: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn boxed(name: &'static str, error: Option<fn() -> Error>) -> (Box<dyn ChangeSource>, Arc<AtomicUsize>) {
            let starts = Arc::new(AtomicUsize::new(0));
            let source = Self {
                name,
                error,
                starts: starts.clone(),
            };
            (Box::new(source), starts)
        }
    }

    impl ChangeSource for ScriptedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        fn start(&mut self, _trigger: Trigger, _sink: Arc<dyn EventSink>) -> Result<CancellationHandle> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            match self.error {
                Some(error) => Err(error()),
                None => Ok(CancellationHandle::new()),
            }
        }
    }

    fn noop_trigger() -> Trigger {
        Arc::new(|| {})
    }

    fn unsupported() -> Error {
        Error::HotplugRegistration("Operation not supported".to_string())
    }

    fn not_open() -> Error {
        Error::BackendNotOpen
    }

    #[test]
    fn test_preferred_source_used_when_available() {
        let (preferred, preferred_starts) = ScriptedSource::boxed("hotplug", None);
        let (fallback, fallback_starts) = ScriptedSource::boxed("poll", None);
        let mut source = FallbackSource::new(preferred, fallback);
        assert_eq!(source.name(), "auto");

        source
            .start(noop_trigger(), Arc::new(RecordingSink::new()))
            .unwrap();
        assert_eq!(source.name(), "hotplug");
        assert_eq!(preferred_starts.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registration_failure_falls_back() {
        let (preferred, _) = ScriptedSource::boxed("hotplug", Some(unsupported));
        let (fallback, fallback_starts) = ScriptedSource::boxed("poll", None);
        let mut source = FallbackSource::new(preferred, fallback);

        source
            .start(noop_trigger(), Arc::new(RecordingSink::new()))
            .unwrap();
        assert_eq!(source.name(), "poll");
        assert_eq!(fallback_starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_other_failures_are_returned() {
        let (preferred, _) = ScriptedSource::boxed("hotplug", Some(not_open));
        let (fallback, fallback_starts) = ScriptedSource::boxed("poll", None);
        let mut source = FallbackSource::new(preferred, fallback);

        let result = source.start(noop_trigger(), Arc::new(RecordingSink::new()));
        assert!(matches!(result, Err(Error::BackendNotOpen)));
        assert_eq!(fallback_starts.load(Ordering::SeqCst), 0);
        assert_eq!(source.name(), "auto");
    }
}
