//! Test utilities for dfu-discovery
//!
//! Provides a scripted enumerator, a recording event sink and helper
//! functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockEnumerator, create_dfu_record};
//! use common::DeviceEnumerator;
//!
//! let enumerator = MockEnumerator::new();
//! enumerator.set_records(vec![create_dfu_record("1-1", 0x1234, 0x5678, "")]);
//! enumerator.open().unwrap();
//! assert_eq!(enumerator.enumerate().unwrap().len(), 1);
//! ```

use crate::channel::{EventSink, SyncEvent};
use crate::usb_types::{DeviceEnumerator, DfuInterfaceRecord, InterfaceFlags};
use protocol::Port;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a DFU-mode interface record
///
/// # Example
/// ```
/// use common::test_utils::create_dfu_record;
///
/// let record = create_dfu_record("/usb1", 0x1234, 0x5678, "");
/// assert!(record.is_dfu());
/// assert!(record.serial_number.is_empty());
/// ```
pub fn create_dfu_record(
    path: &str,
    vendor_id: u16,
    product_id: u16,
    serial: &str,
) -> DfuInterfaceRecord {
    DfuInterfaceRecord {
        path: path.to_string(),
        vendor_id,
        product_id,
        serial_number: serial.to_string(),
        alt_name: "@Internal Flash  /0x08000000/04*016Kg".to_string(),
        flags: InterfaceFlags::DFU,
    }
}

/// Create a runtime-mode interface record (not eligible for reporting)
pub fn create_runtime_record(path: &str, vendor_id: u16, product_id: u16) -> DfuInterfaceRecord {
    DfuInterfaceRecord {
        flags: InterfaceFlags::empty(),
        alt_name: "UNKNOWN".to_string(),
        ..create_dfu_record(path, vendor_id, product_id, "")
    }
}

/// Create `count` DFU records with distinct paths `1-1`, `1-2`, ...
pub fn create_dfu_record_list(count: usize) -> Vec<DfuInterfaceRecord> {
    (1..=count)
        .map(|i| create_dfu_record(&format!("1-{}", i), 0x0483, 0xdf11, &format!("SN{:04}", i)))
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted [`DeviceEnumerator`]
///
/// Returns whatever record set was last installed with `set_records` and
/// tracks open/close/enumerate calls.
#[derive(Default)]
pub struct MockEnumerator {
    records: Mutex<Vec<DfuInterfaceRecord>>,
    open: AtomicBool,
    open_error: Mutex<Option<String>>,
    enumerate_error: Mutex<Option<String>>,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    enumerate_calls: AtomicUsize,
}

impl MockEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerator whose `open` always fails with `message`
    pub fn failing_open(message: &str) -> Self {
        let enumerator = Self::default();
        *lock(&enumerator.open_error) = Some(message.to_string());
        enumerator
    }

    /// Replace the record set returned by subsequent scans
    pub fn set_records(&self, records: Vec<DfuInterfaceRecord>) {
        *lock(&self.records) = records;
    }

    /// Make subsequent scans fail (`Some`) or succeed again (`None`)
    pub fn set_enumerate_error(&self, message: Option<&str>) {
        *lock(&self.enumerate_error) = message.map(str::to_string);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn enumerate_calls(&self) -> usize {
        self.enumerate_calls.load(Ordering::SeqCst)
    }
}

impl DeviceEnumerator for MockEnumerator {
    fn open(&self) -> crate::Result<()> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.open_error).clone() {
            return Err(crate::Error::BackendInit(message));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    fn enumerate(&self) -> crate::Result<Vec<DfuInterfaceRecord>> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_open() {
            return Err(crate::Error::BackendNotOpen);
        }
        if let Some(message) = lock(&self.enumerate_error).clone() {
            return Err(crate::Error::Io(std::io::Error::other(message)));
        }
        Ok(lock(&self.records).clone())
    }
}

/// [`EventSink`] that records every call in order
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far
    pub fn events(&self) -> Vec<SyncEvent> {
        lock(&self.events).clone()
    }

    /// Drain the recorded events
    pub fn take(&self) -> Vec<SyncEvent> {
        std::mem::take(&mut *lock(&self.events))
    }

    /// Addresses of added ports, in emission order
    pub fn added(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::Added(port) => Some(port.address),
                _ => None,
            })
            .collect()
    }

    /// Addresses of removed ports, in emission order
    pub fn removed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::Removed(port) => Some(port.address),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }
}

impl EventSink for RecordingSink {
    fn on_port_added(&self, port: &Port) {
        lock(&self.events).push(SyncEvent::Added(port.clone()));
    }

    fn on_port_removed(&self, port: &Port) {
        lock(&self.events).push(SyncEvent::Removed(port.clone()));
    }

    fn on_error(&self, message: &str) {
        lock(&self.events).push(SyncEvent::Error(message.to_string()));
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Poll `condition` every 10ms until it holds or `duration` elapses
///
/// Returns whether the condition was met.
pub async fn wait_until<F>(duration: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
