//! Device synchronization
//!
//! - `snapshot`: enumeration records to port descriptors
//! - `diff`: added/removed addresses between two snapshots
//! - `engine`: session lifecycle and serialized scan-and-emit cycles
//! - `source`: change sources deciding when to re-scan

pub mod diff;
pub mod engine;
pub mod snapshot;
pub mod source;

pub use diff::{SnapshotDiff, diff};
pub use engine::{EngineState, SyncEngine};
pub use snapshot::{PROTOCOL_LABEL, PROTOCOL_TAG, Snapshot, build_snapshot, port_from_record};
pub use source::{CancellationHandle, ChangeSource, FallbackSource, HotplugSource, NotificationSource, PollSource, Trigger};
