//! Timelapse bucketing daemon
//!
//! Captures a still every tick and folds the stills into progressively longer
//! clips: 5-minute clips, hourly clips and finally one clip per day.
//!
//! # Architecture
//!
//! The pipeline keeps four invariants:
//!
//! 1. **Monotonic head**: the last processed bucket label never moves back.
//! 2. **Atomic handoff**: every still lands in exactly one bucket.
//! 3. **Ordered stages**: a 5-minute clip is published before the hourly merge
//!    that consumes it, an hourly clip before the daily merge.
//! 4. **No dangling entries**: pending lists only name published clips, and
//!    merged sources are deleted only after the merged clip is published.
//!
//! # Module Structure
//!
//! - `bucket`: 5-minute/hour/day buckets, labels and boundary crossings
//! - `schedule`: drift-free tick scheduling
//! - `store`: directory layout and in-memory mirrors
//! - `handoff`: live directory -> snapshot swap
//! - `consolidate`: stages A/B/C and the single consolidation worker
//! - `recovery`: startup reconciliation
//! - `capture`: the per-tick loop
//! - `device`: camera, encoder, merger and LED backends
//! - `config`: file and environment configuration

pub mod bucket;
pub mod capture;
pub mod config;
pub mod consolidate;
pub mod device;
pub mod handoff;
pub mod recovery;
pub mod schedule;
pub mod store;

pub use bucket::{Crossing, Granularity, TimeBucket};
pub use capture::{CaptureLoop, TickOutcome, TimelapseState};
pub use config::{DeviceBackendKind, TimelapseConfig};
pub use consolidate::{ConsolidationWorker, Consolidator, HandoffJob, JobOutcome};
pub use device::{ClipEncoder, ClipMerger, Devices, Indicator, StillCamera};
pub use handoff::{hand_off, Snapshot};
pub use recovery::{recover, Recovered};
pub use schedule::{Clock, LocalClock, TickScheduler};
pub use store::{BucketLayout, LiveStills, PendingClips};
