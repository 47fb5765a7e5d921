//! Core domain logic for the git time tracker.
//!
//! This crate contains:
//! - The activity tracker: per-project accumulation, branch-change and idle flushes
//! - The collaborator seams the tracker talks to (clock, fingerprint source, duration store)
//! - Go-style duration strings as used by the store file and the configuration

pub mod clock;
pub mod duration;
pub mod source;
pub mod store;
mod tracker;

pub use clock::{Clock, ManualClock, SystemClock, elapsed_between};
pub use duration::{DurationParseError, format_duration, parse_duration, round_to_second};
pub use source::{Fingerprint, FingerprintSource, SourceError};
pub use store::{DurationStore, MemoryStore, Record, StoreError, validate_key};
pub use tracker::{FlushOutcome, SampleOutcome, TrackedProject, Tracker};
