//! Transcript session module
//!
//! Provides the recording state machine and the driver that runs it:
//! - Idle: ready to record
//! - Recording: accumulating partial transcripts
//! - Finalizing: first finalize trigger fired, classification pending
//! - Done / Failed: one entry produced, or nothing usable

mod driver;
mod machine;
mod timeout;

pub use driver::{DriverOptions, SessionClient, SessionCommand, SessionDriver, SessionSnapshot};
pub use machine::{
    ClassifiedEntry, FinalizeReason, SessionError, Status, TimeoutToken, TranscriptSession,
    TranscriptUpdate, Trigger,
};
pub use timeout::TimeoutTimer;
