//! note-remind: files spoken notes and reminders
//!
//! Drives a speech recognizer through one recording at a time, detects a
//! leading "note ..." or "remind me to ..." command in the finalized
//! transcript, strips it, and appends the rest to the Notes or Reminders
//! list.
//!
//! - `grammar`: command phrase table and matching
//! - `session`: recording state machine, timeout, and driver
//! - `recognizer`: bridge to the external speech recognizer
//! - `store`: persisted lists
//! - `ipc`: Unix socket protocol and server

pub mod config;
pub mod events;
pub mod grammar;
pub mod ipc;
pub mod lifecycle;
pub mod recognizer;
pub mod session;
pub mod store;
