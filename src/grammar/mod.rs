//! Command grammar for classifying finalized transcripts
//!
//! Holds an ordered table of command phrases per intent (note, reminder)
//! and strips the leading command from a transcript:
//! - "note to buy milk" -> (Note, "buy milk")
//! - "remind me to call mom" -> (Reminder, "call mom")

mod matcher;
mod phrases;

pub use matcher::{CommandGrammar, CommandMatch, GrammarError};
pub use phrases::{default_phrases, CommandPhrase, Intent, NOTE_PHRASES, REMINDER_PHRASES};
