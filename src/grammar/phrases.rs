//! Intents and the built-in command phrase table
//!
//! Phrases are listed per intent in priority order: longer, more specific
//! phrases come before the shorter phrases they contain.

use serde::{Deserialize, Serialize};

/// Which list a finalized utterance belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Goes to the "Notes" list
    Note,
    /// Goes to the "Reminders" list
    Reminder,
}

impl Intent {
    /// Name of the persisted list entries of this intent are appended to
    pub fn list_name(&self) -> &'static str {
        match self {
            Intent::Note => "Notes",
            Intent::Reminder => "Reminders",
        }
    }
}

impl Default for Intent {
    fn default() -> Self {
        Self::Note
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::Note => write!(f, "note"),
            Intent::Reminder => write!(f, "reminder"),
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "note" | "notes" => Ok(Intent::Note),
            "reminder" | "reminders" => Ok(Intent::Reminder),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

/// A leading utterance fragment that signals an intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPhrase {
    pub intent: Intent,
    pub phrase: String,
}

impl CommandPhrase {
    pub fn new(intent: Intent, phrase: impl Into<String>) -> Self {
        Self {
            intent,
            phrase: phrase.into(),
        }
    }
}

/// Built-in note phrases, highest priority first
pub const NOTE_PHRASES: &[&str] = &[
    "take a note that",
    "take a note",
    "note to self",
    "note to",
    "note that",
    "note",
];

/// Built-in reminder phrases, highest priority first
pub const REMINDER_PHRASES: &[&str] = &[
    "remind me to",
    "remind me",
    "reminder to",
    "reminder",
    "remind",
];

/// The built-in table as owned phrases
pub fn default_phrases() -> Vec<CommandPhrase> {
    NOTE_PHRASES
        .iter()
        .map(|p| CommandPhrase::new(Intent::Note, *p))
        .chain(
            REMINDER_PHRASES
                .iter()
                .map(|p| CommandPhrase::new(Intent::Reminder, *p)),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_names() {
        assert_eq!(Intent::Note.list_name(), "Notes");
        assert_eq!(Intent::Reminder.list_name(), "Reminders");
    }

    #[test]
    fn test_intent_from_str() {
        assert_eq!("Reminders".parse::<Intent>().unwrap(), Intent::Reminder);
        assert_eq!(" note ".parse::<Intent>().unwrap(), Intent::Note);
        assert!("todo".parse::<Intent>().is_err());
    }

    #[test]
    fn test_longer_phrases_come_first() {
        for table in [NOTE_PHRASES, REMINDER_PHRASES] {
            for (i, earlier) in table.iter().enumerate() {
                for later in &table[i + 1..] {
                    assert!(
                        !later.starts_with(earlier),
                        "{later:?} is shadowed by {earlier:?}"
                    );
                }
            }
        }
    }
}
