//! Command detection and stripping
//!
//! Matching is case-insensitive and word-bounded, and only looks at a
//! leading window of the transcript so that a later mention of "remind"
//! as content is not mistaken for a command. The window is counted in
//! characters, not bytes.

use tracing::debug;

use super::phrases::{default_phrases, CommandPhrase, Intent};

/// Characters dropped between a command phrase and the entry text
const SEPARATORS: &[char] = &[',', ':', ';', '-', '.'];

/// Errors building a custom grammar
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GrammarError {
    #[error("command phrase is empty")]
    EmptyPhrase,

    #[error("command phrase is not ASCII: {0:?}")]
    NonAsciiPhrase(String),
}

/// Where a command phrase was found in a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMatch {
    pub intent: Intent,
    /// Byte offset where the phrase starts
    pub start: usize,
    /// Byte offset one past the end of the phrase
    pub end: usize,
}

/// Ordered command phrase table for both intents
#[derive(Debug, Clone)]
pub struct CommandGrammar {
    phrases: Vec<CommandPhrase>,
    window: usize,
}

impl Default for CommandGrammar {
    fn default() -> Self {
        Self::with_slack(Self::DEFAULT_SLACK)
    }
}

impl CommandGrammar {
    /// Extra characters allowed before a command phrase
    pub const DEFAULT_SLACK: usize = 16;

    /// Build the built-in grammar with a custom leading-window slack
    pub fn with_slack(slack: usize) -> Self {
        Self::build(default_phrases(), slack)
    }

    /// Build a grammar from a custom phrase table
    ///
    /// Phrases keep their relative order within each intent; that order is
    /// the matching priority.
    pub fn new(phrases: Vec<CommandPhrase>, slack: usize) -> Result<Self, GrammarError> {
        let mut normalized = Vec::with_capacity(phrases.len());
        for phrase in phrases {
            let text = phrase.phrase.trim();
            if text.is_empty() {
                return Err(GrammarError::EmptyPhrase);
            }
            if !text.is_ascii() {
                return Err(GrammarError::NonAsciiPhrase(text.to_string()));
            }
            normalized.push(CommandPhrase::new(phrase.intent, text));
        }
        Ok(Self::build(normalized, slack))
    }

    fn build(phrases: Vec<CommandPhrase>, slack: usize) -> Self {
        let phrases: Vec<CommandPhrase> = phrases
            .into_iter()
            .map(|p| CommandPhrase::new(p.intent, p.phrase.to_ascii_lowercase()))
            .collect();
        let longest = phrases.iter().map(|p| p.phrase.len()).max().unwrap_or(0);

        Self {
            phrases,
            window: longest + slack,
        }
    }

    /// Number of leading characters a command phrase must end within
    pub fn window(&self) -> usize {
        self.window
    }

    /// Find the command phrase that decides the intent of `text`
    ///
    /// Each intent contributes its earliest phrase found in the window, with
    /// table order deciding between phrases at the same offset. The earlier
    /// of the two intents wins; on a tie the note match wins.
    pub fn detect(&self, text: &str) -> Option<CommandMatch> {
        // ASCII folding keeps byte offsets aligned with `text`
        let lowered = text.to_ascii_lowercase();

        let note = self.first_match(Intent::Note, &lowered);
        let reminder = self.first_match(Intent::Reminder, &lowered);

        match (note, reminder) {
            (Some(note), Some(reminder)) if reminder.start < note.start => Some(reminder),
            (Some(note), _) => Some(note),
            (None, reminder) => reminder,
        }
    }

    /// Classify `text` and strip everything through the command phrase
    ///
    /// Returns `(None, text)` unchanged when no command phrase matches.
    pub fn match_and_strip(&self, text: &str) -> (Option<Intent>, String) {
        match self.detect(text) {
            Some(found) => {
                let rest = text[found.end..]
                    .trim_start_matches(|c: char| c.is_whitespace() || SEPARATORS.contains(&c))
                    .trim_end();
                debug!(
                    intent = %found.intent,
                    start = found.start,
                    end = found.end,
                    "command phrase matched"
                );
                (Some(found.intent), rest.to_string())
            }
            None => (None, text.to_string()),
        }
    }

    fn first_match(&self, intent: Intent, lowered: &str) -> Option<CommandMatch> {
        // `min_by_key` keeps the first of equal keys, so table order breaks ties
        self.phrases
            .iter()
            .filter(|p| p.intent == intent)
            .filter_map(|p| {
                self.find_in_window(lowered, &p.phrase)
                    .map(|(start, end)| CommandMatch { intent, start, end })
            })
            .min_by_key(|found| found.start)
    }

    fn find_in_window(&self, haystack: &str, phrase: &str) -> Option<(usize, usize)> {
        let mut from = 0;
        while let Some(offset) = haystack[from..].find(phrase) {
            let start = from + offset;
            let end = start + phrase.len();
            if haystack[..end].chars().count() > self.window {
                return None;
            }
            if is_word_start(haystack, start) && is_word_end(haystack, end) {
                return Some((start, end));
            }
            // `start` is an ASCII byte, so the next byte is a char boundary
            from = start + 1;
        }
        None
    }
}

fn is_word_start(haystack: &str, start: usize) -> bool {
    haystack[..start]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric())
}

fn is_word_end(haystack: &str, end: usize) -> bool {
    haystack[end..]
        .chars()
        .next()
        .map_or(true, |c| !c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> CommandGrammar {
        CommandGrammar::default()
    }

    #[test]
    fn test_note_phrase() {
        assert_eq!(
            grammar().match_and_strip("note to buy milk"),
            (Some(Intent::Note), "buy milk".to_string())
        );
    }

    #[test]
    fn test_reminder_phrase() {
        assert_eq!(
            grammar().match_and_strip("remind me to call mom"),
            (Some(Intent::Reminder), "call mom".to_string())
        );
    }

    #[test]
    fn test_command_only_leaves_empty_text() {
        assert_eq!(
            grammar().match_and_strip("remind me to"),
            (Some(Intent::Reminder), String::new())
        );
    }

    #[test]
    fn test_longer_phrase_preferred() {
        assert_eq!(
            grammar().match_and_strip("reminder to water plants"),
            (Some(Intent::Reminder), "water plants".to_string())
        );
        assert_eq!(
            grammar().match_and_strip("reminder water plants"),
            (Some(Intent::Reminder), "water plants".to_string())
        );
    }

    #[test]
    fn test_case_insensitive_keeps_casing() {
        assert_eq!(
            grammar().match_and_strip("Remind Me To call Dr. Smith"),
            (Some(Intent::Reminder), "call Dr. Smith".to_string())
        );
    }

    #[test]
    fn test_leading_filler_is_stripped() {
        assert_eq!(
            grammar().match_and_strip("okay so note that the garage code is 1234"),
            (Some(Intent::Note), "the garage code is 1234".to_string())
        );
    }

    #[test]
    fn test_separator_after_phrase_is_dropped() {
        assert_eq!(
            grammar().match_and_strip("Note: pick up dry cleaning"),
            (Some(Intent::Note), "pick up dry cleaning".to_string())
        );
    }

    #[test]
    fn test_word_boundaries() {
        // "notebook" must not match "note", "reminders" must not match "remind"
        assert_eq!(
            grammar().match_and_strip("notebook is on the desk"),
            (None, "notebook is on the desk".to_string())
        );
        assert_eq!(
            grammar().match_and_strip("reminders app"),
            (None, "reminders app".to_string())
        );
    }

    #[test]
    fn test_match_outside_window_is_ignored() {
        let text = "I spent the whole afternoon at the store, remind me to relax";
        assert_eq!(grammar().match_and_strip(text), (None, text.to_string()));
    }

    #[test]
    fn test_earliest_match_wins() {
        assert_eq!(
            grammar().match_and_strip("remind me to take a note"),
            (Some(Intent::Reminder), "take a note".to_string())
        );
        assert_eq!(
            grammar().match_and_strip("note remind me"),
            (Some(Intent::Note), "remind me".to_string())
        );
    }

    #[test]
    fn test_leading_phrase_beats_later_longer_phrase() {
        assert_eq!(
            grammar().match_and_strip("note that we take a note"),
            (Some(Intent::Note), "we take a note".to_string())
        );
        assert_eq!(
            grammar().match_and_strip("Note, take a note of the gate code"),
            (Some(Intent::Note), "take a note of the gate code".to_string())
        );
        // Same offset still prefers the longer phrase
        assert_eq!(
            grammar().match_and_strip("remind me to remind me"),
            (Some(Intent::Reminder), "remind me".to_string())
        );
    }

    #[test]
    fn test_window_counts_characters() {
        // 20 two-byte characters of filler: 40 bytes, but only 20 characters
        let text = format!("{} note to water plants", "é".repeat(20));
        assert_eq!(
            grammar().match_and_strip(&text),
            (Some(Intent::Note), "water plants".to_string())
        );

        let text = format!("{} note to water plants", "é".repeat(30));
        assert_eq!(grammar().match_and_strip(&text), (None, text.clone()));
    }

    #[test]
    fn test_no_match_returns_text_unchanged() {
        assert_eq!(
            grammar().match_and_strip("  buy milk  "),
            (None, "  buy milk  ".to_string())
        );
    }

    #[test]
    fn test_non_ascii_text() {
        assert_eq!(
            grammar().match_and_strip("note to café at noon"),
            (Some(Intent::Note), "café at noon".to_string())
        );
        assert_eq!(grammar().match_and_strip("é note"), (Some(Intent::Note), String::new()));
    }

    #[test]
    fn test_custom_grammar() {
        let grammar = CommandGrammar::new(
            vec![
                CommandPhrase::new(Intent::Note, " Jot Down "),
                CommandPhrase::new(Intent::Reminder, "don't forget to"),
            ],
            4,
        )
        .unwrap();
        assert_eq!(grammar.window(), "don't forget to".len() + 4);
        assert_eq!(
            grammar.match_and_strip("jot down gate code"),
            (Some(Intent::Note), "gate code".to_string())
        );
        assert_eq!(
            grammar.match_and_strip("Don't forget to stretch"),
            (Some(Intent::Reminder), "stretch".to_string())
        );
    }

    #[test]
    fn test_custom_grammar_rejects_bad_phrases() {
        assert_eq!(
            CommandGrammar::new(vec![CommandPhrase::new(Intent::Note, "  ")], 0).unwrap_err(),
            GrammarError::EmptyPhrase
        );
        assert!(matches!(
            CommandGrammar::new(vec![CommandPhrase::new(Intent::Note, "notá")], 0),
            Err(GrammarError::NonAsciiPhrase(_))
        ));
    }
}
