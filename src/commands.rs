//! Command routing
//!
//! Maps recognized text to a spoken response. Matching is keyword based:
//! the text is normalized and intents are tried in priority order, the first
//! intent with a keyword contained in the text winning.

use chrono::{Local, NaiveDateTime, Timelike};

/// Response spoken when a command could not be transcribed
pub const DIDNT_UNDERSTAND: &str = "Sorry, I didn't catch that.";

/// Turns recognized text into a response
pub trait CommandRouter: Send + Sync {
    /// Produce the response for `text`
    fn route(&self, text: &str) -> String;
}

/// Intents paired with their keywords, highest priority first
type KeywordTable = &'static [(Intent, &'static [&'static str])];

/// Recognized command category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Microphone and pipeline check
    Test,
    /// Current time of day
    Time,
    /// Today's date
    Date,
    /// Hello and friends
    Greeting,
    /// Dismiss the assistant
    Stop,
    /// Nothing matched
    Unknown,
}

impl Intent {
    /// Keywords per intent, in matching priority order
    const KEYWORDS: KeywordTable = &[
        (Self::Test, &["test"]),
        (Self::Time, &["time"]),
        (Self::Date, &["date", "what day", "today"]),
        (
            Self::Greeting,
            &["hello", "hi", "hey", "how are you", "good morning", "good afternoon", "good evening"],
        ),
        (Self::Stop, &["stop", "never mind", "nevermind", "cancel"]),
    ];
}

/// Keyword router for the built-in commands
#[derive(Debug, Clone, Copy)]
pub struct IntentRouter {
    keywords: KeywordTable,
}

impl IntentRouter {
    /// Intent of `text`
    ///
    /// Keywords match anywhere in the normalized text, including inside
    /// longer words.
    #[must_use]
    pub fn intent(&self, text: &str) -> Intent {
        let normalized = normalize(text);
        self.keywords
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| normalized.contains(k)))
            .map_or(Intent::Unknown, |(intent, _)| *intent)
    }

    /// Response for `text` as if asked at `now`
    #[must_use]
    pub fn respond_at(&self, text: &str, now: NaiveDateTime) -> String {
        let intent = self.intent(text);
        tracing::debug!(?intent, text, "command routed");

        match intent {
            Intent::Test => "Test successful.".to_string(),
            Intent::Time => spoken_time(now),
            Intent::Date => format!("Today is {}.", now.format("%A, %B %-d")),
            Intent::Greeting => "Hello! How can I help?".to_string(),
            Intent::Stop => "Okay.".to_string(),
            Intent::Unknown => "Unknown command.".to_string(),
        }
    }
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self {
            keywords: Intent::KEYWORDS,
        }
    }
}

impl CommandRouter for IntentRouter {
    fn route(&self, text: &str) -> String {
        self.respond_at(text, Local::now().naive_local())
    }
}

/// Lowercase, drop punctuation and collapse whitespace
///
/// Apostrophes are removed rather than split on, so "what's" becomes "whats".
#[must_use]
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != '\'' && *c != '\u{2019}')
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "It is 3:05 PM in the afternoon"
fn spoken_time(now: NaiveDateTime) -> String {
    let (is_pm, hour12) = now.hour12();
    let am_pm = if is_pm { "PM" } else { "AM" };
    let time_of_day = match now.hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        _ => "evening",
    };

    match now.minute() {
        0 => format!("It is {hour12} {am_pm} in the {time_of_day}"),
        minute => format!("It is {hour12}:{minute:02} {am_pm} in the {time_of_day}"),
    }
}
