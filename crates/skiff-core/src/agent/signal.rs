//! Promise signal extraction.
//!
//! The model communicates status through in-band markers:
//! `<<COMPLETE>>`, `<<BLOCKED: reason>>`, `<<DECIDE: reason>>`.
//! Extraction is a pure function over the accumulated turn text so it
//! can be tested without a provider. When a turn carries several
//! markers, the last one by position wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static COMPLETE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<COMPLETE>>").expect("valid complete pattern"));
static BLOCKED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<BLOCKED:\s*([^>]*)>>").expect("valid blocked pattern"));
static DECIDE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<DECIDE:\s*([^>]*)>>").expect("valid decide pattern"));

/// Status the model signaled for the turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    #[default]
    None,
    /// The task is done; the loop short-circuits.
    Complete,
    /// The model cannot proceed. Informational only.
    Blocked { reason: String },
    /// The model needs a decision from the user. Informational only.
    Decide { reason: String },
}

impl Signal {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Extract the promise signal from a turn's accumulated text.
pub fn extract_signal(text: &str) -> Signal {
    let mut found: Option<(usize, Signal)> = None;

    let mut consider = |start: usize, signal: Signal| {
        if found.as_ref().map(|(pos, _)| start >= *pos).unwrap_or(true) {
            found = Some((start, signal));
        }
    };

    if let Some(m) = COMPLETE_PATTERN.find_iter(text).last() {
        consider(m.start(), Signal::Complete);
    }
    if let Some(c) = BLOCKED_PATTERN.captures_iter(text).last() {
        let m = c.get(0).expect("whole match");
        consider(
            m.start(),
            Signal::Blocked {
                reason: c[1].trim().to_string(),
            },
        );
    }
    if let Some(c) = DECIDE_PATTERN.captures_iter(text).last() {
        let m = c.get(0).expect("whole match");
        consider(
            m.start(),
            Signal::Decide {
                reason: c[1].trim().to_string(),
            },
        );
    }

    found.map(|(_, signal)| signal).unwrap_or_default()
}
