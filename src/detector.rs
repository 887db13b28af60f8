//! Violation detection.
//!
//! Checks run cheapest-first and the first hit wins: banned characters,
//! then banned stemmed words, then mixed-script words. A check that does not
//! run for a message does not touch its counters.

use crate::script::ScriptDetector;
use crate::stemmer::Stemmer;
use crate::store::PolicyState;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    RestrictedLetters(Vec<char>),
    RestrictedWords(Vec<String>),
    MixedScript(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::RestrictedLetters(letters) => {
                let letters: Vec<String> = letters.iter().map(char::to_string).collect();
                write!(f, "запрещенные буквы ({})", letters.join(", "))
            }
            Violation::RestrictedWords(words) => {
                write!(f, "запрещенные слова ({})", words.join(", "))
            }
            Violation::MixedScript(word) => {
                write!(f, "смешение алфавитов в слове ({word})")
            }
        }
    }
}

/// Run all checks in priority order.
pub fn detect(message: &str, policy: &mut PolicyState, stemmer: &dyn Stemmer) -> Option<Violation> {
    check_restricted_letters(message, policy)
        .or_else(|| check_restricted_words(message, policy, stemmer))
        .or_else(|| check_mixed_script(message, stemmer))
}

pub fn check_restricted_letters(message: &str, policy: &mut PolicyState) -> Option<Violation> {
    if policy.restricted_letters.is_empty() {
        return None;
    }

    let mut found: Vec<char> = Vec::new();
    let mut buf = [0; 4];
    for c in message.chars() {
        if found.contains(&c) {
            continue;
        }
        let key: &str = c.encode_utf8(&mut buf);
        if let Some(count) = policy.restricted_letters.get_mut(key) {
            *count += 1;
            found.push(c);
        }
    }

    if found.is_empty() {
        None
    } else {
        Some(Violation::RestrictedLetters(found))
    }
}

pub fn check_restricted_words(
    message: &str,
    policy: &mut PolicyState,
    stemmer: &dyn Stemmer,
) -> Option<Violation> {
    if policy.stop_words.is_empty() {
        return None;
    }

    let mut found = Vec::new();
    for stem in stemmer.tokenize_and_stem(message) {
        if let Some(count) = policy.stop_words.get_mut(&stem) {
            *count += 1;
            found.push(stem);
        }
    }

    if found.is_empty() {
        None
    } else {
        Some(Violation::RestrictedWords(found))
    }
}

pub fn check_mixed_script(message: &str, stemmer: &dyn Stemmer) -> Option<Violation> {
    stemmer
        .tokenize_and_stem(message)
        .into_iter()
        .find(|word| ScriptDetector::is_mixed(word))
        .map(Violation::MixedScript)
}
