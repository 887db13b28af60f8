//! Admin commands written as plain chat messages.
//!
//! Recognised forms, case-insensitive, English or Russian:
//!
//! ```text
//! Add stop-word <word>[, <word>...]      Добавить стоп-слово ...
//! Remove stop-word <word>[, <word>...]   Удалить стоп-слово ...
//! Top list                               Хит-парад
//! ```

use crate::stemmer::{tokenize, Stemmer};
use crate::store::PolicyState;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

pub const TOP_LIMIT: usize = 10;

lazy_static! {
    static ref ADD_PATTERN: Regex = Regex::new(
        r"(?is)^\s*(?:add\s+stop\s*-?\s*words?|добавить\s+стоп\s*-?\s*слов[оа])(?:\s*:\s*|\s+)(.+?)\s*$"
    )
    .expect("valid add pattern");
    static ref REMOVE_PATTERN: Regex = Regex::new(
        r"(?is)^\s*(?:remove\s+stop\s*-?\s*words?|удалить\s+стоп\s*-?\s*слов[оа])(?:\s*:\s*|\s+)(.+?)\s*$"
    )
    .expect("valid remove pattern");
    static ref TOP_PATTERN: Regex =
        Regex::new(r"(?i)^\s*(?:top\s+list|хит\s*-\s*парад)\s*$").expect("valid top pattern");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    AddStopWords(Vec<String>),
    RemoveStopWords(Vec<String>),
    ShowTop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Added {
        added: Vec<String>,
        existed: Vec<String>,
        /// Entries that are not a single word could never match a token.
        rejected: Vec<String>,
    },
    Removed {
        removed: Vec<String>,
        not_found: Vec<String>,
    },
    Top {
        entries: Vec<(String, u64)>,
        ban_counter: u64,
    },
}

impl AdminCommand {
    /// Parse a whole message. Returns `None` for ordinary chat text and for
    /// add/remove commands whose word list is empty.
    pub fn parse(text: &str) -> Option<Self> {
        if TOP_PATTERN.is_match(text) {
            return Some(AdminCommand::ShowTop);
        }
        if let Some(caps) = ADD_PATTERN.captures(text) {
            return non_empty(split_words(&caps[1])).map(AdminCommand::AddStopWords);
        }
        if let Some(caps) = REMOVE_PATTERN.captures(text) {
            return non_empty(split_words(&caps[1])).map(AdminCommand::RemoveStopWords);
        }
        None
    }

    pub fn execute(&self, state: &mut PolicyState, stemmer: &dyn Stemmer) -> CommandOutcome {
        match self {
            AdminCommand::AddStopWords(words) => {
                let mut added = Vec::new();
                let mut existed = Vec::new();
                let mut rejected = Vec::new();
                for word in words {
                    match stop_word_key(word, stemmer) {
                        None => rejected.push(word.clone()),
                        Some(stem) if state.stop_words.contains_key(&stem) => {
                            existed.push(word.clone())
                        }
                        Some(stem) => {
                            state.stop_words.insert(stem, 0);
                            added.push(word.clone());
                        }
                    }
                }
                CommandOutcome::Added {
                    added,
                    existed,
                    rejected,
                }
            }
            AdminCommand::RemoveStopWords(words) => {
                let mut removed = Vec::new();
                let mut not_found = Vec::new();
                for word in words {
                    let previous = stop_word_key(word, stemmer)
                        .and_then(|stem| state.stop_words.remove(&stem));
                    if previous.is_some() {
                        removed.push(word.clone());
                    } else {
                        not_found.push(word.clone());
                    }
                }
                CommandOutcome::Removed { removed, not_found }
            }
            AdminCommand::ShowTop => CommandOutcome::Top {
                entries: top_stop_words(state, TOP_LIMIT),
                ban_counter: state.ban_counter,
            },
        }
    }
}

/// Most frequently caught stop words, highest count first. Entries that
/// never matched are left out; equal counts keep map order.
pub fn top_stop_words(state: &PolicyState, limit: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = state
        .stop_words
        .iter()
        .filter(|(_, &count)| count > 0)
        .map(|(word, &count)| (word.clone(), count))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(limit);
    entries
}

/// Stored key for an admin-supplied entry, or `None` when the entry does
/// not tokenize to exactly one word.
fn stop_word_key(entry: &str, stemmer: &dyn Stemmer) -> Option<String> {
    match tokenize(entry).as_slice() {
        [word] => Some(stemmer.stem(word)),
        _ => None,
    }
}

fn split_words(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(words: Vec<String>) -> Option<Vec<String>> {
    if words.is_empty() {
        None
    } else {
        Some(words)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();

        match self {
            CommandOutcome::Added {
                added,
                existed,
                rejected,
            } => {
                if !added.is_empty() {
                    lines.push(format!("Добавлены стоп-слова: {}", added.join(", ")));
                }
                if !existed.is_empty() {
                    lines.push(format!("Уже существовали: {}", existed.join(", ")));
                }
                if !rejected.is_empty() {
                    lines.push(format!(
                        "Не добавлены, нужно одно слово: {}",
                        rejected.join(", ")
                    ));
                }
            }
            CommandOutcome::Removed { removed, not_found } => {
                if !removed.is_empty() {
                    lines.push(format!("Удалены стоп-слова: {}", removed.join(", ")));
                }
                if !not_found.is_empty() {
                    lines.push(format!("Не найдены: {}", not_found.join(", ")));
                }
            }
            CommandOutcome::Top {
                entries,
                ban_counter,
            } => {
                if entries.is_empty() {
                    lines.push("Хит-парад пуст".to_string());
                } else {
                    lines.push("Хит-парад стоп-слов:".to_string());
                    for (place, (word, count)) in entries.iter().enumerate() {
                        lines.push(format!("{}. {word}: {count}", place + 1));
                    }
                }
                lines.push(format!("Всего удалено сообщений: {ban_counter}"));
            }
        }

        write!(f, "{}", lines.join("\n"))
    }
}
