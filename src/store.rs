use crate::stemmer::Stemmer;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Moderation policy together with its statistics.
///
/// A key in `stop_words` or `restricted_letters` means the word/letter is
/// banned; the value only counts how often it was caught.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyState {
    #[serde(deserialize_with = "counter_map")]
    pub stop_words: BTreeMap<String, u64>,
    #[serde(deserialize_with = "counter_map")]
    pub restricted_letters: BTreeMap<String, u64>,
    pub ban_counter: u64,
    #[serde(alias = "restart")]
    pub restart_count: u64,
}

// Older state files kept plain lists of banned entries without counts.
#[derive(Deserialize)]
#[serde(untagged)]
enum CounterMapRepr {
    Counted(BTreeMap<String, u64>),
    Plain(Vec<String>),
}

fn counter_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match CounterMapRepr::deserialize(deserializer)? {
        CounterMapRepr::Counted(map) => map,
        CounterMapRepr::Plain(list) => list.into_iter().map(|key| (key, 0)).collect(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read policy state from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse policy state from {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize policy state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write policy state to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type SharedPolicy = Arc<Mutex<PolicyState>>;

/// Lock the shared policy. A panic in another holder does not leave the
/// counters unusable, so poisoning is ignored.
pub fn lock_policy(policy: &SharedPolicy) -> MutexGuard<'_, PolicyState> {
    policy.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read the policy from `path`.
///
/// Older files list stop words as typed rather than by stem. Those entries
/// are run through `stemmer` so they match at check time.
pub fn load(path: &Path, stemmer: &dyn Stemmer) -> Result<PolicyState, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let raw: serde_json::Value = serde_json::from_str(&content).map_err(parse_error)?;
    let legacy_words = raw
        .get("stopWords")
        .map_or(false, serde_json::Value::is_array);
    let mut state: PolicyState = serde_json::from_value(raw).map_err(parse_error)?;

    if legacy_words {
        state.stop_words = restem(std::mem::take(&mut state.stop_words), stemmer);
        log::info!(
            "Converted {} legacy stop words to stems",
            state.stop_words.len()
        );
    }
    Ok(state)
}

fn restem(words: BTreeMap<String, u64>, stemmer: &dyn Stemmer) -> BTreeMap<String, u64> {
    let mut stems = BTreeMap::new();
    for (word, count) in words {
        let stem = stemmer.stem(&word);
        if stem.is_empty() {
            continue;
        }
        *stems.entry(stem).or_insert(0) += count;
    }
    stems
}

/// Write the whole state next to `path` and rename it into place, so a
/// reader sees either the previous snapshot or the new one.
pub fn save(path: &Path, state: &PolicyState) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(state)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    std::fs::write(&tmp_path, content).map_err(|source| StoreError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub struct PolicyStore {
    path: PathBuf,
    state: SharedPolicy,
}

impl PolicyStore {
    /// Load the policy from `path`, falling back to an empty policy when the
    /// file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>, stemmer: &dyn Stemmer) -> Self {
        let path = path.into();
        let state = match load(&path, stemmer) {
            Ok(state) => {
                log::info!(
                    "Loaded policy state: {} stop words, {} restricted letters, {} bans",
                    state.stop_words.len(),
                    state.restricted_letters.len(),
                    state.ban_counter
                );
                state
            }
            Err(e) => {
                log::warn!("Starting with an empty policy: {e}");
                PolicyState::default()
            }
        };

        Self {
            path,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shared(&self) -> SharedPolicy {
        Arc::clone(&self.state)
    }

    pub fn snapshot(&self) -> PolicyState {
        lock_policy(&self.state).clone()
    }

    /// Count a new process lifecycle and return the updated number.
    pub fn record_restart(&self) -> u64 {
        let mut state = lock_policy(&self.state);
        state.restart_count += 1;
        state.restart_count
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        save(&self.path, &self.snapshot())
    }

    /// Save a snapshot every `period` until the runtime shuts down.
    pub fn schedule_autosave(&self, period: Duration) -> JoinHandle<()> {
        let path = self.path.clone();
        let state = self.shared();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let snapshot = lock_policy(&state).clone();
                match save(&path, &snapshot) {
                    Ok(()) => log::debug!("Policy state saved to {}", path.display()),
                    Err(e) => log::error!("Autosave failed: {e}"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{self, Violation};
    use crate::stemmer::{IdentityStemmer, SnowballStemmer};
    use tempfile::tempdir;

    fn sample_state() -> PolicyState {
        let mut state = PolicyState::default();
        state.stop_words.insert("спам".to_string(), 4);
        state.stop_words.insert("реклам".to_string(), 0);
        state.restricted_letters.insert("ё".to_string(), 2);
        state.ban_counter = 6;
        state.restart_count = 3;
        state
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let state = sample_state();

        save(&path, &state).unwrap();
        assert_eq!(load(&path, &IdentityStemmer).unwrap(), state);
        assert!(!dir.path().join("policy.json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_an_error_and_open_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");

        assert!(matches!(load(&path, &IdentityStemmer), Err(StoreError::Read { .. })));
        let store = PolicyStore::open(&path, &IdentityStemmer);
        assert_eq!(store.snapshot(), PolicyState::default());
    }

    #[test]
    fn test_corrupt_or_mismatched_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load(&path, &IdentityStemmer), Err(StoreError::Parse { .. })));
        assert_eq!(PolicyStore::open(&path, &IdentityStemmer).snapshot(), PolicyState::default());

        std::fs::write(&path, r#"{"banCounter": -3}"#).unwrap();
        assert!(matches!(load(&path, &IdentityStemmer), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_unknown_keys_ignored_and_missing_keys_defaulted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"banCounter": 9, "somethingElse": [1, 2]}"#).unwrap();

        let state = load(&path, &IdentityStemmer).unwrap();
        assert_eq!(state.ban_counter, 9);
        assert!(state.stop_words.is_empty());
        assert!(state.restricted_letters.is_empty());
        assert_eq!(state.restart_count, 0);
    }

    #[test]
    fn test_legacy_list_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(
            &path,
            r#"{"stopWords": ["спам"], "banCounter": 2, "restart": 5, "restrictedLetters": ["ъ"]}"#,
        )
        .unwrap();

        let state = load(&path, &SnowballStemmer::russian()).unwrap();
        assert_eq!(state.stop_words.get("спам"), Some(&0));
        assert_eq!(state.restricted_letters.get("ъ"), Some(&0));
        assert_eq!(state.restart_count, 5);
        assert_eq!(state.ban_counter, 2);
    }

    #[test]
    fn test_legacy_stop_words_are_stemmed_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(&path, r#"{"stopWords": ["Реклама", "рекламы"], "banCounter": 1}"#).unwrap();
        let stemmer = SnowballStemmer::russian();

        let mut state = PolicyStore::open(&path, &stemmer).snapshot();
        assert_eq!(state.stop_words.len(), 1);
        assert!(!state.stop_words.contains_key("Реклама"));

        let violation = detector::detect("Никакой рекламе здесь", &mut state, &stemmer);
        assert!(matches!(violation, Some(Violation::RestrictedWords(_))));
    }

    #[test]
    fn test_counted_stop_words_are_kept_as_stored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"stopWords": {"рекламы": 3}}"#).unwrap();

        let state = load(&path, &SnowballStemmer::russian()).unwrap();
        assert_eq!(state.stop_words.get("рекламы"), Some(&3));
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(sample_state()).unwrap();
        assert_eq!(json["banCounter"], 6);
        assert_eq!(json["restartCount"], 3);
        assert_eq!(json["stopWords"]["спам"], 4);
        assert_eq!(json["restrictedLetters"]["ё"], 2);
    }

    #[test]
    fn test_record_restart_and_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("policy.json");

        let store = PolicyStore::open(&path, &IdentityStemmer);
        assert_eq!(store.record_restart(), 1);
        store.flush().unwrap();

        let reopened = PolicyStore::open(&path, &IdentityStemmer);
        assert_eq!(reopened.record_restart(), 2);
    }

    #[tokio::test]
    async fn test_autosave_writes_current_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("auto.json");
        let store = PolicyStore::open(&path, &IdentityStemmer);

        lock_policy(&store.shared()).ban_counter = 11;
        let handle = store.schedule_autosave(Duration::from_millis(20));

        let mut saved = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Ok(state) = load(&path, &IdentityStemmer) {
                saved = Some(state);
                break;
            }
        }
        handle.abort();

        assert_eq!(saved.map(|s| s.ban_counter), Some(11));
    }
}
