use rust_stemmers::{Algorithm, Stemmer as SnowballAlgorithm};

/// Reduces words to the canonical form stored in the stop list.
pub trait Stemmer: Send + Sync {
    fn stem(&self, word: &str) -> String;

    fn tokenize_and_stem(&self, text: &str) -> Vec<String> {
        tokenize(text).iter().map(|token| self.stem(token)).collect()
    }
}

/// Lowercase the text and split it on everything that is not a letter or
/// a digit. Hyphenated words become separate tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct SnowballStemmer {
    algorithm: SnowballAlgorithm,
}

impl SnowballStemmer {
    pub fn russian() -> Self {
        Self {
            algorithm: SnowballAlgorithm::create(Algorithm::Russian),
        }
    }
}

impl Default for SnowballStemmer {
    fn default() -> Self {
        Self::russian()
    }
}

impl Stemmer for SnowballStemmer {
    fn stem(&self, word: &str) -> String {
        self.algorithm.stem(&word.trim().to_lowercase()).into_owned()
    }
}

/// Lowercases without stemming; keeps detector tests independent of the
/// Snowball rules.
#[cfg(test)]
pub(crate) struct IdentityStemmer;

#[cfg(test)]
impl Stemmer for IdentityStemmer {
    fn stem(&self, word: &str) -> String {
        word.trim().to_lowercase()
    }
}
