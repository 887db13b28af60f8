#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Cyrillic,
}

pub struct ScriptDetector;

impl ScriptDetector {
    pub fn script_of(c: char) -> Option<Script> {
        if Self::is_latin(c) {
            Some(Script::Latin)
        } else if Self::is_cyrillic(c) {
            Some(Script::Cyrillic)
        } else {
            None
        }
    }

    pub fn is_latin(c: char) -> bool {
        c.is_alphabetic()
            && matches!(c,
                'a'..='z' | 'A'..='Z' |
                '\u{00C0}'..='\u{024F}' |  // Latin-1 Supplement letters, Extended-A/B
                '\u{1E00}'..='\u{1EFF}'    // Latin Extended Additional
            )
    }

    pub fn is_cyrillic(c: char) -> bool {
        matches!(c,
            '\u{0400}'..='\u{04FF}' |  // Cyrillic
            '\u{0500}'..='\u{052F}'    // Cyrillic Supplement
        )
    }

    /// True when the word mixes Latin and Cyrillic letters, the usual trick
    /// for writing a banned word with look-alike characters.
    pub fn is_mixed(word: &str) -> bool {
        let mut latin = false;
        let mut cyrillic = false;

        for c in word.chars() {
            match Self::script_of(c) {
                Some(Script::Latin) => latin = true,
                Some(Script::Cyrillic) => cyrillic = true,
                None => {}
            }
            if latin && cyrillic {
                return true;
            }
        }

        false
    }
}
