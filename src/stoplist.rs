//! Stop-lists.
//!
//! A stop-list names features that should be routed to a quarantine recorder
//! instead of their primary sink (known-benign addresses, OS-image noise).
//! Entries match either a bare feature or a feature/context pair, always on
//! the raw bytes as the scanner wrote them, before any quoting.

use std::collections::HashSet;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Word and word+context matcher.
#[derive(Debug, Default)]
pub struct StopList {
    words: HashSet<Vec<u8>>,
    pairs: HashSet<(Vec<u8>, Vec<u8>)>,
}

impl StopList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_word(&mut self, word: impl Into<Vec<u8>>) {
        self.words.insert(word.into());
    }

    pub fn add_pair(&mut self, feature: impl Into<Vec<u8>>, context: impl Into<Vec<u8>>) {
        self.pairs.insert((feature.into(), context.into()));
    }

    /// Load entries from a text file: one entry per line, `#` comments and
    /// blank lines skipped; a tab splits an entry into feature and context.
    /// Returns the number of entries loaded.
    pub fn read_file(&mut self, path: &Path) -> io::Result<usize> {
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut loaded = 0;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('\t') {
                Some((feature, context)) => self.add_pair(feature.as_bytes(), context.as_bytes()),
                None => self.add_word(line.as_bytes()),
            }
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.words.len() + self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.pairs.is_empty()
    }

    /// Whether a feature (with its context) is stop-listed.
    pub fn matches(&self, feature: &[u8], context: &[u8]) -> bool {
        if self.words.contains(feature) {
            return true;
        }
        if self.pairs.is_empty() {
            return false;
        }
        self.pairs.contains(&(feature.to_vec(), context.to_vec()))
    }
}
