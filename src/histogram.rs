//! Feature histograms.
//!
//! A histogram is a multiset over the features written to one recorder,
//! optionally projected through a regex first (e.g. tallying only the domain
//! of each email address). Tallies accumulate in memory during the scan and
//! are materialized to `{recorder}_{suffix}.txt` at shutdown.

use std::collections::HashMap;

use parking_lot::Mutex;
use regex::Regex;
use snafu::{ResultExt, Snafu};

/// Declaration of one histogram, carried in scanner info. Two declarations
/// that compare equal are the same histogram.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HistogramDef {
    /// Name of the recorder whose features feed this histogram.
    pub recorder: String,
    /// Output file suffix: `{recorder}_{suffix}.txt`.
    pub suffix: String,
    /// Optional projection; capture group 1 (or the whole match) is
    /// tallied, and non-matching features are dropped.
    pub pattern: Option<String>,
    /// Fold features to lowercase before tallying.
    pub lowercase: bool,
}

impl HistogramDef {
    pub fn new(recorder: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            recorder: recorder.into(),
            suffix: suffix.into(),
            pattern: None,
            lowercase: false,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }

    pub fn filename(&self) -> String {
        format!("{}_{}.txt", self.recorder, self.suffix)
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("bad histogram pattern {pattern:?}: {source}"))]
pub struct BadHistogramPattern {
    pattern: String,
    source: regex::Error,
}

/// One `count<TAB>feature` row of a materialized histogram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistogramEntry {
    pub count: u64,
    pub feature: String,
}

/// An in-memory multiset over recorded features. Each histogram carries its
/// own lock; adds from concurrent scanners serialize here and nowhere else.
#[derive(Debug)]
pub struct Histogram {
    def: HistogramDef,
    pattern: Option<Regex>,
    tally: Mutex<HashMap<String, u64>>,
}

impl Histogram {
    pub fn new(def: HistogramDef) -> Result<Self, BadHistogramPattern> {
        let pattern = match &def.pattern {
            Some(p) => Some(Regex::new(p).context(BadHistogramPatternSnafu { pattern: p.clone() })?),
            None => None,
        };
        Ok(Self {
            def,
            pattern,
            tally: Mutex::new(HashMap::new()),
        })
    }

    pub fn def(&self) -> &HistogramDef {
        &self.def
    }

    /// Tally one feature, applying the projection and case fold.
    pub fn add(&self, feature: &str) {
        let projected = match &self.pattern {
            None => feature,
            Some(re) => match re.captures(feature) {
                None => return,
                Some(caps) => caps.get(1).or_else(|| caps.get(0)).map_or("", |m| m.as_str()),
            },
        };
        let key = if self.def.lowercase {
            projected.to_lowercase()
        } else {
            projected.to_string()
        };
        *self.tally.lock().entry(key).or_insert(0) += 1;
    }

    pub fn len(&self) -> usize {
        self.tally.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tally.lock().is_empty()
    }

    /// Rows sorted by count descending, then feature ascending.
    pub fn report(&self) -> Vec<HistogramEntry> {
        let mut rows: Vec<HistogramEntry> = self
            .tally
            .lock()
            .iter()
            .map(|(feature, &count)| HistogramEntry {
                count,
                feature: feature.clone(),
            })
            .collect();
        rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.feature.cmp(&b.feature)));
        rows
    }

    /// Write the report as `count<TAB>feature` lines.
    pub fn write_to(&self, w: &mut dyn std::io::Write) -> std::io::Result<()> {
        for row in self.report() {
            writeln!(w, "{}\t{}", row.count, row.feature)?;
        }
        Ok(())
    }
}
