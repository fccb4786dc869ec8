//! The scanner contract.
//!
//! A scanner is one content detector: it looks at a buffer, writes features
//! at named recorders, and may hand decoded children back to the set for
//! recursive scanning. Scanners declare everything the orchestrator needs
//! up front in a [`ScannerInfo`]: identity, the recorders they write, the
//! histograms they want, and the gating flags.

use std::fmt;
use std::sync::Arc;

use crate::histogram::HistogramDef;
use crate::recorder::{FeatureRecorder, FeatureRecorderDef, RecorderError};
use crate::recorder_set::RecorderSetError;
use crate::sbuf::{SBuf, SBufError};
use crate::scanner_set::ScannerSet;
use crate::sink::SinkError;

/// Gating flags, fixed at registration.
#[derive(Clone, Copy, Debug)]
pub struct ScannerFlags {
    /// Enabled without an explicit `enable` command.
    pub default_enabled: bool,
    /// Immune to commands targeting all scanners.
    pub no_all: bool,
    /// Hidden from usage listings.
    pub no_usage: bool,
    /// Still invoked on buffers that are a repeating ngram (most scanners
    /// have nothing to find in `AAAA…` and skip them).
    pub scan_ngram_buffer: bool,
    /// Only invoked on undecoded (depth-0) buffers.
    pub depth0_only: bool,
    /// Still invoked on buffers whose content hash was seen before.
    pub scan_seen_before: bool,
    /// Implements user-supplied find expressions.
    pub find_scanner: bool,
}

impl Default for ScannerFlags {
    fn default() -> Self {
        Self {
            default_enabled: true,
            no_all: false,
            no_usage: false,
            scan_ngram_buffer: false,
            depth0_only: false,
            scan_seen_before: false,
            find_scanner: false,
        }
    }
}

/// Metadata a scanner declares at registration.
#[derive(Clone, Debug, Default)]
pub struct ScannerInfo {
    pub name: String,
    pub author: String,
    pub description: String,
    pub url: String,
    pub version: String,
    /// Stage token this scanner contributes to forensic paths when it
    /// decodes (e.g. `ZIP`).
    pub path_prefix: String,
    pub flags: ScannerFlags,
    /// Recorders this scanner writes to; created when the scanner is
    /// enabled. Identical names across scanners merge.
    pub feature_defs: Vec<FeatureRecorderDef>,
    /// Histograms to attach to those recorders.
    pub histogram_defs: Vec<HistogramDef>,
}

impl ScannerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_flags(mut self, flags: ScannerFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_feature_def(mut self, def: FeatureRecorderDef) -> Self {
        self.feature_defs.push(def);
        self
    }

    pub fn with_histogram_def(mut self, def: HistogramDef) -> Self {
        self.histogram_defs.push(def);
        self
    }
}

/// What a scanner returns to report failure. The display string reaches the
/// alert recorder; the scan of the buffer continues with the next scanner.
#[derive(Debug)]
pub struct ScanError {
    message: String,
}

impl ScanError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScanError {}

impl From<SBufError> for ScanError {
    fn from(e: SBufError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<RecorderError> for ScanError {
    fn from(e: RecorderError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<RecorderSetError> for ScanError {
    fn from(e: RecorderSetError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<SinkError> for ScanError {
    fn from(e: SinkError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Everything handed to a scanner for one buffer.
pub struct ScanParams<'a> {
    pub sbuf: &'a SBuf,
    pub set: &'a ScannerSet,
}

impl<'a> ScanParams<'a> {
    /// The named recorder, which must have been declared by some enabled
    /// scanner's info.
    pub fn recorder(&self, name: &str) -> Result<Arc<FeatureRecorder>, RecorderSetError> {
        self.set.recorder_set().named_feature_recorder(name)
    }

    pub fn alert(&self) -> Result<Arc<FeatureRecorder>, RecorderSetError> {
        self.set.recorder_set().alert_recorder()
    }

    /// Hand a decoded child back for recursive scanning. The child is
    /// consumed; it is scanned to completion before this returns.
    pub fn recurse(&self, child: SBuf) {
        self.set.process_sbuf(child);
    }
}

/// One content detector. Implementations are shared across worker threads;
/// any per-scan state lives on the stack of `scan`.
pub trait Scanner: Send + Sync {
    /// Called once at registration. Must name the scanner.
    fn info(&self) -> ScannerInfo;

    /// Process one buffer. Failures are contained: an `Err` becomes an
    /// alert tagged with the scanner name, and the remaining scanners still
    /// run.
    fn scan(&self, params: &ScanParams<'_>) -> Result<(), ScanError>;

    /// Called once between the last buffer and recorder shutdown.
    fn shutdown(&self, _set: &ScannerSet) -> Result<(), ScanError> {
        Ok(())
    }
}
