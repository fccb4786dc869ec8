//! Run configuration.
//!
//! A [`ScanConfig`] is built by the driver (normally from CLI flags) and
//! handed to [`ScannerSet::new`](crate::scanner_set::ScannerSet::new). It is
//! plain data: the core never reads flags or the environment after
//! construction, except for the one-time [`DebugFlags`] capture.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::digest::HashAlgorithm;

/// What an enable/disable command applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScannerTarget {
    /// Every scanner except those registered with `no_all`.
    AllScanners,
    Named(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandAction {
    Enable,
    Disable,
}

/// One queued enable/disable command; commands apply in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannerCommand {
    pub target: ScannerTarget,
    pub action: CommandAction,
}

impl ScannerCommand {
    pub fn enable(name: impl Into<String>) -> Self {
        Self {
            target: ScannerTarget::Named(name.into()),
            action: CommandAction::Enable,
        }
    }

    pub fn disable(name: impl Into<String>) -> Self {
        Self {
            target: ScannerTarget::Named(name.into()),
            action: CommandAction::Disable,
        }
    }

    pub fn enable_all() -> Self {
        Self {
            target: ScannerTarget::AllScanners,
            action: CommandAction::Enable,
        }
    }

    pub fn disable_all() -> Self {
        Self {
            target: ScannerTarget::AllScanners,
            action: CommandAction::Disable,
        }
    }
}

/// Configuration for one scanning run.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Name of the input being scanned, for reporting only.
    pub input_fname: Option<PathBuf>,
    /// Where feature files, carved files, and histograms land. `None` means
    /// no output at all: nothing is created and every recorder is disabled.
    pub outdir: Option<PathBuf>,
    /// Algorithm used for carve identities and carve records.
    pub hash_algorithm: HashAlgorithm,
    /// Default context window (bytes on each side of a feature) for
    /// recorders that do not override it.
    pub context_window: usize,
    /// Buffers at this forensic-path depth or beyond are not scanned.
    pub max_depth: u32,
    /// Largest repeat period considered by the constant-buffer gate.
    pub max_ngram: usize,
    /// Emit an alert for each duplicate buffer encountered.
    pub dup_data_alerts: bool,
    /// Treat malformed features as fatal scanner bugs instead of quoting
    /// around them.
    pub pedantic: bool,
    /// Enable/disable commands, applied in order.
    pub commands: Vec<ScannerCommand>,
    /// Scanner-defined knobs, `name=value`.
    pub namevals: BTreeMap<String, String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            input_fname: None,
            outdir: None,
            hash_algorithm: HashAlgorithm::Sha1,
            context_window: 16,
            max_depth: 7,
            max_ngram: 10,
            dup_data_alerts: false,
            pedantic: false,
            commands: Vec::new(),
            namevals: BTreeMap::new(),
        }
    }
}

impl ScanConfig {
    /// A config writing into `outdir`.
    pub fn in_outdir(outdir: impl Into<PathBuf>) -> Self {
        Self {
            outdir: Some(outdir.into()),
            ..Self::default()
        }
    }

    /// A config that produces no output (every recorder disabled).
    pub fn no_outdir() -> Self {
        Self::default()
    }

    pub fn get_nameval(&self, name: &str) -> Option<&str> {
        self.namevals.get(name).map(String::as_str)
    }

    /// `YES`/`true`/`1` (case-insensitive) are true; anything else, or an
    /// absent knob, is false.
    pub fn get_bool(&self, name: &str) -> bool {
        matches!(
            self.get_nameval(name).map(str::to_ascii_lowercase).as_deref(),
            Some("yes") | Some("true") | Some("1")
        )
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get_nameval(name)?.parse().ok()
    }
}

/// Debug switches, captured from the environment exactly once at scanner-set
/// construction. Presence of a variable enables the switch.
#[derive(Clone, Copy, Debug, Default)]
pub struct DebugFlags {
    /// `SCANNER_SET_DEBUG_PRINT_STEPS`: log each scanner invocation.
    pub print_steps: bool,
    /// `SCANNER_SET_DEBUG_NO_SCANNERS`: skip dispatch entirely.
    pub no_scanners: bool,
    /// `SCANNER_SET_DEBUG_SCANNER`: log every feature write.
    pub trace_writes: bool,
    /// `SCANNER_SET_DEBUG_DUMP_DATA`: hex-dump each sbuf.
    pub dump_data: bool,
    /// `SCANNER_SET_DEBUG_DECODING`: verbose codec state.
    pub decoding: bool,
    /// `SCANNER_SET_DEBUG_INFO`: extra info.
    pub info: bool,
    /// `SCANNER_SET_DEBUG_EXIT_EARLY`: print sizes after enabling and exit.
    pub exit_early: bool,
    /// `SCANNER_SET_DEBUG_REGISTER`: trace registration.
    pub register: bool,
}

impl DebugFlags {
    pub fn from_env() -> Self {
        let on = |name: &str| std::env::var_os(name).is_some();
        Self {
            print_steps: on("SCANNER_SET_DEBUG_PRINT_STEPS"),
            no_scanners: on("SCANNER_SET_DEBUG_NO_SCANNERS"),
            trace_writes: on("SCANNER_SET_DEBUG_SCANNER"),
            dump_data: on("SCANNER_SET_DEBUG_DUMP_DATA"),
            decoding: on("SCANNER_SET_DEBUG_DECODING"),
            info: on("SCANNER_SET_DEBUG_INFO"),
            exit_early: on("SCANNER_SET_DEBUG_EXIT_EARLY"),
            register: on("SCANNER_SET_DEBUG_REGISTER"),
        }
    }
}
