//! The scanner orchestrator.
//!
//! A [`ScannerSet`] owns the registered scanners, the recorder set they
//! write into, and the dispatch loop that feeds buffers through them. Its
//! lifecycle is a strictly monotonic phase machine:
//!
//! ```text
//! Init --apply_scanner_commands--> Enabled --phase_scan--> Scan --shutdown--> Shutdown
//! ```
//!
//! Registration and recorder creation are Init-time; dispatch is Scan-time;
//! an operation issued in the wrong phase is a driver bug and panics.
//!
//! Dispatch is careful about containment: a scanner that returns an error
//! or panics produces an alert tagged with its name, and the remaining
//! scanners still see the buffer.

use std::collections::HashSet;
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::{debug, error, info, warn};

use crate::config::{CommandAction, DebugFlags, ScanConfig, ScannerTarget};
use crate::pos0::Pos0;
use crate::recorder_set::{FeatureRecorderSet, RecorderSetError};
use crate::sbuf::SBuf;
use crate::scanner::{ScanParams, Scanner, ScannerInfo};
use crate::stoplist::StopList;

#[derive(Debug, Snafu)]
pub enum ScannerSetError {
    #[snafu(display("no such scanner: {name:?}"))]
    NoSuchScanner { name: String },
    #[snafu(display("{source}"))]
    RecorderSet { source: RecorderSetError },
    #[snafu(display("could not write stats: {source}"))]
    StatsIo { source: std::io::Error },
}

/// Lifecycle phase. Transitions are one-way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Enabled,
    Scan,
    Shutdown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::Enabled => "ENABLED",
            Phase::Scan => "SCAN",
            Phase::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Wall-clock accounting for one scanner.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ScannerStat {
    pub calls: u64,
    pub ns: u64,
}

#[derive(Serialize)]
struct ScannerStatRecord<'a> {
    scanner: &'a str,
    calls: u64,
    seconds: f64,
}

/// Registration listing, for usage output.
#[derive(Clone, Debug, Serialize)]
pub struct ScannerSummary {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub url: String,
    pub enabled: bool,
}

struct RegisteredScanner {
    scanner: Box<dyn Scanner>,
    info: ScannerInfo,
}

/// See the module docs.
pub struct ScannerSet {
    config: ScanConfig,
    debug: DebugFlags,
    phase: Mutex<Phase>,
    scanners: Vec<RegisteredScanner>,
    enabled: Mutex<HashSet<String>>,
    recorder_set: FeatureRecorderSet,
    stats: DashMap<String, ScannerStat>,
    max_depth_seen: AtomicU32,
    dup_bytes_encountered: AtomicU64,
    sbufs_processed: AtomicU64,
}

impl ScannerSet {
    /// Build a set, capturing the debug environment once.
    pub fn new(config: ScanConfig, stoplist: Option<StopList>) -> Result<Self, ScannerSetError> {
        let debug = DebugFlags::from_env();
        Self::new_with_debug(config, stoplist, debug)
    }

    /// As [`ScannerSet::new`] with explicit debug switches; tests and
    /// embedders that must not read the environment use this.
    pub fn new_with_debug(
        config: ScanConfig,
        stoplist: Option<StopList>,
        debug: DebugFlags,
    ) -> Result<Self, ScannerSetError> {
        let recorder_set =
            FeatureRecorderSet::build(&config, stoplist, &debug).context(RecorderSetSnafu)?;
        Ok(Self {
            config,
            debug,
            phase: Mutex::new(Phase::Init),
            scanners: Vec::new(),
            enabled: Mutex::new(HashSet::new()),
            recorder_set,
            stats: DashMap::new(),
            max_depth_seen: AtomicU32::new(0),
            dup_bytes_encountered: AtomicU64::new(0),
            sbufs_processed: AtomicU64::new(0),
        })
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    fn expect_phase(&self, expected: Phase, op: &str) {
        let current = self.phase();
        assert!(
            current == expected,
            "{op} requires phase {expected}, but the scanner set is in phase {current}",
        );
    }

    fn transition(&self, from: Phase, to: Phase, op: &str) {
        let mut phase = self.phase.lock();
        let current = *phase;
        assert!(
            current == from,
            "{op} requires phase {from}, but the scanner set is in phase {current}",
        );
        *phase = to;
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn debug(&self) -> &DebugFlags {
        &self.debug
    }

    pub fn recorder_set(&self) -> &FeatureRecorderSet {
        &self.recorder_set
    }

    /// Register a scanner. Init-phase only; duplicate names and nameless
    /// info are registration bugs and panic.
    pub fn add_scanner(&mut self, scanner: Box<dyn Scanner>) {
        self.expect_phase(Phase::Init, "add_scanner");
        let info = scanner.info();
        assert!(!info.name.is_empty(), "scanner registered without a name");
        assert!(
            !self.scanners.iter().any(|r| r.info.name == info.name),
            "scanner already registered: {:?}",
            info.name,
        );
        if self.debug.register {
            info!(
                message = "registering scanner",
                scanner = %info.name,
                version = %info.version,
                default_enabled = info.flags.default_enabled,
            );
        }
        if info.flags.default_enabled {
            self.enabled.lock().insert(info.name.clone());
        }
        self.scanners.push(RegisteredScanner { scanner, info });
    }

    pub fn is_scanner_enabled(&self, name: &str) -> bool {
        self.enabled.lock().contains(name)
    }

    pub fn enabled_scanner_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.enabled.lock().iter().cloned().collect();
        names.sort();
        names
    }

    pub fn scanner_summaries(&self) -> Vec<ScannerSummary> {
        let enabled = self.enabled.lock();
        self.scanners
            .iter()
            .filter(|r| !r.info.flags.no_usage)
            .map(|r| ScannerSummary {
                name: r.info.name.clone(),
                version: r.info.version.clone(),
                author: r.info.author.clone(),
                description: r.info.description.clone(),
                url: r.info.url.clone(),
                enabled: enabled.contains(&r.info.name),
            })
            .collect()
    }

    /// Resolve the queued enable/disable commands, then materialize the
    /// alert recorder and every recorder and histogram declared by an
    /// enabled scanner. Transitions Init → Enabled.
    pub fn apply_scanner_commands(&mut self) -> Result<(), ScannerSetError> {
        self.expect_phase(Phase::Init, "apply_scanner_commands");
        for command in self.config.commands.clone() {
            match &command.target {
                ScannerTarget::AllScanners => {
                    let mut enabled = self.enabled.lock();
                    for r in &self.scanners {
                        if r.info.flags.no_all {
                            continue;
                        }
                        match command.action {
                            CommandAction::Enable => enabled.insert(r.info.name.clone()),
                            CommandAction::Disable => enabled.remove(&r.info.name),
                        };
                    }
                }
                ScannerTarget::Named(name) => {
                    if !self.scanners.iter().any(|r| &r.info.name == name) {
                        return NoSuchScannerSnafu { name: name.clone() }.fail();
                    }
                    let mut enabled = self.enabled.lock();
                    match command.action {
                        CommandAction::Enable => enabled.insert(name.clone()),
                        CommandAction::Disable => enabled.remove(name),
                    };
                }
            }
        }
        self.transition(Phase::Init, Phase::Enabled, "apply_scanner_commands");

        if !self.config.get_bool("no_alert") {
            self.recorder_set
                .create_alert_recorder()
                .context(RecorderSetSnafu)?;
        }
        let enabled: HashSet<String> = self.enabled.lock().clone();
        for r in &self.scanners {
            if !enabled.contains(&r.info.name) {
                continue;
            }
            for def in &r.info.feature_defs {
                self.recorder_set
                    .ensure_feature_recorder(def.clone())
                    .context(RecorderSetSnafu)?;
            }
        }
        // Histograms attach after every recorder exists: a histogram may
        // name a recorder declared by a different scanner.
        for r in &self.scanners {
            if !enabled.contains(&r.info.name) {
                continue;
            }
            for def in &r.info.histogram_defs {
                self.recorder_set.histogram_add(def).context(RecorderSetSnafu)?;
            }
        }

        if self.debug.exit_early {
            eprintln!(
                "scanner set: {} scanners registered, {} enabled, {} recorders",
                self.scanners.len(),
                enabled.len(),
                self.recorder_set.recorder_names().len(),
            );
            std::process::exit(0);
        }
        Ok(())
    }

    /// Transition Enabled → Scan; buffers may now be dispatched.
    pub fn phase_scan(&self) {
        self.transition(Phase::Enabled, Phase::Scan, "phase_scan");
        info!(
            message = "entering scan phase",
            input = ?self.config.input_fname,
            scanners_enabled = self.enabled.lock().len(),
        );
    }

    fn alert(&self, pos0: &Pos0, feature: &str, context: &str) {
        match self.recorder_set.alert_recorder() {
            Ok(recorder) => {
                if let Err(e) = recorder.write(pos0, feature.as_bytes(), context.as_bytes()) {
                    error!(message = "alert write failed", error = %e);
                }
            }
            Err(_) => debug!(
                message = "alert suppressed, no alert recorder",
                feature,
            ),
        }
    }

    /// Dispatch one buffer through every enabled scanner, consuming it.
    ///
    /// Scanners may re-enter this to recurse on decoded children. By the
    /// time this returns no live views of the buffer may remain; a nonzero
    /// child count is a scanner leak and is reported.
    pub fn process_sbuf(&self, sbuf: SBuf) {
        self.expect_phase(Phase::Scan, "process_sbuf");
        self.sbufs_processed.fetch_add(1, Ordering::AcqRel);

        if self.debug.dump_data {
            let mut out = Vec::new();
            let _ = sbuf.hex_dump(&mut out);
            eprint!("{}", String::from_utf8_lossy(&out));
        }

        let depth = sbuf.depth();
        if depth >= self.config.max_depth {
            warn!(
                message = "max depth reached",
                pos0 = %sbuf.pos0(),
                depth,
            );
            self.alert(sbuf.pos0(), "MAX_DEPTH_REACHED", "");
            return;
        }
        self.max_depth_seen.fetch_max(depth, Ordering::AcqRel);

        let seen = self.recorder_set.check_previously_processed(&sbuf);
        if seen {
            self.dup_bytes_encountered
                .fetch_add(sbuf.bufsize() as u64, Ordering::AcqRel);
            if self.config.dup_data_alerts {
                let digest = sbuf.hash(crate::digest::HashAlgorithm::Sha1);
                self.alert(sbuf.pos0(), &format!("DUP SBUF {digest}"), "");
            }
        }

        let ngram = sbuf.find_ngram_size(self.config.max_ngram);

        if !self.debug.no_scanners {
            for r in &self.scanners {
                let name = r.info.name.as_str();
                if !self.enabled.lock().contains(name) {
                    continue;
                }
                if ngram > 0 && !r.info.flags.scan_ngram_buffer {
                    continue;
                }
                if depth > 0 && r.info.flags.depth0_only {
                    continue;
                }
                if seen && !r.info.flags.scan_seen_before {
                    continue;
                }
                if self.debug.print_steps {
                    info!(
                        message = "invoking scanner",
                        scanner = name,
                        pos0 = %sbuf.pos0(),
                        bufsize = sbuf.bufsize(),
                    );
                }

                let params = ScanParams { sbuf: &sbuf, set: self };
                let started = Instant::now();
                let outcome = catch_unwind(AssertUnwindSafe(|| r.scanner.scan(&params)));
                let elapsed = started.elapsed().as_nanos() as u64;
                self.stats
                    .entry(name.to_string())
                    .and_modify(|s| {
                        s.calls += 1;
                        s.ns += elapsed;
                    })
                    .or_insert(ScannerStat {
                        calls: 1,
                        ns: elapsed,
                    });

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(message = "scanner failed", scanner = name, error = %e);
                        self.alert(
                            sbuf.pos0(),
                            &format!("<exception>{e}</exception>"),
                            &format!("scanner={name}"),
                        );
                    }
                    Err(payload) => {
                        let feature = if let Some(msg) = payload.downcast_ref::<&str>() {
                            format!("<exception>{msg}</exception>")
                        } else if let Some(msg) = payload.downcast_ref::<String>() {
                            format!("<exception>{msg}</exception>")
                        } else {
                            "<unknown_exception/>".to_string()
                        };
                        warn!(message = "scanner panicked", scanner = name);
                        self.alert(sbuf.pos0(), &feature, &format!("scanner={name}"));
                    }
                }
            }
        }

        if sbuf.children() != 0 {
            error!(
                message = "scanner leaked child views of a processed sbuf",
                pos0 = %sbuf.pos0(),
                children = sbuf.children(),
            );
        }
    }

    pub fn max_depth_seen(&self) -> u32 {
        self.max_depth_seen.load(Ordering::Acquire)
    }

    pub fn dup_bytes_encountered(&self) -> u64 {
        self.dup_bytes_encountered.load(Ordering::Acquire)
    }

    pub fn sbufs_processed(&self) -> u64 {
        self.sbufs_processed.load(Ordering::Acquire)
    }

    pub fn scanner_stats(&self) -> Vec<(String, ScannerStat)> {
        let mut stats: Vec<(String, ScannerStat)> = self
            .stats
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Transition Scan → Shutdown: give every enabled scanner its shutdown
    /// call, flush the recorder set, materialize histograms, and, when a
    /// writer is supplied, emit per-scanner stats as JSON records.
    pub fn shutdown(&self, stats_writer: Option<&mut dyn Write>) -> Result<(), ScannerSetError> {
        self.transition(Phase::Scan, Phase::Shutdown, "shutdown");
        let enabled = self.enabled.lock().clone();
        for r in &self.scanners {
            if !enabled.contains(&r.info.name) {
                continue;
            }
            if let Err(e) = r.scanner.shutdown(self) {
                warn!(message = "scanner shutdown failed", scanner = %r.info.name, error = %e);
            }
        }
        self.recorder_set.shutdown().context(RecorderSetSnafu)?;
        if let Some(w) = stats_writer {
            self.write_scanner_stats(w).context(StatsIoSnafu)?;
        }
        if self.debug.info {
            for (name, stat) in self.scanner_stats() {
                info!(
                    message = "scanner stats",
                    scanner = %name,
                    calls = stat.calls,
                    ns = stat.ns,
                );
            }
        }
        Ok(())
    }

    fn write_scanner_stats(&self, w: &mut dyn Write) -> io::Result<()> {
        for (name, stat) in self.scanner_stats() {
            let record = ScannerStatRecord {
                scanner: &name,
                calls: stat.calls,
                seconds: stat.ns as f64 / 1e9,
            };
            serde_json::to_writer(&mut *w, &record)?;
            writeln!(w)?;
        }
        Ok(())
    }
}
