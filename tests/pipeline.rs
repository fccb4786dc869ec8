//! End-to-end scanning scenarios: a scanner set with real scanners, real
//! output directories, and real feature files.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use sift::{
    CarveMode, CarveOutcome, DebugFlags, FeatureRecorderDef, HistogramDef, Pos0, SBuf,
    ScanConfig, ScanError, ScanParams, Scanner, ScannerCommand, ScannerFlags, ScannerInfo,
    ScannerSet, StopList,
};

fn new_set(config: ScanConfig, stoplist: Option<StopList>) -> ScannerSet {
    ScannerSet::new_with_debug(config, stoplist, DebugFlags::default()).unwrap()
}

fn read_outdir_file(dir: &std::path::Path, name: &str) -> String {
    std::fs::read_to_string(dir.join(name)).unwrap()
}

/// Writes the feature `hit` at the buffer's position, with no context
/// bytes.
struct EchoScanner;

impl Scanner for EchoScanner {
    fn info(&self) -> ScannerInfo {
        ScannerInfo::new("echo")
            .with_flags(ScannerFlags {
                scan_ngram_buffer: true,
                ..ScannerFlags::default()
            })
            .with_feature_def(FeatureRecorderDef::new("echo"))
    }

    fn scan(&self, params: &ScanParams<'_>) -> Result<(), ScanError> {
        params.recorder("echo")?.write(params.sbuf.pos0(), b"hit", b"")?;
        Ok(())
    }
}

#[test]
fn echo_scanner_writes_one_feature_line() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = new_set(ScanConfig::in_outdir(dir.path()), None);
    set.add_scanner(Box::new(EchoScanner));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), b"aaaaaaaaaaaaaaaa".to_vec()));
    set.shutdown(None).unwrap();

    assert_eq!(read_outdir_file(dir.path(), "echo.txt"), "0\thit\t\n");
}

/// Counts invocations; used to observe gating.
struct CountingScanner {
    name: &'static str,
    flags: ScannerFlags,
    calls: Arc<AtomicU64>,
}

impl Scanner for CountingScanner {
    fn info(&self) -> ScannerInfo {
        ScannerInfo::new(self.name).with_flags(self.flags)
    }

    fn scan(&self, _params: &ScanParams<'_>) -> Result<(), ScanError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[test]
fn ngram_buffers_skip_scanners_that_opt_out() {
    let dir = tempfile::tempdir().unwrap();
    let alpha_calls = Arc::new(AtomicU64::new(0));
    let beta_calls = Arc::new(AtomicU64::new(0));

    let mut set = new_set(ScanConfig::in_outdir(dir.path()), None);
    set.add_scanner(Box::new(CountingScanner {
        name: "alpha",
        flags: ScannerFlags::default(),
        calls: Arc::clone(&alpha_calls),
    }));
    set.add_scanner(Box::new(CountingScanner {
        name: "beta",
        flags: ScannerFlags {
            scan_ngram_buffer: true,
            ..ScannerFlags::default()
        },
        calls: Arc::clone(&beta_calls),
    }));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), vec![0x41; 1024]));
    set.shutdown(None).unwrap();

    assert_eq!(alpha_calls.load(Ordering::Acquire), 0);
    assert_eq!(beta_calls.load(Ordering::Acquire), 1);
}

#[test]
fn depth0_only_scanners_skip_decoded_buffers() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicU64::new(0));
    let mut set = new_set(ScanConfig::in_outdir(dir.path()), None);
    set.add_scanner(Box::new(CountingScanner {
        name: "surface",
        flags: ScannerFlags {
            depth0_only: true,
            ..ScannerFlags::default()
        },
        calls: Arc::clone(&calls),
    }));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), b"surface bytes".to_vec()));
    set.process_sbuf(SBuf::new(Pos0::at(0).decoded("ZIP"), b"decoded bytes".to_vec()));
    set.shutdown(None).unwrap();

    assert_eq!(calls.load(Ordering::Acquire), 1);
}

/// Recurses with a distinct decoded child until the set cuts it off.
struct RecursingScanner {
    depths_seen: Arc<Mutex<Vec<u32>>>,
}

impl Scanner for RecursingScanner {
    fn info(&self) -> ScannerInfo {
        ScannerInfo::new("recurser")
    }

    fn scan(&self, params: &ScanParams<'_>) -> Result<(), ScanError> {
        let depth = params.sbuf.depth();
        self.depths_seen.lock().push(depth);
        let body = format!("level {} bytes", depth + 1).into_bytes();
        params.recurse(params.sbuf.decoded_child(0, "DEEP", body));
        Ok(())
    }
}

#[test]
fn recursion_stops_at_max_depth_with_an_alert() {
    let dir = tempfile::tempdir().unwrap();
    let depths_seen = Arc::new(Mutex::new(Vec::new()));
    let mut config = ScanConfig::in_outdir(dir.path());
    config.max_depth = 2;

    let mut set = new_set(config, None);
    set.add_scanner(Box::new(RecursingScanner {
        depths_seen: Arc::clone(&depths_seen),
    }));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), b"level 0 bytes".to_vec()));
    set.shutdown(None).unwrap();

    // Scanned at depths 0 and 1; the depth-2 buffer only produced the alert.
    assert_eq!(*depths_seen.lock(), vec![0, 1]);
    assert_eq!(set.max_depth_seen(), 1);
    let alerts = read_outdir_file(dir.path(), "alerts.txt");
    assert_eq!(
        alerts.lines().filter(|l| l.contains("MAX_DEPTH_REACHED")).count(),
        1
    );
}

/// Carves the same body from two positions.
struct CarvingScanner;

impl Scanner for CarvingScanner {
    fn info(&self) -> ScannerInfo {
        // The test buffer is two identical halves, so it is ngram-periodic;
        // opt in to still be dispatched.
        ScannerInfo::new("carver")
            .with_flags(ScannerFlags {
                scan_ngram_buffer: true,
                ..ScannerFlags::default()
            })
            .with_feature_def(FeatureRecorderDef::new("carved").with_carve_mode(CarveMode::All))
    }

    fn scan(&self, params: &ScanParams<'_>) -> Result<(), ScanError> {
        let recorder = params.recorder("carved")?;
        let first = params.sbuf.child_range(0, 8);
        let second = params.sbuf.child_range(8, 8);
        let outcome = recorder.carve(None, &first, ".bin", 0)?;
        assert!(matches!(outcome, CarveOutcome::Carved { .. }));
        let outcome = recorder.carve(None, &second, ".bin", 0)?;
        assert_eq!(outcome, CarveOutcome::Cached);
        Ok(())
    }
}

#[test]
fn carving_is_at_most_once_per_hash() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = new_set(ScanConfig::in_outdir(dir.path()), None);
    set.add_scanner(Box::new(CarvingScanner));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    // Two identical 8-byte halves.
    set.process_sbuf(SBuf::new(Pos0::at(0), b"SAMEDATASAMEDATA".to_vec()));
    set.shutdown(None).unwrap();

    let carved = read_outdir_file(dir.path(), "carved.txt");
    let lines: Vec<&str> = carved.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("carved/000/0.bin"));
    assert!(lines[0].contains("<filename>"));
    assert!(lines[1].contains("CACHED"));
    assert!(!lines[1].contains("<filename>"));
    assert_eq!(std::fs::read(dir.path().join("carved/000/0.bin")).unwrap(), b"SAMEDATA");
    // Only one carved file exists under the recorder's directory.
    let files: Vec<_> = std::fs::read_dir(dir.path().join("carved/000")).unwrap().collect();
    assert_eq!(files.len(), 1);
}

/// Writes one stop-listed and one clean feature to `url`.
struct UrlScanner;

impl Scanner for UrlScanner {
    fn info(&self) -> ScannerInfo {
        ScannerInfo::new("urls")
            .with_feature_def(FeatureRecorderDef::new("url"))
            .with_histogram_def(HistogramDef::new("url", "histogram"))
    }

    fn scan(&self, params: &ScanParams<'_>) -> Result<(), ScanError> {
        let url = params.recorder("url")?;
        url.write(params.sbuf.pos0(), b"spam", b"surrounding")?;
        url.write(&(params.sbuf.pos0() + 40), b"ham", b"surrounding")?;
        Ok(())
    }
}

#[test]
fn stoplisted_features_divert_to_the_stopped_recorder() {
    let dir = tempfile::tempdir().unwrap();
    let mut stoplist = StopList::new();
    stoplist.add_word(b"spam".to_vec());

    let mut set = new_set(ScanConfig::in_outdir(dir.path()), Some(stoplist));
    set.add_scanner(Box::new(UrlScanner));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), b"buffer".to_vec()));

    let url = set.recorder_set().named_feature_recorder("url").unwrap();
    assert_eq!(url.features_written(), 2);
    set.shutdown(None).unwrap();

    let stopped = read_outdir_file(dir.path(), "stopped.txt");
    assert_eq!(stopped.lines().count(), 1);
    assert!(stopped.contains("spam"));

    let url_txt = read_outdir_file(dir.path(), "url.txt");
    assert!(!url_txt.contains("spam"));
    assert_eq!(url_txt.lines().count(), 1);

    // The histogram only saw the feature that reached the primary sink.
    let histogram = read_outdir_file(dir.path(), "url_histogram.txt");
    assert_eq!(histogram, "1\tham\n");
}

/// Fails on every buffer.
struct FailingScanner {
    name: &'static str,
    panics: bool,
}

impl Scanner for FailingScanner {
    fn info(&self) -> ScannerInfo {
        ScannerInfo::new(self.name).with_feature_def(FeatureRecorderDef::new("findings"))
    }

    fn scan(&self, _params: &ScanParams<'_>) -> Result<(), ScanError> {
        if self.panics {
            panic!("{} blew up", self.name);
        }
        Err(ScanError::new("malformed stream table"))
    }
}

/// Writes its own name as a feature.
struct NamedFeatureScanner {
    name: &'static str,
}

impl Scanner for NamedFeatureScanner {
    fn info(&self) -> ScannerInfo {
        ScannerInfo::new(self.name).with_feature_def(FeatureRecorderDef::new("findings"))
    }

    fn scan(&self, params: &ScanParams<'_>) -> Result<(), ScanError> {
        params
            .recorder("findings")?
            .write(params.sbuf.pos0(), self.name.as_bytes(), b"")?;
        Ok(())
    }
}

#[test]
fn a_failing_scanner_does_not_contaminate_its_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = new_set(ScanConfig::in_outdir(dir.path()), None);
    set.add_scanner(Box::new(NamedFeatureScanner { name: "good1" }));
    set.add_scanner(Box::new(FailingScanner { name: "bad", panics: false }));
    set.add_scanner(Box::new(NamedFeatureScanner { name: "good2" }));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), vec![0x33; 4096]));
    set.shutdown(None).unwrap();

    let findings = read_outdir_file(dir.path(), "findings.txt");
    assert!(findings.contains("good1"));
    assert!(findings.contains("good2"));

    let alerts = read_outdir_file(dir.path(), "alerts.txt");
    let exception_lines: Vec<&str> =
        alerts.lines().filter(|l| l.contains("<exception>")).collect();
    assert_eq!(exception_lines.len(), 1);
    assert!(exception_lines[0].contains("malformed stream table"));
    assert!(exception_lines[0].contains("scanner=bad"));
}

#[test]
fn a_panicking_scanner_is_contained_too() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = new_set(ScanConfig::in_outdir(dir.path()), None);
    set.add_scanner(Box::new(FailingScanner { name: "bad", panics: true }));
    set.add_scanner(Box::new(NamedFeatureScanner { name: "good" }));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), b"some bytes".to_vec()));
    set.shutdown(None).unwrap();

    assert!(read_outdir_file(dir.path(), "findings.txt").contains("good"));
    let alerts = read_outdir_file(dir.path(), "alerts.txt");
    assert!(alerts.contains("<exception>bad blew up</exception>"));
    assert!(alerts.contains("scanner=bad"));
}

#[test]
fn duplicate_buffers_are_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicU64::new(0));
    let mut config = ScanConfig::in_outdir(dir.path());
    config.dup_data_alerts = true;
    let mut set = new_set(config, None);
    set.add_scanner(Box::new(CountingScanner {
        name: "counter",
        flags: ScannerFlags::default(),
        calls: Arc::clone(&calls),
    }));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), b"identical content".to_vec()));
    set.process_sbuf(SBuf::new(Pos0::at(4096), b"identical content".to_vec()));
    set.shutdown(None).unwrap();

    // The duplicate was seen but not rescanned.
    assert_eq!(calls.load(Ordering::Acquire), 1);
    assert_eq!(set.dup_bytes_encountered(), b"identical content".len() as u64);
    let alerts = read_outdir_file(dir.path(), "alerts.txt");
    assert!(alerts.contains("DUP SBUF"));
}

#[test]
fn disabled_scanners_are_not_dispatched() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicU64::new(0));
    let mut config = ScanConfig::in_outdir(dir.path());
    config.commands = vec![ScannerCommand::disable("counter")];
    let mut set = new_set(config, None);
    set.add_scanner(Box::new(CountingScanner {
        name: "counter",
        flags: ScannerFlags::default(),
        calls: Arc::clone(&calls),
    }));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), b"bytes".to_vec()));
    set.shutdown(None).unwrap();
    assert_eq!(calls.load(Ordering::Acquire), 0);
}

#[test]
fn shutdown_emits_scanner_stats_records() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicU64::new(0));
    let mut set = new_set(ScanConfig::in_outdir(dir.path()), None);
    set.add_scanner(Box::new(CountingScanner {
        name: "counter",
        flags: ScannerFlags::default(),
        calls,
    }));
    set.apply_scanner_commands().unwrap();
    set.phase_scan();
    set.process_sbuf(SBuf::new(Pos0::at(0), b"bytes".to_vec()));

    let mut stats = Vec::new();
    set.shutdown(Some(&mut stats)).unwrap();
    let text = String::from_utf8(stats).unwrap();
    let record: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(record["scanner"], "counter");
    assert_eq!(record["calls"], 1);
}
