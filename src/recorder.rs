//! Feature recorders.
//!
//! A [`FeatureRecorder`] is one named feature stream: `email`, `url`,
//! `alerts`. Scanners write `(position, feature, context)` triples at it;
//! the recorder validates and quotes the bytes, routes stop-listed features
//! to quarantine, feeds attached histograms, and appends to its sink. It
//! also owns carving: writing a byte range back out as a standalone
//! artifact, at most once per content hash.

use std::fs::{FileTimes, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashSet;
use parking_lot::Mutex;
use snafu::{ResultExt, Snafu};
use tracing::{trace, warn};

use crate::digest::HashAlgorithm;
use crate::histogram::{BadHistogramPattern, Histogram, HistogramDef};
use crate::pos0::Pos0;
use crate::quoting::{quote, valid_dosname, QuoteStyle};
use crate::sbuf::SBuf;
use crate::sink::{FeatureSink, SinkError};
use crate::stoplist::StopList;

#[derive(Debug, Snafu)]
pub enum RecorderError {
    #[snafu(display("feature sink failed: {source}"))]
    Sink { source: SinkError },
    #[snafu(display("recorder I/O error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("{source}"))]
    Histogram { source: BadHistogramPattern },
}

/// Per-recorder behavior switches, fixed in the definition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RecorderFlags {
    /// Emit bytes untouched.
    pub no_quote: bool,
    /// Escape invalid UTF-8 only; leave backslashes alone.
    pub xml: bool,
    /// Record no context column at all.
    pub no_context: bool,
    /// Exempt this recorder from stop-list routing.
    pub no_stoplist: bool,
}

impl RecorderFlags {
    /// The 2-bit quoting decision: `no_quote` beats `xml` beats default.
    pub fn quote_style(&self) -> QuoteStyle {
        if self.no_quote {
            QuoteStyle::None
        } else if self.xml {
            QuoteStyle::Xml
        } else {
            QuoteStyle::Default
        }
    }
}

/// When a recorder carves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CarveMode {
    /// Never carve.
    #[default]
    None,
    /// Carve only data found under a decode stage (and not under the
    /// recorder's `do_not_carve_encoding` stage).
    Encoded,
    /// Carve everything offered.
    All,
}

/// What [`FeatureRecorder::carve`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CarveOutcome {
    /// The carve mode declined the data.
    NotCarved,
    /// Identical content was carved before; recorded, no file written.
    Cached,
    /// A file was written at this outdir-relative path.
    Carved { path: String },
}

/// Definition of one feature recorder, fixed at creation. Carried in
/// scanner info; identical names across scanners denote the same recorder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureRecorderDef {
    pub name: String,
    pub max_feature_size: usize,
    pub max_context_size: usize,
    pub flags: RecorderFlags,
    pub carve_mode: CarveMode,
    /// Innermost decode stage whose output should not be carved (it is
    /// already a faithful copy, e.g. plain base64).
    pub do_not_carve_encoding: Option<String>,
    /// Context window override; the set default applies when `None`.
    pub context_window: Option<usize>,
}

impl FeatureRecorderDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_feature_size: 1 << 20,
            max_context_size: 1 << 20,
            flags: RecorderFlags::default(),
            carve_mode: CarveMode::None,
            do_not_carve_encoding: None,
            context_window: None,
        }
    }

    pub fn with_flags(mut self, flags: RecorderFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_carve_mode(mut self, mode: CarveMode) -> Self {
        self.carve_mode = mode;
        self
    }

    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = Some(window);
        self
    }

    pub fn with_max_feature_size(mut self, max: usize) -> Self {
        self.max_feature_size = max;
        self
    }
}

/// Stop-list plus the quarantine recorder matches are routed to.
pub struct StopRoute {
    pub list: StopList,
    pub recorder: Arc<FeatureRecorder>,
}

/// Ambient context a recorder inherits from its set.
pub(crate) struct RecorderContext {
    pub pedantic: bool,
    pub trace_writes: bool,
    pub default_context_window: usize,
    pub outdir: Option<PathBuf>,
    pub hash_alg: HashAlgorithm,
    pub disabled: bool,
    pub stop_route: Option<Arc<StopRoute>>,
}

impl Default for RecorderContext {
    fn default() -> Self {
        Self {
            pedantic: false,
            trace_writes: false,
            default_context_window: 16,
            outdir: None,
            hash_alg: HashAlgorithm::Sha1,
            disabled: false,
            stop_route: None,
        }
    }
}

/// See the module docs.
pub struct FeatureRecorder {
    def: FeatureRecorderDef,
    sink: Box<dyn FeatureSink>,
    disabled: bool,
    pedantic: bool,
    trace_writes: bool,
    context_window: usize,
    outdir: Option<PathBuf>,
    hash_alg: HashAlgorithm,
    stop_route: Option<Arc<StopRoute>>,
    histograms: Mutex<Vec<Histogram>>,
    features_written: AtomicU64,
    carved_file_count: AtomicU64,
    carve_cache: DashSet<String>,
}

impl FeatureRecorder {
    /// A standalone recorder with default context; embedders writing into
    /// their own sink. Recorders inside a set are built by the set instead.
    pub fn new(def: FeatureRecorderDef, sink: Box<dyn FeatureSink>) -> Self {
        Self::build(def, sink, RecorderContext::default())
    }

    pub(crate) fn build(
        def: FeatureRecorderDef,
        sink: Box<dyn FeatureSink>,
        ctx: RecorderContext,
    ) -> Self {
        Self {
            context_window: def.context_window.unwrap_or(ctx.default_context_window),
            def,
            sink,
            disabled: ctx.disabled,
            pedantic: ctx.pedantic,
            trace_writes: ctx.trace_writes,
            outdir: ctx.outdir,
            hash_alg: ctx.hash_alg,
            stop_route: ctx.stop_route,
            histograms: Mutex::new(Vec::new()),
            features_written: AtomicU64::new(0),
            carved_file_count: AtomicU64::new(0),
            carve_cache: DashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &FeatureRecorderDef {
        &self.def
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn features_written(&self) -> u64 {
        self.features_written.load(Ordering::Acquire)
    }

    pub fn carved_file_count(&self) -> u64 {
        self.carved_file_count.load(Ordering::Acquire)
    }

    /// Attach a histogram. Panics if this recorder has already written a
    /// feature: late attachment would silently miss counts. Identical
    /// definitions merge into one histogram.
    pub fn histogram_add(&self, def: HistogramDef) -> Result<(), RecorderError> {
        assert_eq!(
            self.features_written(),
            0,
            "histogram added to recorder {:?} after features were written",
            self.def.name,
        );
        let mut histograms = self.histograms.lock();
        if histograms.iter().any(|h| *h.def() == def) {
            return Ok(());
        }
        histograms.push(Histogram::new(def).context(HistogramSnafu)?);
        Ok(())
    }

    pub fn histogram_count(&self) -> usize {
        self.histograms.lock().len()
    }

    /// Record one feature.
    ///
    /// The canonical pipeline: pedantic validation, quoting, truncation,
    /// empty-drop, stop-list routing, histogram feed, sink emit. Counting
    /// happens before routing, so `features_written` reflects what scanners
    /// produced, not what reached the primary sink.
    pub fn write(&self, pos0: &Pos0, feature: &[u8], context: &[u8]) -> Result<(), RecorderError> {
        if self.disabled {
            return Ok(());
        }
        if self.pedantic {
            assert!(
                feature.len() <= self.def.max_feature_size,
                "recorder {:?}: feature of {} bytes exceeds max_feature_size {}",
                self.def.name,
                feature.len(),
                self.def.max_feature_size,
            );
            assert!(
                context.len() <= self.def.max_context_size,
                "recorder {:?}: context of {} bytes exceeds max_context_size {}",
                self.def.name,
                context.len(),
                self.def.max_context_size,
            );
            let forbidden = |b: &u8| matches!(*b, b'\t' | b'\n' | b'\r');
            assert!(
                !feature.iter().any(forbidden) && !context.iter().any(forbidden),
                "recorder {:?}: feature or context contains tab/newline/cr at {}",
                self.def.name,
                pos0,
            );
        }

        let style = self.def.flags.quote_style();
        let mut quoted = quote(feature, style);
        quoted.truncate(self.def.max_feature_size);
        if quoted.is_empty() {
            if self.pedantic {
                panic!("recorder {:?}: feature quoted to nothing at {}", self.def.name, pos0);
            }
            warn!(
                message = "dropping feature that quoted to nothing",
                recorder = %self.def.name,
                pos0 = %pos0,
            );
            return Ok(());
        }

        self.features_written.fetch_add(1, Ordering::AcqRel);
        if self.trace_writes {
            trace!(
                message = "feature write",
                recorder = %self.def.name,
                pos0 = %pos0,
                feature_len = feature.len(),
            );
        }

        if let Some(route) = &self.stop_route {
            if !self.def.flags.no_stoplist && route.list.matches(feature, context) {
                return route.recorder.write(pos0, feature, context);
            }
        }

        {
            let histograms = self.histograms.lock();
            if !histograms.is_empty() {
                let key = String::from_utf8_lossy(&quoted);
                for h in histograms.iter() {
                    h.add(&key);
                }
            }
        }

        let context_field = if self.def.flags.no_context {
            None
        } else {
            let mut quoted_context = quote(context, style);
            quoted_context.truncate(self.def.max_context_size);
            Some(quoted_context)
        };
        self.sink
            .write_record(pos0, &quoted, context_field.as_deref())
            .context(SinkSnafu)
    }

    /// Record the feature at `[pos, pos+len)` of `sbuf` with a context
    /// window on each side.
    ///
    /// Positions in the margin are silently dropped: the page of the next
    /// buffer covers those bytes and will record them authoritatively.
    pub fn write_buf(&self, sbuf: &SBuf, pos: usize, len: usize) -> Result<(), RecorderError> {
        if self.disabled {
            return Ok(());
        }
        if pos >= sbuf.pagesize() {
            trace!(
                message = "suppressing feature in margin",
                recorder = %self.def.name,
                pos0 = %sbuf.pos0(),
                pos,
            );
            return Ok(());
        }
        let len = len.min(sbuf.bufsize() - pos);
        let feature = &sbuf.as_slice()[pos..pos + len];
        let context: &[u8] = if self.def.flags.no_context {
            b""
        } else {
            let start = pos.saturating_sub(self.context_window);
            let end = (pos + len + self.context_window).min(sbuf.bufsize());
            &sbuf.as_slice()[start..end]
        };
        self.write(&(sbuf.pos0() + pos as u64), feature, context)
    }

    /// Carve `header` + `data` out as a standalone artifact.
    ///
    /// Identical data (by content hash) is written at most once per
    /// recorder; later offers are recorded as `CACHED` with no file write.
    /// `mtime` of 0 means "unknown"; nonzero stamps the carved file.
    pub fn carve(
        &self,
        header: Option<&SBuf>,
        data: &SBuf,
        ext: &str,
        mtime: u64,
    ) -> Result<CarveOutcome, RecorderError> {
        if self.disabled {
            return Ok(CarveOutcome::NotCarved);
        }
        match self.def.carve_mode {
            CarveMode::None => return Ok(CarveOutcome::NotCarved),
            CarveMode::Encoded => {
                if data.pos0().path().is_empty() {
                    return Ok(CarveOutcome::NotCarved);
                }
                if let (Some(skip), Some(stage)) =
                    (&self.def.do_not_carve_encoding, data.pos0().last_stage())
                {
                    if skip == stage {
                        return Ok(CarveOutcome::NotCarved);
                    }
                }
            }
            CarveMode::All => {}
        }

        let digest = data.hash(self.hash_alg);
        let filesize = header.map_or(0, SBuf::bufsize) + data.bufsize();

        if !self.carve_cache.insert(digest.clone()) {
            let xml = format!(
                "<fileobject><filesize>{}</filesize>\
                 <hashdigest type='{}'>{}</hashdigest></fileobject>",
                filesize, self.hash_alg, digest,
            );
            self.write(data.pos0(), b"CACHED", xml.as_bytes())?;
            return Ok(CarveOutcome::Cached);
        }

        let outdir = match &self.outdir {
            Some(dir) => dir,
            None => return Ok(CarveOutcome::NotCarved),
        };
        let seq = self.carved_file_count.fetch_add(1, Ordering::AcqRel);
        let rel = format!(
            "{}/{:03}/{}{}",
            self.def.name,
            seq / 1000,
            valid_dosname(&data.pos0().to_string()),
            ext,
        );
        let target = outdir.join(&rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).context(IoSnafu { path: parent.to_path_buf() })?;
        }
        // Exclusive create: the name either becomes ours atomically or the
        // carve fails; there is no probe-then-open window.
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .context(IoSnafu { path: target.clone() })?;
        if let Some(header) = header {
            file.write_all(header.as_slice())
                .context(IoSnafu { path: target.clone() })?;
        }
        file.write_all(data.as_slice())
            .context(IoSnafu { path: target.clone() })?;
        if mtime > 0 {
            let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(mtime);
            file.set_times(FileTimes::new().set_modified(modified))
                .context(IoSnafu { path: target.clone() })?;
        }

        let xml = format!(
            "<fileobject><filename>{}</filename><filesize>{}</filesize>\
             <hashdigest type='{}'>{}</hashdigest></fileobject>",
            rel, filesize, self.hash_alg, digest,
        );
        self.write(data.pos0(), rel.as_bytes(), xml.as_bytes())?;
        Ok(CarveOutcome::Carved { path: rel })
    }

    pub fn flush(&self) -> Result<(), RecorderError> {
        self.sink.flush().context(SinkSnafu)
    }

    /// Materialize attached histograms to `{recorder}_{suffix}.txt` in the
    /// output directory.
    pub fn generate_histograms(&self) -> Result<(), RecorderError> {
        let outdir = match &self.outdir {
            Some(dir) if !self.disabled => dir,
            _ => return Ok(()),
        };
        for h in self.histograms.lock().iter() {
            let path = outdir.join(h.def().filename());
            let mut body = Vec::new();
            h.write_to(&mut body).expect("writing to a Vec cannot fail");
            std::fs::write(&path, body).context(IoSnafu { path: path.clone() })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::sink::MemorySink;

    use super::*;

    fn mem_recorder(def: FeatureRecorderDef) -> (FeatureRecorder, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let recorder = FeatureRecorder::new(def, Box::new(Arc::clone(&sink)));
        (recorder, sink)
    }

    #[test]
    fn write_quotes_and_counts() {
        let (r, sink) = mem_recorder(FeatureRecorderDef::new("email"));
        r.write(&Pos0::at(5), b"a@x.com\xff", b"before\tafter").unwrap();
        assert_eq!(r.features_written(), 1);
        let records = sink.records();
        assert_eq!(records[0].0, Pos0::at(5));
        assert_eq!(records[0].1, b"a@x.com\\xFF");
        assert_eq!(records[0].2.as_deref(), Some(&b"before\\x09after"[..]));
    }

    #[test]
    fn feature_is_truncated_and_empty_features_drop() {
        let (r, sink) = mem_recorder(FeatureRecorderDef::new("email").with_max_feature_size(4));
        r.write(&Pos0::at(0), b"abcdefgh", b"").unwrap();
        assert_eq!(sink.records()[0].1, b"abcd");

        r.write(&Pos0::at(1), b"", b"").unwrap();
        assert_eq!(r.features_written(), 1);
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn no_context_omits_the_column() {
        let def = FeatureRecorderDef::new("hits").with_flags(RecorderFlags {
            no_context: true,
            ..RecorderFlags::default()
        });
        let (r, sink) = mem_recorder(def);
        r.write(&Pos0::at(0), b"hit", b"ignored").unwrap();
        assert_eq!(sink.records()[0].2, None);
    }

    #[test]
    fn disabled_recorder_swallows_everything() {
        let sink = Arc::new(MemorySink::new());
        let ctx = RecorderContext { disabled: true, ..RecorderContext::default() };
        let r = FeatureRecorder::build(
            FeatureRecorderDef::new("email"),
            Box::new(Arc::clone(&sink)),
            ctx,
        );
        r.write(&Pos0::at(0), b"a@x.com", b"").unwrap();
        assert_eq!(r.features_written(), 0);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn stoplisted_features_route_to_quarantine() {
        let (stopped, stopped_sink) = mem_recorder(FeatureRecorderDef::new("stopped"));
        let mut list = StopList::new();
        list.add_word(b"spam".to_vec());
        let route = Arc::new(StopRoute { list, recorder: Arc::new(stopped) });

        let url_sink = Arc::new(MemorySink::new());
        let ctx = RecorderContext {
            stop_route: Some(Arc::clone(&route)),
            ..RecorderContext::default()
        };
        let url = FeatureRecorder::build(
            FeatureRecorderDef::new("url"),
            Box::new(Arc::clone(&url_sink)),
            ctx,
        );
        url.histogram_add(HistogramDef::new("url", "histogram")).unwrap();

        url.write(&Pos0::at(0), b"spam", b"ctx").unwrap();
        url.write(&Pos0::at(9), b"ham", b"ctx").unwrap();

        assert_eq!(url.features_written(), 2);
        let primary = url_sink.records();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].1, b"ham");
        assert_eq!(stopped_sink.records().len(), 1);
        assert_eq!(stopped_sink.records()[0].1, b"spam");
        // The histogram never saw the stop-listed feature.
        assert_eq!(route.recorder.features_written(), 1);
    }

    #[test]
    #[should_panic(expected = "after features were written")]
    fn histogram_add_after_write_panics() {
        let (r, _sink) = mem_recorder(FeatureRecorderDef::new("email"));
        r.write(&Pos0::at(0), b"a@x.com", b"").unwrap();
        let _ = r.histogram_add(HistogramDef::new("email", "histogram"));
    }

    #[test]
    fn duplicate_histogram_defs_merge() {
        let (r, _sink) = mem_recorder(FeatureRecorderDef::new("email"));
        r.histogram_add(HistogramDef::new("email", "histogram")).unwrap();
        r.histogram_add(HistogramDef::new("email", "histogram")).unwrap();
        assert_eq!(r.histogram_count(), 1);
    }

    #[test]
    #[should_panic(expected = "contains tab/newline/cr")]
    fn pedantic_rejects_separator_bytes() {
        let sink = Arc::new(MemorySink::new());
        let ctx = RecorderContext { pedantic: true, ..RecorderContext::default() };
        let r = FeatureRecorder::build(FeatureRecorderDef::new("email"), Box::new(sink), ctx);
        let _ = r.write(&Pos0::at(0), b"a\tb", b"");
    }

    #[test]
    fn write_buf_builds_context_window_and_drops_margin() {
        let body = b"aaaaaaaaaaFEATUREzzzzzzzzzz".to_vec();
        let mut sbuf = SBuf::new(Pos0::at(0), body);
        sbuf.set_pagesize(20);

        let def = FeatureRecorderDef::new("test").with_context_window(4);
        let (r, sink) = mem_recorder(def);

        r.write_buf(&sbuf, 10, 7).unwrap();
        let records = sink.records();
        assert_eq!(records[0].0, Pos0::at(10));
        assert_eq!(records[0].1, b"FEATURE");
        assert_eq!(records[0].2.as_deref(), Some(&b"aaaaFEATUREzzzz"[..]));

        // In the margin: silently dropped.
        r.write_buf(&sbuf, 22, 3).unwrap();
        assert_eq!(sink.records().len(), 1);
        assert_eq!(r.features_written(), 1);
    }

    #[test]
    fn write_buf_window_clamps_at_the_edges() {
        let sbuf = SBuf::new(Pos0::at(0), b"FEATi".to_vec());
        let def = FeatureRecorderDef::new("test").with_context_window(8);
        let (r, sink) = mem_recorder(def);
        r.write_buf(&sbuf, 0, 4).unwrap();
        assert_eq!(sink.records()[0].2.as_deref(), Some(&b"FEATi"[..]));
    }

    fn carving_recorder(
        outdir: &std::path::Path,
        mode: CarveMode,
        skip: Option<&str>,
    ) -> (FeatureRecorder, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let mut def = FeatureRecorderDef::new("carved").with_carve_mode(mode);
        def.do_not_carve_encoding = skip.map(String::from);
        let ctx = RecorderContext {
            outdir: Some(outdir.to_path_buf()),
            ..RecorderContext::default()
        };
        let r = FeatureRecorder::build(def, Box::new(Arc::clone(&sink)), ctx);
        (r, sink)
    }

    #[test]
    fn carve_writes_once_per_hash() {
        let dir = tempfile::tempdir().unwrap();
        let (r, sink) = carving_recorder(dir.path(), CarveMode::All, None);

        let data = SBuf::new(Pos0::at(512), b"carve me".to_vec());
        let first = r.carve(None, &data, ".bin", 0).unwrap();
        let path = match first {
            CarveOutcome::Carved { path } => path,
            other => panic!("expected Carved, got {:?}", other),
        };
        assert_eq!(path, "carved/000/512.bin");
        assert_eq!(std::fs::read(dir.path().join(&path)).unwrap(), b"carve me");

        // Same bytes elsewhere: recorded but not rewritten.
        let dup = SBuf::new(Pos0::at(9000), b"carve me".to_vec());
        assert_eq!(r.carve(None, &dup, ".bin", 0).unwrap(), CarveOutcome::Cached);

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].2.as_deref().unwrap().starts_with(b"<fileobject><filename>"));
        assert_eq!(records[1].1, b"CACHED");
        assert!(!records[1].2.as_deref().unwrap().starts_with(b"<fileobject><filename>"));
        assert_eq!(r.carved_file_count(), 1);
    }

    #[test]
    fn carve_prepends_header_and_stamps_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let (r, _sink) = carving_recorder(dir.path(), CarveMode::All, None);
        let header = SBuf::new(Pos0::at(0), b"HDR".to_vec());
        let data = SBuf::new(Pos0::at(4), b"BODY".to_vec());
        let outcome = r.carve(Some(&header), &data, ".gz", 1_700_000_000).unwrap();
        let path = match outcome {
            CarveOutcome::Carved { path } => dir.path().join(path),
            other => panic!("expected Carved, got {:?}", other),
        };
        assert_eq!(std::fs::read(&path).unwrap(), b"HDRBODY");
        let mtime = std::fs::metadata(&path)
            .unwrap()
            .modified()
            .unwrap()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(mtime, 1_700_000_000);
    }

    #[test]
    fn encoded_mode_gates_on_the_forensic_path() {
        let dir = tempfile::tempdir().unwrap();
        let (r, _sink) = carving_recorder(dir.path(), CarveMode::Encoded, Some("BASE64"));

        // Raw input: not carved.
        let raw = SBuf::new(Pos0::at(0), b"data".to_vec());
        assert_eq!(r.carve(None, &raw, ".bin", 0).unwrap(), CarveOutcome::NotCarved);

        // Under an excluded stage: not carved.
        let b64 = SBuf::new(Pos0::at(0).decoded("BASE64"), b"data".to_vec());
        assert_eq!(r.carve(None, &b64, ".bin", 0).unwrap(), CarveOutcome::NotCarved);

        // Under any other stage: carved.
        let zip = SBuf::new(Pos0::at(0).decoded("ZIP"), b"data".to_vec());
        assert!(matches!(
            r.carve(None, &zip, ".bin", 0).unwrap(),
            CarveOutcome::Carved { .. }
        ));
    }

    #[test]
    fn carve_mode_none_declines() {
        let dir = tempfile::tempdir().unwrap();
        let (r, sink) = carving_recorder(dir.path(), CarveMode::None, None);
        let data = SBuf::new(Pos0::at(0), b"data".to_vec());
        assert_eq!(r.carve(None, &data, ".bin", 0).unwrap(), CarveOutcome::NotCarved);
        assert!(sink.records().is_empty());
    }
}
