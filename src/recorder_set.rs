//! The feature-recorder set.
//!
//! One scanning run owns one [`FeatureRecorderSet`]: the named recorders,
//! the seen-set used to deduplicate input buffers, the stop-list route, and
//! the output directory. Recorders are created during initialization and
//! the map is read-only once scanning starts; everything handed out is an
//! `Arc` so scanner threads share recorders freely.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::info;

use crate::config::{DebugFlags, ScanConfig};
use crate::digest::HashAlgorithm;
use crate::histogram::HistogramDef;
use crate::recorder::{
    FeatureRecorder, FeatureRecorderDef, RecorderContext, RecorderError, StopRoute,
};
use crate::sbuf::SBuf;
use crate::sink::{FeatureSink, FileSink, NullSink, SinkError};
use crate::stoplist::StopList;

/// The well-known recorder for out-of-band messages.
pub const ALERT_RECORDER_NAME: &str = "alerts";
/// The quarantine recorder stop-listed features are routed to.
pub const STOPPED_RECORDER_NAME: &str = "stopped";

#[derive(Debug, Snafu)]
pub enum RecorderSetError {
    #[snafu(display("feature recorder already exists: {name:?}"))]
    DuplicateRecorder { name: String },
    #[snafu(display("no such feature recorder: {name:?}"))]
    NoSuchRecorder { name: String },
    #[snafu(display("output directory {} not usable: {source}", path.display()))]
    Outdir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("could not create feature sink: {source}"))]
    Sink { source: SinkError },
    #[snafu(display("{source}"))]
    Recorder { source: RecorderError },
}

#[derive(Serialize)]
struct RecorderCount<'a> {
    name: &'a str,
    features_written: u64,
    carved_file_count: u64,
}

/// See the module docs.
pub struct FeatureRecorderSet {
    recorders: DashMap<String, Arc<FeatureRecorder>>,
    seen_set: DashSet<String>,
    hash_alg: HashAlgorithm,
    outdir: Option<PathBuf>,
    pedantic: bool,
    trace_writes: bool,
    default_context_window: usize,
    stop_route: Option<Arc<StopRoute>>,
}

impl FeatureRecorderSet {
    /// Build the set for `config`. With no output directory the set is
    /// *disabled*: every recorder swallows writes and nothing touches the
    /// filesystem.
    pub fn new(config: &ScanConfig, stoplist: Option<StopList>) -> Result<Self, RecorderSetError> {
        Self::build(config, stoplist, &DebugFlags::default())
    }

    pub(crate) fn build(
        config: &ScanConfig,
        stoplist: Option<StopList>,
        debug: &DebugFlags,
    ) -> Result<Self, RecorderSetError> {
        if let Some(dir) = &config.outdir {
            std::fs::create_dir_all(dir).context(OutdirSnafu { path: dir.clone() })?;
        }
        let mut set = Self {
            recorders: DashMap::new(),
            seen_set: DashSet::new(),
            hash_alg: config.hash_algorithm,
            outdir: config.outdir.clone(),
            pedantic: config.pedantic,
            trace_writes: debug.trace_writes,
            default_context_window: config.context_window,
            stop_route: None,
        };
        if let Some(list) = stoplist {
            let stopped = set.create_routeless(FeatureRecorderDef::new(STOPPED_RECORDER_NAME))?;
            info!(message = "stop list installed", entries = list.len());
            set.stop_route = Some(Arc::new(StopRoute {
                list,
                recorder: stopped,
            }));
        }
        Ok(set)
    }

    pub fn is_disabled(&self) -> bool {
        self.outdir.is_none()
    }

    pub fn outdir(&self) -> Option<&PathBuf> {
        self.outdir.as_ref()
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_alg
    }

    fn make_sink(&self, name: &str) -> Result<Box<dyn FeatureSink>, RecorderSetError> {
        match &self.outdir {
            None => Ok(Box::new(NullSink)),
            Some(dir) => Ok(Box::new(
                FileSink::create(dir.join(format!("{name}.txt"))).context(SinkSnafu)?,
            )),
        }
    }

    fn context(&self, stop_route: Option<Arc<StopRoute>>) -> RecorderContext {
        RecorderContext {
            pedantic: self.pedantic,
            trace_writes: self.trace_writes,
            default_context_window: self.default_context_window,
            outdir: self.outdir.clone(),
            hash_alg: self.hash_alg,
            disabled: self.is_disabled(),
            stop_route,
        }
    }

    fn create_routeless(
        &self,
        def: FeatureRecorderDef,
    ) -> Result<Arc<FeatureRecorder>, RecorderSetError> {
        self.create_with_route(def, None)
    }

    fn create_with_route(
        &self,
        def: FeatureRecorderDef,
        stop_route: Option<Arc<StopRoute>>,
    ) -> Result<Arc<FeatureRecorder>, RecorderSetError> {
        use dashmap::mapref::entry::Entry;
        match self.recorders.entry(def.name.clone()) {
            Entry::Occupied(_) => DuplicateRecorderSnafu { name: def.name }.fail(),
            Entry::Vacant(slot) => {
                let sink = self.make_sink(&def.name)?;
                let recorder =
                    Arc::new(FeatureRecorder::build(def, sink, self.context(stop_route)));
                slot.insert(Arc::clone(&recorder));
                Ok(recorder)
            }
        }
    }

    /// Create a recorder. Fails if the name is taken.
    pub fn create_feature_recorder(
        &self,
        def: FeatureRecorderDef,
    ) -> Result<Arc<FeatureRecorder>, RecorderSetError> {
        self.create_with_route(def, self.stop_route.clone())
    }

    /// Create a recorder, or return the existing one of the same name.
    /// Scanner declarations merge this way: same name, same recorder.
    pub fn ensure_feature_recorder(
        &self,
        def: FeatureRecorderDef,
    ) -> Result<Arc<FeatureRecorder>, RecorderSetError> {
        if let Some(existing) = self.recorders.get(&def.name) {
            return Ok(Arc::clone(&existing));
        }
        match self.create_feature_recorder(def) {
            Err(RecorderSetError::DuplicateRecorder { name }) => self.named_feature_recorder(&name),
            other => other,
        }
    }

    pub fn named_feature_recorder(
        &self,
        name: &str,
    ) -> Result<Arc<FeatureRecorder>, RecorderSetError> {
        self.recorders
            .get(name)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| RecorderSetError::NoSuchRecorder {
                name: name.to_string(),
            })
    }

    pub fn has_recorder(&self, name: &str) -> bool {
        self.recorders.contains_key(name)
    }

    /// Create the well-known `alerts` recorder. Alerts bypass the
    /// stop-list: quarantining an out-of-band message would hide it.
    pub fn create_alert_recorder(&self) -> Result<Arc<FeatureRecorder>, RecorderSetError> {
        if let Some(existing) = self.recorders.get(ALERT_RECORDER_NAME) {
            return Ok(Arc::clone(&existing));
        }
        self.create_routeless(FeatureRecorderDef::new(ALERT_RECORDER_NAME))
    }

    pub fn alert_recorder(&self) -> Result<Arc<FeatureRecorder>, RecorderSetError> {
        self.named_feature_recorder(ALERT_RECORDER_NAME)
    }

    /// Test-and-insert the buffer's SHA-1 into the seen-set. True exactly
    /// when the same content was processed before.
    pub fn check_previously_processed(&self, sbuf: &SBuf) -> bool {
        !self.seen_set.insert(sbuf.hash(HashAlgorithm::Sha1))
    }

    /// Distinct buffer hashes seen so far.
    pub fn previously_processed_count(&self) -> usize {
        self.seen_set.len()
    }

    pub fn recorder_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.recorders.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Attach a histogram to the recorder its definition names.
    pub fn histogram_add(&self, def: &HistogramDef) -> Result<(), RecorderSetError> {
        self.named_feature_recorder(&def.recorder)?
            .histogram_add(def.clone())
            .context(RecorderSnafu)
    }

    /// One JSON record per recorder with its counters, for the structured
    /// log.
    pub fn dump_name_count_stats(&self, w: &mut dyn Write) -> io::Result<()> {
        for name in self.recorder_names() {
            if let Some(recorder) = self.recorders.get(&name) {
                let record = RecorderCount {
                    name: &name,
                    features_written: recorder.features_written(),
                    carved_file_count: recorder.carved_file_count(),
                };
                serde_json::to_writer(&mut *w, &record)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }

    pub fn flush_all(&self) -> Result<(), RecorderSetError> {
        for recorder in self.recorders.iter() {
            recorder.flush().context(RecorderSnafu)?;
        }
        Ok(())
    }

    /// Flush every recorder and materialize every histogram.
    pub fn shutdown(&self) -> Result<(), RecorderSetError> {
        for recorder in self.recorders.iter() {
            recorder.flush().context(RecorderSnafu)?;
            recorder.generate_histograms().context(RecorderSnafu)?;
        }
        Ok(())
    }
}
