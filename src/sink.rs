//! Feature sinks.
//!
//! The backend a recorder emits into. The contract is small on purpose: a
//! record is durable by the time `flush` returns, and records written by one
//! scanner for one buffer appear in write order. The shipped implementation
//! is the tab-separated feature file; an SQL table satisfies the same
//! contract. The sink is chosen when the recorder set is built and hidden
//! behind the trait thereafter.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use snafu::{ResultExt, Snafu};

use crate::pos0::Pos0;

#[derive(Debug, Snafu)]
pub enum SinkError {
    #[snafu(display("feature sink I/O error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One feature record: `context` is `None` when the recorder suppresses
/// context (the record then has no context column at all, as opposed to an
/// empty one).
pub trait FeatureSink: Send + Sync {
    fn write_record(&self, pos0: &Pos0, feature: &[u8], context: Option<&[u8]>)
        -> Result<(), SinkError>;

    fn flush(&self) -> Result<(), SinkError>;
}

// Lets a caller keep a handle on a sink it hands to a recorder.
impl<S: FeatureSink> FeatureSink for std::sync::Arc<S> {
    fn write_record(
        &self,
        pos0: &Pos0,
        feature: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), SinkError> {
        (**self).write_record(pos0, feature, context)
    }

    fn flush(&self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// The classic feature file: `pos0<TAB>feature[<TAB>context]<LF>`, one
/// record per line.
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileSink {
    pub fn create(path: PathBuf) -> Result<Self, SinkError> {
        let file = File::create(&path).context(IoSnafu { path: path.clone() })?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl FeatureSink for FileSink {
    fn write_record(
        &self,
        pos0: &Pos0,
        feature: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), SinkError> {
        // One assembled buffer per record so a line is a single write even
        // if the platform interleaves writers beneath the mutex.
        let mut line = Vec::with_capacity(feature.len() + 64);
        line.extend_from_slice(pos0.to_string().as_bytes());
        line.push(b'\t');
        line.extend_from_slice(feature);
        if let Some(context) = context {
            line.push(b'\t');
            line.extend_from_slice(context);
        }
        line.push(b'\n');
        self.writer
            .lock()
            .write_all(&line)
            .context(IoSnafu { path: self.path.clone() })
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.writer
            .lock()
            .flush()
            .context(IoSnafu { path: self.path.clone() })
    }
}

/// Discards every record. Backs recorders when output is disabled.
pub struct NullSink;

impl FeatureSink for NullSink {
    fn write_record(&self, _: &Pos0, _: &[u8], _: Option<&[u8]>) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Captures records in memory. Useful for embedders and tests that want
/// features without an output directory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Pos0, Vec<u8>, Option<Vec<u8>>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Pos0, Vec<u8>, Option<Vec<u8>>)> {
        self.records.lock().clone()
    }
}

impl FeatureSink for MemorySink {
    fn write_record(
        &self,
        pos0: &Pos0,
        feature: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), SinkError> {
        self.records
            .lock()
            .push((pos0.clone(), feature.to_vec(), context.map(<[u8]>::to_vec)));
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
