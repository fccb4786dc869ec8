//! `sift` is the core of a bulk-evidence scanning pipeline: opaque binary
//! inputs are sliced into bounded [`SBuf`] views, dispatched through a set
//! of registered [`Scanner`]s that may recursively emit decoded children,
//! and every discovered feature lands in a named [`FeatureRecorder`] with
//! positional provenance.
//!
//! A minimal run:
//!
//! ```no_run
//! use sift::{SBuf, ScanConfig, ScannerSet};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut set = ScannerSet::new(ScanConfig::in_outdir("out"), None)?;
//! // set.add_scanner(Box::new(MyScanner));
//! set.apply_scanner_commands()?;
//! set.phase_scan();
//! set.process_sbuf(SBuf::map_file("image.raw".as_ref())?);
//! set.shutdown(None)?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]

pub mod config;
pub mod digest;
pub mod histogram;
pub mod pos0;
pub mod quoting;
pub mod recorder;
pub mod recorder_set;
pub mod sbuf;
pub mod scanner;
pub mod scanner_set;
pub mod sink;
pub mod stoplist;

pub use self::config::{CommandAction, DebugFlags, ScanConfig, ScannerCommand, ScannerTarget};
pub use self::digest::HashAlgorithm;
pub use self::histogram::{Histogram, HistogramDef};
pub use self::pos0::Pos0;
pub use self::recorder::{
    CarveMode, CarveOutcome, FeatureRecorder, FeatureRecorderDef, RecorderFlags,
};
pub use self::recorder_set::{FeatureRecorderSet, ALERT_RECORDER_NAME, STOPPED_RECORDER_NAME};
pub use self::sbuf::{ByteOrder, SBuf, SBufError};
pub use self::scanner::{ScanError, ScanParams, Scanner, ScannerFlags, ScannerInfo};
pub use self::scanner_set::{Phase, ScannerSet, ScannerSummary};
pub use self::sink::{FeatureSink, FileSink, MemorySink};
pub use self::stoplist::StopList;
