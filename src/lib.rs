//! vdexex - A Vdex container extractor.
//!
//! This library extracts the dex files embedded in Android Vdex containers
//! and reverses the bytecode quickening the runtime applies to them, so the
//! results are standard dex files again.
//!
//! # Features
//!
//! - Memory-mapped, bounds-checked container parsing
//! - Schema revisions 006 and 010
//! - Unquickening with per-file fallback on inconsistent metadata
//! - Verifier dependency decoding and dumping
//! - Location checksum patching
//!
//! # Example
//!
//! ```no_run
//! use vdexex::converter::FsWriter;
//! use vdexex::{extract_file, RunOptions};
//!
//! fn main() -> vdexex::Result<()> {
//!     let options = RunOptions::default();
//!     let writer = FsWriter::new(None, false);
//!
//!     let count = extract_file("base.vdex", &options, &writer)?;
//!     println!("{count} dex files extracted");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod converter;
pub mod dex;
pub mod error;
pub mod util;
pub mod vdex;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use backend::{DependencyInfo, VdexBackend};
pub use error::{Error, Result};
pub use vdex::{VdexContext, VdexFile, VdexVersion};

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use converter::{parse_checksum_list, update_checksums, OutputSink};

/// Options for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Where output goes; defaults to each input's directory
    pub output_dir: Option<PathBuf>,
    /// Replace existing output files
    pub file_override: bool,
    /// Rewrite quickened bytecode (otherwise files are extracted as stored)
    pub unquicken: bool,
    /// Log a disassembly of every method
    pub disassemble: bool,
    /// Log decoded verifier dependencies under the `deps` target
    pub dump_deps: bool,
    /// Checksum list for the checksum update operation
    pub new_checksums: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            output_dir: None,
            file_override: false,
            unquicken: true,
            disassemble: false,
            dump_deps: false,
            new_checksums: None,
        }
    }
}

/// Processes one container held in memory.
///
/// Validates the buffer, selects the backend for its revision, optionally
/// logs its verifier dependencies, and extracts its dex files through
/// `sink`. Returns the number of dex files written.
pub fn process_vdex(
    source: &Path,
    data: &[u8],
    options: &RunOptions,
    sink: &dyn OutputSink,
) -> Result<usize> {
    let vdex = VdexContext::new(data)?;
    vdex.log_header_info();

    let backend = backend::select(&vdex.header.version)?;

    if options.dump_deps {
        let mut listing = Vec::new();
        dump_deps(backend, &vdex, &mut listing)?;
        for line in String::from_utf8_lossy(&listing).lines() {
            info!(target: "deps", "{line}");
        }
    }

    backend.process(source, &vdex, options, sink)
}

/// Maps the container at `path` and processes it.
pub fn extract_file<P: AsRef<Path>>(
    path: P,
    options: &RunOptions,
    sink: &dyn OutputSink,
) -> Result<usize> {
    let file = VdexFile::open(path)?;
    process_vdex(&file.path, file.data(), options, sink)
}

/// Decodes and writes the verifier dependencies of a container.
///
/// The decoded data is released on every path, including a failed dump.
pub fn dump_deps(
    backend: &dyn VdexBackend,
    vdex: &VdexContext<'_>,
    out: &mut dyn Write,
) -> Result<()> {
    let Some(info) = backend.init_deps_info(vdex)? else {
        warn!("empty verifier dependency data");
        return Ok(());
    };
    let result = backend.dump_deps_info(vdex, &info, out);
    backend.destroy_deps_info(info);
    result
}

/// Replaces the location checksums of the container at `path` with the
/// values listed in `options.new_checksums`.
pub fn update_file_checksums<P: AsRef<Path>>(
    path: P,
    options: &RunOptions,
    sink: &dyn OutputSink,
) -> Result<PathBuf> {
    let list = options
        .new_checksums
        .as_deref()
        .ok_or_else(|| Error::InvalidChecksumList {
            line: 0,
            text: "no checksum list given".to_string(),
        })?;
    let text = std::fs::read_to_string(list).map_err(|e| Error::FileOpen {
        path: list.to_path_buf(),
        source: e,
    })?;
    let values = parse_checksum_list(&text)?;

    let file = VdexFile::open(path)?;
    update_checksums(&file.path, file.data(), &values, sink)
}

/// Totals of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Inputs seen
    pub inputs: usize,
    /// Containers processed successfully
    pub processed_containers: usize,
    /// Dex files written from those containers
    pub extracted_files: usize,
}

impl BatchSummary {
    /// Records the outcome of one input.
    ///
    /// Failures are logged and skipped unless fatal, in which case the error
    /// is returned and the batch must stop.
    pub fn record(&mut self, name: &str, result: Result<usize>) -> Result<()> {
        self.inputs += 1;
        match result {
            Ok(files) => {
                self.processed_containers += 1;
                self.extracted_files += files;
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("{e} - skipping '{name}'");
                Ok(())
            }
        }
    }

    /// Combines the totals of two partial batches.
    pub fn merge(self, other: Self) -> Self {
        Self {
            inputs: self.inputs + other.inputs,
            processed_containers: self.processed_containers + other.processed_containers,
            extracted_files: self.extracted_files + other.extracted_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_vdex, minimal_dex, ulebs, MemorySink};

    #[test]
    fn test_batch_counts() {
        let mut bad_magic = build_vdex(b"010\0", &[], &[], &[]);
        bad_magic[..4].copy_from_slice(b"dex\n");
        let empty = build_vdex(b"006\0", &[], &[], &[]);
        let (a, b) = (minimal_dex(1), minimal_dex(2));
        let two = build_vdex(b"010\0", &[&a, &b], &[], &[]);

        let sink = MemorySink::default();
        let options = RunOptions::default();
        let mut summary = BatchSummary::default();
        for (name, data) in [("bad.vdex", &bad_magic), ("empty.vdex", &empty), ("two.vdex", &two)] {
            let result = process_vdex(Path::new(name), data, &options, &sink);
            summary.record(name, result).unwrap();
        }

        assert_eq!(
            summary,
            BatchSummary {
                inputs: 3,
                processed_containers: 2,
                extracted_files: 2,
            }
        );
        assert_eq!(sink.take().len(), 2);
    }

    #[test]
    fn test_fatal_error_stops_batch() {
        let mut summary = BatchSummary::default();
        let err = summary
            .record("x.vdex", Err(Error::BackendUnavailable(*b"999\0")))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(summary.processed_containers, 0);
    }

    #[test]
    fn test_merge() {
        let a = BatchSummary {
            inputs: 2,
            processed_containers: 1,
            extracted_files: 3,
        };
        let b = BatchSummary {
            inputs: 1,
            processed_containers: 1,
            extracted_files: 0,
        };
        assert_eq!(
            a.merge(b),
            BatchSummary {
                inputs: 3,
                processed_containers: 2,
                extracted_files: 3,
            }
        );
    }

    #[test]
    fn test_dump_deps() {
        let dex = minimal_dex(0);
        // One extra string, every other group empty
        let mut deps_bytes = ulebs(&[1]);
        deps_bytes.extend_from_slice(b"LExtra;\0");
        deps_bytes.extend_from_slice(&ulebs(&[0, 0, 0, 0, 0, 0]));
        let data = build_vdex(b"010\0", &[&dex], &deps_bytes, &[]);
        let vdex = VdexContext::new(&data).unwrap();

        let mut out = Vec::new();
        dump_deps(backend::select(b"010\0").unwrap(), &vdex, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("LExtra;"));

        let empty = build_vdex(b"010\0", &[&dex], &[], &[]);
        let vdex = VdexContext::new(&empty).unwrap();
        let mut out = Vec::new();
        dump_deps(backend::select(b"010\0").unwrap(), &vdex, &mut out).unwrap();
        assert!(out.is_empty());
    }
}
