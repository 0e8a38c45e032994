//! Versioned container backends.
//!
//! Each supported schema revision gets a [`VdexBackend`] implementation that
//! knows how its verifier dependencies and quickening info are laid out. A
//! backend is selected per container from the validated version string and
//! passed explicitly to everything that needs it; there is no global
//! "active backend".
//!
//! Supporting another revision means adding a [`VdexVersion`] variant and a
//! backend module, and extending [`for_version`]. Callers only ever see
//! `&dyn VdexBackend`.

pub mod deps;
mod v10;
mod v6;

use std::io::Write;
use std::path::Path;

use crate::converter::{process_container, OutputSink};
use crate::error::{Error, Result};
use crate::vdex::{VdexContext, VdexVersion};
use crate::RunOptions;

pub use deps::DependencyInfo;
pub use v10::V10Backend;
pub use v6::V6Backend;

/// Supplies the quickening entries of each method, in the order the
/// extractor walks them.
///
/// The extractor calls [`begin_dex`](Self::begin_dex) before the first method
/// of every dex file (including files it ends up not rewriting), then
/// [`method`](Self::method) once per method with code, then
/// [`end_dex`](Self::end_dex).
pub trait QuickeningSource<'a> {
    /// Prepares for the methods of dex file `index`.
    fn begin_dex(&mut self, index: u32) -> Result<()>;

    /// Returns the encoded `(dex_pc, value)` entries of the method whose code
    /// item is at `code_off`. Empty if the method was not quickened.
    fn method(&mut self, code_off: u32) -> Result<&'a [u8]>;

    /// Finishes the current dex file, reporting unconsumed entries.
    fn end_dex(&mut self) -> Result<()>;
}

/// A schema revision's container operations.
pub trait VdexBackend: Sync {
    /// The revision this backend handles.
    fn version(&self) -> VdexVersion;

    /// Decodes the verifier deps section.
    ///
    /// Returns `Ok(None)` for an empty section. The result must be handed
    /// back to [`destroy_deps_info`](Self::destroy_deps_info).
    fn init_deps_info(&self, vdex: &VdexContext<'_>) -> Result<Option<DependencyInfo>>;

    /// Releases decoded dependencies.
    fn destroy_deps_info(&self, info: DependencyInfo) {
        drop(info);
    }

    /// Writes a readable listing of decoded dependencies.
    fn dump_deps_info(
        &self,
        vdex: &VdexContext<'_>,
        info: &DependencyInfo,
        out: &mut dyn Write,
    ) -> Result<()> {
        deps::dump(vdex, info, out)
    }

    /// Opens the quickening info section for sequential consumption.
    fn quickening_source<'a>(
        &self,
        vdex: &VdexContext<'a>,
    ) -> Result<Box<dyn QuickeningSource<'a> + 'a>>;

    /// Extracts every dex file of the container, unquickening unless
    /// disabled, and returns how many were written.
    fn process(
        &self,
        source: &Path,
        vdex: &VdexContext<'_>,
        options: &RunOptions,
        sink: &dyn OutputSink,
    ) -> Result<usize> {
        process_container(self, source, vdex, options, sink)
    }
}

static V6: V6Backend = V6Backend;
static V10: V10Backend = V10Backend;

/// Returns the backend for a supported revision.
pub fn for_version(version: VdexVersion) -> &'static dyn VdexBackend {
    match version {
        VdexVersion::V006 => &V6,
        VdexVersion::V010 => &V10,
    }
}

/// Selects the backend for a raw header version string.
///
/// Only reachable with a version that failed validation, which is a caller
/// bug; the error is fatal.
pub fn select(version: &[u8; 4]) -> Result<&'static dyn VdexBackend> {
    VdexVersion::from_bytes(version)
        .map(for_version)
        .ok_or(Error::BackendUnavailable(*version))
}
