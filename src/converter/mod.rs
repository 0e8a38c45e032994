//! Converters that turn container contents back into standalone files.
//!
//! The runtime's ahead-of-time verifier rewrites bytecode in place before
//! storing it in a container. This module reverses that and writes the
//! results out.
//!
//! # Extraction Pipeline
//!
//! For every embedded dex file, in container order:
//!
//! 1. **Method walk** - Visits methods with code class by class, direct
//!    methods first, pulling each one's side table from the backend's
//!    quickening source
//! 2. **Unquickening** - Restores standard opcodes and symbolic operands
//! 3. **Checksum repair** - Recomputes the dex checksum of rewritten files
//! 4. **Output** - Hands the bytes to an [`OutputSink`]
//!
//! Patching the container's location checksum table is a separate
//! operation ([`update_checksums`]).

mod checksum;
mod context;
pub mod disasm;
mod process;
mod unquicken;
mod writer;

pub use checksum::*;
pub use context::*;
pub use process::*;
pub use unquicken::*;
pub use writer::*;
