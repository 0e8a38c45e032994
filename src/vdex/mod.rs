//! Vdex container parsing.
//!
//! A Vdex file bundles one or more dex files with the verifier's
//! dependency metadata and the side tables needed to undo quickening:
//!
//! ```text
//! VdexHeader            fixed-size header
//! u32[D]                location checksum per dex file
//! DEX[0] .. DEX[D-1]    embedded dex files, back to back
//! verifier deps         per-revision encoding
//! quickening info       per-revision encoding
//! ```

mod context;
mod iter;
mod structs;

pub use context::*;
pub use iter::*;
pub use structs::*;
