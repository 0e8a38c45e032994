//! Embedded dex file handling.
//!
//! The extractor needs just enough of the dex format to walk every method's
//! code item in the order the runtime does, rewrite instructions in place, and
//! resolve the string, type, field and method indices that verifier
//! dependencies refer to.

mod context;
pub mod instruction;
mod structs;

pub use context::*;
pub use structs::*;
