//! Extraction context that holds state while one dex file is rebuilt.

use tracing::{info, warn};

use crate::error::Result;

use super::checksum::repair_dex_checksum;
use super::unquicken::MethodRewrite;

/// Running totals for one dex file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnquickenStats {
    /// Methods with code that were visited
    pub methods: usize,
    /// Methods with at least one rewritten instruction
    pub methods_changed: usize,
    /// Rewritten instructions
    pub instructions: usize,
    /// Operands restored as the unresolved marker
    pub unresolved: usize,
}

impl UnquickenStats {
    /// Folds in the result of one method.
    pub fn record(&mut self, rewrite: &MethodRewrite) {
        self.methods += 1;
        if !rewrite.is_empty() {
            self.methods_changed += 1;
        }
        self.instructions += rewrite.changed_pcs.len();
        self.unresolved += rewrite.unresolved;
    }
}

/// Context for extracting one embedded dex file.
///
/// The working copy starts out equal to the original bytes. Rewrites happen
/// in the copy, and [`restore`](Self::restore) throws them away when the
/// file has to be emitted as-is.
#[derive(Debug)]
pub struct ExtractionContext<'a> {
    /// Container name, for log messages
    pub container: String,
    /// Position of the dex file in the container
    pub index: u32,
    /// Bytes as stored in the container
    pub original: &'a [u8],
    /// Working copy that ends up in the output
    pub data: Vec<u8>,
    /// Rewrite totals
    pub stats: UnquickenStats,
    /// Log a disassembly listing of every method
    pub disassemble: bool,
}

impl<'a> ExtractionContext<'a> {
    /// Creates a context for dex file `index` of `container`.
    pub fn new(container: impl Into<String>, index: u32, original: &'a [u8]) -> Self {
        Self {
            container: container.into(),
            index,
            original,
            data: original.to_vec(),
            stats: UnquickenStats::default(),
            disassemble: false,
        }
    }

    /// Enables the disassembly listing.
    pub fn with_disassembly(mut self, disassemble: bool) -> Self {
        self.disassemble = disassemble;
        self
    }

    /// Returns true if the working copy differs from the original.
    pub fn is_modified(&self) -> bool {
        self.stats.instructions > 0
    }

    /// Discards every rewrite.
    pub fn restore(&mut self) {
        self.data.clear();
        self.data.extend_from_slice(self.original);
        self.stats = UnquickenStats::default();
    }

    /// Recomputes the dex checksum of the working copy.
    pub fn repair_checksum(&mut self) -> Result<()> {
        repair_dex_checksum(&mut self.data)
    }

    /// Logs a warning prefixed with the container and file.
    pub fn warn(&self, message: &str) {
        warn!("{}[{}]: {}", self.container, self.index, message);
    }

    /// Logs an info message prefixed with the container and file.
    pub fn info(&self, message: &str) {
        info!("{}[{}]: {}", self.container, self.index, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::minimal_dex;

    #[test]
    fn test_restore_discards_rewrites() {
        let dex = minimal_dex(3);
        let mut ctx = ExtractionContext::new("base.vdex", 0, &dex);
        ctx.data[0x70] = 0xAA;
        ctx.stats.record(&MethodRewrite {
            changed_pcs: vec![0],
            unresolved: 0,
        });
        assert!(ctx.is_modified());

        ctx.restore();
        assert_eq!(ctx.data, dex);
        assert!(!ctx.is_modified());
    }

    #[test]
    fn test_stats_record() {
        let mut stats = UnquickenStats::default();
        stats.record(&MethodRewrite::default());
        stats.record(&MethodRewrite {
            changed_pcs: vec![0, 4],
            unresolved: 1,
        });
        assert_eq!(
            stats,
            UnquickenStats {
                methods: 2,
                methods_changed: 1,
                instructions: 2,
                unresolved: 1,
            }
        );
    }
}
