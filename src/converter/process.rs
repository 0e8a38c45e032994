//! Per-container extraction driver.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::backend::{QuickeningSource, VdexBackend};
use crate::dex::DexFile;
use crate::error::{Error, Result};
use crate::vdex::{DexEntry, VdexContext};
use crate::RunOptions;

use super::disasm;
use super::{unquicken_method, ExtractionContext, OutputKind, OutputSink};

/// Extracts every dex file of a validated container.
///
/// Files are unquickened unless `options.unquicken` is off or the container
/// carries no quickening info. A file whose quickening info turns out to be
/// inconsistent is emitted with its original bytes. Returns the number of
/// files written.
///
/// Fails on a corrupt dex section, an unparsable dex file, or a write
/// error; nothing written before the failure is rolled back.
pub fn process_container<B: VdexBackend + ?Sized>(
    backend: &B,
    source: &Path,
    vdex: &VdexContext<'_>,
    options: &RunOptions,
    sink: &dyn OutputSink,
) -> Result<usize> {
    let name = container_name(source);

    let entries = vdex.dex_files().collect::<Result<Vec<DexEntry<'_>>>>()?;
    if entries.len() != vdex.dex_count() as usize {
        warn!(
            "{}: header declares {} dex files, found {}",
            name,
            vdex.dex_count(),
            entries.len()
        );
    }
    if entries.is_empty() {
        info!("{name}: no dex files");
        return Ok(0);
    }

    let unquicken = options.unquicken && !vdex.quickening_info().is_empty();
    if options.unquicken && !unquicken {
        debug!("{name}: no quickening info, extracting as-is");
    }
    let mut quickening = if unquicken {
        Some(backend.quickening_source(vdex)?)
    } else {
        None
    };

    let mut written = 0;
    for entry in &entries {
        let mut ctx = ExtractionContext::new(name.clone(), entry.index, entry.data)
            .with_disassembly(options.disassemble);

        match quickening.as_deref_mut() {
            Some(quick) => unquicken_dex(&mut ctx, quick)?,
            None => walk_dex(&ctx)?,
        }

        let path = sink.write(source, OutputKind::Dex { index: entry.index }, &ctx.data)?;
        info!(
            "{}: dex [{}] ({} bytes) written to {}",
            name,
            entry.index,
            ctx.data.len(),
            path.display()
        );
        written += 1;
    }

    Ok(written)
}

/// Unquickens one dex file in place.
///
/// Every method with code is handed to `source`, even after the file has
/// been given up on, so that sequential sources stay aligned for the next
/// file. Recoverable errors restore the original bytes; anything else is
/// returned.
pub fn unquicken_dex<'q>(
    ctx: &mut ExtractionContext<'_>,
    source: &mut (dyn QuickeningSource<'q> + 'q),
) -> Result<()> {
    let dex = DexFile::parse(ctx.original)?;
    let methods = dex.methods_with_code()?;
    debug!(
        "{}[{}]: {} classes, {} methods with code",
        ctx.container,
        ctx.index,
        dex.class_count(),
        methods.len()
    );

    let mut failure: Option<Error> = None;
    keep_recoverable(&mut failure, source.begin_dex(ctx.index))?;

    for method in &methods {
        let Some(table) = keep_recoverable(&mut failure, source.method(method.method.code_off))?
        else {
            continue;
        };
        if failure.is_some() {
            continue;
        }

        let range = method.code.insns_range();
        let rewrite = unquicken_method(&mut ctx.data[range.clone()], table);
        let Some(rewrite) = keep_recoverable(&mut failure, rewrite)? else {
            continue;
        };
        ctx.stats.record(&rewrite);

        if ctx.disassemble {
            disasm::log_method(&dex, method, &ctx.data[range], &rewrite.changed_pcs);
        }
    }

    keep_recoverable(&mut failure, source.end_dex())?;

    if let Some(err) = failure {
        ctx.warn(&format!("{err}; emitting original bytes"));
        ctx.restore();
        return Ok(());
    }

    if ctx.is_modified() {
        ctx.repair_checksum()?;
    }
    let stats = ctx.stats;
    ctx.info(&format!(
        "{} of {} methods unquickened ({} instructions, {} unresolved)",
        stats.methods_changed, stats.methods, stats.instructions, stats.unresolved
    ));
    Ok(())
}

/// Walks a dex file without rewriting it, for the disassembly listing.
fn walk_dex(ctx: &ExtractionContext<'_>) -> Result<()> {
    let dex = DexFile::parse(ctx.original)?;
    if !ctx.disassemble {
        return Ok(());
    }
    for method in dex.methods_with_code()? {
        disasm::log_method(&dex, &method, &ctx.original[method.code.insns_range()], &[]);
    }
    Ok(())
}

/// Stores the first recoverable error in `failure` and passes every other
/// error through.
fn keep_recoverable<T>(failure: &mut Option<Error>, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            failure.get_or_insert(e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// File name of `source`, for log messages.
pub(crate) fn container_name(source: &Path) -> String {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{V10Backend, V6Backend};
    use crate::dex::DexHeader;
    use crate::test_support::{
        build_vdex, code_units, minimal_dex, v10_region, v6_record, DexBuilder, MemorySink,
    };

    /// One class with a quickened getter and a plain method.
    fn quickened_dex() -> (Vec<u8>, Vec<u32>) {
        let mut builder = DexBuilder::new();
        let class = builder.class("LApp;");
        builder.field(class, "value", "I");
        // iget-quick v0, v0, [obj+8]; return-void-no-barrier
        builder.virtual_method(class, "get", &[0x00e3, 0x0008, 0x0073]);
        // const/4 v0, 0; return-void
        builder.direct_method(class, "<init>", &[0x0012, 0x000e]);
        let data = builder.build();
        (data, builder.code_offsets.clone())
    }

    fn insns_of(data: &[u8], code_off: u32) -> Vec<u8> {
        let dex = DexFile::parse(data).unwrap();
        let item = dex.code_item(code_off).unwrap();
        data[item.insns_range()].to_vec()
    }

    fn stored_checksum(data: &[u8]) -> u32 {
        let at = DexHeader::CHECKSUM_OFFSET;
        u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn test_v6_unquickens_in_method_order() {
        let (dex, offs) = quickened_dex();
        // Direct methods come first: <init>, then get
        let mut region = v6_record(&[]);
        region.extend(v6_record(&[(0, 0)]));
        let data = build_vdex(b"006\0", &[&dex], &[], &region);
        let vdex = VdexContext::new(&data).unwrap();

        let sink = MemorySink::default();
        let count = V6Backend
            .process(Path::new("app.vdex"), &vdex, &RunOptions::default(), &sink)
            .unwrap();
        assert_eq!(count, 1);

        let files = sink.take();
        let (kind, out) = &files[0];
        assert_eq!(*kind, OutputKind::Dex { index: 0 });
        assert_eq!(insns_of(out, offs[1]), code_units(&[0x0052, 0x0000, 0x000e]));
        assert_eq!(insns_of(out, offs[0]), code_units(&[0x0012, 0x000e]));
        assert_eq!(stored_checksum(out), crate::converter::dex_checksum(out));
        assert_ne!(out, &dex);
    }

    #[test]
    fn test_v10_mismatch_falls_back_per_file() {
        let (good, good_offs) = quickened_dex();
        let (bad, bad_offs) = quickened_dex();
        // Second file's entry points at the wrong pc
        let region = v10_region(&[
            vec![(good_offs[1], vec![(0, 0)])],
            vec![(bad_offs[1], vec![(1, 0)])],
        ]);
        let data = build_vdex(b"010\0", &[&good, &bad], &[], &region);
        let vdex = VdexContext::new(&data).unwrap();

        let sink = MemorySink::default();
        let count = V10Backend
            .process(Path::new("app.vdex"), &vdex, &RunOptions::default(), &sink)
            .unwrap();
        assert_eq!(count, 2);

        let files = sink.take();
        assert_eq!(insns_of(&files[0].1, good_offs[1]), code_units(&[0x0052, 0x0000, 0x000e]));
        assert_eq!(files[1].1, bad);
    }

    #[test]
    fn test_v6_mismatch_keeps_next_file_aligned() {
        let (first, offs) = quickened_dex();
        let second = first.clone();
        // First file's getter entry points mid-instruction
        let mut region = v6_record(&[]);
        region.extend(v6_record(&[(1, 0)]));
        region.extend(v6_record(&[]));
        region.extend(v6_record(&[(0, 7)]));
        let data = build_vdex(b"006\0", &[&first, &second], &[], &region);
        let vdex = VdexContext::new(&data).unwrap();

        let sink = MemorySink::default();
        let count = V6Backend
            .process(Path::new("app.vdex"), &vdex, &RunOptions::default(), &sink)
            .unwrap();
        assert_eq!(count, 2);

        let files = sink.take();
        assert_eq!(files[0].1, first);
        assert_eq!(insns_of(&files[1].1, offs[1]), code_units(&[0x0052, 0x0007, 0x000e]));
        assert_eq!(stored_checksum(&files[1].1), crate::converter::dex_checksum(&files[1].1));
    }

    #[test]
    fn test_unquicken_disabled_passes_through() {
        let (dex, _) = quickened_dex();
        let region = v6_record(&[]);
        let data = build_vdex(b"006\0", &[&dex], &[], &region);
        let vdex = VdexContext::new(&data).unwrap();

        let options = RunOptions {
            unquicken: false,
            ..RunOptions::default()
        };
        let sink = MemorySink::default();
        V6Backend
            .process(Path::new("app.vdex"), &vdex, &options, &sink)
            .unwrap();
        assert_eq!(sink.take()[0].1, dex);
    }

    #[test]
    fn test_empty_quickening_region() {
        let (a, b) = (minimal_dex(1), minimal_dex(2));
        let data = build_vdex(b"010\0", &[&a, &b], &[], &[]);
        let vdex = VdexContext::new(&data).unwrap();

        let sink = MemorySink::default();
        let count = V10Backend
            .process(Path::new("app.vdex"), &vdex, &RunOptions::default(), &sink)
            .unwrap();
        assert_eq!(count, 2);
        let files = sink.take();
        assert_eq!(files[0].1, a);
        assert_eq!(files[1], (OutputKind::Dex { index: 1 }, b.clone()));
    }

    #[test]
    fn test_corrupt_dex_section_fails_container() {
        let (a, b) = (minimal_dex(1), minimal_dex(2));
        let mut data = build_vdex(b"010\0", &[&a, &b], &[], &[]);
        // Grow the first file past the section end
        let at = 24 + 8 + DexHeader::FILE_SIZE_OFFSET;
        let size = (a.len() + b.len() + 4) as u32;
        data[at..at + 4].copy_from_slice(&size.to_le_bytes());
        let vdex = VdexContext::new(&data).unwrap();

        let sink = MemorySink::default();
        let err = V10Backend
            .process(Path::new("app.vdex"), &vdex, &RunOptions::default(), &sink)
            .unwrap_err();
        assert!(matches!(err, Error::RegionBoundaryViolation { .. }));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_zero_file_container() {
        let data = build_vdex(b"006\0", &[], &[], &[]);
        let vdex = VdexContext::new(&data).unwrap();
        let sink = MemorySink::default();
        let count = V6Backend
            .process(Path::new("empty.vdex"), &vdex, &RunOptions::default(), &sink)
            .unwrap();
        assert_eq!(count, 0);
    }
}
