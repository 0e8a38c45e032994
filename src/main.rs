//! vdexex - A Vdex container extractor.
//!
//! Extract and unquicken the dex files embedded in Android Vdex containers.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{error, info, warn, Level, Metadata, Subscriber};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use vdexex::converter::FsWriter;
use vdexex::{extract_file, update_file_checksums, BatchSummary, RunOptions, VdexFile};

/// A Vdex container extractor.
#[derive(Parser, Debug)]
#[command(name = "vdexex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract dex files from one container or a directory of containers
    Extract {
        /// Output directory (default: next to each input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite existing output files
        #[arg(short, long)]
        force: bool,

        /// Extract bytecode as stored, without unquickening
        #[arg(long)]
        no_unquicken: bool,

        /// Log a disassembly of every method
        #[arg(long)]
        dis: bool,

        /// Dump decoded verifier dependencies
        #[arg(long)]
        deps: bool,

        /// Write the disassembly and dependency listings to this file
        #[arg(short, long)]
        log_file: Option<PathBuf>,

        /// Verbosity level (0=errors, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "2")]
        verbosity: u8,

        /// Number of containers processed in parallel
        #[arg(short, long, default_value = "1")]
        jobs: usize,

        /// Vdex file, or directory scanned (non-recursively) for files
        input: PathBuf,
    },

    /// Show container header, layout and checksums
    Info {
        /// Vdex file
        input: PathBuf,
    },

    /// Replace the location checksums of a container
    UpdateChecksums {
        /// File with one checksum per line, decimal or 0x-prefixed hex
        #[arg(long = "new-crc")]
        new_crc: PathBuf,

        /// Output directory (default: next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing output file
        #[arg(short, long)]
        force: bool,

        /// Verbosity level (0=errors, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "2")]
        verbosity: u8,

        /// Vdex file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            output,
            force,
            no_unquicken,
            dis,
            deps,
            log_file,
            verbosity,
            jobs,
            input,
        } => {
            setup_logging(verbosity, log_file.as_deref())?;
            let options = RunOptions {
                output_dir: output,
                file_override: force,
                unquicken: !no_unquicken,
                disassemble: dis,
                dump_deps: deps,
                new_checksums: None,
            };
            cmd_extract(&input, &options, jobs)
        }
        Commands::Info { input } => cmd_info(&input),
        Commands::UpdateChecksums {
            new_crc,
            output,
            force,
            verbosity,
            input,
        } => {
            setup_logging(verbosity, None)?;
            let options = RunOptions {
                output_dir: output,
                file_override: force,
                new_checksums: Some(new_crc),
                ..RunOptions::default()
            };
            cmd_update_checksums(&input, &options)
        }
    }
}

/// Log targets carrying the disassembly and dependency listings.
const LISTING_TARGETS: [&str; 2] = ["disasm", "deps"];

fn is_listing(meta: &Metadata<'_>) -> bool {
    LISTING_TARGETS.contains(&meta.target())
}

fn setup_logging(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let file = log_file
        .map(|path| {
            File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))
        })
        .transpose()?;

    tracing::subscriber::set_global_default(build_subscriber(level, file)).ok();
    Ok(())
}

/// Console output up to `level`. Given a log file, the listings go there
/// in full instead.
fn build_subscriber(level: Level, log_file: Option<File>) -> impl Subscriber + Send + Sync {
    let split = log_file.is_some();
    let console = fmt::layer()
        .with_target(false)
        .without_time()
        .with_filter(filter_fn(move |meta| {
            meta.level() <= &level && !(split && is_listing(meta))
        }));

    let listing = log_file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .with_level(false)
            .without_time()
            .with_filter(filter_fn(is_listing))
    });

    tracing_subscriber::registry().with(console).with(listing)
}

/// Collects the inputs of a run: the file itself, or the regular files
/// directly inside a directory.
fn discover_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    if !input.is_dir() {
        bail!("Input does not exist: {}", input.display());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(input)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }

    // Sort for consistent ordering
    files.sort();

    if files.is_empty() {
        bail!("No files found in: {}", input.display());
    }

    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn cmd_extract(input: &Path, options: &RunOptions, jobs: usize) -> Result<()> {
    let start = Instant::now();
    let inputs = discover_inputs(input)?;
    let writer = FsWriter::new(options.output_dir.clone(), options.file_override);

    info!("Processing {} file(s) from {}", inputs.len(), input.display());

    let progress = if inputs.len() > 1 {
        let bar = ProgressBar::new(inputs.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let process_one = |path: &PathBuf| -> vdexex::Result<BatchSummary> {
        let name = display_name(path);
        let result = extract_file(path, options, &writer);
        progress.inc(1);
        let mut summary = BatchSummary::default();
        summary.record(&name, result)?;
        Ok(summary)
    };

    let summary = if jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .context("Failed to build thread pool")?;
        pool.install(|| {
            inputs
                .par_iter()
                .map(process_one)
                .try_reduce(BatchSummary::default, |a, b| Ok(a.merge(b)))
        })
    } else {
        inputs
            .iter()
            .map(process_one)
            .try_fold(BatchSummary::default(), |acc, s| s.map(|s| acc.merge(s)))
    };

    progress.finish_and_clear();

    let summary = match summary {
        Ok(summary) => summary,
        Err(e) => {
            error!("{e}");
            return Err(e).context("Aborting batch");
        }
    };

    info!(
        "{} out of {} Vdex files have been processed",
        summary.processed_containers, summary.inputs
    );
    info!(
        "{} Dex files have been extracted in total",
        summary.extracted_files
    );
    let out_dir = options
        .output_dir
        .clone()
        .or_else(|| {
            if input.is_dir() {
                Some(input.to_path_buf())
            } else {
                input.parent().map(Path::to_path_buf)
            }
        })
        .unwrap_or_default();
    info!(
        "Extracted Dex files are available in '{}' ({:.2}s)",
        out_dir.display(),
        start.elapsed().as_secs_f64()
    );

    if summary.processed_containers < summary.inputs {
        warn!(
            "{} file(s) skipped",
            summary.inputs - summary.processed_containers
        );
    }

    Ok(())
}

fn cmd_info(input: &Path) -> Result<()> {
    let file = VdexFile::open(input)
        .with_context(|| format!("Failed to open: {}", input.display()))?;
    let vdex = file
        .context()
        .with_context(|| format!("Invalid Vdex file: {}", input.display()))?;
    let h = &vdex.header;

    println!("Vdex Container Information");
    println!("==========================");
    println!("Path:            {}", input.display());
    println!("Version:         {}", vdex.version);
    println!("Dex files:       {}", h.number_of_dex_files);
    println!("Total size:      {}", format_size(file.data().len() as u64));

    println!("\nSections:");
    for (name, start, end) in [
        ("checksums", h.checksums_offset(), h.dex_begin()),
        ("dex", h.dex_begin(), h.dex_end()),
        ("verifier deps", h.verifier_deps_offset(), h.verifier_deps_end()),
        ("quickening info", h.quickening_info_offset(), h.quickening_info_end()),
    ] {
        println!(
            "  {:<16} {:#010x} - {:#010x} ({:>8})",
            name,
            start,
            end,
            format_size(end - start)
        );
    }

    println!("\nDex files:");
    for (i, entry) in vdex.dex_files().enumerate() {
        let checksum = checksum_label(vdex.location_checksum(i as u32));
        match entry {
            Ok(entry) => println!(
                "  [{:2}] {:#010x} ({:>8}) location checksum {}",
                entry.index,
                entry.offset,
                format_size(entry.data.len() as u64),
                checksum
            ),
            Err(e) => println!("  [{i:2}] <corrupt: {e}>"),
        }
    }

    Ok(())
}

fn cmd_update_checksums(input: &Path, options: &RunOptions) -> Result<()> {
    if !input.is_file() {
        bail!("Checksum update takes exactly one Vdex file: {}", input.display());
    }

    let writer = FsWriter::new(options.output_dir.clone(), options.file_override);
    let path = update_file_checksums(input, options, &writer)
        .with_context(|| format!("Failed to update checksums of {}", input.display()))?;

    info!("Updated Vdex file is available in '{}'", path.display());
    Ok(())
}

/// Files past the declared count have no checksum slot.
fn checksum_label(checksum: Option<u32>) -> String {
    checksum.map_or_else(|| "<none>".to_string(), |c| format!("{c:#010x}"))
}

fn format_size(size: u64) -> String {
    if size >= 1024 * 1024 * 1024 {
        format!("{:.1}G", size as f64 / 1024.0 / 1024.0 / 1024.0)
    } else if size >= 1024 * 1024 {
        format!("{:.1}M", size as f64 / 1024.0 / 1024.0)
    } else if size >= 1024 {
        format!("{:.1}K", size as f64 / 1024.0)
    } else {
        format!("{}B", size)
    }
}
