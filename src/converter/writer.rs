//! Output writer for extracted dex files and patched containers.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// What is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Embedded dex file `index` of the source container
    Dex { index: u32 },
    /// The source container with a patched checksum table
    Vdex,
}

/// Destination for output bytes. Naming and overwrite policy belong to the
/// implementation.
pub trait OutputSink: Sync {
    /// Persists `data` produced from `source` and returns where it went.
    fn write(&self, source: &Path, kind: OutputKind, data: &[u8]) -> Result<PathBuf>;
}

/// Writes output next to the source, or into a fixed directory.
#[derive(Debug, Clone, Default)]
pub struct FsWriter {
    /// Overrides the source's directory
    pub output_dir: Option<PathBuf>,
    /// Replace existing files instead of failing
    pub allow_overwrite: bool,
}

impl FsWriter {
    /// Creates a writer.
    pub fn new(output_dir: Option<PathBuf>, allow_overwrite: bool) -> Self {
        Self {
            output_dir,
            allow_overwrite,
        }
    }

    /// Returns the path output of `kind` from `source` is written to.
    pub fn output_path(&self, source: &Path, kind: OutputKind) -> PathBuf {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = file_name.strip_suffix(".vdex").unwrap_or(&file_name);

        let name = match kind {
            OutputKind::Dex { index: 0 } => format!("{stem}_classes.dex"),
            OutputKind::Dex { index } => format!("{stem}_classes{}.dex", index + 1),
            OutputKind::Vdex => format!("{stem}_updated.vdex"),
        };

        let dir = match &self.output_dir {
            Some(dir) => dir.as_path(),
            None => source.parent().unwrap_or_else(|| Path::new("")),
        };
        dir.join(name)
    }
}

impl OutputSink for FsWriter {
    fn write(&self, source: &Path, kind: OutputKind, data: &[u8]) -> Result<PathBuf> {
        let path = self.output_path(source, kind);
        let write_err = |e| Error::FileWrite {
            path: path.clone(),
            source: e,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let file = if self.allow_overwrite {
            File::create(&path)
        } else {
            OpenOptions::new().write(true).create_new(true).open(&path)
        }
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                Error::OutputExists { path: path.clone() }
            } else {
                write_err(e)
            }
        })?;

        let mut writer = BufWriter::new(file);
        writer.write_all(data).map_err(write_err)?;
        writer.flush().map_err(write_err)?;

        debug!("wrote {} bytes to {}", data.len(), path.display());
        Ok(path)
    }
}
