//! Local persistence of received payloads

use super::{OutputFormat, StreamKind};
use crate::error::{BioemusError, Result};
use bioemus_hw::frames::SpikeFrames;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Header line of spike CSV files.
pub const SPIKE_CSV_HEADER: &str = "time;neuron_id";

/// Output file of one receive loop.
#[derive(Debug)]
pub enum Sink {
    /// Payload bytes appended as received.
    Binary {
        /// Output path.
        path: PathBuf,
        /// Buffered file.
        writer: BufWriter<File>,
    },
    /// One `time;neuron_id` line per spike.
    SpikeCsv {
        /// Output path.
        path: PathBuf,
        /// Buffered file.
        writer: BufWriter<File>,
        /// Neurons per frame.
        neurons: u32,
    },
}

impl Sink {
    /// Create (truncate) the output file of `kind` at `path`.
    ///
    /// # Errors
    ///
    /// I/O errors; [`BioemusError::Unsupported`] for a text format on a
    /// stream without a text encoding.
    pub fn create(path: &Path, format: OutputFormat, kind: StreamKind, neurons: u32) -> Result<Self> {
        let open = || -> Result<BufWriter<File>> {
            let file = File::create(path).map_err(|e| {
                BioemusError::invalid_state(format!("cannot open {}: {e}", path.display()))
            })?;
            Ok(BufWriter::new(file))
        };
        let sink = match (kind, format) {
            (_, OutputFormat::Binary) => Self::Binary {
                path: path.to_path_buf(),
                writer: open()?,
            },
            (StreamKind::Spikes, OutputFormat::Text) => {
                let mut writer = open()?;
                writeln!(writer, "{SPIKE_CSV_HEADER}")?;
                Self::SpikeCsv {
                    path: path.to_path_buf(),
                    writer,
                    neurons,
                }
            }
            (kind, OutputFormat::Text) => {
                return Err(BioemusError::unsupported(format!("text persistence of {kind} data")));
            }
        };
        tracing::info!("Open save file {}", path.display());
        Ok(sink)
    }

    /// Output path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Binary { path, .. } | Self::SpikeCsv { path, .. } => path,
        }
    }

    /// Persist one transfer payload.
    ///
    /// # Errors
    ///
    /// I/O errors.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        match self {
            Self::Binary { writer, .. } => writer.write_all(payload)?,
            Self::SpikeCsv { writer, neurons, .. } => {
                for ev in SpikeFrames::new(payload, *neurons).events() {
                    writeln!(writer, "{};{}", ev.time, ev.neuron)?;
                }
            }
        }
        Ok(())
    }

    /// Flush and close.
    ///
    /// # Errors
    ///
    /// I/O errors.
    pub fn finish(self) -> Result<()> {
        let (Self::Binary { mut writer, .. } | Self::SpikeCsv { mut writer, .. }) = self;
        writer.flush()?;
        Ok(())
    }
}
