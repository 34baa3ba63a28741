//! Transient WAV artifacts
//!
//! The output device loads files, so every processed buffer is written out as
//! 16-bit PCM WAV before it is played. Only the newest few files are kept:
//! creating one beyond the limit deletes the oldest, and the rest go on
//! cleanup (or drop).

use std::collections::VecDeque;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use thiserror::Error;

use crate::types::AudioBuffer;

/// Errors writing artifacts
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Temp file (or export target) could not be created
    #[error("Failed to create artifact file: {0}")]
    Create(#[from] std::io::Error),

    /// WAV encoding failed
    #[error("Failed to write WAV: {0}")]
    Write(#[from] hound::Error),
}

/// Write `buffer` as 16-bit PCM WAV
pub fn write_wav<W: Write + Seek>(buffer: &AudioBuffer, writer: W) -> Result<(), ArtifactError> {
    let spec = hound::WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(writer, spec)?;
    for &sample in buffer.samples() {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Write `buffer` to `path` as 16-bit PCM WAV
pub fn export_wav(buffer: &AudioBuffer, path: &Path) -> Result<(), ArtifactError> {
    let file = std::fs::File::create(path)?;
    write_wav(buffer, BufWriter::new(file))
}

/// FIFO of transient WAV files
#[derive(Debug)]
pub struct ArtifactStore {
    prefix: String,
    dir: Option<PathBuf>,
    max_artifacts: usize,
    artifacts: VecDeque<TempPath>,
}

impl ArtifactStore {
    /// Store keeping at most `max_artifacts` (at least 1) files
    ///
    /// Files go to `dir`, or the system temp directory when `None`.
    pub fn new(prefix: impl Into<String>, max_artifacts: usize, dir: Option<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            dir,
            max_artifacts: max_artifacts.max(1),
            artifacts: VecDeque::new(),
        }
    }

    /// Write `buffer` to a new artifact and return its path
    ///
    /// On failure no file is left behind and nothing is evicted.
    pub fn materialize(&mut self, buffer: &AudioBuffer) -> Result<PathBuf, ArtifactError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix).suffix(".wav");
        let file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        write_wav(buffer, BufWriter::new(file.reopen()?))?;

        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();
        self.artifacts.push_back(temp_path);
        log::debug!(
            "ArtifactStore: Wrote {:?} ({:.2}s)",
            path,
            buffer.duration_secs()
        );

        while self.artifacts.len() > self.max_artifacts {
            if let Some(oldest) = self.artifacts.pop_front() {
                remove(oldest);
            }
        }
        Ok(path)
    }

    /// Paths of the retained artifacts, oldest first
    pub fn paths(&self) -> Vec<PathBuf> {
        self.artifacts.iter().map(|p| p.to_path_buf()).collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Delete every retained artifact
    pub fn cleanup(&mut self) {
        let count = self.artifacts.len();
        for path in self.artifacts.drain(..) {
            remove(path);
        }
        if count > 0 {
            log::info!("ArtifactStore: Removed {} artifact(s)", count);
        }
    }
}

impl Drop for ArtifactStore {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove(path: TempPath) {
    let display = path.to_path_buf();
    match path.close() {
        Ok(()) => log::debug!("ArtifactStore: Removed {:?}", display),
        Err(e) => log::warn!("ArtifactStore: Failed to remove {:?}: {}", display, e),
    }
}
