//! WAV sink for recording the captured stream.
//!
//! Writes the resampled 16kHz mono stream as 16-bit PCM. Used by the CLI
//! `--save-audio` flag; not part of the pipeline contract.

use crate::defaults;
use crate::error::{Result, SottoError};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Incremental WAV writer for 16kHz mono int16 audio.
pub struct CaptureWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    samples_written: u64,
}

impl CaptureWriter {
    /// Create the output file, truncating any existing content.
    pub fn create(path: &Path) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: defaults::SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec).map_err(|e| SottoError::Io(
            std::io::Error::other(format!("create {}: {}", path.display(), e)),
        ))?;
        Ok(Self {
            writer: Some(writer),
            samples_written: 0,
        })
    }

    /// Append samples to the recording.
    pub fn write(&mut self, samples: &[i16]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(SottoError::Other("capture writer already finalized".into()));
        };
        for &s in samples {
            writer
                .write_sample(s)
                .map_err(|e| SottoError::Io(std::io::Error::other(e.to_string())))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    /// Total samples written so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Finish the file, patching up the WAV header.
    pub fn finalize(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| SottoError::Io(std::io::Error::other(e.to_string())))?;
        }
        Ok(())
    }
}
