//! Take file writer
//!
//! Captured audio is written as 16-bit mono PCM WAV into a temp file that is
//! removed once the bytes have been read back.

use super::CaptureResult;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tempfile::NamedTempFile;

/// Audio produced by a finished writer
#[derive(Debug)]
pub struct EncodedTake {
    pub bytes: Vec<u8>,
    pub frames: u64,
    pub sample_rate: u32,
}

impl EncodedTake {
    /// Length measured from the frames actually written
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }
}

pub struct TakeWriter {
    file: NamedTempFile,
    writer: WavWriter<BufWriter<File>>,
    sample_rate: u32,
    frames: u64,
}

impl TakeWriter {
    /// Create the backing file in `dir`, or the system temp dir
    pub fn create(dir: Option<&Path>, sample_rate: u32) -> CaptureResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("take-").suffix(".wav");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(file.path(), spec)?;

        tracing::debug!("Created take file {:?}", file.path());
        Ok(Self {
            file,
            writer,
            sample_rate,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn write(&mut self, samples: &[f32]) -> CaptureResult<()> {
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            self.writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        self.frames += samples.len() as u64;
        Ok(())
    }

    /// Finalize the header and read the file back; the temp file is deleted
    pub fn finish(self) -> CaptureResult<EncodedTake> {
        self.writer.finalize()?;
        let bytes = std::fs::read(self.file.path())?;
        tracing::debug!(
            "Finalized take file {:?}: {} frames, {} bytes",
            self.file.path(),
            self.frames,
            bytes.len()
        );
        Ok(EncodedTake {
            bytes,
            frames: self.frames,
            sample_rate: self.sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_finished_take_is_valid_wav() {
        let dir = tempdir().unwrap();
        let mut writer = TakeWriter::create(Some(dir.path()), 8_000).unwrap();
        let path = writer.path().to_path_buf();
        writer.write(&vec![0.25; 4_000]).unwrap();
        assert_eq!(writer.frames(), 4_000);

        let take = writer.finish().unwrap();
        assert_eq!(take.frames, 4_000);
        assert!((take.duration() - 0.5).abs() < 1e-9);
        assert!(!path.exists());

        let reader = hound::WavReader::new(std::io::Cursor::new(take.bytes)).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.duration(), 4_000);
    }

    #[test]
    fn test_missing_directory_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            TakeWriter::create(Some(&missing), 8_000),
            Err(crate::capture::CaptureError::Storage(_))
        ));
    }
}
