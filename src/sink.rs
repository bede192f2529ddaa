//! Evidence image persistence.
//!
//! - `EvidenceLayout`: where each kind of image goes and what it is called.
//! - `ImageSink`: the write seam. `JpegImageSink` encodes to disk; tests
//!   substitute a recording sink.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, RgbImage};

use crate::error::{PipelineError, PipelineResult};
use crate::frame::StreamKind;
use crate::ledger::LEDGER_FILE_NAME;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// The three kinds of evidence image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Raw,
    Annotated,
    Baseline,
}

impl ImageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Raw => "raw",
            ImageKind::Annotated => "yolov5",
            ImageKind::Baseline => "baseline",
        }
    }
}

/// Output directory layout.
///
/// Detection images and the ledger live under `output_dir`; baseline images
/// under `baseline_dir`. File names are
/// `<unixSeconds><streamSuffix>_<kind>.jpg`, e.g. `1700000000_o_raw.jpg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceLayout {
    output_dir: PathBuf,
    baseline_dir: PathBuf,
}

impl EvidenceLayout {
    pub fn new(output_dir: impl Into<PathBuf>, baseline_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            baseline_dir: baseline_dir.into(),
        }
    }

    /// Layout with a `DD_MM_YY` child under both roots for `date`.
    pub fn dated(output_root: &Path, baseline_root: &Path, date: NaiveDate) -> Self {
        let day = date.format("%d_%m_%y").to_string();
        Self::new(output_root.join(&day), baseline_root.join(&day))
    }

    /// Create both directories.
    pub fn prepare(&self) -> PipelineResult<()> {
        for dir in [&self.output_dir, &self.baseline_dir] {
            fs::create_dir_all(dir).map_err(|e| PipelineError::persist(dir, e))?;
        }
        Ok(())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn baseline_dir(&self) -> &Path {
        &self.baseline_dir
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.output_dir.join(LEDGER_FILE_NAME)
    }

    pub fn image_path(&self, kind: ImageKind, stream: StreamKind, unix_seconds: u64) -> PathBuf {
        let dir = match kind {
            ImageKind::Baseline => &self.baseline_dir,
            ImageKind::Raw | ImageKind::Annotated => &self.output_dir,
        };
        dir.join(format!(
            "{}{}_{}.jpg",
            unix_seconds,
            stream.suffix(),
            kind.as_str()
        ))
    }
}

/// Destination for evidence images. Shared by both workers.
pub trait ImageSink: Send + Sync {
    fn write(&self, path: &Path, image: &RgbImage) -> PipelineResult<()>;
}

/// Writes JPEG files to the local filesystem.
#[derive(Clone, Debug)]
pub struct JpegImageSink {
    quality: u8,
}

impl JpegImageSink {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for JpegImageSink {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl ImageSink for JpegImageSink {
    fn write(&self, path: &Path, image: &RgbImage) -> PipelineResult<()> {
        let file = File::create(path).map_err(|e| PipelineError::persist(path, e))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.quality)
            .encode_image(image)
            .map_err(|e| match e {
                ImageError::IoError(io_err) => PipelineError::persist(path, io_err),
                other => PipelineError::persist(path, io::Error::other(other)),
            })?;
        writer
            .into_inner()
            .map_err(|e| PipelineError::persist(path, e.into_error()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_names_follow_layout() {
        let layout = EvidenceLayout::new("/data/output", "/data/baseline");
        assert_eq!(
            layout.image_path(ImageKind::Raw, StreamKind::Optical, 1_700_000_000),
            PathBuf::from("/data/output/1700000000_o_raw.jpg")
        );
        assert_eq!(
            layout.image_path(ImageKind::Annotated, StreamKind::Thermal, 42),
            PathBuf::from("/data/output/42_t_yolov5.jpg")
        );
        assert_eq!(
            layout.image_path(ImageKind::Baseline, StreamKind::Thermal, 42),
            PathBuf::from("/data/baseline/42_t_baseline.jpg")
        );
        assert_eq!(layout.ledger_path(), PathBuf::from("/data/output/metadata.csv"));
    }

    #[test]
    fn dated_layout_uses_day_month_year() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let layout = EvidenceLayout::dated(Path::new("out"), Path::new("base"), date);
        assert_eq!(layout.output_dir(), Path::new("out/07_03_24"));
        assert_eq!(layout.baseline_dir(), Path::new("base/07_03_24"));
    }

    #[test]
    fn jpeg_sink_writes_decodable_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = EvidenceLayout::new(dir.path().join("out"), dir.path().join("base"));
        layout.prepare().unwrap();
        let path = layout.image_path(ImageKind::Raw, StreamKind::Optical, 1);

        JpegImageSink::default()
            .write(&path, &RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10])))
            .unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn missing_directory_is_a_persist_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("x.jpg");
        let err = JpegImageSink::default()
            .write(&path, &RgbImage::new(2, 2))
            .unwrap_err();
        assert!(matches!(err, PipelineError::PersistFailed { .. }));
    }
}
