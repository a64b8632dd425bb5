//! Cache keys.
//!
//! A fingerprint identifies "this file, analysed with these settings"
//! without reading the video: file name, byte size and modification time,
//! plus the settings that change the verdict (crop size and threshold).

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use dfd_media::MediaError;
use dfd_models::AnalysisConfig;

/// Cache identity of one analysis.
///
/// Two requests share a fingerprint when they name a file with the same name,
/// size and modification time and run with the same crop size and decision
/// threshold. The threshold is compared by its bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    file_name: String,
    size: u64,
    modified_millis: i64,
    crop_size: u32,
    threshold_bits: u32,
}

impl Fingerprint {
    pub fn new(
        file_name: impl Into<String>,
        size: u64,
        modified_millis: i64,
        crop_size: u32,
        threshold: f32,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            size,
            modified_millis,
            crop_size,
            threshold_bits: threshold.to_bits(),
        }
    }

    /// Fingerprint `path` from its metadata.
    pub fn for_file(path: &Path, config: &AnalysisConfig) -> Result<Self, MediaError> {
        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::FileNotFound(path.to_path_buf()),
            _ => MediaError::Io(e),
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        // Filesystems without mtime fall back to 0
        let modified_millis = metadata
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or(0);

        Ok(Self::new(
            file_name,
            metadata.len(),
            modified_millis,
            config.crop_size,
            config.decision_threshold,
        ))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold_bits)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{:.2}",
            self.file_name,
            self.size,
            self.modified_millis,
            self.crop_size,
            self.threshold()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_display() {
        let key = Fingerprint::new("clip.mp4", 2048, 1_700_000_000_000, 128, 0.4);
        assert_eq!(key.to_string(), "clip.mp4_2048_1700000000000_128_0.40");
    }

    #[test]
    fn test_settings_change_the_key() {
        let base = Fingerprint::new("clip.mp4", 10, 1, 128, 0.4);
        assert_eq!(base, Fingerprint::new("clip.mp4", 10, 1, 128, 0.4));
        assert_ne!(base, Fingerprint::new("clip.mp4", 10, 1, 224, 0.4));
        assert_ne!(base, Fingerprint::new("clip.mp4", 10, 1, 128, 0.5));
        assert_ne!(base, Fingerprint::new("clip.mp4", 11, 1, 128, 0.4));
    }

    #[test]
    fn test_for_file_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.mp4");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[0u8; 64]).unwrap();

        let config = AnalysisConfig::default();
        let key = Fingerprint::for_file(&path, &config).unwrap();
        assert_eq!(key.file_name(), "sample.mp4");
        assert_eq!(key.size(), 64);
        assert_eq!(key.threshold(), config.decision_threshold);
        assert_eq!(key, Fingerprint::for_file(&path, &config).unwrap());
    }

    #[test]
    fn test_missing_file() {
        let err = Fingerprint::for_file(Path::new("/nonexistent/clip.mp4"), &AnalysisConfig::default())
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
