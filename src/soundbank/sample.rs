//! Sample identity and its decoded PCM data.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::messages::SampleBuffer;

/// Where a sample's PCM comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSource {
    /// An audio file referenced by a text definition.
    File(PathBuf),
    /// The shared `smpl` block of a soundbank, viewed at one sample rate.
    Bank { sample_rate: u32 },
}

/// Decoded sample data. `frames` excludes the trailing guard frames held by `buffer`.
#[derive(Debug, Clone)]
pub struct SampleData {
    pub buffer: SampleBuffer,
    pub sample_rate: f64,
    pub frames: usize,
    pub loop_start: i64,
    pub loop_end: i64,
}

impl SampleData {
    pub fn has_loop(&self) -> bool {
        self.loop_start < self.loop_end
    }
}

/// A sample referenced by zones. Its data is attached exactly once, when the owning cache
/// entry finishes loading.
#[derive(Debug)]
pub struct Sample {
    source: SampleSource,
    data: OnceLock<SampleData>,
}

impl Sample {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: SampleSource::File(path.into()),
            data: OnceLock::new(),
        }
    }

    pub fn from_bank(sample_rate: u32) -> Self {
        Self {
            source: SampleSource::Bank { sample_rate },
            data: OnceLock::new(),
        }
    }

    pub fn source(&self) -> &SampleSource {
        &self.source
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            SampleSource::File(path) => Some(path),
            SampleSource::Bank { .. } => None,
        }
    }

    /// Decoded data, once loaded.
    pub fn data(&self) -> Option<&SampleData> {
        self.data.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.data.get().is_some()
    }

    /// Attaches decoded data. Returns `false` if data was already attached.
    pub(crate) fn publish(&self, data: SampleData) -> bool {
        self.data.set(data).is_ok()
    }

    pub fn short_name(&self) -> String {
        match &self.source {
            SampleSource::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            SampleSource::Bank { sample_rate } => format!("bank@{sample_rate}Hz"),
        }
    }

    pub fn dump(&self) -> String {
        match &self.source {
            SampleSource::File(path) => format!("{}\n", path.display()),
            SampleSource::Bank { sample_rate } => format!("shared sample data @ {sample_rate} Hz\n"),
        }
    }
}
