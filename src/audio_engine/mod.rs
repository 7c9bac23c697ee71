//! Audio Engine Module
//!
//! This module provides sample playback, voice allocation and device output.
//! It is organized into sub-modules, each with a specific responsibility:
//!
//! - [`audio_stream`]: CPAL audio stream management and real-time callback
//! - [`channels`]: Planar to device channel layout
//! - [`constants`]: Configuration constants and limits
//! - [`envelope`]: Amplitude envelope generator
//! - [`errors`]: Error types
//! - [`params`]: Master fader curves and atomic parameters
//! - [`progress`]: Load progress reporting and cancellation
//! - [`sample_loader`]: Audio file loading and decoding
//! - [`synth`]: Polyphonic engine
//! - [`voice`]: A single sounding note
//!
//! [`spawn_sample_loader`] decodes a synth's samples on a background thread and reports
//! [`LoaderEvent`]s while the audio stream keeps running.

use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use crate::audio_engine::errors::SampleLoadError;
use crate::audio_engine::progress::{CancelToken, LoadProgressStage, ProgressReporter};
use crate::audio_engine::synth::Synth;
use crate::messages::LoaderEvent;

pub mod audio_stream;
pub mod channels;
pub mod constants;
pub mod envelope;
pub mod errors;
pub mod params;
pub mod progress;
pub mod sample_loader;
pub mod synth;
pub mod voice;

/// A running background load.
#[derive(Debug)]
pub struct LoaderHandle {
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl LoaderHandle {
    /// Asks the loader to stop. The samples of an aborted load stay unloaded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the loader thread to exit.
    pub fn join(self) {
        if self.thread.join().is_err() {
            log::error!("Sample loader thread panicked");
        }
    }
}

/// Decodes the samples of the synth's current sound on a background thread.
pub fn spawn_sample_loader(synth: Arc<Synth>, tx: Sender<LoaderEvent>) -> LoaderHandle {
    spawn_with_token(synth, tx, CancelToken::new())
}

fn spawn_with_token(synth: Arc<Synth>, tx: Sender<LoaderEvent>, cancel: CancelToken) -> LoaderHandle {
    let token = cancel.clone();
    let thread = thread::spawn(move || {
        let path = synth
            .sound()
            .map(|sound| sound.path().display().to_string())
            .unwrap_or_default();
        let _ = tx.send(LoaderEvent::Started { path: path.clone() });

        let mut progress = ProgressReporter::new(tx.clone());
        progress.emit(LoadProgressStage::Reading, 1.0, true);

        let result = synth.load_samples(
            &mut |percent| {
                let force = percent <= 0.0 || percent >= 1.0;
                progress.emit(LoadProgressStage::Decoding, percent, force);
            },
            &token,
        );

        let event = match result {
            Ok(_) => {
                progress.emit(LoadProgressStage::Publishing, 1.0, true);
                LoaderEvent::Success {
                    path,
                    errors: synth.errors().len(),
                }
            }
            Err(SampleLoadError::Canceled) => LoaderEvent::Canceled { path },
            Err(SampleLoadError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                LoaderEvent::Error {
                    error: format!("File not found: {path}"),
                    path,
                }
            }
            Err(err) => LoaderEvent::Error {
                path,
                error: err.to_string(),
            },
        };
        let _ = tx.send(event);
    });

    LoaderHandle { cancel, thread }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::audio_engine::synth::SynthConfig;
    use crate::soundbank::shared::SharedSamples;
    use crate::testutil::{Sf2Builder, write_file, write_wav};

    fn synth_for(path: &std::path::Path) -> Arc<Synth> {
        let synth = Arc::new(Synth::new(SynthConfig::default(), SharedSamples::new()));
        synth.load_definition(path);
        synth
    }

    #[test]
    fn test_loader_reports_success() {
        let tmp = tempfile::tempdir().unwrap();
        write_wav(&tmp.path().join("a.wav"), 1, 44_100, &[1_000i16; 64], None);
        let path = tmp.path().join("kit.sfz");
        write_file(&path, b"<region> sample=a.wav\n<region> sample=missing.wav key=70\n");

        let synth = synth_for(&path);
        let (tx, rx) = mpsc::channel();
        spawn_sample_loader(Arc::clone(&synth), tx).join();

        let events: Vec<LoaderEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(LoaderEvent::Started { .. })));
        assert!(events
            .iter()
            .any(|event| matches!(event, LoaderEvent::Progress { percent, .. } if *percent >= 1.0)));
        assert!(matches!(
            events.last(),
            Some(LoaderEvent::Success { errors: 1, .. })
        ));

        synth.note_on(60, 100);
        assert_eq!(synth.num_voices_used(), 1);
    }

    #[test]
    fn test_loader_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bank.sf2");
        Sf2Builder::single_sample().write(&path);

        let synth = synth_for(&path);
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        cancel.cancel();
        spawn_with_token(Arc::clone(&synth), tx, cancel).join();

        let events: Vec<LoaderEvent> = rx.try_iter().collect();
        assert!(matches!(events.last(), Some(LoaderEvent::Canceled { .. })));
        assert!(!synth.sound().unwrap().resource().is_loaded());
    }

    #[test]
    fn test_loader_reports_missing_sample_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bank.sf2");
        let mut builder = Sf2Builder::single_sample();
        builder.omit_sample_data();
        builder.write(&path);

        let synth = synth_for(&path);
        let (tx, rx) = mpsc::channel();
        spawn_sample_loader(synth, tx).join();

        let last = rx.try_iter().last();
        assert!(matches!(last, Some(LoaderEvent::Error { .. })));
    }
}
