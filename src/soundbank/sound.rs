//! A loaded instrument definition: its zones grouped into programs, its diagnostics and its
//! lease on the shared sample cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio_engine::constants::{GUARD_FRAMES, PROGRAMS_PER_BANK};
use crate::audio_engine::errors::SampleLoadError;
use crate::audio_engine::progress::CancelToken;
use crate::audio_engine::sample_loader::decode_sample_file;
use crate::soundbank::diagnostics::Diagnostics;
use crate::soundbank::program::{Preset, ProgramSelection};
use crate::soundbank::sample::{Sample, SampleData, SampleSource};
use crate::soundbank::shared::{LoadOutcome, ResourceLease, SharedResource, SharedSamples};
use crate::soundbank::zone::Zone;
use crate::soundbank::{sf2_reader, sfz_reader};

#[derive(Debug)]
enum SoundFormat {
    /// A text definition is one implicit program.
    Sfz { program: Arc<Preset> },
    Sf2 { presets: BTreeMap<u32, Arc<Preset>> },
}

#[derive(Debug)]
pub struct Sound {
    path: PathBuf,
    format: SoundFormat,
    lease: ResourceLease,
    diagnostics: Mutex<Diagnostics>,
}

impl Sound {
    /// Reads the definition at `path`. A `.sf2` extension selects the binary format.
    ///
    /// Problems never fail the open; they end up in [`Sound::errors`] and [`Sound::warnings`].
    pub fn open(path: &Path, shared: &Arc<SharedSamples>) -> Self {
        let is_sf2 = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sf2"));

        let mut diagnostics = Diagnostics::default();
        let (lease, format) = if is_sf2 {
            let lease = shared.acquire_sf2(path);
            let presets = sf2_reader::read_presets(path, lease.resource(), &mut diagnostics)
                .into_iter()
                .map(|(index, preset)| (index, Arc::new(preset)))
                .collect();
            (lease, SoundFormat::Sf2 { presets })
        } else {
            let lease = shared.acquire_sfz(path);
            let regions = sfz_reader::read_regions(path, lease.resource(), &mut diagnostics);
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut program = Preset::new(name, 0, 0);
            program.zones = regions;
            (lease, SoundFormat::Sfz { program: Arc::new(program) })
        };

        let sound = Self {
            path: path.to_path_buf(),
            format,
            lease,
            diagnostics: Mutex::new(diagnostics),
        };
        log::info!(
            "Read {} ({} programs, {} errors, {} warnings)",
            path.display(),
            sound.program_list().len(),
            sound.errors().len(),
            sound.warnings().len()
        );
        sound
    }

    fn diagnostics(&self) -> MutexGuard<'_, Diagnostics> {
        self.diagnostics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_sf2(&self) -> bool {
        matches!(self.format, SoundFormat::Sf2 { .. })
    }

    pub fn resource(&self) -> &Arc<SharedResource> {
        self.lease.resource()
    }

    /// Decodes the samples of this sound's cache entry, unless another holder already did.
    ///
    /// Text definitions decode each file independently; a file that fails is recorded and
    /// skipped. Banks decode their one `smpl` block, which every rate bucket then shares.
    pub fn load_samples(
        &self,
        progress: &mut dyn FnMut(f32),
        cancel: &CancelToken,
    ) -> Result<LoadOutcome, SampleLoadError> {
        let resource = self.lease.resource();
        let outcome = match &self.format {
            SoundFormat::Sfz { .. } => resource.load(|samples| self.decode_files(samples, progress, cancel)),
            SoundFormat::Sf2 { .. } => resource.load(|samples| {
                let buffer = sf2_reader::read_sample_data(&self.path, progress, cancel)?;
                let frames = buffer.frames().saturating_sub(GUARD_FRAMES);
                Ok(samples
                    .iter()
                    .map(|sample| {
                        let sample_rate = match sample.source() {
                            SampleSource::Bank { sample_rate } => f64::from(*sample_rate),
                            SampleSource::File(_) => 0.0,
                        };
                        let data = SampleData {
                            buffer: buffer.clone(),
                            sample_rate,
                            frames,
                            loop_start: 0,
                            loop_end: 0,
                        };
                        (Arc::clone(sample), data)
                    })
                    .collect())
            }),
        };

        match &outcome {
            Ok(LoadOutcome::Loaded) => log::info!("Loaded samples for {}", self.path.display()),
            Ok(LoadOutcome::AlreadyLoaded) => {
                self.diagnostics().add_unsupported("using shared samples");
            }
            Err(SampleLoadError::Canceled) => log::info!("Canceled loading {}", self.path.display()),
            Err(err) => log::error!("Failed loading samples for {}: {err}", self.path.display()),
        }
        outcome
    }

    fn decode_files(
        &self,
        samples: &[Arc<Sample>],
        progress: &mut dyn FnMut(f32),
        cancel: &CancelToken,
    ) -> Result<Vec<(Arc<Sample>, SampleData)>, SampleLoadError> {
        let mut decoded = Vec::with_capacity(samples.len());
        progress(0.0);

        for (index, sample) in samples.iter().enumerate() {
            if cancel.is_canceled() {
                return Err(SampleLoadError::Canceled);
            }
            if let Some(path) = sample.path() {
                match decode_sample_file(path) {
                    Ok(data) => decoded.push((Arc::clone(sample), data)),
                    Err(err) => {
                        log::debug!("{}: {err}", path.display());
                        self.diagnostics()
                            .add_error(format!("failed loading sample \"{}\"", sample.short_name()));
                    }
                }
            }
            progress((index + 1) as f32 / samples.len() as f32);
        }

        progress(1.0);
        Ok(decoded)
    }

    /// The program at `selection`. A text definition answers to every selection.
    ///
    /// `None` for an unknown SF2 program.
    pub fn resolve_selection(&self, selection: &ProgramSelection) -> Option<Arc<Preset>> {
        match &self.format {
            SoundFormat::Sfz { program } => Some(Arc::clone(program)),
            SoundFormat::Sf2 { presets } => presets.get(&selection.index()).cloned(),
        }
    }

    /// The program selected right after opening: the lowest SF2 preset, or the text program.
    pub fn default_selection(&self) -> ProgramSelection {
        match &self.format {
            SoundFormat::Sfz { program } => program.selection.clone(),
            SoundFormat::Sf2 { presets } => presets
                .values()
                .next()
                .map(|preset| preset.selection.clone())
                .unwrap_or_default(),
        }
    }

    /// Every program, sorted by index.
    pub fn program_list(&self) -> Vec<ProgramSelection> {
        match &self.format {
            SoundFormat::Sfz { program } => vec![program.selection.clone()],
            SoundFormat::Sf2 { presets } => presets.values().map(|p| p.selection.clone()).collect(),
        }
    }

    pub fn program_name(&self, selection: &ProgramSelection) -> Option<String> {
        match &self.format {
            SoundFormat::Sfz { program } => program
                .selection
                .same_program(selection)
                .then(|| program.name().to_string()),
            SoundFormat::Sf2 { presets } => presets
                .get(&selection.index())
                .map(|preset| preset.name().to_string()),
        }
    }

    /// Programs addressable per bank.
    pub fn program_count(&self) -> u32 {
        match self.format {
            SoundFormat::Sfz { .. } => 1,
            SoundFormat::Sf2 { .. } => PROGRAMS_PER_BANK,
        }
    }

    pub fn has_bank(&self, bank: u32) -> bool {
        match &self.format {
            SoundFormat::Sfz { .. } => bank == 0,
            SoundFormat::Sf2 { presets } => presets.values().any(|p| p.selection.bank == bank),
        }
    }

    /// All zones of all programs.
    pub fn regions(&self) -> Vec<Arc<Zone>> {
        match &self.format {
            SoundFormat::Sfz { program } => program.zones.clone(),
            SoundFormat::Sf2 { presets } => presets
                .values()
                .flat_map(|preset| preset.zones.iter().cloned())
                .collect(),
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.diagnostics().errors().to_vec()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.diagnostics().warnings().to_vec()
    }

    pub fn unsupported_opcodes(&self) -> Vec<String> {
        self.diagnostics().unsupported_opcodes().to_vec()
    }

    /// Human-readable report of diagnostics, regions and samples.
    pub fn dump(&self) -> String {
        let mut info = self.diagnostics().dump();

        let regions = self.regions();
        if regions.is_empty() {
            info.push_str("no regions.\n");
        } else {
            info.push_str(&format!("{} regions: \n", regions.len()));
            for region in &regions {
                info.push_str(&region.dump());
            }
        }

        info.push_str(&self.lease.resource().dump());
        info
    }
}
