//! File-keyed, reference-counted registry of decoded samples.
//!
//! Every [`Sound`](crate::soundbank::sound::Sound) opened on the same file holds a
//! [`ResourceLease`] on one [`SharedResource`], so sample data is decoded once however many
//! synths play it. The registry lock and each entry's lock are independent of any synth lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio_engine::errors::SampleLoadError;
use crate::soundbank::sample::{Sample, SampleData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Sfz,
    Sf2,
}

/// Key of a sample inside one entry: file path for text definitions, sample rate for banks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleKey {
    Path(PathBuf),
    Rate(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// This call decoded and published the samples.
    Loaded,
    /// Another holder already loaded the entry; nothing was decoded.
    AlreadyLoaded,
}

#[derive(Debug, Default)]
struct ResourceState {
    loaded: bool,
    samples: HashMap<SampleKey, Arc<Sample>>,
}

/// One cache entry.
#[derive(Debug)]
pub struct SharedResource {
    key: PathBuf,
    kind: ResourceKind,
    state: Mutex<ResourceState>,
}

impl SharedResource {
    fn new(key: PathBuf, kind: ResourceKind) -> Self {
        Self {
            key,
            kind,
            state: Mutex::new(ResourceState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_loaded(&self) -> bool {
        self.state().loaded
    }

    /// Returns the sample for an audio file, registering it on first use.
    pub fn sample_for_file(&self, path: &Path) -> Arc<Sample> {
        self.state()
            .samples
            .entry(SampleKey::Path(path.to_path_buf()))
            .or_insert_with(|| Arc::new(Sample::from_file(path)))
            .clone()
    }

    /// Returns the bank sample viewed at `sample_rate`, registering it on first use.
    pub fn sample_for_rate(&self, sample_rate: u32) -> Arc<Sample> {
        self.state()
            .samples
            .entry(SampleKey::Rate(sample_rate))
            .or_insert_with(|| Arc::new(Sample::from_bank(sample_rate)))
            .clone()
    }

    pub fn sample_count(&self) -> usize {
        self.state().samples.len()
    }

    /// Registered samples in key order.
    pub fn samples(&self) -> Vec<Arc<Sample>> {
        let state = self.state();
        let mut keyed: Vec<_> = state.samples.iter().collect();
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        keyed.into_iter().map(|(_, sample)| sample.clone()).collect()
    }

    /// Loads the entry once.
    ///
    /// `loader` receives every registered sample and returns the data to attach. The entry is
    /// only marked loaded, and data only published, when `loader` succeeds; an error (such as
    /// [`SampleLoadError::Canceled`]) leaves the entry unloaded so a later call starts over.
    pub fn load<F>(&self, loader: F) -> Result<LoadOutcome, SampleLoadError>
    where
        F: FnOnce(&[Arc<Sample>]) -> Result<Vec<(Arc<Sample>, SampleData)>, SampleLoadError>,
    {
        let mut state = self.state();
        if state.loaded {
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let mut keyed: Vec<_> = state.samples.iter().collect();
        keyed.sort_by(|a, b| a.0.cmp(b.0));
        let samples: Vec<Arc<Sample>> = keyed.into_iter().map(|(_, s)| s.clone()).collect();

        let decoded = loader(&samples)?;
        for (sample, data) in decoded {
            sample.publish(data);
        }
        state.loaded = true;
        Ok(LoadOutcome::Loaded)
    }

    pub fn dump(&self) -> String {
        let samples = self.samples();
        if samples.is_empty() {
            return "no samples.\n".to_string();
        }
        let mut info = format!("{} samples: \n", samples.len());
        for sample in samples {
            info.push_str(&sample.dump());
        }
        info
    }
}

struct Registered {
    refs: usize,
    resource: Arc<SharedResource>,
}

#[derive(Default)]
struct Registry {
    sfz: HashMap<PathBuf, Registered>,
    sf2: HashMap<PathBuf, Registered>,
}

impl Registry {
    fn map(&mut self, kind: ResourceKind) -> &mut HashMap<PathBuf, Registered> {
        match kind {
            ResourceKind::Sfz => &mut self.sfz,
            ResourceKind::Sf2 => &mut self.sf2,
        }
    }
}

/// Registry of shared resources. Construct once and hand an `Arc` to every synth.
#[derive(Default)]
pub struct SharedSamples {
    registry: Mutex<Registry>,
}

impl SharedSamples {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Canonical registry key of a definition file.
    pub fn canonical_key(path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    /// Returns a lease on the entry for `path`, creating and registering it on first use.
    pub fn acquire(self: &Arc<Self>, kind: ResourceKind, path: &Path) -> ResourceLease {
        let key = Self::canonical_key(path);
        let mut registry = self.registry();
        let registered = registry.map(kind).entry(key.clone()).or_insert_with(|| {
            log::debug!("Registering shared samples for {}", key.display());
            Registered {
                refs: 0,
                resource: Arc::new(SharedResource::new(key.clone(), kind)),
            }
        });
        registered.refs += 1;

        ResourceLease {
            registry: Arc::clone(self),
            resource: Arc::clone(&registered.resource),
            released: false,
        }
    }

    pub fn acquire_sfz(self: &Arc<Self>, path: &Path) -> ResourceLease {
        self.acquire(ResourceKind::Sfz, path)
    }

    pub fn acquire_sf2(self: &Arc<Self>, path: &Path) -> ResourceLease {
        self.acquire(ResourceKind::Sf2, path)
    }

    /// Drops one reference; the entry is deregistered when none remain.
    pub fn release(&self, kind: ResourceKind, key: &Path) {
        let mut registry = self.registry();
        let map = registry.map(kind);
        let Some(registered) = map.get_mut(key) else {
            return;
        };
        registered.refs = registered.refs.saturating_sub(1);
        if registered.refs == 0 {
            map.remove(key);
            log::debug!("Released shared samples for {}", key.display());
        }
    }

    pub fn contains(&self, kind: ResourceKind, path: &Path) -> bool {
        let key = Self::canonical_key(path);
        self.registry().map(kind).contains_key(&key)
    }

    pub fn entry_count(&self, kind: ResourceKind) -> usize {
        self.registry().map(kind).len()
    }

    /// Number of leases held on the entry for `path`.
    pub fn ref_count(&self, kind: ResourceKind, path: &Path) -> usize {
        let key = Self::canonical_key(path);
        self.registry()
            .map(kind)
            .get(&key)
            .map_or(0, |registered| registered.refs)
    }
}

/// A held reference to a [`SharedResource`]. Released explicitly or on drop.
pub struct ResourceLease {
    registry: Arc<SharedSamples>,
    resource: Arc<SharedResource>,
    released: bool,
}

impl ResourceLease {
    pub fn resource(&self) -> &Arc<SharedResource> {
        &self.resource
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.registry
                .release(self.resource.kind(), self.resource.key());
        }
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for SharedSamples {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSamples")
            .field("sfz", &self.entry_count(ResourceKind::Sfz))
            .field("sf2", &self.entry_count(ResourceKind::Sf2))
            .finish()
    }
}

impl std::fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("key", &self.resource.key())
            .field("kind", &self.resource.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SampleBuffer;

    fn fake_data(frames: usize) -> SampleData {
        SampleData {
            buffer: SampleBuffer::new(1, vec![0.25; frames]),
            sample_rate: 44_100.0,
            frames,
            loop_start: 0,
            loop_end: 0,
        }
    }

    #[test]
    fn test_same_path_shares_one_entry() {
        let shared = SharedSamples::new();
        let path = Path::new("/nonexistent/bank.sf2");

        let first = shared.acquire(ResourceKind::Sf2, path);
        let second = shared.acquire(ResourceKind::Sf2, path);

        assert!(Arc::ptr_eq(first.resource(), second.resource()));
        assert_eq!(shared.entry_count(ResourceKind::Sf2), 1);
        assert_eq!(shared.ref_count(ResourceKind::Sf2, path), 2);
        assert_eq!(shared.entry_count(ResourceKind::Sfz), 0);
    }

    #[test]
    fn test_release_keeps_buffer_until_last_holder() {
        let shared = SharedSamples::new();
        let path = Path::new("/nonexistent/bank.sf2");

        let first = shared.acquire(ResourceKind::Sf2, path);
        let second = shared.acquire(ResourceKind::Sf2, path);

        let sample = first.resource().sample_for_rate(44_100);
        first
            .resource()
            .load(|samples| Ok(samples.iter().map(|s| (s.clone(), fake_data(8))).collect()))
            .unwrap();

        first.release();
        assert!(shared.contains(ResourceKind::Sf2, path));
        let held = second.resource().sample_for_rate(44_100);
        assert!(Arc::ptr_eq(&sample, &held));
        assert_eq!(held.data().unwrap().frames, 8);

        drop(second);
        assert!(!shared.contains(ResourceKind::Sf2, path));
        assert_eq!(shared.entry_count(ResourceKind::Sf2), 0);
    }

    #[test]
    fn test_samples_are_deduplicated_by_key() {
        let shared = SharedSamples::new();
        let lease = shared.acquire(ResourceKind::Sfz, Path::new("/nonexistent/kit.sfz"));
        let resource = lease.resource();

        let a = resource.sample_for_file(Path::new("/nonexistent/kick.wav"));
        let b = resource.sample_for_file(Path::new("/nonexistent/kick.wav"));
        let c = resource.sample_for_file(Path::new("/nonexistent/snare.wav"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(resource.sample_count(), 2);
    }

    #[test]
    fn test_second_load_is_a_no_op() {
        let shared = SharedSamples::new();
        let lease = shared.acquire(ResourceKind::Sf2, Path::new("/nonexistent/bank.sf2"));
        lease.resource().sample_for_rate(22_050);

        let first = lease.resource().load(|samples| {
            Ok(samples.iter().map(|s| (s.clone(), fake_data(4))).collect())
        });
        assert_eq!(first.unwrap(), LoadOutcome::Loaded);

        let mut called = false;
        let second = lease.resource().load(|_| {
            called = true;
            Ok(Vec::new())
        });
        assert_eq!(second.unwrap(), LoadOutcome::AlreadyLoaded);
        assert!(!called);
    }

    #[test]
    fn test_failed_load_leaves_entry_unloaded() {
        let shared = SharedSamples::new();
        let lease = shared.acquire(ResourceKind::Sf2, Path::new("/nonexistent/bank.sf2"));
        let sample = lease.resource().sample_for_rate(44_100);

        let result = lease.resource().load(|_| Err(SampleLoadError::Canceled));
        assert!(matches!(result, Err(SampleLoadError::Canceled)));
        assert!(!lease.resource().is_loaded());
        assert!(!sample.is_loaded());

        let retry = lease.resource().load(|samples| {
            Ok(samples.iter().map(|s| (s.clone(), fake_data(4))).collect())
        });
        assert_eq!(retry.unwrap(), LoadOutcome::Loaded);
        assert!(sample.is_loaded());
    }
}
