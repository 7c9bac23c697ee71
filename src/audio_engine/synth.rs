//! Polyphonic engine.
//!
//! [`Synth`] owns one [`Sound`], the selected program's zones and a fixed pool of voices. Note
//! events, controllers and program changes all go through one engine lock, which is also held
//! while rendering. Master volume, pan and send live outside the lock as atomics so a host can
//! read and write them from any thread.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cpal::Sample;
use midly::MidiMessage;
use midly::live::LiveEvent;
use serde::{Deserialize, Serialize};

use crate::audio_engine::constants::{
    DEFAULT_PAN_CC, DEFAULT_SEND_CC, DEFAULT_VOLUME_CC, MAX_VOICES, PITCH_WHEEL_CENTER,
    PROGRAMS_PER_BANK,
};
use crate::audio_engine::errors::{SampleLoadError, SnapshotError};
use crate::audio_engine::params::{
    AtomicF32, cc_to_fader, fader_to_cc, fader_to_gain_0db, fader_to_gain_6db, gain_to_fader_0db,
    gain_to_fader_6db, pan_gains,
};
use crate::audio_engine::progress::CancelToken;
use crate::audio_engine::voice::{SynthVoice, Voice};
use crate::messages::ControlMessage;
use crate::soundbank::program::{Preset, ProgramSelection};
use crate::soundbank::shared::{LoadOutcome, SharedSamples};
use crate::soundbank::sound::Sound;
use crate::soundbank::zone::{LoopMode, Trigger, Zone};

const CC_BANK_MSB: u8 = 0;
const CC_VOLUME: u8 = 7;
const CC_PAN: u8 = 10;
const CC_BANK_LSB: u8 = 32;
const CC_SUSTAIN: u8 = 64;
const CC_SEND: u8 = 91;
const CC_RESET_ALL: u8 = 121;
const CC_ALL_NOTES_OFF: u8 = 123;

/// What to do when a note needs a voice and none is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceStealing {
    /// Drop the new note.
    Disabled,
    /// Reuse the voice that started first.
    #[default]
    Oldest,
    /// Reuse the voice with the lowest current level.
    Quietest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    /// MIDI channel 1 to 16, or 0 to accept every channel.
    pub channel: u8,
    pub polyphony: usize,
    pub sample_rate: f64,
    pub stealing: VoiceStealing,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            polyphony: MAX_VOICES,
            sample_rate: 44_100.0,
            stealing: VoiceStealing::default(),
        }
    }
}

/// Master parameters addressed by [`Synth::set_parameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterParameter {
    Volume,
    Pan,
    Send,
}

/// Master parameter state, as stored by a host between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ParameterSnapshot {
    pub slot: i32,
    pub volume_cc: u8,
    pub volume: f32,
    pub pan_cc: u8,
    pub pan_left: f32,
    pub pan_right: f32,
    pub send_cc: u8,
    pub send: f32,
}

#[derive(Debug)]
struct MasterParameters {
    volume_cc: AtomicU8,
    volume: AtomicF32,
    pan_cc: AtomicU8,
    pan_left: AtomicF32,
    pan_right: AtomicF32,
    send_cc: AtomicU8,
    send: AtomicF32,
}

impl MasterParameters {
    fn new() -> Self {
        let parameters = Self {
            volume_cc: AtomicU8::new(0),
            volume: AtomicF32::new(0.0),
            pan_cc: AtomicU8::new(0),
            pan_left: AtomicF32::new(0.0),
            pan_right: AtomicF32::new(0.0),
            send_cc: AtomicU8::new(0),
            send: AtomicF32::new(0.0),
        };
        parameters.reset();
        parameters
    }

    fn reset(&self) {
        self.set_cc(MasterParameter::Volume, DEFAULT_VOLUME_CC);
        self.set_cc(MasterParameter::Pan, DEFAULT_PAN_CC);
        self.set_cc(MasterParameter::Send, DEFAULT_SEND_CC);
    }

    fn set_cc(&self, parameter: MasterParameter, value: u8) {
        self.set_fader(parameter, cc_to_fader(value));
    }

    fn set_fader(&self, parameter: MasterParameter, fader: f32) {
        let fader = fader.clamp(0.0, 1.0);
        let cc = fader_to_cc(fader);
        match parameter {
            MasterParameter::Volume => {
                self.volume_cc.store(cc, Ordering::Relaxed);
                self.volume.store(fader_to_gain_6db(fader));
            }
            MasterParameter::Pan => {
                let (left, right) = pan_gains(fader);
                self.pan_cc.store(cc, Ordering::Relaxed);
                self.pan_left.store(left);
                self.pan_right.store(right);
            }
            MasterParameter::Send => {
                self.send_cc.store(cc, Ordering::Relaxed);
                self.send.store(fader_to_gain_0db(fader));
            }
        }
    }
}

/// Everything guarded by the engine lock.
#[derive(Debug)]
struct SynthState {
    sound: Option<Arc<Sound>>,
    /// Shared with the sound, so switching programs never copies zones.
    program: Option<Arc<Preset>>,
    /// Bank and program last asked for, kept when no program answers to them.
    requested: (u32, u32),
    voices: Vec<Voice>,
    sample_rate: f64,
    pitch_wheel: u16,
    bank_msb: u32,
    bank: u32,
    sustain_pedal: bool,
    note_velocities: [u8; 128],
    next_stamp: u64,
}

impl SynthState {
    fn all_notes_off(&mut self, tail_off: bool) {
        for voice in &mut self.voices {
            voice.stop(tail_off);
        }
    }

    fn select(&mut self, selection: &ProgramSelection) {
        self.requested = (selection.bank, selection.program);
        self.program = self
            .sound
            .as_ref()
            .and_then(|sound| sound.resolve_selection(selection));
    }

    fn is_selected(&self, selection: &ProgramSelection) -> bool {
        match &self.program {
            Some(program) => program.selection.same_program(selection),
            None => self.requested == (selection.bank, selection.program),
        }
    }

    /// The selection as stored by the sound. An unknown program has no name.
    fn selection(&self) -> ProgramSelection {
        match &self.program {
            Some(program) => program.selection.clone(),
            None => ProgramSelection::new(self.requested.0, self.requested.1),
        }
    }

    fn start_voice(&mut self, index: usize, note: i32, velocity: i32, zone: Arc<Zone>) {
        self.next_stamp += 1;
        let voice = &mut self.voices[index];
        voice.set_stamp(self.next_stamp);
        voice.start(note, velocity, zone, self.pitch_wheel);
    }
}

fn free_voice(voices: &[Voice]) -> Option<usize> {
    voices.iter().position(|voice| !voice.is_active())
}

fn voice_to_steal(voices: &[Voice], stealing: VoiceStealing) -> Option<usize> {
    match stealing {
        VoiceStealing::Disabled => None,
        VoiceStealing::Oldest => voices
            .iter()
            .enumerate()
            .min_by_key(|(_, voice)| voice.stamp())
            .map(|(index, _)| index),
        VoiceStealing::Quietest => voices
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.current_level().total_cmp(&b.current_level()))
            .map(|(index, _)| index),
    }
}

/// A multi-timbral slot: one sound, one selected program, one voice pool.
#[derive(Debug)]
pub struct Synth {
    config: SynthConfig,
    shared: Arc<SharedSamples>,
    state: Mutex<SynthState>,
    master: MasterParameters,
    selection_changed: AtomicBool,
}

impl Synth {
    pub fn new(config: SynthConfig, shared: Arc<SharedSamples>) -> Self {
        let voices = (0..config.polyphony)
            .map(|_| Voice::new(config.sample_rate))
            .collect();
        let state = SynthState {
            sound: None,
            program: None,
            requested: (0, 0),
            voices,
            sample_rate: config.sample_rate,
            pitch_wheel: PITCH_WHEEL_CENTER,
            bank_msb: 0,
            bank: 0,
            sustain_pedal: false,
            note_velocities: [0; 128],
            next_stamp: 0,
        };
        Self {
            config,
            shared,
            state: Mutex::new(state),
            master: MasterParameters::new(),
            selection_changed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, SynthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// Snapshot slot of this engine, its zero-based MIDI channel.
    pub fn slot(&self) -> i32 {
        i32::from(self.config.channel) - 1
    }

    /// Reads a definition file and makes it the current sound.
    ///
    /// Parsing happens before the engine lock is taken. Any sounding voices are cut and the
    /// sound's first program is selected. Read problems are reported through
    /// [`Synth::errors`] rather than returned.
    pub fn load_definition(&self, path: &Path) {
        let sound = Arc::new(Sound::open(path, &self.shared));
        let selection = sound.default_selection();

        let mut state = self.state();
        state.all_notes_off(false);
        state.sound = Some(sound);
        state.select(&selection);
        state.bank = state.requested.0;
        self.selection_changed.store(true, Ordering::Release);
        log::debug!("Selected {:?} after loading {}", state.selection(), path.display());
    }

    /// The current sound, if one was loaded.
    pub fn sound(&self) -> Option<Arc<Sound>> {
        self.state().sound.clone()
    }

    /// Decodes the current sound's samples without holding the engine lock.
    ///
    /// With no sound loaded there is nothing to decode and `AlreadyLoaded` is returned.
    pub fn load_samples(
        &self,
        progress: &mut dyn FnMut(f32),
        cancel: &CancelToken,
    ) -> Result<LoadOutcome, SampleLoadError> {
        match self.sound() {
            Some(sound) => sound.load_samples(progress, cancel),
            None => Ok(LoadOutcome::AlreadyLoaded),
        }
    }

    pub fn program_list(&self) -> Vec<ProgramSelection> {
        self.sound().map(|sound| sound.program_list()).unwrap_or_default()
    }

    pub fn program_selection(&self) -> ProgramSelection {
        self.state().selection()
    }

    /// Switches program. Selecting the current program again only raises the changed flag.
    pub fn set_program_selection(&self, selection: &ProgramSelection) {
        self.selection_changed.store(true, Ordering::Release);
        let mut state = self.state();
        if state.is_selected(selection) {
            return;
        }
        state.all_notes_off(false);
        state.select(selection);
        log::debug!("Program selection changed to {:?}", state.requested);
    }

    /// Number of programs in `bank`, 0 when the bank does not exist.
    pub fn program_count(&self, bank: u32) -> u32 {
        match self.sound() {
            Some(sound) if sound.has_bank(bank) => sound.program_count(),
            _ => 0,
        }
    }

    pub fn program_name(&self, selection: &ProgramSelection) -> Option<String> {
        self.sound()?.program_name(selection)
    }

    /// Returns whether the selection changed since the flag was last reset.
    pub fn has_program_selection_changed(&self, reset: bool) -> bool {
        if reset {
            self.selection_changed.swap(false, Ordering::AcqRel)
        } else {
            self.selection_changed.load(Ordering::Acquire)
        }
    }

    /// Starts every zone that answers the note.
    ///
    /// # Parameters
    ///
    /// - `note`: MIDI note number (0 to 127)
    /// - `velocity`: MIDI velocity; 0 is treated as a note-off
    pub fn note_on(&self, note: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(note);
            return;
        }
        let note = note.min(127);
        let mut state = self.state();
        let state = &mut *state;
        let (key, vel) = (i32::from(note), i32::from(velocity));
        let program = state.program.clone();
        let zones = program.as_deref().map_or(&[][..], |program| program.zones.as_slice());

        let group = zones
            .iter()
            .find(|zone| zone.matches(key, vel, Trigger::Attack))
            .map_or(0, |zone| zone.group);
        if group != 0 {
            for voice in state.voices.iter_mut() {
                if voice.is_active() && voice.off_by() == group {
                    voice.stop_for_group();
                }
            }
        }

        // Released and pedal-held copies of the note are cut too, only held keys count as legato.
        let mut any_playing = false;
        for voice in state.voices.iter_mut() {
            if !voice.is_active() {
                continue;
            }
            if voice.note() == key {
                if voice.loop_mode() != LoopMode::OneShot && voice.is_playing_note_down() {
                    voice.stop_quick();
                }
            } else if voice.is_key_down() {
                any_playing = true;
            }
        }
        let trigger = if any_playing {
            Trigger::Legato
        } else {
            Trigger::First
        };

        for zone in zones {
            if !zone.matches(key, vel, trigger) {
                continue;
            }
            let Some(index) = free_voice(&state.voices)
                .or_else(|| voice_to_steal(&state.voices, self.config.stealing))
            else {
                log::debug!("No voice for note {key}");
                break;
            };
            if !state.voices[index].can_play(zone) {
                continue;
            }
            let zone = Arc::clone(zone);
            state.start_voice(index, key, vel, zone);
        }

        state.note_velocities[usize::from(note)] = velocity;
    }

    /// Releases the note, or hands it to the sustain pedal, then starts its release zone.
    pub fn note_off(&self, note: u8) {
        let note = note.min(127);
        let mut state = self.state();
        let state = &mut *state;
        let key = i32::from(note);

        let pedal = state.sustain_pedal;
        for voice in state.voices.iter_mut() {
            if voice.is_active() && voice.is_key_down() && voice.note() == key {
                if pedal {
                    voice.set_sustained();
                } else {
                    voice.stop(true);
                }
            }
        }

        let velocity = i32::from(state.note_velocities[usize::from(note)]);
        let release_zone = state
            .program
            .as_ref()
            .and_then(|program| program.zones.iter().find(|zone| zone.matches(key, velocity, Trigger::Release)))
            .cloned();
        let Some(zone) = release_zone else {
            return;
        };
        if let Some(index) = free_voice(&state.voices) {
            if state.voices[index].can_play(&zone) {
                state.start_voice(index, key, velocity, zone);
            }
        }
    }

    pub fn control_change(&self, controller: u8, value: u8) {
        let value = value.min(127);
        match controller {
            CC_BANK_MSB => self.state().bank_msb = u32::from(value),
            CC_BANK_LSB => {
                let mut state = self.state();
                state.bank = state.bank_msb * PROGRAMS_PER_BANK + u32::from(value);
                state.bank_msb = 0;
            }
            CC_VOLUME => self.master.set_cc(MasterParameter::Volume, value),
            CC_PAN => self.master.set_cc(MasterParameter::Pan, value),
            CC_SEND => self.master.set_cc(MasterParameter::Send, value),
            CC_SUSTAIN => {
                let mut state = self.state();
                let down = value >= 64;
                if state.sustain_pedal && !down {
                    for voice in state.voices.iter_mut() {
                        if voice.is_active() && voice.is_sustained() {
                            voice.stop(true);
                        }
                    }
                }
                state.sustain_pedal = down;
            }
            CC_RESET_ALL => {
                self.master.set_fader(MasterParameter::Send, 0.0);
                self.master.set_fader(MasterParameter::Pan, 0.5);
                self.master.set_cc(MasterParameter::Volume, DEFAULT_VOLUME_CC);
                self.pitch_wheel(PITCH_WHEEL_CENTER);
            }
            CC_ALL_NOTES_OFF => self.all_notes_off(true),
            _ => {}
        }
    }

    /// Selects `program` in the bank set by the last bank select.
    pub fn program_change(&self, program: u8) {
        let bank = self.state().bank;
        self.set_program_selection(&ProgramSelection::new(bank, u32::from(program.min(127))));
    }

    pub fn pitch_wheel(&self, value: u16) {
        let mut state = self.state();
        state.pitch_wheel = value;
        for voice in state.voices.iter_mut() {
            voice.set_pitch_wheel(value);
        }
    }

    pub fn all_notes_off(&self, tail_off: bool) {
        self.state().all_notes_off(tail_off);
    }

    /// Decodes a raw MIDI message and applies it if it is addressed to this engine.
    ///
    /// Returns whether the message was applied.
    pub fn handle_midi(&self, bytes: &[u8]) -> bool {
        let Ok(LiveEvent::Midi { channel, message }) = LiveEvent::parse(bytes) else {
            return false;
        };
        if self.config.channel != 0 && channel.as_int() + 1 != self.config.channel {
            return false;
        }
        match message {
            MidiMessage::NoteOn { key, vel } => self.note_on(key.as_int(), vel.as_int()),
            MidiMessage::NoteOff { key, .. } => self.note_off(key.as_int()),
            MidiMessage::Controller { controller, value } => {
                self.control_change(controller.as_int(), value.as_int())
            }
            MidiMessage::ProgramChange { program } => self.program_change(program.as_int()),
            MidiMessage::PitchBend { bend } => self.pitch_wheel(bend.0.as_int()),
            _ => return false,
        }
        true
    }

    /// Applies a message drained from the control queue.
    pub fn handle_message(&self, message: ControlMessage) {
        match message {
            ControlMessage::NoteOn { note, velocity } => self.note_on(note, velocity),
            ControlMessage::NoteOff { note } => self.note_off(note),
            ControlMessage::Controller { controller, value } => {
                self.control_change(controller, value)
            }
            ControlMessage::ProgramChange { program } => self.program_change(program),
            ControlMessage::PitchWheel(value) => self.pitch_wheel(value),
            ControlMessage::AllNotesOff { tail_off } => self.all_notes_off(tail_off),
        }
    }

    /// Renders `frames` frames into `output` starting at frame `start`.
    ///
    /// `output` is planar, one buffer per channel. Channels 0 and 1 carry the dry mix; with
    /// four or more channels, channels 2 and 3 carry the send.
    pub fn render(&self, output: &mut [Vec<f32>], start: usize, frames: usize) {
        let Some(len) = output.iter().map(Vec::len).min() else {
            return;
        };
        let start = start.min(len);
        let end = (start + frames).min(len);
        for channel in output.iter_mut() {
            if let Some(range) = channel.get_mut(start..end) {
                range.fill(f32::EQUILIBRIUM);
            }
        }

        {
            let mut state = self.state();
            for voice in state.voices.iter_mut().filter(|voice| voice.is_active()) {
                voice.render(output, start, end - start);
            }
        }

        let volume = self.master.volume.load();
        let (left, right) = (self.master.pan_left.load(), self.master.pan_right.load());
        let send = self.master.send.load();

        match output {
            [mono] => mono[start..end].iter_mut().for_each(|s| *s *= volume),
            [out_left, out_right, rest @ ..] => {
                out_left[start..end].iter_mut().for_each(|s| *s *= volume * left);
                out_right[start..end].iter_mut().for_each(|s| *s *= volume * right);
                if let [send_left, send_right, ..] = rest {
                    for frame in start..end {
                        send_left[frame] = out_left[frame] * send;
                        send_right[frame] = out_right[frame] * send;
                    }
                }
            }
            [] => {}
        }
    }

    /// Sets a master parameter from a fader position (0.0 to 1.0).
    pub fn set_parameter(&self, parameter: MasterParameter, fader: f32) {
        self.master.set_fader(parameter, fader);
    }

    /// The fader position of a master parameter.
    pub fn parameter(&self, parameter: MasterParameter) -> f32 {
        match parameter {
            MasterParameter::Volume => gain_to_fader_6db(self.master.volume.load()),
            MasterParameter::Pan => self.master.pan_right.load().powi(2),
            MasterParameter::Send => gain_to_fader_0db(self.master.send.load()),
        }
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            slot: self.slot(),
            volume_cc: self.master.volume_cc.load(Ordering::Relaxed),
            volume: self.master.volume.load(),
            pan_cc: self.master.pan_cc.load(Ordering::Relaxed),
            pan_left: self.master.pan_left.load(),
            pan_right: self.master.pan_right.load(),
            send_cc: self.master.send_cc.load(Ordering::Relaxed),
            send: self.master.send.load(),
        }
    }

    /// Restores master parameters saved by [`Synth::snapshot`] on the same slot.
    pub fn restore_snapshot(&self, snapshot: &ParameterSnapshot) -> Result<(), SnapshotError> {
        if snapshot.slot != self.slot() {
            return Err(SnapshotError::SlotMismatch {
                expected: self.slot(),
                found: snapshot.slot,
            });
        }
        self.master.volume_cc.store(snapshot.volume_cc, Ordering::Relaxed);
        self.master.volume.store(snapshot.volume);
        self.master.pan_cc.store(snapshot.pan_cc, Ordering::Relaxed);
        self.master.pan_left.store(snapshot.pan_left);
        self.master.pan_right.store(snapshot.pan_right);
        self.master.send_cc.store(snapshot.send_cc, Ordering::Relaxed);
        self.master.send.store(snapshot.send);
        Ok(())
    }

    pub fn num_voices_used(&self) -> usize {
        self.state().voices.iter().filter(|voice| voice.is_active()).count()
    }

    /// One line per sounding voice.
    pub fn voice_info(&self) -> String {
        self.state()
            .voices
            .iter()
            .filter(|voice| voice.is_active())
            .map(Voice::voice_info)
            .collect()
    }

    pub fn sample_rate(&self) -> f64 {
        self.state().sample_rate
    }

    /// Changes the engine rate. Sounding voices keep their pitch ratio until restarted.
    pub fn set_sample_rate(&self, sample_rate: f64) {
        let mut state = self.state();
        state.sample_rate = sample_rate;
        for voice in state.voices.iter_mut() {
            voice.set_sample_rate(sample_rate);
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.sound().map(|sound| sound.errors()).unwrap_or_default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.sound().map(|sound| sound.warnings()).unwrap_or_default()
    }

    pub fn unsupported_opcodes(&self) -> Vec<String> {
        self.sound()
            .map(|sound| sound.unsupported_opcodes())
            .unwrap_or_default()
    }

    pub fn dump(&self) -> String {
        let selection = self.program_selection();
        let mut info = format!(
            "program {}:{} \"{}\", {} voices playing\n",
            selection.bank,
            selection.program,
            selection.name,
            self.num_voices_used()
        );
        match self.sound() {
            Some(sound) => info.push_str(&sound.dump()),
            None => info.push_str("no sound loaded.\n"),
        }
        info
    }
}
