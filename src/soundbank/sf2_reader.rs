//! SF2 soundbank decoding: hydra tables to resolved zones, and the shared `smpl` block.
//!
//! Preset generators are relative adjustments merged onto instrument zones when a `sampleID`
//! generator finalizes them. Global zones are approximated: only the initial attenuation of a
//! preset's first zone carries over to its later zones, and an instrument's first zone without
//! a sample becomes the baseline of its siblings.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crate::audio_engine::constants::{
    GUARD_FRAMES, MAX_ZONE_GAIN_DB, SF2_ATTENUATION_TO_DB, SF2_COARSE_OFFSET, SF2_READ_CHUNK,
};
use crate::audio_engine::errors::{SampleLoadError, SoundbankError};
use crate::audio_engine::progress::CancelToken;
use crate::messages::SampleBuffer;
use crate::soundbank::diagnostics::Diagnostics;
use crate::soundbank::generator::{self, generator_name};
use crate::soundbank::hydra::{GenAmount, GeneratorRecord, Hydra};
use crate::soundbank::program::Preset;
use crate::soundbank::riff::{Chunk, ChunkKind, find_chunk};
use crate::soundbank::shared::SharedResource;
use crate::soundbank::zone::{LoopMode, Zone};

/// Reads the hydra of an SF2 stream.
pub fn read_hydra<R: Read + Seek>(reader: &mut R) -> Result<Hydra, SoundbankError> {
    reader.seek(SeekFrom::Start(0))?;
    let riff = Chunk::read_from(reader)?;
    if riff.kind != ChunkKind::Riff {
        return Err(SoundbankError::NotASoundbank);
    }

    let pdta = find_chunk(reader, riff.end(), b"pdta")?.ok_or(SoundbankError::IncompleteHydra)?;
    Hydra::read_from(reader, pdta.end())
}

/// Reads every preset of the soundbank at `path`.
///
/// Fatal problems are recorded in `diagnostics` and yield no presets.
pub fn read_presets(
    path: &Path,
    resource: &SharedResource,
    diagnostics: &mut Diagnostics,
) -> BTreeMap<u32, Preset> {
    let hydra = File::open(path)
        .map_err(SoundbankError::from)
        .and_then(|file| read_hydra(&mut BufReader::new(file)));

    match hydra {
        Ok(hydra) => resolve_presets(&hydra, resource, diagnostics),
        Err(err) => {
            diagnostics.add_error(err.to_string());
            BTreeMap::new()
        }
    }
}

/// Records in `[start, end)`, empty when the range is inverted or out of bounds.
fn records<T>(items: &[T], start: u16, end: u16) -> &[T] {
    let end = (end as usize).min(items.len());
    items.get(start as usize..end).unwrap_or(&[])
}

/// Walks preset, preset zone, instrument and instrument zone into flat zones per preset.
pub fn resolve_presets(
    hydra: &Hydra,
    resource: &SharedResource,
    diagnostics: &mut Diagnostics,
) -> BTreeMap<u32, Preset> {
    let mut presets = BTreeMap::new();

    for pair in hydra.presets.windows(2) {
        let (header, next) = (&pair[0], &pair[1]);
        let mut preset = Preset::new(header.name.clone(), u32::from(header.bank), u32::from(header.preset));

        let first_zone = header.bag_index as usize;
        let mut baseline_volume = 0.0;

        for which_zone in first_zone..next.bag_index as usize {
            let (Some(bag), Some(next_bag)) = (
                hydra.preset_bags.get(which_zone),
                hydra.preset_bags.get(which_zone + 1),
            ) else {
                diagnostics.add_error("Preset zone out of range.");
                break;
            };

            let mut preset_zone = Zone::sf2_relative();
            preset_zone.volume = baseline_volume;

            for record in records(&hydra.preset_gens, bag.gen_index, next_bag.gen_index) {
                if record.oper == generator::INSTRUMENT {
                    resolve_instrument(hydra, record, &preset_zone, &mut preset, resource, diagnostics);
                    continue;
                }
                apply_generator(record.oper, record.amount, &mut preset_zone, diagnostics);
                if which_zone == first_zone && record.oper == generator::INITIAL_ATTENUATION {
                    baseline_volume = preset_zone.volume;
                }
            }

            if Hydra::has_modulators(&hydra.preset_bags, which_zone, hydra.preset_mod_count) {
                diagnostics.add_unsupported("any modulator");
            }
        }

        log::debug!(
            "Preset {}:{} \"{}\" has {} zones",
            preset.selection.bank,
            preset.selection.program,
            preset.name(),
            preset.zones.len()
        );
        presets.insert(preset.index(), preset);
    }

    presets
}

fn resolve_instrument(
    hydra: &Hydra,
    record: &GeneratorRecord,
    preset_zone: &Zone,
    preset: &mut Preset,
    resource: &SharedResource,
    diagnostics: &mut Diagnostics,
) {
    let which = record.amount.word() as usize;
    if which + 1 >= hydra.instruments.len() {
        diagnostics.add_error("Instrument out of range.");
        return;
    }

    // Ranges come from the preset zone, instrument generators may narrow them.
    let mut base = Zone::sf2_instrument();
    base.lokey = preset_zone.lokey;
    base.hikey = preset_zone.hikey;
    base.lovel = preset_zone.lovel;
    base.hivel = preset_zone.hivel;

    let first_zone = hydra.instruments[which].bag_index as usize;
    let zone_end = hydra.instruments[which + 1].bag_index as usize;

    for which_zone in first_zone..zone_end {
        let (Some(bag), Some(next_bag)) = (
            hydra.instrument_bags.get(which_zone),
            hydra.instrument_bags.get(which_zone + 1),
        ) else {
            diagnostics.add_error("Instrument zone out of range.");
            break;
        };

        let mut zone = base.clone();
        let mut had_sample = false;

        for record in records(&hydra.instrument_gens, bag.gen_index, next_bag.gen_index) {
            if record.oper == generator::SAMPLE_ID {
                had_sample = true;
                finish_zone(hydra, record.amount.word(), &zone, preset_zone, preset, resource, diagnostics);
            } else {
                apply_generator(record.oper, record.amount, &mut zone, diagnostics);
            }
        }

        if which_zone == first_zone && !had_sample {
            base = zone;
        }

        if Hydra::has_modulators(&hydra.instrument_bags, which_zone, hydra.instrument_mod_count) {
            diagnostics.add_unsupported("any modulator");
        }
    }
}

fn finish_zone(
    hydra: &Hydra,
    which_sample: u16,
    zone: &Zone,
    preset_zone: &Zone,
    preset: &mut Preset,
    resource: &SharedResource,
    diagnostics: &mut Diagnostics,
) {
    let which = which_sample as usize;
    let Some(header) = hydra.samples.get(which).filter(|_| which + 1 < hydra.samples.len()) else {
        diagnostics.add_error("Sample out of range.");
        return;
    };

    let mut zone = zone.clone();
    zone.merge_relative(preset_zone);
    zone.normalize_sf2();

    zone.offset += i64::from(header.start);
    zone.end += i64::from(header.end);
    zone.loop_start += i64::from(header.start_loop);
    zone.loop_end += i64::from(header.end_loop);
    if header.end_loop > 0 {
        zone.loop_end -= 1;
    }
    if zone.pitch_keycenter == -1 {
        zone.pitch_keycenter = i32::from(header.original_pitch);
    }
    zone.tune += i32::from(header.pitch_correction);

    if zone.volume > MAX_ZONE_GAIN_DB {
        zone.volume = MAX_ZONE_GAIN_DB;
        diagnostics.add_unsupported("extreme gain in initialAttenuation");
    }

    zone.sample = Some(resource.sample_for_rate(header.sample_rate));
    preset.zones.push(Arc::new(zone));
}

/// Applies one generator to a zone. Identical for preset and instrument levels.
pub fn apply_generator(oper: u16, amount: GenAmount, zone: &mut Zone, diagnostics: &mut Diagnostics) {
    let short = amount.short();
    let offset = i64::from(short);

    match oper {
        generator::START_ADDRS_OFFSET => zone.offset += offset,
        generator::END_ADDRS_OFFSET => zone.end += offset,
        generator::STARTLOOP_ADDRS_OFFSET => zone.loop_start += offset,
        generator::ENDLOOP_ADDRS_OFFSET => zone.loop_end += offset,
        generator::START_ADDRS_COARSE_OFFSET => zone.offset += offset * SF2_COARSE_OFFSET,
        generator::END_ADDRS_COARSE_OFFSET => zone.end += offset * SF2_COARSE_OFFSET,
        generator::STARTLOOP_ADDRS_COARSE_OFFSET => zone.loop_start += offset * SF2_COARSE_OFFSET,
        generator::ENDLOOP_ADDRS_COARSE_OFFSET => zone.loop_end += offset * SF2_COARSE_OFFSET,
        generator::PAN => zone.pan = f32::from(short) * (2.0 / 10.0),
        generator::DELAY_VOL_ENV => zone.ampeg.delay = f32::from(short),
        generator::ATTACK_VOL_ENV => zone.ampeg.attack = f32::from(short),
        generator::HOLD_VOL_ENV => zone.ampeg.hold = f32::from(short),
        generator::DECAY_VOL_ENV => zone.ampeg.decay = f32::from(short),
        generator::SUSTAIN_VOL_ENV => zone.ampeg.sustain = f32::from(short),
        generator::RELEASE_VOL_ENV => zone.ampeg.release = f32::from(short),
        generator::KEY_RANGE => {
            let (lo, hi) = amount.range();
            zone.lokey = i32::from(lo);
            zone.hikey = i32::from(hi);
        }
        generator::VEL_RANGE => {
            let (lo, hi) = amount.range();
            zone.lovel = i32::from(lo);
            zone.hivel = i32::from(hi);
        }
        generator::INITIAL_ATTENUATION => zone.volume += f32::from(short) * SF2_ATTENUATION_TO_DB,
        generator::COARSE_TUNE => zone.transpose += i32::from(short),
        generator::FINE_TUNE => zone.tune += i32::from(short),
        generator::SAMPLE_MODES => {
            const MODES: [LoopMode; 4] = [
                LoopMode::NoLoop,
                LoopMode::Continuous,
                LoopMode::NoLoop,
                LoopMode::Sustain,
            ];
            zone.loop_mode = MODES[(amount.word() & 0x03) as usize];
        }
        generator::SCALE_TUNING => zone.pitch_keytrack = i32::from(short),
        generator::EXCLUSIVE_CLASS => {
            zone.off_by = u32::from(amount.word());
            zone.group = zone.off_by;
        }
        generator::OVERRIDING_ROOT_KEY => zone.pitch_keycenter = i32::from(short),
        generator::END_OPER => {}
        other => diagnostics.add_unsupported(generator_name(other)),
    }
}

/// Reads the `smpl` block as mono f32, with guard frames appended.
///
/// Progress is reported and `cancel` checked after every converted block.
pub fn read_sample_data(
    path: &Path,
    progress: &mut dyn FnMut(f32),
    cancel: &CancelToken,
) -> Result<SampleBuffer, SampleLoadError> {
    let mut reader = BufReader::new(File::open(path)?);

    let riff = Chunk::read_from(&mut reader)?;
    let smpl = match find_chunk(&mut reader, riff.end(), b"sdta")? {
        Some(sdta) => find_chunk(&mut reader, sdta.end(), b"smpl")?,
        None => None,
    };
    let smpl = smpl.ok_or(SampleLoadError::MissingSampleChunk)?;

    let total = smpl.size as usize / 2;
    let mut samples = Vec::with_capacity(total + GUARD_FRAMES);
    let mut raw = vec![0u8; SF2_READ_CHUNK.min(total.max(1)) * 2];

    progress(0.0);
    while samples.len() < total {
        let count = SF2_READ_CHUNK.min(total - samples.len());
        let bytes = &mut raw[..count * 2];
        reader.read_exact(bytes)?;
        samples.extend(
            bytes
                .chunks_exact(2)
                .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32767.0),
        );

        progress(samples.len() as f32 / total as f32);
        if cancel.is_canceled() {
            return Err(SampleLoadError::Canceled);
        }
    }

    samples.resize(total + GUARD_FRAMES, 0.0);
    progress(1.0);
    Ok(SampleBuffer::new(1, samples))
}
