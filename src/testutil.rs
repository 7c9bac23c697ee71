//! Builders for small SF2 and WAV files used across the test modules.

use std::io::Cursor;
use std::path::Path;

use crate::soundbank::generator;
use crate::soundbank::hydra::Hydra;
use crate::soundbank::riff::{Chunk, FourCC, find_chunk};

pub fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::write(path, bytes).unwrap();
}

fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 != 0 {
        out.push(0);
    }
    out
}

fn container(outer: &[u8; 4], form: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = form.to_vec();
    for child in children {
        payload.extend_from_slice(child);
    }
    chunk(outer, &payload)
}

fn name20(name: &str) -> [u8; 20] {
    let mut out = [0u8; 20];
    let len = name.len().min(19);
    out[..len].copy_from_slice(&name.as_bytes()[..len]);
    out
}

/// Writes a 16-bit PCM WAV file, with an optional `smpl` loop `(start, end)`.
pub fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[i16], sample_loop: Option<(u32, u32)>) {
    let block_align = channels * 2;
    let mut fmt = Vec::new();
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&channels.to_le_bytes());
    fmt.extend_from_slice(&sample_rate.to_le_bytes());
    fmt.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    fmt.extend_from_slice(&block_align.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());

    let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

    let mut children = vec![chunk(b"fmt ", &fmt), chunk(b"data", &data)];
    if let Some((start, end)) = sample_loop {
        // 36-byte header, then one 24-byte loop record
        let mut smpl = vec![0u8; 36 + 24];
        smpl[28..32].copy_from_slice(&1u32.to_le_bytes());
        smpl[44..48].copy_from_slice(&start.to_le_bytes());
        smpl[48..52].copy_from_slice(&end.to_le_bytes());
        children.push(chunk(b"smpl", &smpl));
    }

    write_file(path, &container(b"RIFF", b"WAVE", &children));
}

#[derive(Debug, Clone, Default)]
struct ZoneSpec {
    generators: Vec<(u16, [u8; 2])>,
    modulators: usize,
}

impl ZoneSpec {
    fn with(generators: Vec<(u16, [u8; 2])>) -> Self {
        Self {
            generators,
            modulators: 0,
        }
    }

    /// Inserts before a terminating instrument or sampleID generator.
    fn insert(&mut self, oper: u16, amount: [u8; 2]) {
        let at = self
            .generators
            .iter()
            .position(|(o, _)| *o == generator::INSTRUMENT || *o == generator::SAMPLE_ID)
            .unwrap_or(self.generators.len());
        self.generators.insert(at, (oper, amount));
    }
}

#[derive(Debug, Clone)]
struct PresetSpec {
    name: String,
    bank: u16,
    program: u16,
    zones: Vec<ZoneSpec>,
}

#[derive(Debug, Clone)]
struct InstrumentSpec {
    name: String,
    zones: Vec<ZoneSpec>,
}

#[derive(Debug, Clone)]
struct SampleSpec {
    name: String,
    start: u32,
    end: u32,
    start_loop: u32,
    end_loop: u32,
    sample_rate: u32,
    original_pitch: u8,
}

/// In-memory SF2 writer with a configurable hydra.
#[derive(Debug, Clone)]
pub struct Sf2Builder {
    presets: Vec<PresetSpec>,
    instruments: Vec<InstrumentSpec>,
    samples: Vec<SampleSpec>,
    sample_data: Vec<i16>,
    omitted: Vec<FourCC>,
    omit_sample_data: bool,
}

impl Sf2Builder {
    /// Preset "Piano" (0:0) -> instrument "Piano" -> one looped sample "C4" of 400 frames,
    /// loop 100..200, root key 60, 44.1 kHz.
    pub fn single_sample() -> Self {
        let sample_data = (0..400).map(|i| ((i % 100) * 300 - 15_000) as i16).collect();
        Self {
            presets: vec![PresetSpec {
                name: "Piano".into(),
                bank: 0,
                program: 0,
                zones: vec![ZoneSpec::with(vec![(generator::INSTRUMENT, 0u16.to_le_bytes())])],
            }],
            instruments: vec![InstrumentSpec {
                name: "Piano".into(),
                zones: vec![ZoneSpec::with(vec![
                    (generator::SAMPLE_MODES, 1u16.to_le_bytes()),
                    (generator::SAMPLE_ID, 0u16.to_le_bytes()),
                ])],
            }],
            samples: vec![SampleSpec {
                name: "C4".into(),
                start: 0,
                end: 400,
                start_loop: 100,
                end_loop: 200,
                sample_rate: 44_100,
                original_pitch: 60,
            }],
            sample_data,
            omitted: Vec::new(),
            omit_sample_data: false,
        }
    }

    /// Adds another preset that plays instrument 0.
    pub fn add_preset(&mut self, name: &str, bank: u16, program: u16) -> &mut Self {
        self.presets.push(PresetSpec {
            name: name.into(),
            bank,
            program,
            zones: vec![ZoneSpec::with(vec![(generator::INSTRUMENT, 0u16.to_le_bytes())])],
        });
        self
    }

    /// Adds a generator to the first zone of preset 0.
    pub fn preset_generator(&mut self, oper: u16, amount: [u8; 2]) -> &mut Self {
        self.presets[0].zones[0].insert(oper, amount);
        self
    }

    /// Adds another zone to preset 0 that plays instrument 0.
    pub fn add_preset_zone_for_instrument(&mut self) -> &mut Self {
        self.presets[0]
            .zones
            .push(ZoneSpec::with(vec![(generator::INSTRUMENT, 0u16.to_le_bytes())]));
        self
    }

    /// Points the first zone of preset 0 at another instrument index.
    pub fn set_instrument_index(&mut self, index: u16) -> &mut Self {
        for (oper, amount) in &mut self.presets[0].zones[0].generators {
            if *oper == generator::INSTRUMENT {
                *amount = index.to_le_bytes();
            }
        }
        self
    }

    /// Adds a generator to the last zone of instrument 0.
    pub fn instrument_generator(&mut self, oper: u16, amount: [u8; 2]) -> &mut Self {
        if let Some(zone) = self.instruments[0].zones.last_mut() {
            zone.insert(oper, amount);
        }
        self
    }

    /// Prepends a global zone (no sampleID) to instrument 0.
    pub fn instrument_global_zone(&mut self, generators: Vec<(u16, [u8; 2])>) -> &mut Self {
        self.instruments[0].zones.insert(0, ZoneSpec::with(generators));
        self
    }

    pub fn duplicate_instrument_zone(&mut self) -> &mut Self {
        if let Some(zone) = self.instruments[0].zones.last().cloned() {
            self.instruments[0].zones.push(zone);
        }
        self
    }

    pub fn add_preset_modulator(&mut self) -> &mut Self {
        self.presets[0].zones[0].modulators += 1;
        self
    }

    pub fn add_instrument_modulator(&mut self) -> &mut Self {
        self.instruments[0].zones[0].modulators += 1;
        self
    }

    pub fn set_sample_data(&mut self, data: Vec<i16>) -> &mut Self {
        let frames = data.len() as u32;
        self.sample_data = data;
        for sample in &mut self.samples {
            sample.end = sample.end.min(frames);
            sample.end_loop = sample.end_loop.min(frames);
            sample.start_loop = sample.start_loop.min(sample.end_loop);
        }
        self
    }

    pub fn omit_table(&mut self, tag: FourCC) -> &mut Self {
        self.omitted.push(tag);
        self
    }

    pub fn omit_sample_data(&mut self) -> &mut Self {
        self.omit_sample_data = true;
        self
    }

    fn zone_tables(zones: &[&ZoneSpec]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let (mut bags, mut mods, mut gens) = (Vec::new(), Vec::new(), Vec::new());
        let (mut gen_count, mut mod_count) = (0u16, 0u16);

        for zone in zones {
            bags.extend_from_slice(&gen_count.to_le_bytes());
            bags.extend_from_slice(&mod_count.to_le_bytes());
            for (oper, amount) in &zone.generators {
                gens.extend_from_slice(&oper.to_le_bytes());
                gens.extend_from_slice(amount);
                gen_count += 1;
            }
            for _ in 0..zone.modulators {
                mods.extend_from_slice(&[0u8; 10]);
                mod_count += 1;
            }
        }

        bags.extend_from_slice(&gen_count.to_le_bytes());
        bags.extend_from_slice(&mod_count.to_le_bytes());
        mods.extend_from_slice(&[0u8; 10]);
        gens.extend_from_slice(&[0u8; 4]);
        (bags, mods, gens)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut phdr = Vec::new();
        let mut bag_index = 0u16;
        for preset in &self.presets {
            phdr.extend_from_slice(&name20(&preset.name));
            phdr.extend_from_slice(&preset.program.to_le_bytes());
            phdr.extend_from_slice(&preset.bank.to_le_bytes());
            phdr.extend_from_slice(&bag_index.to_le_bytes());
            phdr.extend_from_slice(&[0u8; 12]);
            bag_index += preset.zones.len() as u16;
        }
        phdr.extend_from_slice(&name20("EOP"));
        phdr.extend_from_slice(&[0u8; 4]);
        phdr.extend_from_slice(&bag_index.to_le_bytes());
        phdr.extend_from_slice(&[0u8; 12]);

        let preset_zones: Vec<&ZoneSpec> = self.presets.iter().flat_map(|p| p.zones.iter()).collect();
        let (pbag, pmod, pgen) = Self::zone_tables(&preset_zones);

        let mut inst = Vec::new();
        let mut bag_index = 0u16;
        for instrument in &self.instruments {
            inst.extend_from_slice(&name20(&instrument.name));
            inst.extend_from_slice(&bag_index.to_le_bytes());
            bag_index += instrument.zones.len() as u16;
        }
        inst.extend_from_slice(&name20("EOI"));
        inst.extend_from_slice(&bag_index.to_le_bytes());

        let instrument_zones: Vec<&ZoneSpec> =
            self.instruments.iter().flat_map(|i| i.zones.iter()).collect();
        let (ibag, imod, igen) = Self::zone_tables(&instrument_zones);

        let mut shdr = Vec::new();
        for sample in &self.samples {
            shdr.extend_from_slice(&name20(&sample.name));
            for value in [sample.start, sample.end, sample.start_loop, sample.end_loop, sample.sample_rate] {
                shdr.extend_from_slice(&value.to_le_bytes());
            }
            shdr.push(sample.original_pitch);
            shdr.push(0);
            shdr.extend_from_slice(&0u16.to_le_bytes());
            shdr.extend_from_slice(&1u16.to_le_bytes());
        }
        shdr.extend_from_slice(&name20("EOS"));
        shdr.extend_from_slice(&[0u8; 26]);

        let tables: Vec<Vec<u8>> = [
            (b"phdr", phdr),
            (b"pbag", pbag),
            (b"pmod", pmod),
            (b"pgen", pgen),
            (b"inst", inst),
            (b"ibag", ibag),
            (b"imod", imod),
            (b"igen", igen),
            (b"shdr", shdr),
        ]
        .into_iter()
        .filter(|(tag, _)| !self.omitted.contains(*tag))
        .map(|(tag, payload)| chunk(tag, &payload))
        .collect();

        let info = container(b"LIST", b"INFO", &[chunk(b"ifil", &[2, 0, 1, 0])]);

        let mut sdta_children = Vec::new();
        if !self.omit_sample_data {
            let data: Vec<u8> = self.sample_data.iter().flat_map(|s| s.to_le_bytes()).collect();
            sdta_children.push(chunk(b"smpl", &data));
        }
        let sdta = container(b"LIST", b"sdta", &sdta_children);
        let pdta = container(b"LIST", b"pdta", &tables);

        container(b"RIFF", b"sfbk", &[info, sdta, pdta])
    }

    pub fn write(&self, path: &Path) {
        write_file(path, &self.build());
    }
}

/// Decodes the hydra of an in-memory SF2, also returning the `pdta` chunk.
pub fn read_hydra(bytes: &[u8]) -> (Hydra, Chunk) {
    let mut cursor = Cursor::new(bytes);
    let riff = Chunk::read_from(&mut cursor).unwrap();
    let pdta = find_chunk(&mut cursor, riff.end(), b"pdta").unwrap().unwrap();
    let hydra = Hydra::read_from(&mut cursor, pdta.end()).unwrap();
    (hydra, pdta)
}
