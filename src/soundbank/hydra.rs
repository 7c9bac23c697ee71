//! Fixed-layout SF2 record tables ("the hydra").
//!
//! Every table ends with a terminal record whose index fields close the range of the record
//! before it. Iteration therefore always stops at `len() - 1`.

use std::io::{Read, Seek};

use crate::audio_engine::errors::SoundbankError;
use crate::soundbank::riff::{Chunk, FourCC};

/// A record with a fixed on-disk size.
pub trait Record: Sized {
    const SIZE: usize;

    /// Decodes one record from exactly `SIZE` bytes.
    fn parse(bytes: &[u8]) -> Self;
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn name_at(bytes: &[u8], at: usize) -> String {
    let raw = &bytes[at..at + 20];
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..len]).trim_end().to_string()
}

/// `phdr`: preset header.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetHeader {
    pub name: String,
    pub preset: u16,
    pub bank: u16,
    pub bag_index: u16,
}

impl Record for PresetHeader {
    const SIZE: usize = 38;

    fn parse(bytes: &[u8]) -> Self {
        Self {
            name: name_at(bytes, 0),
            preset: u16_at(bytes, 20),
            bank: u16_at(bytes, 22),
            bag_index: u16_at(bytes, 24),
        }
    }
}

/// `pbag` / `ibag`: start indices of a zone's generators and modulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bag {
    pub gen_index: u16,
    pub mod_index: u16,
}

impl Record for Bag {
    const SIZE: usize = 4;

    fn parse(bytes: &[u8]) -> Self {
        Self {
            gen_index: u16_at(bytes, 0),
            mod_index: u16_at(bytes, 2),
        }
    }
}

/// Size of a `pmod` / `imod` record. Modulators are counted, never decoded.
const MODULATOR_SIZE: usize = 10;

/// The two raw bytes of a generator amount, readable as a range, signed or unsigned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenAmount(pub [u8; 2]);

impl GenAmount {
    pub fn short(self) -> i16 {
        i16::from_le_bytes(self.0)
    }

    pub fn word(self) -> u16 {
        u16::from_le_bytes(self.0)
    }

    /// `(lo, hi)` for key and velocity ranges.
    pub fn range(self) -> (u8, u8) {
        (self.0[0], self.0[1])
    }
}

/// `pgen` / `igen`: generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorRecord {
    pub oper: u16,
    pub amount: GenAmount,
}

impl Record for GeneratorRecord {
    const SIZE: usize = 4;

    fn parse(bytes: &[u8]) -> Self {
        Self {
            oper: u16_at(bytes, 0),
            amount: GenAmount([bytes[2], bytes[3]]),
        }
    }
}

/// `inst`: instrument header.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentHeader {
    pub name: String,
    pub bag_index: u16,
}

impl Record for InstrumentHeader {
    const SIZE: usize = 22;

    fn parse(bytes: &[u8]) -> Self {
        Self {
            name: name_at(bytes, 0),
            bag_index: u16_at(bytes, 20),
        }
    }
}

/// `shdr`: sample header. Offsets are frames into the shared `smpl` block.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleHeader {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub start_loop: u32,
    pub end_loop: u32,
    pub sample_rate: u32,
    pub original_pitch: u8,
    pub pitch_correction: i8,
}

impl Record for SampleHeader {
    const SIZE: usize = 46;

    fn parse(bytes: &[u8]) -> Self {
        Self {
            name: name_at(bytes, 0),
            start: u32_at(bytes, 20),
            end: u32_at(bytes, 24),
            start_loop: u32_at(bytes, 28),
            end_loop: u32_at(bytes, 32),
            sample_rate: u32_at(bytes, 36),
            original_pitch: bytes[40],
            pitch_correction: bytes[41] as i8,
        }
    }
}

/// Number of `record_size` records in a table of `len` bytes.
fn record_count(tag: &FourCC, len: usize, record_size: usize) -> Result<usize, SoundbankError> {
    if len % record_size != 0 {
        return Err(SoundbankError::RecordSize {
            table: String::from_utf8_lossy(tag).into_owned(),
            len: len as u32,
            record_size,
        });
    }
    Ok(len / record_size)
}

/// Decodes a table payload into records.
pub fn read_table<T: Record>(tag: &FourCC, payload: &[u8]) -> Result<Vec<T>, SoundbankError> {
    record_count(tag, payload.len(), T::SIZE)?;
    Ok(payload.chunks_exact(T::SIZE).map(T::parse).collect())
}

/// The nine decoded `pdta` tables.
#[derive(Debug, Default, Clone)]
pub struct Hydra {
    pub presets: Vec<PresetHeader>,
    pub preset_bags: Vec<Bag>,
    /// Records in `pmod`, the terminal one included.
    pub preset_mod_count: usize,
    pub preset_gens: Vec<GeneratorRecord>,
    pub instruments: Vec<InstrumentHeader>,
    pub instrument_bags: Vec<Bag>,
    pub instrument_mod_count: usize,
    pub instrument_gens: Vec<GeneratorRecord>,
    pub samples: Vec<SampleHeader>,
}

#[derive(Default)]
struct PartialHydra {
    presets: Option<Vec<PresetHeader>>,
    preset_bags: Option<Vec<Bag>>,
    preset_mod_count: Option<usize>,
    preset_gens: Option<Vec<GeneratorRecord>>,
    instruments: Option<Vec<InstrumentHeader>>,
    instrument_bags: Option<Vec<Bag>>,
    instrument_mod_count: Option<usize>,
    instrument_gens: Option<Vec<GeneratorRecord>>,
    samples: Option<Vec<SampleHeader>>,
}

impl PartialHydra {
    fn complete(self) -> Option<Hydra> {
        Some(Hydra {
            presets: self.presets?,
            preset_bags: self.preset_bags?,
            preset_mod_count: self.preset_mod_count?,
            preset_gens: self.preset_gens?,
            instruments: self.instruments?,
            instrument_bags: self.instrument_bags?,
            instrument_mod_count: self.instrument_mod_count?,
            instrument_gens: self.instrument_gens?,
            samples: self.samples?,
        })
    }
}

impl Hydra {
    /// Reads the tables from the payload of a `pdta` list ending at `pdta_end`.
    ///
    /// Unknown chunks are skipped; a missing table is [`SoundbankError::IncompleteHydra`].
    pub fn read_from<R: Read + Seek>(reader: &mut R, pdta_end: u64) -> Result<Self, SoundbankError> {
        let mut partial = PartialHydra::default();

        while reader.stream_position()? + 8 <= pdta_end {
            let chunk = Chunk::read_from(reader)?;
            let tag = chunk.id;
            match &tag {
                b"phdr" => partial.presets = Some(read_table(&tag, &chunk.read_payload(reader)?)?),
                b"pbag" => partial.preset_bags = Some(read_table(&tag, &chunk.read_payload(reader)?)?),
                b"pmod" => partial.preset_mod_count = Some(record_count(&tag, chunk.size as usize, MODULATOR_SIZE)?),
                b"pgen" => partial.preset_gens = Some(read_table(&tag, &chunk.read_payload(reader)?)?),
                b"inst" => partial.instruments = Some(read_table(&tag, &chunk.read_payload(reader)?)?),
                b"ibag" => {
                    partial.instrument_bags = Some(read_table(&tag, &chunk.read_payload(reader)?)?)
                }
                b"imod" => {
                    partial.instrument_mod_count = Some(record_count(&tag, chunk.size as usize, MODULATOR_SIZE)?)
                }
                b"igen" => {
                    partial.instrument_gens = Some(read_table(&tag, &chunk.read_payload(reader)?)?)
                }
                b"shdr" => partial.samples = Some(read_table(&tag, &chunk.read_payload(reader)?)?),
                _ => {}
            }
            chunk.seek_after(reader)?;
        }

        partial.complete().ok_or(SoundbankError::IncompleteHydra)
    }

    /// Whether any modulator lies in `[bags[index].mod_index, bags[index + 1].mod_index)`.
    ///
    /// Ranges past the last real record of a table with `mod_count` records are ignored.
    pub fn has_modulators(bags: &[Bag], index: usize, mod_count: usize) -> bool {
        match (bags.get(index), bags.get(index + 1)) {
            (Some(bag), Some(next)) => {
                bag.mod_index < next.mod_index && usize::from(bag.mod_index) + 1 < mod_count
            }
            _ => false,
        }
    }
}
