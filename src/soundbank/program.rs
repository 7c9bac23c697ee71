use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio_engine::constants::PROGRAMS_PER_BANK;
use crate::soundbank::zone::Zone;

/// A bank/program address. `index()` is the sort and lookup key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSelection {
    pub bank: u32,
    pub program: u32,
    #[serde(default)]
    pub name: String,
}

impl ProgramSelection {
    pub fn new(bank: u32, program: u32) -> Self {
        Self {
            bank,
            program,
            name: String::new(),
        }
    }

    pub fn named(bank: u32, program: u32, name: impl Into<String>) -> Self {
        Self {
            bank,
            program,
            name: name.into(),
        }
    }

    pub fn from_index(index: u32) -> Self {
        Self::new(index / PROGRAMS_PER_BANK, index % PROGRAMS_PER_BANK)
    }

    pub fn index(&self) -> u32 {
        self.bank * PROGRAMS_PER_BANK + self.program
    }

    /// Same bank and program, ignoring the name.
    pub fn same_program(&self, other: &ProgramSelection) -> bool {
        self.bank == other.bank && self.program == other.program
    }

    pub fn bank_msb(&self) -> u32 {
        self.bank / PROGRAMS_PER_BANK
    }

    pub fn bank_lsb(&self) -> u32 {
        self.bank % PROGRAMS_PER_BANK
    }
}

/// One SF2 preset and the zones resolved for it.
#[derive(Debug, Clone)]
pub struct Preset {
    pub selection: ProgramSelection,
    pub zones: Vec<Arc<Zone>>,
}

impl Preset {
    pub fn new(name: impl Into<String>, bank: u32, program: u32) -> Self {
        Self {
            selection: ProgramSelection::named(bank, program, name),
            zones: Vec::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.selection.index()
    }

    pub fn name(&self) -> &str {
        &self.selection.name
    }
}
