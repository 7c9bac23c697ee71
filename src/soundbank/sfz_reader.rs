//! Text definition (SFZ) parser.
//!
//! `<global>` and `<group>` opcodes are defaults for the regions that follow. Malformed
//! input is recorded as `Line N: ...` and parsing resumes with the next token.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::soundbank::diagnostics::Diagnostics;
use crate::soundbank::shared::SharedResource;
use crate::soundbank::zone::{LoopMode, OffMode, Trigger, Zone};

/// Reads and parses the definition at `path`.
pub fn read_regions(
    path: &Path,
    resource: &SharedResource,
    diagnostics: &mut Diagnostics,
) -> Vec<Arc<Zone>> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
            parse_regions(&text, base_dir, resource, diagnostics)
        }
        Err(err) => {
            diagnostics.add_error(format!("Couldn't open file: {err}"));
            Vec::new()
        }
    }
}

/// Parses definition text. Sample paths resolve against `base_dir`.
pub fn parse_regions(
    text: &str,
    base_dir: &Path,
    resource: &SharedResource,
    diagnostics: &mut Diagnostics,
) -> Vec<Arc<Zone>> {
    let mut parser = Parser {
        base_dir,
        resource,
        diagnostics,
        section: Section::None,
        default_path: None,
        global: Zone::default(),
        group: Zone::default(),
        region: None,
        regions: Vec::new(),
    };

    let text = strip_comments(text);
    for (index, line) in text.lines().enumerate() {
        parser.parse_line(line, index + 1);
    }
    parser.finish_region();

    log::debug!("Parsed {} regions", parser.regions.len());
    parser.regions.into_iter().map(Arc::new).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Region,
    Group,
    Global,
    Control,
    Ignored,
}

struct Parser<'a> {
    base_dir: &'a Path,
    resource: &'a SharedResource,
    diagnostics: &'a mut Diagnostics,
    section: Section,
    default_path: Option<PathBuf>,
    global: Zone,
    group: Zone,
    region: Option<Zone>,
    regions: Vec<Zone>,
}

impl Parser<'_> {
    fn parse_line(&mut self, line: &str, line_number: usize) {
        let mut rest = line;
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                return;
            }

            if let Some(after) = rest.strip_prefix('<') {
                let Some(close) = after.find('>') else {
                    self.error(line_number, "unterminated header.");
                    return;
                };
                self.begin_section(after[..close].trim());
                rest = &after[close + 1..];
                continue;
            }

            let Some(eq) = rest.find('=') else {
                self.error(line_number, &format!("expected '=' after \"{rest}\"."));
                return;
            };

            let opcode = &rest[..eq];
            if opcode.is_empty() || opcode.contains(|c: char| c.is_whitespace() || c == '<') {
                let skip = rest
                    .find(|c: char| c.is_whitespace() || c == '<')
                    .unwrap_or(rest.len())
                    .max(1);
                self.error(line_number, &format!("malformed opcode \"{}\".", &rest[..skip]));
                rest = &rest[skip..];
                continue;
            }

            let after = &rest[eq + 1..];
            let value_end = if takes_path(opcode) {
                path_value_end(after)
            } else {
                after
                    .find(|c: char| c.is_whitespace() || c == '<')
                    .unwrap_or(after.len())
            };
            let value = after[..value_end].trim();
            rest = &after[value_end..];

            if value.is_empty() {
                self.error(line_number, &format!("missing value for {opcode}."));
                continue;
            }
            self.apply(opcode, value, line_number);
        }
    }

    fn begin_section(&mut self, name: &str) {
        self.finish_region();
        self.section = match name {
            "region" => {
                self.region = Some(self.group.clone());
                Section::Region
            }
            "group" => {
                self.group = self.global.clone();
                Section::Group
            }
            "global" => {
                self.global = Zone::default();
                self.group = Zone::default();
                Section::Global
            }
            "control" => Section::Control,
            other => {
                self.diagnostics.add_unsupported(format!("<{other}>"));
                Section::Ignored
            }
        };
    }

    fn finish_region(&mut self) {
        if let Some(region) = self.region.take() {
            self.regions.push(region);
        }
    }

    fn error(&mut self, line_number: usize, message: &str) {
        self.diagnostics.add_error(format!("Line {line_number}: {message}"));
    }

    fn apply(&mut self, opcode: &str, value: &str, line_number: usize) {
        match self.section {
            Section::Region => {
                if let Some(mut region) = self.region.take() {
                    self.apply_to_zone(&mut region, opcode, value, line_number);
                    self.region = Some(region);
                }
            }
            Section::Group => {
                let mut group = std::mem::take(&mut self.group);
                self.apply_to_zone(&mut group, opcode, value, line_number);
                self.group = group;
            }
            Section::Global => {
                let mut global = std::mem::take(&mut self.global);
                self.apply_to_zone(&mut global, opcode, value, line_number);
                self.group = global.clone();
                self.global = global;
            }
            Section::Control => match opcode {
                "default_path" => self.default_path = Some(PathBuf::from(value.replace('\\', "/"))),
                other => self.diagnostics.add_unsupported(other),
            },
            Section::Ignored => {}
            Section::None => self.error(line_number, &format!("{opcode} outside of any header.")),
        }
    }

    fn resolve_sample_path(&self, value: &str) -> PathBuf {
        let relative = PathBuf::from(value.replace('\\', "/"));
        match &self.default_path {
            Some(default_path) => self.base_dir.join(default_path).join(relative),
            None => self.base_dir.join(relative),
        }
    }

    fn apply_to_zone(&mut self, zone: &mut Zone, opcode: &str, value: &str, line_number: usize) {
        let result = match opcode {
            "sample" => {
                let path = self.resolve_sample_path(value);
                zone.sample = Some(self.resource.sample_for_file(&path));
                Some(())
            }
            "lokey" => note(value).map(|v| zone.lokey = v),
            "hikey" => note(value).map(|v| zone.hikey = v),
            "key" => note(value).map(|v| {
                zone.lokey = v;
                zone.hikey = v;
                zone.pitch_keycenter = v;
            }),
            "pitch_keycenter" => note(value).map(|v| zone.pitch_keycenter = v),
            "lovel" => number(value).map(|v| zone.lovel = v),
            "hivel" => number(value).map(|v| zone.hivel = v),
            "trigger" => trigger(value).map(|v| zone.trigger = v),
            "group" => number(value).map(|v| zone.group = v),
            "off_by" => number(value).map(|v| zone.off_by = v),
            "off_mode" => off_mode(value).map(|v| zone.off_mode = v),
            "offset" => number(value).map(|v| zone.offset = v),
            "end" => number::<i64>(value).map(|v| {
                if v < 0 {
                    zone.negative_end = true;
                } else {
                    zone.end = v;
                }
            }),
            "loop_mode" | "loopmode" => loop_mode(value).map(|v| zone.loop_mode = v),
            "loop_start" | "loopstart" => number(value).map(|v| zone.loop_start = v),
            "loop_end" | "loopend" => number(value).map(|v| zone.loop_end = v),
            "transpose" => number(value).map(|v| zone.transpose = v),
            "tune" => number(value).map(|v| zone.tune = v),
            "pitch_keytrack" => number(value).map(|v| zone.pitch_keytrack = v),
            "bend_up" | "bendup" => number(value).map(|v| zone.bend_up = v),
            "bend_down" | "benddown" => number(value).map(|v| zone.bend_down = v),
            "volume" => number(value).map(|v| zone.volume = v),
            "pan" => number(value).map(|v| zone.pan = v),
            "amp_veltrack" => number(value).map(|v| zone.amp_veltrack = v),
            "ampeg_delay" => number(value).map(|v| zone.ampeg.delay = v),
            "ampeg_start" => number(value).map(|v| zone.ampeg.start = v),
            "ampeg_attack" => number(value).map(|v| zone.ampeg.attack = v),
            "ampeg_hold" => number(value).map(|v| zone.ampeg.hold = v),
            "ampeg_decay" => number(value).map(|v| zone.ampeg.decay = v),
            "ampeg_sustain" => number(value).map(|v| zone.ampeg.sustain = v),
            "ampeg_release" => number(value).map(|v| zone.ampeg.release = v),
            "ampeg_vel2delay" => number(value).map(|v| zone.ampeg_veltrack.delay = v),
            "ampeg_vel2attack" => number(value).map(|v| zone.ampeg_veltrack.attack = v),
            "ampeg_vel2hold" => number(value).map(|v| zone.ampeg_veltrack.hold = v),
            "ampeg_vel2decay" => number(value).map(|v| zone.ampeg_veltrack.decay = v),
            "ampeg_vel2sustain" => number(value).map(|v| zone.ampeg_veltrack.sustain = v),
            "ampeg_vel2release" => number(value).map(|v| zone.ampeg_veltrack.release = v),
            other => {
                self.diagnostics.add_unsupported(other);
                Some(())
            }
        };

        if result.is_none() {
            self.error(line_number, &format!("illegal value for {opcode}: \"{value}\"."));
        }
    }
}

fn takes_path(opcode: &str) -> bool {
    matches!(opcode, "sample" | "default_path")
}

/// End of a value that may contain spaces: the next `<`, or whitespace followed by `name=`.
fn path_value_end(text: &str) -> usize {
    let limit = text.find('<').unwrap_or(text.len());
    let bytes = text.as_bytes();

    for (i, c) in text[..limit].char_indices() {
        if !c.is_whitespace() {
            continue;
        }
        let mut j = i + 1;
        while j < limit && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        let name_start = j;
        while j < limit && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
        if j > name_start && j < limit && bytes[j] == b'=' {
            return i;
        }
    }
    limit
}

fn number<T: FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}

fn trigger(value: &str) -> Option<Trigger> {
    match value {
        "attack" => Some(Trigger::Attack),
        "release" => Some(Trigger::Release),
        "first" => Some(Trigger::First),
        "legato" => Some(Trigger::Legato),
        _ => None,
    }
}

fn off_mode(value: &str) -> Option<OffMode> {
    match value {
        "fast" => Some(OffMode::Fast),
        "normal" => Some(OffMode::Normal),
        _ => None,
    }
}

fn loop_mode(value: &str) -> Option<LoopMode> {
    match value {
        "no_loop" => Some(LoopMode::NoLoop),
        "one_shot" => Some(LoopMode::OneShot),
        "loop_continuous" => Some(LoopMode::Continuous),
        "loop_sustain" => Some(LoopMode::Sustain),
        _ => None,
    }
}

/// A MIDI note number, either numeric or a name like `c4`, `f#3` or `eb-1` (`c4` is 60).
pub fn note(value: &str) -> Option<i32> {
    if let Ok(number) = value.parse::<i32>() {
        return Some(number);
    }

    let mut chars = value.chars();
    let semitone = match chars.next().map(|c| c.to_ascii_lowercase()) {
        Some('c') => 0,
        Some('d') => 2,
        Some('e') => 4,
        Some('f') => 5,
        Some('g') => 7,
        Some('a') => 9,
        Some('b') => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave) = match rest.as_bytes().first() {
        Some(b'#') => (1, &rest[1..]),
        Some(b'b') => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave.parse().ok()?;
    Some((octave + 1) * 12 + semitone + accidental)
}

/// Replaces `//` and `/* */` comments with spaces, keeping line breaks.
///
/// `//` only opens a comment at the start of a token, so `sample=..//x.wav` keeps its path.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '/' {
            out.push(c);
            continue;
        }
        let token_start = out.chars().next_back().is_none_or(char::is_whitespace);
        match chars.peek() {
            Some('/') if token_start => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            Some('*') => {
                chars.next();
                let mut previous = ' ';
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && skipped == '/' {
                        break;
                    }
                    previous = skipped;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}
