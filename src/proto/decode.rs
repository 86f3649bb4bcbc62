//! Response line decoder
//!
//! A response line looks like `<MODE> <VALUE> [<UNITS>]`, e.g.
//! `DC 3.999 V`, `RES 3.999 MOH`, `AC OL` or `LOG HI`.
//! Decoding never fails, lines without a known mode word
//! come back with `valid == false`.

use crate::measurement::{Classification, Reading};
use crate::proto::mode::Mode;

/// Magnitude letters allowed directly after a number.
const MAGNITUDE: &[u8] = b"pnuUmMkKG";

const OVERLOAD: [&str; 3] = ["OL", ".OL", "-OL"];

/// Stateless decoder for response lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolDecoder;

impl ProtocolDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, line: &str) -> Reading {
        decode(line)
    }
}

/// Decode one response line (terminator already stripped).
pub fn decode(line: &str) -> Reading {
    let mut out = Reading::invalid(line);

    let clean = line.trim();
    let (word, rest) = clean.split_once(' ').unwrap_or((clean, ""));
    let Some(mode) = Mode::from_code(word) else {
        return out;
    };

    out.valid = true;
    out.mode_code = mode.code().to_string();
    out.mode_name = mode.name().to_string();
    parse_value_and_units(rest.trim(), &mut out);
    out
}

fn parse_value_and_units(rest: &str, out: &mut Reading) {
    if rest.is_empty() {
        return;
    }

    if let Some(units) = overload_units(rest) {
        out.classification = Some(Classification::Overload);
        out.raw_value = "OL".to_string();
        out.units = normalize_units(units);
        return;
    }

    let (value, units) = match rest.rsplit_once(' ') {
        Some((value, units)) => (value.trim_end(), units),
        None => (rest, ""),
    };

    if let Some((class, label)) = special_value(value) {
        out.classification = Some(class);
        out.raw_value = label.to_string();
        out.units = normalize_units(units);
        return;
    }

    match find_number(value) {
        Some((start, end)) => {
            out.raw_value = value[start..end].to_string();
            // Whatever follows the literal belongs to the units, e.g. "3.999mV"
            let tail = value[end..].trim();
            let joined = match (tail.is_empty(), units.is_empty()) {
                (true, _) => units.to_string(),
                (false, true) => tail.to_string(),
                (false, false) => format!("{} {}", tail, units),
            };
            out.units = normalize_units(&joined);
        }
        // The undefined logic marker may arrive as "- - - -", which the
        // value/units split above tears apart.
        None if is_logic_undefined(rest) => {
            out.classification = Some(Classification::LogicUndefined);
            out.raw_value = "----".to_string();
        }
        None => {
            out.raw_value = rest.to_string();
        }
    }
}

/// Returns the text after the overload token, if `rest` starts with one.
fn overload_units(rest: &str) -> Option<&str> {
    let (token, tail) = match rest.split_once(' ') {
        Some((token, tail)) => (token, tail.trim()),
        None => (rest, ""),
    };
    OVERLOAD
        .iter()
        .any(|ol| token.eq_ignore_ascii_case(ol))
        .then_some(tail)
}

fn is_logic_undefined(rest: &str) -> bool {
    let squeezed: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
    squeezed.contains("----")
}

/// Whole-token match only; "kHz" must never count as "HI".
fn special_value(token: &str) -> Option<(Classification, &'static str)> {
    let is = |s: &str| token.eq_ignore_ascii_case(s);
    if is("OPEN") {
        Some((Classification::Open, "OPEN"))
    } else if is("SHORT") {
        Some((Classification::Short, "SHORT"))
    } else if is("HIGH") || is("HI") {
        Some((Classification::LogicHigh, "High"))
    } else if is("LOW") || is("LO") {
        Some((Classification::LogicLow, "Low"))
    } else {
        None
    }
}

/// Byte range of the first numeric literal in `text`.
fn find_number(text: &str) -> Option<(usize, usize)> {
    text.char_indices()
        .find_map(|(start, _)| scan_number(&text[start..]).map(|len| (start, start + len)))
}

/// Scan a number at the start of `text`: optional sign, digits, optional
/// decimal point and digits, optional magnitude letter. Returns the byte
/// length of the literal.
fn scan_number(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut pos = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        pos += 1;
    }

    let int_start = pos;
    while bytes.get(pos).map_or(false, u8::is_ascii_digit) {
        pos += 1;
    }
    let mut digits = pos - int_start;

    if bytes.get(pos) == Some(&b'.') {
        let frac_start = pos + 1;
        let mut end = frac_start;
        while bytes.get(end).map_or(false, u8::is_ascii_digit) {
            end += 1;
        }
        digits += end - frac_start;
        pos = end;
    }

    if digits == 0 {
        return None;
    }

    if bytes.get(pos).map_or(false, |b| MAGNITUDE.contains(b)) {
        pos += 1;
    }

    Some(pos)
}

fn normalize_units(units: &str) -> String {
    let units = match units {
        "OH" => "Ω",
        "KOH" | "kOH" => "kΩ",
        "MOH" => "MΩ",
        other => other,
    };
    // 7-bit transfer turns the degree sign into a caret
    units.replace("^C", "°C").replace("^F", "°F")
}
