//! Hex line parser.
//!
//! Adapter clones emit the same payload with wildly different line
//! shaping: `0662 2006 00B5` on one firmware, `0662200600B5` glued
//! together on another, with stray status lines (`NO DATA`, `SEARCHING`,
//! `BUS INIT`, `CAN ERROR`) interleaved. This module normalizes all of
//! that into a flat byte stream, preserving order of occurrence across
//! lines.

use strum_macros::EnumIter;

const STATUS_TOKENS: [(&str, StatusHint); 5] = [
    ("NO DATA", StatusHint::NoData),
    ("SEARCHING", StatusHint::ElmError),
    ("BUS INIT", StatusHint::ElmError),
    ("CAN ERROR", StatusHint::CanError),
    ("ERROR", StatusHint::ElmError),
];

/// Status hint recorded when a response line carries one of the known
/// adapter status tokens instead of data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter)]
pub enum StatusHint {
    /// `CAN ERROR` — the vehicle bus is asleep. Callers running a scan
    /// should stop to avoid thrashing.
    CanError,
    /// `NO DATA` — the ECU did not respond in time.
    NoData,
    /// Any other adapter-reported error (`ERROR`, `SEARCHING`, `BUS INIT`).
    ElmError,
}

/// The result of parsing one adapter response: the flat byte stream plus
/// the most specific status hint seen, if any line carried one.
///
/// Precedence when multiple status lines appear in the same response:
/// `CanError` > `NoData` > `ElmError`, matching the severity callers care
/// about (a sleeping bus should never be masked by a generic `ERROR`
/// line).
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    /// Bytes extracted from non-status lines, in order of occurrence.
    pub bytes: Vec<u8>,
    /// Status hint recorded from a dropped status line, if any.
    pub status: Option<StatusHint>,
}

/// Parses one raw multi-line adapter response into a flat byte stream.
///
/// Splits on `\r`/`\n`, trims whitespace, discards empty lines and lines
/// equal to `>`. A line whose uppercased form contains a known status
/// token is dropped and recorded as a [`StatusHint`]. Remaining lines
/// have every non-hex character stripped; an odd trailing nibble is
/// discarded; bytes are parsed two hex digits at a time, case
/// insensitive.
pub fn parse_response(text: &str) -> ParsedResponse {
    let (lines, status) = parse_lines(text);
    ParsedResponse {
        bytes: lines.into_iter().flatten().collect(),
        status,
    }
}

/// Like [`parse_response`], but keeps each physical line's bytes
/// separate instead of flattening them. Needed by the ISO-TP layer,
/// which must tell a First Frame's bytes apart from a Consecutive
/// Frame's even when both arrived in the same adapter print burst.
pub fn parse_lines(text: &str) -> (Vec<Vec<u8>>, Option<StatusHint>) {
    let mut lines_out = Vec::new();
    let mut status = None;
    for raw_line in text.split(['\r', '\n']) {
        let line = raw_line.trim();
        if line.is_empty() || line == ">" {
            continue;
        }
        let upper = line.to_ascii_uppercase();
        if let Some(hint) = status_hint_for(&upper) {
            log::debug!("hexline: dropping status line {line:?} ({hint:?})");
            merge_status(&mut status, hint);
            continue;
        }
        let mut digits: String = line.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        if digits.len() % 2 != 0 {
            log::warn!("hexline: odd hex digit count in {line:?}, dropping trailing nibble");
            digits.pop();
        }
        let mut bytes = Vec::new();
        let mut chars = digits.chars();
        while let (Some(hi), Some(lo)) = (chars.next(), chars.next()) {
            bytes.push((hex_digit(hi) << 4) | hex_digit(lo));
        }
        if !bytes.is_empty() {
            lines_out.push(bytes);
        }
    }
    (lines_out, status)
}

fn status_hint_for(upper_line: &str) -> Option<StatusHint> {
    STATUS_TOKENS
        .iter()
        .find(|(token, _)| upper_line.contains(token))
        .map(|(_, hint)| *hint)
}

fn merge_status(current: &mut Option<StatusHint>, new: StatusHint) {
    let rank = |h: StatusHint| match h {
        StatusHint::CanError => 2,
        StatusHint::NoData => 1,
        StatusHint::ElmError => 0,
    };
    match current {
        Some(existing) if rank(*existing) >= rank(new) => {}
        _ => *current = Some(new),
    }
}

fn hex_digit(c: char) -> u8 {
    c.to_digit(16).expect("caller filtered to ascii hexdigits") as u8
}
