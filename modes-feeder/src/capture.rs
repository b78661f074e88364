//! File input for pre-demodulated frames.
//!
//! One frame per line, in any of:
//! - bare hex (`8D4840D6202CC371C32CE0576098`)
//! - dump1090 raw (`*8D4840D6202CC371C32CE0576098;`)
//! - timestamped raw (`@0000001E8480` + hex + `;`, 48-bit 12 MHz clock)
//!
//! Mode A/C replies appear as 4 hex digits.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use modes_core::RxMeta;

/// Radio clock rate of the timestamped format.
const CLOCK_HZ: f64 = 12_000_000.0;

/// Spacing assigned to lines without a timestamp.
const UNTIMED_STEP: f64 = 0.001;

// ---------------------------------------------------------------------------
// Raw frames
// ---------------------------------------------------------------------------

/// A frame read from input, not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub hex: String,
    pub bytes: Vec<u8>,
    pub meta: RxMeta,
}

impl RawFrame {
    /// The Mode A code of a 2-byte reply.
    pub fn mode_a(&self) -> Option<u16> {
        match self.bytes.as_slice() {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame reader
// ---------------------------------------------------------------------------

/// Read frames from a text file.
pub struct FrameReader {
    path: PathBuf,
}

impl FrameReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FrameReader {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read all frames. Unparseable lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<RawFrame>> {
        let content = fs::read_to_string(&self.path)?;
        Ok(parse_lines(&content))
    }
}

/// Parse every usable line of `content`.
///
/// Timestamped lines take their time from the radio clock; other lines are
/// spaced 1 ms apart from the previous frame.
pub fn parse_lines(content: &str) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    let mut last_time: Option<f64> = None;

    for line in content.lines() {
        let Some((ticks, hex)) = clean_hex_line(line) else {
            continue;
        };
        let Some(bytes) = modes_core::hex_decode(&hex) else {
            continue;
        };

        let sys_time = match ticks {
            Some(ticks) => ticks as f64 / CLOCK_HZ,
            None => last_time.map_or(0.0, |t| t + UNTIMED_STEP),
        };
        last_time = Some(sys_time);

        frames.push(RawFrame {
            hex,
            bytes,
            meta: RxMeta {
                timestamp: ticks.unwrap_or(0),
                sys_time,
                signal: 0.0,
            },
        });
    }

    frames
}

/// Extract the optional radio timestamp and the frame hex from a line.
pub fn clean_hex_line(line: &str) -> Option<(Option<u64>, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    // Timestamped: @<12 hex ticks><frame>;
    if let Some(rest) = line.strip_prefix('@') {
        let inner = rest.strip_suffix(';')?;
        if inner.len() < 12 || !inner.is_char_boundary(12) {
            return None;
        }
        let (ts, frame) = inner.split_at(12);
        let ticks = u64::from_str_radix(ts, 16).ok()?;
        return is_valid_hex(frame).then(|| (Some(ticks), frame.to_ascii_uppercase()));
    }

    // dump1090: *<hex>;
    if let Some(inner) = line.strip_prefix('*').and_then(|s| s.strip_suffix(';')) {
        return is_valid_hex(inner).then(|| (None, inner.to_ascii_uppercase()));
    }

    is_valid_hex(line).then(|| (None, line.to_ascii_uppercase()))
}

fn is_valid_hex(s: &str) -> bool {
    matches!(s.len(), 4 | 14 | 28) && s.chars().all(|c| c.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const KLM: &str = "8D4840D6202CC371C32CE0576098";

    #[test]
    fn test_clean_hex_line_plain() {
        assert_eq!(clean_hex_line(KLM), Some((None, KLM.to_string())));
    }

    #[test]
    fn test_clean_hex_line_dump1090() {
        let line = format!("*{KLM};");
        assert_eq!(clean_hex_line(&line), Some((None, KLM.to_string())));
    }

    #[test]
    fn test_clean_hex_line_timestamped() {
        let line = format!("@00000016E360{KLM};");
        assert_eq!(clean_hex_line(&line), Some((Some(1_500_000), KLM.to_string())));
    }

    #[test]
    fn test_clean_hex_line_lowercase_and_whitespace() {
        let line = format!("  {}  ", KLM.to_ascii_lowercase());
        assert_eq!(clean_hex_line(&line), Some((None, KLM.to_string())));
    }

    #[test]
    fn test_clean_hex_line_mode_ac() {
        assert_eq!(clean_hex_line("*7700;"), Some((None, "7700".to_string())));
    }

    #[test]
    fn test_clean_hex_line_rejects() {
        assert!(clean_hex_line("# comment").is_none());
        assert!(clean_hex_line("").is_none());
        assert!(clean_hex_line("not hex at all").is_none());
        assert!(clean_hex_line("8D4840").is_none());
        assert!(clean_hex_line("@0000;").is_none());
        assert!(clean_hex_line(&format!("@00000016E360{KLM}")).is_none());
    }

    #[test]
    fn test_parse_lines_times() {
        let content = format!("{KLM}\n# skip\n*{KLM};\n@00000016E360{KLM};\n{KLM}\n");
        let frames = parse_lines(&content);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].meta.sys_time, 0.0);
        assert!((frames[1].meta.sys_time - 0.001).abs() < 1e-9);
        assert!((frames[2].meta.sys_time - 0.125).abs() < 1e-9);
        assert_eq!(frames[2].meta.timestamp, 1_500_000);
        assert!((frames[3].meta.sys_time - 0.126).abs() < 1e-9);
        assert_eq!(frames[0].bytes.len(), 14);
    }

    #[test]
    fn test_mode_ac_frame() {
        let frames = parse_lines("*7700;\n");
        assert_eq!(frames[0].mode_a(), Some(0x7700));

        let frames = parse_lines(&format!("*{KLM};\n"));
        assert_eq!(frames[0].mode_a(), None);
    }
}
