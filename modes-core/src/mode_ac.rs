//! Legacy Mode A/C replies.
//!
//! Mode A codes are handled in "hex Gillham" form: each of the four octal
//! digits ABCD occupies one nibble (`0xABCD`), with the SPI pulse flagged at
//! `0x0080` and the D1 pulse at `0x0001`.

use std::collections::VecDeque;
use std::sync::LazyLock;

use tracing::debug;

use crate::message::{Altitude, DecodedMessage, RxMeta, Squawk};
use crate::types::{Address, AddressType, DataSource};

/// Pseudo-DF carried by decoded Mode A/C replies.
pub const MODE_AC_DF: u8 = 32;

/// SPI (ident) pulse flag in a hex-Gillham Mode A code.
pub const SPI_FLAG: u16 = 0x0080;

/// Lowest and highest Mode C altitudes, in hundreds of feet.
const MODE_C_MIN: i32 = -12;
const MODE_C_MAX: i32 = 1267;

// ---------------------------------------------------------------------------
// Gillham conversion
// ---------------------------------------------------------------------------

/// Convert a hex-Gillham Mode A code to a Mode C altitude in hundreds of feet.
///
/// Returns `None` for codes that cannot be altitudes: D1 set, any of the
/// unused nibble bits set, no C pulse, or an illegal C (hundreds) pattern.
pub fn mode_a_to_mode_c(mode_a: u16) -> Option<i32> {
    let mode_a = mode_a as u32;
    if mode_a & 0xFFFF_8889 != 0 || mode_a & 0x0000_00F0 == 0 {
        return None;
    }

    let mut one_hundreds: i32 = 0;
    if mode_a & 0x0010 != 0 {
        one_hundreds ^= 0x007; // C1
    }
    if mode_a & 0x0020 != 0 {
        one_hundreds ^= 0x003; // C2
    }
    if mode_a & 0x0040 != 0 {
        one_hundreds ^= 0x001; // C4
    }

    // 7 and 5 are swapped in the C sequence
    if one_hundreds & 5 == 5 {
        one_hundreds ^= 2;
    }
    if one_hundreds > 5 {
        return None;
    }

    // D1 is never used for altitude
    let mut five_hundreds: i32 = 0;
    for (bit, mask) in [
        (0x0002, 0x0FF), // D2
        (0x0004, 0x07F), // D4
        (0x1000, 0x03F), // A1
        (0x2000, 0x01F), // A2
        (0x4000, 0x00F), // A4
        (0x0100, 0x007), // B1
        (0x0200, 0x003), // B2
        (0x0400, 0x001), // B4
    ] {
        if mode_a & bit != 0 {
            five_hundreds ^= mask;
        }
    }

    // Odd 500 ft bands count the hundreds downwards
    if five_hundreds & 1 != 0 {
        one_hundreds = 6 - one_hundreds;
    }

    Some(five_hundreds * 5 + one_hundreds - 13)
}

/// Reverse table: index `alt - MODE_C_MIN` holds the Mode A code.
static MODE_C_TO_A: LazyLock<Vec<u16>> = LazyLock::new(|| {
    let mut table = vec![0u16; (MODE_C_MAX - MODE_C_MIN + 1) as usize];
    for a in 0..8u16 {
        for b in 0..8u16 {
            for c in 0..8u16 {
                for d in 0..8u16 {
                    let code = (a << 12) | (b << 8) | (c << 4) | d;
                    if let Some(alt) = mode_a_to_mode_c(code) {
                        table[(alt - MODE_C_MIN) as usize] = code;
                    }
                }
            }
        }
    }
    table
});

/// Convert a Mode C altitude (hundreds of feet) back to its Mode A code.
pub fn mode_c_to_mode_a(mode_c: i32) -> Option<u16> {
    if !(MODE_C_MIN..=MODE_C_MAX).contains(&mode_c) {
        return None;
    }
    Some(MODE_C_TO_A[(mode_c - MODE_C_MIN) as usize])
}

/// Rearrange a 13-bit Annex 10 ID/AC field (C1 A1 C2 A2 C4 A4 X B1 D1 B2 D2
/// B4 D4) into hex-Gillham form. The X/M bit is dropped.
pub fn id13_to_mode_a(id13: u32) -> u16 {
    const MAP: [(u32, u16); 12] = [
        (0x1000, 0x0010), // C1
        (0x0800, 0x1000), // A1
        (0x0400, 0x0020), // C2
        (0x0200, 0x2000), // A2
        (0x0100, 0x0040), // C4
        (0x0080, 0x4000), // A4
        (0x0020, 0x0100), // B1
        (0x0010, 0x0001), // D1 (or Q)
        (0x0008, 0x0200), // B2
        (0x0004, 0x0002), // D2
        (0x0002, 0x0400), // B4
        (0x0001, 0x0004), // D4
    ];
    MAP.iter()
        .filter(|(field_bit, _)| id13 & field_bit != 0)
        .fold(0, |acc, (_, gillham_bit)| acc | gillham_bit)
}

// ---------------------------------------------------------------------------
// Pulse detection
// ---------------------------------------------------------------------------

/// Pulse spacing at 2 MHz: 1.45 us = 2.9 samples.
const SLOT_SAMPLES: f64 = 2.9;

/// Slot index of the closing F2 bracket.
const F2_SLOT: usize = 14;

/// Slot index of the SPI pulse (4.35 us after F2).
const SPI_SLOT: usize = 17;

/// Minimum bracket pulse level.
const SQUELCH: u32 = 0x07FF;

/// Samples needed from the F1 position to past the SPI pulse.
pub const REPLY_SAMPLES: usize = 51;

/// Mode A bit carried in each information slot, slot 7 being the X pulse.
const SLOT_BITS: [u16; 13] = [
    0x0010, // C1
    0x1000, // A1
    0x0020, // C2
    0x2000, // A2
    0x0040, // C4
    0x4000, // A4
    0x0000, // X
    0x0100, // B1
    0x0001, // D1
    0x0200, // B2
    0x0002, // D2
    0x0400, // B4
    0x0004, // D4
];

const MAX_MODE_S_WINDOWS: usize = 64;

/// Detects Mode A/C replies in a 2 MHz magnitude stream.
///
/// Windows of samples already claimed by Mode S frames are recorded with
/// [`ModeAcDetector::record_mode_s`]; replies overlapping one are refused.
pub struct ModeAcDetector {
    enabled: bool,
    mode_s_windows: VecDeque<(u64, u64)>,
}

impl ModeAcDetector {
    pub fn new(enabled: bool) -> Self {
        ModeAcDetector {
            enabled,
            mode_s_windows: VecDeque::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record that samples `start..end` (sample clock) carried a Mode S frame.
    pub fn record_mode_s(&mut self, start: u64, end: u64) {
        if self.mode_s_windows.len() == MAX_MODE_S_WINDOWS {
            self.mode_s_windows.pop_front();
        }
        self.mode_s_windows.push_back((start, end));
    }

    fn overlaps_mode_s(&self, start: u64, end: u64) -> bool {
        self.mode_s_windows
            .iter()
            .any(|&(s, e)| start < e && s < end)
    }

    /// Try to read a reply whose F1 pulse starts at `mag[offset]`.
    ///
    /// `clock` is the sample clock of `mag[offset]`. Returns the hex-Gillham
    /// code with [`SPI_FLAG`] set when the SPI pulse is present.
    pub fn detect(&self, mag: &[u16], offset: usize, clock: u64) -> Option<u16> {
        let too_short = offset
            .checked_add(REPLY_SAMPLES)
            .map_or(true, |end| mag.len() < end);
        if !self.enabled || too_short {
            return None;
        }
        if self.overlaps_mode_s(clock, clock.saturating_add(REPLY_SAMPLES as u64)) {
            debug!(clock, "mode A/C candidate overlaps a Mode S frame");
            return None;
        }

        let pulse = |slot: usize| -> u32 {
            let pos = offset + (slot as f64 * SLOT_SAMPLES) as usize;
            mag[pos].max(mag[pos + 1]) as u32
        };

        let f1 = pulse(0);
        let f2 = pulse(F2_SLOT);
        if f1 < SQUELCH || f2 < SQUELCH {
            return None;
        }
        // Bracket pulses of one reply arrive at similar levels
        if f1 > f2 * 2 || f2 > f1 * 2 {
            return None;
        }

        let threshold = (f1 + f2) / 4;
        if pulse(7) >= threshold {
            return None;
        }

        let mut mode_a = 0u16;
        for (i, bit) in SLOT_BITS.iter().enumerate() {
            if pulse(i + 1) >= threshold {
                mode_a |= bit;
            }
        }
        if pulse(SPI_SLOT) >= threshold {
            mode_a |= SPI_FLAG;
        }
        Some(mode_a)
    }
}

/// Build a message from a detected hex-Gillham Mode A code.
///
/// Replies without SPI whose code is a legal Mode C pattern also carry a
/// barometric altitude.
pub fn mode_ac_message(mode_a: u16, meta: RxMeta) -> DecodedMessage {
    let mut msg = DecodedMessage::new(vec![(mode_a >> 8) as u8, mode_a as u8], meta);
    msg.df = MODE_AC_DF;
    msg.source = DataSource::ModeAc;
    msg.addrtype = AddressType::ModeA;
    msg.address = Address::non_icao((mode_a & 0xFF7F) as u32);
    msg.squawk = Some(Squawk(mode_a & 0x7777));

    let spi = mode_a & SPI_FLAG != 0;
    msg.spi = Some(spi);
    if !spi {
        if let Some(hundreds) = mode_a_to_mode_c(mode_a) {
            msg.baro_alt = Some(Altitude::feet(hundreds * 100));
        }
    }
    msg
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
