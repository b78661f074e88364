//! CRC-24 validation and syndrome-based error correction for Mode S.
//!
//! ICAO standard polynomial: x^24 + x^23 + x^22 + ... + x^10 + x^3 + 1
//! Generator: 0xFFF409
//!
//! For DF11(IID=0)/17/18 the last 24 bits are pure parity and a clean frame
//! leaves a residual of 0. For DF0/4/5/16/20/21/24 the parity is overlaid with
//! the aircraft address (or the interrogator identifier for DF11), so the
//! residual *is* that value.

use std::collections::HashMap;
use std::sync::LazyLock;

use tracing::trace;

use crate::types::{LONG_MSG_BITS, SHORT_MSG_BITS};

const GENERATOR: u32 = 0xFFF409;

/// Largest number of bit errors the syndrome tables cover.
pub const MAX_CORRECTABLE_BITS: usize = 3;

/// First bit position eligible for correction when the DF field is protected.
const FIRST_NON_DF_BIT: usize = 5;

// ---------------------------------------------------------------------------
// CRC lookup table (compile-time)
// ---------------------------------------------------------------------------

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ GENERATOR;
            } else {
                crc <<= 1;
            }
            crc &= 0xFFFFFF;
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

// ---------------------------------------------------------------------------
// Core CRC functions
// ---------------------------------------------------------------------------

/// CRC-24 of the payload (every byte except the trailing 3 parity bytes).
///
/// This is the value a transmitter places in the parity field of an
/// ES/DF11(IID=0) frame.
pub fn parity(data: &[u8]) -> u32 {
    if data.len() <= 3 {
        return 0;
    }
    let mut crc = 0u32;
    for &byte in &data[..data.len() - 3] {
        crc = ((crc << 8) ^ CRC_TABLE[((crc >> 16) ^ byte as u32) as usize & 0xFF]) & 0xFFFFFF;
    }
    crc
}

/// Mode S CRC-24 residual: payload CRC XOR the trailing parity field.
///
/// - DF11(IID=0)/17/18: 0 when valid.
/// - DF0/4/5/16/20/21/24: the overlaid address.
/// - DF11 with an interrogator identifier: the IID in the low 7 bits.
pub fn crc24(data: &[u8]) -> u32 {
    if data.len() <= 3 {
        let mut val = 0u32;
        for &b in data {
            val = (val << 8) | b as u32;
        }
        return val & 0xFFFFFF;
    }

    let n = data.len() - 3;
    parity(data) ^ ((data[n] as u32) << 16 | (data[n + 1] as u32) << 8 | data[n + 2] as u32)
}

/// Overwrite the parity field so that `crc24(data) == overlay`.
///
/// `overlay` is 0 for ES frames and the address for address/parity formats.
pub fn set_parity(data: &mut [u8], overlay: u32) {
    if data.len() <= 3 {
        return;
    }
    let n = data.len() - 3;
    let p = parity(data) ^ (overlay & 0xFFFFFF);
    data[n] = (p >> 16) as u8;
    data[n + 1] = (p >> 8) as u8;
    data[n + 2] = p as u8;
}

// ---------------------------------------------------------------------------
// Syndrome tables for error correction
// ---------------------------------------------------------------------------

/// A correctable error pattern: up to three bit positions (0-indexed from the
/// first transmitted bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ErrorPattern {
    bits: [u8; MAX_CORRECTABLE_BITS],
    count: u8,
    ambiguous: bool,
}

impl ErrorPattern {
    fn positions(&self) -> &[u8] {
        &self.bits[..self.count as usize]
    }
}

/// Map from syndrome to the unique lowest-weight error pattern producing it.
pub struct SyndromeTable {
    n_bits: usize,
    entries: HashMap<u32, ErrorPattern>,
}

impl SyndromeTable {
    /// Build the table for `n_bits`-long frames covering every combination of
    /// up to `max_errors` flipped bits at positions `first_bit..n_bits`.
    ///
    /// Patterns are inserted in increasing weight. A collision with a lighter
    /// pattern keeps the lighter one; a collision with a pattern of the same
    /// weight marks the syndrome ambiguous and it is never used.
    fn build(n_bits: usize, first_bit: usize, max_errors: usize) -> Self {
        let n_bytes = n_bits / 8;

        // CRC is linear, so a multi-bit syndrome is the XOR of single-bit ones.
        let single: Vec<u32> = (0..n_bits)
            .map(|bit| {
                let mut msg = vec![0u8; n_bytes];
                msg[bit / 8] |= 1 << (7 - (bit % 8));
                crc24(&msg)
            })
            .collect();

        let mut entries: HashMap<u32, ErrorPattern> = HashMap::new();
        let mut insert = |syndrome: u32, positions: &[usize]| {
            let mut bits = [0u8; MAX_CORRECTABLE_BITS];
            for (slot, &p) in bits.iter_mut().zip(positions) {
                *slot = p as u8;
            }
            let count = positions.len() as u8;
            match entries.get_mut(&syndrome) {
                Some(existing) if existing.count == count => existing.ambiguous = true,
                Some(_) => {}
                None => {
                    entries.insert(
                        syndrome,
                        ErrorPattern {
                            bits,
                            count,
                            ambiguous: false,
                        },
                    );
                }
            }
        };

        for a in first_bit..n_bits {
            insert(single[a], &[a]);
        }
        if max_errors >= 2 {
            for a in first_bit..n_bits {
                for b in (a + 1)..n_bits {
                    insert(single[a] ^ single[b], &[a, b]);
                }
            }
        }
        if max_errors >= 3 {
            for a in first_bit..n_bits {
                for b in (a + 1)..n_bits {
                    let ab = single[a] ^ single[b];
                    for c in (b + 1)..n_bits {
                        insert(ab ^ single[c], &[a, b, c]);
                    }
                }
            }
        }

        SyndromeTable { n_bits, entries }
    }

    /// Number of distinct syndromes, including ambiguous ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of syndromes that map to more than one same-weight pattern.
    pub fn ambiguous_count(&self) -> usize {
        self.entries.values().filter(|e| e.ambiguous).count()
    }

    fn lookup(&self, syndrome: u32) -> Option<&ErrorPattern> {
        self.entries.get(&syndrome).filter(|e| !e.ambiguous)
    }
}

static SYNDROMES_112: LazyLock<SyndromeTable> =
    LazyLock::new(|| SyndromeTable::build(LONG_MSG_BITS, FIRST_NON_DF_BIT, MAX_CORRECTABLE_BITS));
static SYNDROMES_56: LazyLock<SyndromeTable> =
    LazyLock::new(|| SyndromeTable::build(SHORT_MSG_BITS, FIRST_NON_DF_BIT, MAX_CORRECTABLE_BITS));
static SYNDROMES_112_WITH_DF: LazyLock<SyndromeTable> =
    LazyLock::new(|| SyndromeTable::build(LONG_MSG_BITS, 0, MAX_CORRECTABLE_BITS));
static SYNDROMES_56_WITH_DF: LazyLock<SyndromeTable> =
    LazyLock::new(|| SyndromeTable::build(SHORT_MSG_BITS, 0, MAX_CORRECTABLE_BITS));

/// The syndrome table for a frame length, optionally covering the DF bits.
pub fn syndrome_table(n_bits: usize, include_df: bool) -> Option<&'static SyndromeTable> {
    match (n_bits, include_df) {
        (LONG_MSG_BITS, false) => Some(&SYNDROMES_112),
        (SHORT_MSG_BITS, false) => Some(&SYNDROMES_56),
        (LONG_MSG_BITS, true) => Some(&SYNDROMES_112_WITH_DF),
        (SHORT_MSG_BITS, true) => Some(&SYNDROMES_56_WITH_DF),
        _ => None,
    }
}

/// Correct up to `max_bits` bit errors in place, never touching the DF field.
///
/// `syndrome` is the difference between the observed residual and the
/// expected one (the plain residual for ES frames). Patterns heavier than the
/// budget are never applied, not even partially. Returns the number of bits
/// flipped.
///
/// A 4-bit or heavier error whose syndrome equals that of a unique lighter
/// pattern cannot be told apart from it and is "corrected" into a different
/// frame that passes CRC. On 112-bit frames with a 3-bit budget this happens
/// to roughly 1 in 4000 random 4-bit errors; the rest are reported as
/// uncorrectable.
pub fn fix_errors(data: &mut [u8], syndrome: u32, max_bits: usize) -> Option<usize> {
    fix_with_table(data, syndrome, max_bits, false)
}

/// As [`fix_errors`], but bits 0-4 (the Downlink Format) may also be flipped.
pub fn fix_errors_including_df(data: &mut [u8], syndrome: u32, max_bits: usize) -> Option<usize> {
    fix_with_table(data, syndrome, max_bits, true)
}

fn fix_with_table(data: &mut [u8], syndrome: u32, max_bits: usize, include_df: bool) -> Option<usize> {
    if syndrome == 0 || max_bits == 0 {
        return None;
    }
    let table = syndrome_table(data.len() * 8, include_df)?;
    let pattern = table.lookup(syndrome)?;
    if pattern.count as usize > max_bits || table.n_bits != data.len() * 8 {
        return None;
    }

    let before = crc24(data);
    for &bit in pattern.positions() {
        let bit = bit as usize;
        data[bit / 8] ^= 1 << (7 - (bit % 8));
    }

    if crc24(data) != before ^ syndrome {
        for &bit in pattern.positions() {
            let bit = bit as usize;
            data[bit / 8] ^= 1 << (7 - (bit % 8));
        }
        return None;
    }

    trace!(bits = ?pattern.positions(), "corrected bit errors");
    Some(pattern.count as usize)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hex_decode;

    const VALID_FRAMES: &[&str] = &[
        "8D4840D6202CC371C32CE0576098",
        "8D40621D58C382D690C8AC2863A7",
        "8D485020994409940838175B284F",
    ];

    fn flip(data: &mut [u8], bits: &[usize]) {
        for &bit in bits {
            data[bit / 8] ^= 1 << (7 - (bit % 8));
        }
    }

    #[test]
    fn test_crc_table_entry_zero() {
        assert_eq!(CRC_TABLE[0], 0);
        assert_ne!(CRC_TABLE[1], 0);
    }

    #[test]
    fn test_valid_df17_remainder_zero() {
        for hex in VALID_FRAMES {
            let data = hex_decode(hex).unwrap();
            assert_eq!(crc24(&data), 0, "CRC should be 0 for valid DF17: {hex}");
        }
    }

    #[test]
    fn test_parity_matches_trailing_bytes() {
        let data = hex_decode(VALID_FRAMES[0]).unwrap();
        let pi = (data[11] as u32) << 16 | (data[12] as u32) << 8 | data[13] as u32;
        assert_eq!(parity(&data), pi);
    }

    #[test]
    fn test_set_parity_overlays_address() {
        let mut data = vec![0x20, 0x00, 0x0C, 0x38, 0, 0, 0];
        set_parity(&mut data, 0x4840D6);
        assert_eq!(crc24(&data), 0x4840D6);
        set_parity(&mut data, 0);
        assert_eq!(crc24(&data), 0);
    }

    #[test]
    fn test_single_bit_error_corrected() {
        let clean = hex_decode(VALID_FRAMES[0]).unwrap();
        let mut data = clean.clone();
        flip(&mut data, &[47]);
        let syndrome = crc24(&data);
        assert_ne!(syndrome, 0);

        assert_eq!(fix_errors(&mut data, syndrome, 1), Some(1));
        assert_eq!(data, clean);
    }

    #[test]
    fn test_three_bit_errors_corrected() {
        let clean = hex_decode(VALID_FRAMES[1]).unwrap();
        for pattern in [[10, 50, 90], [40, 41, 42], [6, 60, 100], [33, 34, 88]] {
            let mut data = clean.clone();
            flip(&mut data, &pattern);
            let syndrome = crc24(&data);
            assert_eq!(
                fix_errors(&mut data, syndrome, 3),
                Some(3),
                "pattern {pattern:?} should be correctable"
            );
            assert_eq!(data, clean);
        }
    }

    #[test]
    fn test_four_bit_errors_rejected() {
        let clean = hex_decode(VALID_FRAMES[2]).unwrap();
        for pattern in [[10, 30, 50, 70], [20, 40, 60, 80], [8, 9, 10, 11], [12, 44, 77, 101]] {
            let mut data = clean.clone();
            flip(&mut data, &pattern);
            let corrupted = data.clone();
            let syndrome = crc24(&data);
            assert_eq!(fix_errors(&mut data, syndrome, 3), None, "pattern {pattern:?}");
            assert_eq!(data, corrupted, "rejected fix must not modify the frame");
        }
    }

    #[test]
    fn test_budget_is_respected() {
        let clean = hex_decode(VALID_FRAMES[0]).unwrap();
        let mut data = clean.clone();
        flip(&mut data, &[40, 41, 42]);
        let corrupted = data.clone();
        let syndrome = crc24(&data);

        assert_eq!(fix_errors(&mut data, syndrome, 2), None);
        assert_eq!(data, corrupted);
        assert_eq!(fix_errors(&mut data, syndrome, 3), Some(3));
        assert_eq!(data, clean);
    }

    #[test]
    fn test_df_field_protection() {
        let clean = hex_decode(VALID_FRAMES[0]).unwrap();
        let mut data = clean.clone();
        flip(&mut data, &[0]);
        let syndrome = crc24(&data);

        assert_eq!(fix_errors(&mut data, syndrome, 1), None);
        assert_eq!(fix_errors_including_df(&mut data, syndrome, 1), Some(1));
        assert_eq!(data, clean);
    }

    #[test]
    fn test_zero_budget_or_syndrome_does_nothing() {
        let mut data = hex_decode(VALID_FRAMES[0]).unwrap();
        assert_eq!(fix_errors(&mut data, 0, 3), None);
        flip(&mut data, &[50]);
        let syndrome = crc24(&data);
        assert_eq!(fix_errors(&mut data, syndrome, 0), None);
    }

    #[test]
    fn test_short_frame_single_bit() {
        // DF11, CA=5, address 4840D6, IID 0
        let mut data = vec![0x5D, 0x48, 0x40, 0xD6, 0, 0, 0];
        set_parity(&mut data, 0);
        let clean = data.clone();
        flip(&mut data, &[20]);
        let syndrome = crc24(&data);
        assert_eq!(fix_errors(&mut data, syndrome, 1), Some(1));
        assert_eq!(data, clean);
    }

    /// Seeded xorshift64 so the random patterns are reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }

        /// `count` distinct bit positions outside the DF field.
        fn positions(&mut self, count: usize) -> Vec<usize> {
            let mut out = Vec::with_capacity(count);
            while out.len() < count {
                let p = FIRST_NON_DF_BIT + self.below(LONG_MSG_BITS - FIRST_NON_DF_BIT);
                if !out.contains(&p) {
                    out.push(p);
                }
            }
            out
        }
    }

    #[test]
    fn test_random_light_errors_round_trip() {
        let clean = hex_decode(VALID_FRAMES[0]).unwrap();
        let table = syndrome_table(LONG_MSG_BITS, false).unwrap();
        let mut rng = XorShift(0x9E3779B97F4A7C15);
        let mut corrected = 0;

        for _ in 0..5000 {
            let weight = 1 + rng.below(MAX_CORRECTABLE_BITS);
            let pattern = rng.positions(weight);
            let mut data = clean.clone();
            flip(&mut data, &pattern);
            let corrupted = data.clone();
            let syndrome = crc24(&data);

            match fix_errors(&mut data, syndrome, MAX_CORRECTABLE_BITS) {
                Some(bits) => {
                    assert_eq!(bits, weight, "pattern {pattern:?}");
                    assert_eq!(data, clean, "pattern {pattern:?}");
                    corrected += 1;
                }
                None => {
                    // Only same-weight collisions may refuse a light error
                    assert!(table.entries[&syndrome].ambiguous, "pattern {pattern:?}");
                    assert_eq!(data, corrupted);
                }
            }
        }
        assert!(corrected > 4900, "corrected {corrected}/5000");
    }

    #[test]
    fn test_random_four_bit_errors_rarely_miscorrected() {
        let clean = hex_decode(VALID_FRAMES[0]).unwrap();
        let mut rng = XorShift(0xD1B54A32D192ED03);
        let mut miscorrected = 0;

        for _ in 0..20_000 {
            let pattern = rng.positions(4);
            let mut data = clean.clone();
            flip(&mut data, &pattern);
            let corrupted = data.clone();
            let syndrome = crc24(&data);

            match fix_errors(&mut data, syndrome, MAX_CORRECTABLE_BITS) {
                Some(bits) => {
                    assert!(bits <= MAX_CORRECTABLE_BITS);
                    assert_ne!(data, clean);
                    assert_eq!(crc24(&data), 0);
                    miscorrected += 1;
                }
                None => assert_eq!(data, corrupted),
            }
        }
        // At most 0.1%
        assert!(miscorrected <= 20, "miscorrected {miscorrected}/20000");
    }

    #[test]
    fn test_syndrome_tables_built() {
        let long = syndrome_table(112, false).unwrap();
        let short = syndrome_table(56, false).unwrap();
        assert!(long.len() > 190_000);
        assert!(!short.is_empty());
        assert!(long.ambiguous_count() > 0);
        assert!(syndrome_table(64, false).is_none());
    }
}
