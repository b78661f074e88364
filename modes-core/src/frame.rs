//! Structure-level parsing of raw Mode S frames.
//!
//! Responsibilities:
//! - Classify Downlink Format (DF) from the first 5 bits
//! - Reject unknown DFs and length mismatches
//! - Slice the Annex 10 fields for each DF
//! - Track addresses recently seen in CRC-checked replies, so that addresses
//!   recovered from address/parity overlays can be validated

use std::collections::HashMap;

use crate::message::AnnexFields;
use crate::types::{df_info, downlink_format, hex_decode, Address, DecodeError, Result};

// ---------------------------------------------------------------------------
// Bit slicing
// ---------------------------------------------------------------------------

/// Read bit `n` (1-indexed, Annex 10 numbering) from `data`.
/// Bits past the end read as 0.
pub fn getbit(data: &[u8], n: usize) -> u32 {
    if n == 0 {
        return 0;
    }
    let i = n - 1;
    data.get(i / 8)
        .map(|b| ((b >> (7 - (i % 8))) & 1) as u32)
        .unwrap_or(0)
}

/// Read bits `first..=last` (1-indexed, inclusive) as an unsigned integer.
/// At most 32 bits can be read at once.
pub fn getbits(data: &[u8], first: usize, last: usize) -> u32 {
    debug_assert!(last >= first && last - first < 32);
    let mut value = 0u32;
    for n in first..=last {
        value = (value << 1) | getbit(data, n);
    }
    value
}

// ---------------------------------------------------------------------------
// Address cache
// ---------------------------------------------------------------------------

/// Time-windowed cache of validated addresses.
///
/// Addresses are registered when seen in DF11/17/18 frames whose CRC checked
/// out. For DF0/4/5/16/20/21/24 the address is recovered from the CRC residual,
/// so noise produces fake addresses; the cache rejects recovered addresses
/// not recently seen in a validated frame.
pub struct IcaoCache {
    ttl: f64,
    cache: HashMap<Address, f64>,
}

impl IcaoCache {
    pub fn new(ttl: f64) -> Self {
        IcaoCache {
            ttl,
            cache: HashMap::new(),
        }
    }

    /// Register a validated address.
    pub fn register(&mut self, address: Address, timestamp: f64) {
        self.cache.insert(address, timestamp);
    }

    /// Check if an address was recently seen in a validated frame.
    pub fn is_known(&mut self, address: &Address, timestamp: f64) -> bool {
        if let Some(&last_seen) = self.cache.get(address) {
            if timestamp - last_seen <= self.ttl {
                return true;
            }
            self.cache.remove(address);
        }
        false
    }

    /// Remove expired entries.
    pub fn prune(&mut self, now: f64) {
        let ttl = self.ttl;
        self.cache.retain(|_, &mut last_seen| now - last_seen <= ttl);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for IcaoCache {
    fn default() -> Self {
        IcaoCache::new(60.0)
    }
}

// ---------------------------------------------------------------------------
// ModeFrame
// ---------------------------------------------------------------------------

/// A structurally valid Mode S frame: known DF, correct length.
/// CRC has not been looked at yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeFrame {
    /// Downlink Format, with 24..=31 reported as 24.
    pub df: u8,
    pub bytes: Vec<u8>,
}

impl ModeFrame {
    /// Validate DF and length of a raw buffer.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        let first = *bytes.first().ok_or(DecodeError::InvalidLength {
            expected: 56,
            actual: 0,
        })?;
        let df = downlink_format(first);
        let info = df_info(df).ok_or(DecodeError::UnknownDf(df))?;
        if bytes.len() * 8 != info.bits {
            return Err(DecodeError::InvalidLength {
                expected: info.bits,
                actual: bytes.len() * 8,
            });
        }
        Ok(ModeFrame { df, bytes })
    }

    /// Parse a hex string (14 or 28 characters).
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex_decode(hex).ok_or_else(|| DecodeError::InvalidHex(hex.to_string()))?;
        ModeFrame::new(bytes)
    }

    /// Message length in bits (56 or 112).
    pub fn bits(&self) -> usize {
        self.bytes.len() * 8
    }

    pub fn is_long(&self) -> bool {
        self.bits() == 112
    }

    pub fn getbits(&self, first: usize, last: usize) -> u32 {
        getbits(&self.bytes, first, last)
    }

    /// Message Extended / Comm-B payload (bits 33-88) of a long frame.
    pub fn payload56(&self) -> Option<[u8; 7]> {
        if !self.is_long() {
            return None;
        }
        let mut out = [0u8; 7];
        out.copy_from_slice(&self.bytes[4..11]);
        Some(out)
    }

    /// ADS-B type code (first 5 bits of ME) for DF17/18.
    pub fn type_code(&self) -> Option<u8> {
        if !matches!(self.df, 17 | 18) {
            return None;
        }
        Some((self.bytes[4] >> 3) & 0x1F)
    }

    /// Slice the Annex 10 fields this DF carries.
    pub fn fields(&self) -> AnnexFields {
        let mut f = AnnexFields::default();
        match self.df {
            0 => {
                f.vs = Some(self.getbits(6, 6) as u8);
                f.cc = Some(self.getbits(7, 7) as u8);
                f.sl = Some(self.getbits(9, 11) as u8);
                f.ri = Some(self.getbits(14, 17) as u8);
                f.ac = Some(self.getbits(20, 32) as u16);
            }
            4 | 20 => {
                f.fs = Some(self.getbits(6, 8) as u8);
                f.dr = Some(self.getbits(9, 13) as u8);
                f.um = Some(self.getbits(14, 19) as u8);
                f.ac = Some(self.getbits(20, 32) as u16);
                if self.df == 20 {
                    f.mb = self.payload56();
                }
            }
            5 | 21 => {
                f.fs = Some(self.getbits(6, 8) as u8);
                f.dr = Some(self.getbits(9, 13) as u8);
                f.um = Some(self.getbits(14, 19) as u8);
                f.id = Some(self.getbits(20, 32) as u16);
                if self.df == 21 {
                    f.mb = self.payload56();
                }
            }
            11 => {
                f.ca = Some(self.getbits(6, 8) as u8);
                f.aa = Some(self.getbits(9, 32));
            }
            16 => {
                f.vs = Some(self.getbits(6, 6) as u8);
                f.sl = Some(self.getbits(7, 9) as u8);
                f.ri = Some(self.getbits(14, 17) as u8);
                f.ac = Some(self.getbits(20, 32) as u16);
                f.mv = self.payload56();
            }
            17 => {
                f.ca = Some(self.getbits(6, 8) as u8);
                f.aa = Some(self.getbits(9, 32));
                f.me = self.payload56();
            }
            18 => {
                f.cf = Some(self.getbits(6, 8) as u8);
                f.aa = Some(self.getbits(9, 32));
                f.me = self.payload56();
            }
            24 => {
                f.ke = Some(self.getbits(4, 4) as u8);
                f.nd = Some(self.getbits(5, 8) as u8);
                let mut md = [0u8; 10];
                for (i, byte) in md.iter_mut().enumerate() {
                    *byte = self.getbits(9 + i * 8, 16 + i * 8) as u8;
                }
                f.md = Some(md);
            }
            _ => {}
        }
        f
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
