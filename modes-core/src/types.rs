//! Shared types: error enums, Downlink Format table, addresses, provenance
//! orderings, and hex/charset helpers.

use std::cmp::Ordering;
use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors produced while turning a candidate buffer into a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("invalid frame length: expected {expected} bits, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("unrecognized downlink format: {0}")]
    UnknownDf(u8),
    #[error("DF24 (Comm-D) decoding is disabled")]
    Df24Disabled,
    #[error("CRC validation failed (syndrome {syndrome:06X})")]
    CrcFailed { syndrome: u32 },
    #[error("address {0} recovered from parity is not a known aircraft")]
    UnknownAddress(Address),
}

/// Errors from reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, DecodeError>;

// ---------------------------------------------------------------------------
// Downlink Format metadata
// ---------------------------------------------------------------------------

/// Metadata for a Downlink Format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfInfo {
    pub name: &'static str,
    pub bits: usize,
}

pub const SHORT_MSG_BITS: usize = 56;
pub const LONG_MSG_BITS: usize = 112;

/// Known Downlink Format table. DF24..31 all collapse onto DF24.
pub const DF_TABLE: &[(u8, DfInfo)] = &[
    (
        0,
        DfInfo {
            name: "Short air-air surveillance",
            bits: SHORT_MSG_BITS,
        },
    ),
    (
        4,
        DfInfo {
            name: "Surveillance altitude reply",
            bits: SHORT_MSG_BITS,
        },
    ),
    (
        5,
        DfInfo {
            name: "Surveillance identity reply",
            bits: SHORT_MSG_BITS,
        },
    ),
    (
        11,
        DfInfo {
            name: "All-call reply",
            bits: SHORT_MSG_BITS,
        },
    ),
    (
        16,
        DfInfo {
            name: "Long air-air surveillance",
            bits: LONG_MSG_BITS,
        },
    ),
    (
        17,
        DfInfo {
            name: "ADS-B extended squitter",
            bits: LONG_MSG_BITS,
        },
    ),
    (
        18,
        DfInfo {
            name: "TIS-B / ADS-R / non-transponder squitter",
            bits: LONG_MSG_BITS,
        },
    ),
    (
        20,
        DfInfo {
            name: "Comm-B altitude reply",
            bits: LONG_MSG_BITS,
        },
    ),
    (
        21,
        DfInfo {
            name: "Comm-B identity reply",
            bits: LONG_MSG_BITS,
        },
    ),
    (
        24,
        DfInfo {
            name: "Comm-D extended length message",
            bits: LONG_MSG_BITS,
        },
    ),
];

/// Extract the Downlink Format from the first byte. Everything from 24 up is
/// the Comm-D family and reported as 24.
pub fn downlink_format(first_byte: u8) -> u8 {
    let df = (first_byte >> 3) & 0x1F;
    if df >= 24 {
        24
    } else {
        df
    }
}

/// Look up DF metadata. Returns `None` for unrecognized DFs.
pub fn df_info(df: u8) -> Option<&'static DfInfo> {
    DF_TABLE
        .iter()
        .find(|(d, _)| *d == df)
        .map(|(_, info)| info)
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// Marker bit set on addresses that are not ICAO 24-bit addresses
/// (TIS-B track files, anonymous ADS-B, Mode A pseudo-addresses).
pub const NON_ICAO_ADDRESS: u32 = 1 << 24;

/// A 24-bit announced address plus the non-ICAO marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u32);

impl Address {
    pub const fn new(value: u32) -> Self {
        Address(value & (NON_ICAO_ADDRESS | 0xFFFFFF))
    }

    pub const fn icao(icao: u32) -> Self {
        Address(icao & 0xFFFFFF)
    }

    pub const fn non_icao(value: u32) -> Self {
        Address((value & 0xFFFFFF) | NON_ICAO_ADDRESS)
    }

    pub const fn value(&self) -> u32 {
        self.0
    }

    /// The 24 address bits without the marker.
    pub const fn bits(&self) -> u32 {
        self.0 & 0xFFFFFF
    }

    pub const fn is_icao(&self) -> bool {
        self.0 & NON_ICAO_ADDRESS == 0
    }

    pub fn to_non_icao(self) -> Self {
        Address::non_icao(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_icao() {
            write!(f, "{:06X}", self.bits())
        } else {
            write!(f, "~{:06X}", self.bits())
        }
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Provenance orderings
// ---------------------------------------------------------------------------

/// Where a piece of data came from, used to arbitrate between sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Data is not valid.
    Invalid,
    /// Legacy Mode A/C reply.
    ModeAc,
    /// Derived from multilateration.
    Mlat,
    /// Mode S reply whose CRC could not be fully checked.
    ModeS,
    /// Mode S reply with a full CRC check.
    ModeSChecked,
    /// TIS-B extended squitter.
    Tisb,
    /// ADS-R extended squitter.
    Adsr,
    /// ADS-B extended squitter.
    Adsb,
}

impl DataSource {
    /// Trust rank; higher wins.
    pub const fn priority(self) -> u8 {
        match self {
            DataSource::Invalid => 0,
            DataSource::ModeAc => 1,
            DataSource::Mlat => 2,
            DataSource::ModeS => 3,
            DataSource::ModeSChecked => 4,
            DataSource::Tisb => 5,
            DataSource::Adsr => 6,
            DataSource::Adsb => 7,
        }
    }
}

impl Ord for DataSource {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl PartialOrd for DataSource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What sort of address this is and who sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    /// Mode S or ADS-B, ICAO address, transponder sourced.
    AdsbIcao,
    /// ADS-B, ICAO address, non-transponder.
    AdsbIcaoNt,
    /// ADS-R, ICAO address.
    AdsrIcao,
    /// TIS-B, ICAO address.
    TisbIcao,
    /// ADS-B, other address format.
    AdsbOther,
    /// ADS-R, other address format.
    AdsrOther,
    /// TIS-B, Mode A code plus track file number.
    TisbTrackfile,
    /// TIS-B, other address format.
    TisbOther,
    /// Legacy Mode A.
    ModeA,
    Unknown,
}

impl AddressType {
    /// Trust rank; higher wins.
    pub const fn priority(self) -> u8 {
        match self {
            AddressType::AdsbIcao => 9,
            AddressType::AdsbIcaoNt => 8,
            AddressType::AdsrIcao => 7,
            AddressType::TisbIcao => 6,
            AddressType::AdsbOther => 5,
            AddressType::AdsrOther => 4,
            AddressType::TisbTrackfile => 3,
            AddressType::TisbOther => 2,
            AddressType::ModeA => 1,
            AddressType::Unknown => 0,
        }
    }
}

impl Ord for AddressType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl PartialOrd for AddressType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Hex utilities
// ---------------------------------------------------------------------------

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if !hex.len().is_multiple_of(2) {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        bytes.push((high << 4) | low);
    }
    Some(bytes)
}

/// Encode bytes as uppercase hex string.
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Callsign character set
// ---------------------------------------------------------------------------

/// 6-bit character set shared by ES identification and BDS2,0.
/// `#` marks codes that are not valid characters.
pub const CALLSIGN_CHARSET: &[u8; 64] =
    b"#ABCDEFGHIJKLMNOPQRSTUVWXYZ##### ###############0123456789######";

/// Decode eight 6-bit characters starting at 1-indexed `first_bit` of `data`.
/// Returns `None` if any character is outside the valid set.
pub fn decode_callsign(data: &[u8], first_bit: usize) -> Option<String> {
    let mut callsign = String::with_capacity(8);
    for i in 0..8 {
        let start = first_bit + i * 6;
        let idx = crate::frame::getbits(data, start, start + 5) as usize;
        let c = CALLSIGN_CHARSET[idx];
        if c == b'#' {
            return None;
        }
        callsign.push(c as char);
    }
    Some(callsign)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
