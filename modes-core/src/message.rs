//! The decoded-message aggregate and the typed field bundles it carries.
//!
//! Every optional field is an `Option`: a decoder sets what the frame
//! actually contained and leaves everything else `None`.

use std::fmt;

use bitflags::bitflags;
use serde::{Serialize, Serializer};

use crate::types::{Address, AddressType, DataSource};

// ---------------------------------------------------------------------------
// Reception metadata
// ---------------------------------------------------------------------------

/// Reception metadata supplied by the demodulator (or network ingest).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RxMeta {
    /// Radio clock, 12 MHz ticks.
    pub timestamp: u64,
    /// Wall-clock seconds.
    pub sys_time: f64,
    /// Signal level, 0..=1.
    pub signal: f64,
}

impl RxMeta {
    pub fn at(sys_time: f64) -> Self {
        RxMeta {
            timestamp: 0,
            sys_time,
            signal: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AltitudeUnit {
    Feet,
    Meters,
}

/// An altitude with the unit it was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Altitude {
    pub value: i32,
    pub unit: AltitudeUnit,
}

impl Altitude {
    pub fn feet(value: i32) -> Self {
        Altitude {
            value,
            unit: AltitudeUnit::Feet,
        }
    }

    pub fn meters(value: i32) -> Self {
        Altitude {
            value,
            unit: AltitudeUnit::Meters,
        }
    }

    /// Value converted to feet.
    pub fn in_feet(&self) -> i32 {
        match self.unit {
            AltitudeUnit::Feet => self.value,
            AltitudeUnit::Meters => (self.value as f64 / 0.3048).round() as i32,
        }
    }
}

/// What an angle in a message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingType {
    GroundTrack,
    TrueHeading,
    MagneticHeading,
    /// Magnetic or true, resolved via the HRD bit of operational status.
    MagneticOrTrue,
    /// Ground track or heading, resolved via the TAH bit of operational status.
    TrackOrHeading,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Heading {
    pub degrees: f32,
    pub kind: HeadingType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirGround {
    Ground,
    Airborne,
    /// Either airborne or on the ground.
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CprType {
    Surface,
    Airborne,
    Coarse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SilType {
    Unknown,
    PerHour,
    PerSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Emergency {
    None,
    General,
    Lifeguard,
    MinFuel,
    NoComm,
    Unlawful,
    Downed,
    Reserved,
}

impl Emergency {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Emergency::None,
            1 => Emergency::General,
            2 => Emergency::Lifeguard,
            3 => Emergency::MinFuel,
            4 => Emergency::NoComm,
            5 => Emergency::Unlawful,
            6 => Emergency::Downed,
            _ => Emergency::Reserved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavAltitudeSource {
    Unknown,
    Aircraft,
    Mcp,
    Fms,
}

/// Which BDS register a Comm-B reply was inferred to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommBFormat {
    /// No register predicate matched.
    NotDecoded,
    /// MB field was all zero.
    EmptyResponse,
    /// More than one register predicate matched.
    Ambiguous,
    /// BDS1,0
    DatalinkCaps,
    /// BDS1,7
    GicbCaps,
    /// BDS2,0
    AircraftIdent,
    /// BDS3,0
    AcasRa,
    /// BDS4,0
    VerticalIntent,
    /// BDS4,4
    Mrar,
    /// BDS5,0
    TrackTurn,
    /// BDS6,0
    HeadingSpeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MrarSource {
    Invalid,
    Ins,
    Gnss,
    DmeDme,
    VorDme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardLevel {
    Nil,
    Light,
    Moderate,
    Severe,
}

impl HazardLevel {
    pub fn from_code(code: u8) -> Self {
        match code & 0x03 {
            0 => HazardLevel::Nil,
            1 => HazardLevel::Light,
            2 => HazardLevel::Moderate,
            _ => HazardLevel::Severe,
        }
    }
}

bitflags! {
    /// Autopilot / navigation modes announced in BDS4,0 and ES type 29.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    #[serde(transparent)]
    pub struct NavModes: u8 {
        const AUTOPILOT = 1 << 0;
        const VNAV = 1 << 1;
        const ALT_HOLD = 1 << 2;
        const APPROACH = 1 << 3;
        const LNAV = 1 << 4;
        const TCAS = 1 << 5;
    }
}

bitflags! {
    /// Capability class bits from ES operational status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    #[serde(transparent)]
    pub struct Capabilities: u16 {
        const ACAS = 1 << 0;
        const CDTI = 1 << 1;
        const ES_1090_IN = 1 << 2;
        const ARV = 1 << 3;
        const TS = 1 << 4;
        const TC = 1 << 5;
        const UAT_IN = 1 << 6;
        const POA = 1 << 7;
        const B2_LOW = 1 << 8;
        const LW_VALID = 1 << 9;
    }
}

bitflags! {
    /// Operational mode bits from ES operational status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
    #[serde(transparent)]
    pub struct OperationalModes: u8 {
        const ACAS_RA_ACTIVE = 1 << 0;
        const IDENT_ACTIVE = 1 << 1;
        const ATC_SERVICES = 1 << 2;
        const SINGLE_ANTENNA = 1 << 3;
    }
}

// ---------------------------------------------------------------------------
// Small value types
// ---------------------------------------------------------------------------

/// A 4-digit octal Mode A code, stored with one octal digit per nibble
/// (7700 is `0x7700`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Squawk(pub u16);

impl Squawk {
    /// Build from the four octal digits.
    pub fn from_digits(a: u8, b: u8, c: u8, d: u8) -> Self {
        Squawk(((a as u16 & 7) << 12) | ((b as u16 & 7) << 8) | ((c as u16 & 7) << 4) | (d as u16 & 7))
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self.0, 0x7500 | 0x7600 | 0x7700)
    }
}

impl fmt::Display for Squawk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl Serialize for Squawk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Emitter category, `0xA3` meaning set A category 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Category(pub u8);

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Ground speed under the two surface-movement interpretations.
/// Airborne velocity messages set both to the same value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroundSpeed {
    pub v0: f32,
    pub v2: f32,
}

impl GroundSpeed {
    pub fn both(kt: f32) -> Self {
        GroundSpeed { v0: kt, v2: kt }
    }

    /// The interpretation matching an ADS-B version.
    pub fn for_version(&self, version: u8) -> f32 {
        if version >= 2 {
            self.v2
        } else {
            self.v0
        }
    }
}

/// Raw CPR-encoded position as carried by a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CprFrame {
    pub lat: u32,
    pub lon: u32,
    pub odd: bool,
    pub kind: CprType,
    /// Navigation uncertainty category derived from the ES type.
    pub nucp: u8,
}

// ---------------------------------------------------------------------------
// Field bundles
// ---------------------------------------------------------------------------

/// Raw Annex 10 fields, present according to the Downlink Format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnexFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aa: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cf: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dr: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iid: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ke: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nd: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ri: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub um: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vs: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mb: Option<[u8; 7]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md: Option<[u8; 10]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub me: Option<[u8; 7]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mv: Option<[u8; 7]>,
}

/// Accuracy and integrity indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Accuracy {
    pub nic_a: Option<bool>,
    pub nic_b: Option<bool>,
    pub nic_c: Option<bool>,
    pub nic_baro: Option<bool>,
    pub nac_p: Option<u8>,
    pub nac_v: Option<u8>,
    pub sil: Option<u8>,
    pub sil_type: Option<SilType>,
    pub gva: Option<u8>,
    pub sda: Option<u8>,
}

impl Accuracy {
    pub fn is_empty(&self) -> bool {
        *self == Accuracy::default()
    }
}

/// ES type 31 operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpStatus {
    pub version: u8,
    pub capabilities: Capabilities,
    pub modes: OperationalModes,
    /// Horizontal reference direction: what "heading" means.
    pub hrd: HeadingType,
    /// Track angle / heading: what a surface angle means.
    pub tah: HeadingType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_width: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antenna_offset: Option<u8>,
}

/// Selected navigation state (BDS4,0, ES type 29).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NavState {
    pub selected_heading: Option<f32>,
    pub mcp_altitude: Option<i32>,
    pub fms_altitude: Option<i32>,
    pub qnh: Option<f32>,
    pub modes: Option<NavModes>,
    pub altitude_source: Option<NavAltitudeSource>,
}

impl NavState {
    pub fn is_empty(&self) -> bool {
        *self == NavState::default()
    }
}

/// Meteorological routine air report (BDS4,4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Mrar {
    pub source: Option<MrarSource>,
    pub wind_speed: Option<f32>,
    pub wind_dir: Option<f32>,
    pub temperature: Option<f32>,
    pub pressure: Option<f32>,
    pub turbulence: Option<HazardLevel>,
    pub humidity: Option<f32>,
}

// ---------------------------------------------------------------------------
// DecodedMessage
// ---------------------------------------------------------------------------

/// One fully decoded Mode S or Mode A/C reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    /// Message bytes after any correction.
    #[serde(serialize_with = "serialize_hex")]
    pub bytes: Vec<u8>,
    /// Bytes exactly as received.
    #[serde(serialize_with = "serialize_hex")]
    pub verbatim: Vec<u8>,
    pub bits: usize,
    pub df: u8,
    /// CRC residual after correction.
    pub crc: u32,
    pub corrected_bits: usize,
    pub address: Address,
    pub addrtype: AddressType,
    pub timestamp: u64,
    pub sys_time: f64,
    pub signal: f64,
    pub source: DataSource,
    pub fields: AnnexFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metype: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesub: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commb_format: Option<CommBFormat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub baro_alt: Option<Altitude>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geom_alt: Option<Altitude>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geom_delta: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<Heading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gs: Option<GroundSpeed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ias: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tas: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mach: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baro_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geom_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squawk: Option<Squawk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency: Option<Emergency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spi: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airground: Option<AirGround>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpr: Option<CprFrame>,
    #[serde(skip_serializing_if = "Accuracy::is_empty")]
    pub accuracy: Accuracy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opstatus: Option<OpStatus>,
    #[serde(skip_serializing_if = "NavState::is_empty")]
    pub nav: NavState,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_opt_hex")]
    pub acas_ra: Option<[u8; 7]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrar: Option<Mrar>,
}

impl DecodedMessage {
    /// An empty message around `bytes` with nothing decoded yet.
    pub fn new(bytes: Vec<u8>, meta: RxMeta) -> Self {
        DecodedMessage {
            bits: bytes.len() * 8,
            verbatim: bytes.clone(),
            bytes,
            df: 0,
            crc: 0,
            corrected_bits: 0,
            address: Address::icao(0),
            addrtype: AddressType::Unknown,
            timestamp: meta.timestamp,
            sys_time: meta.sys_time,
            signal: meta.signal,
            source: DataSource::Invalid,
            fields: AnnexFields::default(),
            metype: None,
            mesub: None,
            commb_format: None,
            baro_alt: None,
            geom_alt: None,
            geom_delta: None,
            heading: None,
            track_rate: None,
            roll: None,
            gs: None,
            ias: None,
            tas: None,
            mach: None,
            baro_rate: None,
            geom_rate: None,
            squawk: None,
            callsign: None,
            category: None,
            emergency: None,
            spi: None,
            alert: None,
            airground: None,
            cpr: None,
            accuracy: Accuracy::default(),
            opstatus: None,
            nav: NavState::default(),
            acas_ra: None,
            mrar: None,
        }
    }

    pub fn hex(&self) -> String {
        crate::types::hex_encode(&self.bytes)
    }

    /// True for DF17/18 extended squitters.
    pub fn is_extended_squitter(&self) -> bool {
        matches!(self.df, 17 | 18)
    }
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&crate::types::hex_encode(bytes))
}

fn serialize_opt_hex<S: Serializer>(bytes: &Option<[u8; 7]>, serializer: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => serializer.serialize_str(&crate::types::hex_encode(b)),
        None => serializer.serialize_none(),
    }
}
