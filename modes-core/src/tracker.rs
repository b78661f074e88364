//! Per-aircraft state with per-field source arbitration and CPR pairing.
//!
//! Pure logic, no I/O. Every field is a [`Tracked`] value remembering which
//! [`DataSource`] wrote it and when it goes stale and expires:
//! - a newer message from a source of equal or higher priority overwrites;
//! - a lower-priority source may only overwrite a stale value;
//! - messages older than the stored update never overwrite;
//! - expired values read as absent.
//!
//! Positions are resolved from the even/odd CPR slots, globally when a pair
//! is available and otherwise relative to the track's own position or the
//! receiver.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::config::{ReceiverConfig, TrackingConfig};
use crate::cpr::{self, CprError, CprPair, METERS_PER_NM};
use crate::message::{
    AirGround, Category, CprFrame, CprType, DecodedMessage, Emergency, GroundSpeed, Heading,
    HeadingType, Mrar, NavAltitudeSource, NavModes, OpStatus, SilType, Squawk,
};
use crate::types::{hex_encode, Address, AddressType, DataSource};

/// Number of signal samples kept per aircraft.
const SIGNAL_HISTORY: usize = 8;

/// Relative decodes against the track's own position must land this close.
const TRACK_REFERENCE_LIMIT_NM: f64 = 50.0;

/// Surface pairs use the short window above this ground speed.
const SURFACE_FAST_KT: f32 = 25.0;

// ---------------------------------------------------------------------------
// Tracked values
// ---------------------------------------------------------------------------

/// Stale and expiry windows applied on update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Windows {
    pub stale: f64,
    pub expire: f64,
}

/// A field value with its provenance and validity.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    value: Option<T>,
    source: DataSource,
    updated: f64,
    stale_at: f64,
    expires_at: f64,
}

impl<T> Default for Tracked<T> {
    fn default() -> Self {
        Tracked {
            value: None,
            source: DataSource::Invalid,
            updated: 0.0,
            stale_at: 0.0,
            expires_at: 0.0,
        }
    }
}

impl<T> Tracked<T> {
    /// The value, unless it has expired by `now`.
    pub fn get(&self, now: f64) -> Option<&T> {
        if now > self.expires_at {
            return None;
        }
        self.value.as_ref()
    }

    pub fn is_valid(&self, now: f64) -> bool {
        self.get(now).is_some()
    }

    pub fn is_stale(&self, now: f64) -> bool {
        now > self.stale_at
    }

    pub fn source(&self) -> DataSource {
        self.source
    }

    /// Time of the last accepted update.
    pub fn updated(&self) -> f64 {
        self.updated
    }

    /// Whether a message from `source` at time `at` may overwrite this value.
    pub fn accepts(&self, source: DataSource, at: f64) -> bool {
        if source == DataSource::Invalid {
            return false;
        }
        if self.value.is_none() {
            return true;
        }
        if at < self.updated {
            return false;
        }
        source >= self.source || self.is_stale(at) || !self.is_valid(at)
    }

    /// Apply the accept rule and store `value` if it passes.
    pub fn update(&mut self, value: T, source: DataSource, at: f64, windows: Windows) -> bool {
        if !self.accepts(source, at) {
            return false;
        }
        self.value = Some(value);
        self.source = source;
        self.updated = at;
        self.stale_at = at + windows.stale;
        self.expires_at = at + windows.expire;
        true
    }
}

/// Update `field` from an optional message value.
fn update_opt<T>(field: &mut Tracked<T>, value: Option<T>, source: DataSource, at: f64, w: Windows) {
    if let Some(value) = value {
        field.update(value, source, at, w);
    }
}

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

/// A resolved position with its integrity figures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub nic: u8,
    /// Containment radius, metres.
    pub rc: u32,
}

/// Everything known about one address.
#[derive(Debug, Clone)]
pub struct Aircraft {
    pub address: Address,
    pub addrtype: Tracked<AddressType>,
    pub adsb_version: Tracked<u8>,

    pub callsign: Tracked<String>,
    pub squawk: Tracked<Squawk>,
    pub category: Tracked<Category>,
    pub emergency: Tracked<Emergency>,

    pub baro_alt: Tracked<i32>,
    pub geom_alt: Tracked<i32>,
    pub geom_delta: Tracked<i32>,
    pub baro_rate: Tracked<i32>,
    pub geom_rate: Tracked<i32>,

    pub gs: Tracked<GroundSpeed>,
    pub ias: Tracked<u32>,
    pub tas: Tracked<u32>,
    pub mach: Tracked<f32>,
    pub track: Tracked<f32>,
    pub true_heading: Tracked<f32>,
    pub mag_heading: Tracked<f32>,
    pub track_rate: Tracked<f32>,
    pub roll: Tracked<f32>,

    pub airground: Tracked<AirGround>,
    pub spi: Tracked<bool>,
    pub alert: Tracked<bool>,

    pub nic_a: Tracked<bool>,
    pub nic_b: Tracked<bool>,
    pub nic_c: Tracked<bool>,
    pub nic_baro: Tracked<bool>,
    pub nac_p: Tracked<u8>,
    pub nac_v: Tracked<u8>,
    pub sil: Tracked<u8>,
    pub sil_type: Tracked<SilType>,
    pub gva: Tracked<u8>,
    pub sda: Tracked<u8>,

    pub opstatus: Tracked<OpStatus>,
    pub nav_heading: Tracked<f32>,
    pub nav_mcp_altitude: Tracked<i32>,
    pub nav_fms_altitude: Tracked<i32>,
    pub nav_qnh: Tracked<f32>,
    pub nav_modes: Tracked<NavModes>,
    pub nav_altitude_source: Tracked<NavAltitudeSource>,

    pub acas_ra: Tracked<[u8; 7]>,
    pub mrar: Tracked<Mrar>,

    pub cpr_even: Tracked<CprFrame>,
    pub cpr_odd: Tracked<CprFrame>,
    pub position: Tracked<Position>,

    pub first_seen: f64,
    pub last_seen: f64,
    pub message_count: u64,
    pub signal: VecDeque<f64>,
}

impl Aircraft {
    pub fn new(address: Address, timestamp: f64) -> Self {
        Aircraft {
            address,
            addrtype: Tracked::default(),
            adsb_version: Tracked::default(),
            callsign: Tracked::default(),
            squawk: Tracked::default(),
            category: Tracked::default(),
            emergency: Tracked::default(),
            baro_alt: Tracked::default(),
            geom_alt: Tracked::default(),
            geom_delta: Tracked::default(),
            baro_rate: Tracked::default(),
            geom_rate: Tracked::default(),
            gs: Tracked::default(),
            ias: Tracked::default(),
            tas: Tracked::default(),
            mach: Tracked::default(),
            track: Tracked::default(),
            true_heading: Tracked::default(),
            mag_heading: Tracked::default(),
            track_rate: Tracked::default(),
            roll: Tracked::default(),
            airground: Tracked::default(),
            spi: Tracked::default(),
            alert: Tracked::default(),
            nic_a: Tracked::default(),
            nic_b: Tracked::default(),
            nic_c: Tracked::default(),
            nic_baro: Tracked::default(),
            nac_p: Tracked::default(),
            nac_v: Tracked::default(),
            sil: Tracked::default(),
            sil_type: Tracked::default(),
            gva: Tracked::default(),
            sda: Tracked::default(),
            opstatus: Tracked::default(),
            nav_heading: Tracked::default(),
            nav_mcp_altitude: Tracked::default(),
            nav_fms_altitude: Tracked::default(),
            nav_qnh: Tracked::default(),
            nav_modes: Tracked::default(),
            nav_altitude_source: Tracked::default(),
            acas_ra: Tracked::default(),
            mrar: Tracked::default(),
            cpr_even: Tracked::default(),
            cpr_odd: Tracked::default(),
            position: Tracked::default(),
            first_seen: timestamp,
            last_seen: timestamp,
            message_count: 0,
            signal: VecDeque::with_capacity(SIGNAL_HISTORY),
        }
    }

    /// ADS-B version from operational status, else `default`.
    pub fn version(&self, now: f64, default: u8) -> u8 {
        self.adsb_version.get(now).copied().unwrap_or(default)
    }

    /// Mean of the recent signal levels.
    pub fn rssi(&self) -> Option<f64> {
        if self.signal.is_empty() {
            return None;
        }
        Some(self.signal.iter().sum::<f64>() / self.signal.len() as f64)
    }

    /// Address type changes only to a strictly higher priority, unless the
    /// stored value has expired.
    fn update_addrtype(&mut self, addrtype: AddressType, source: DataSource, at: f64, w: Windows) {
        if source == DataSource::Invalid || at < self.addrtype.updated {
            return;
        }
        match self.addrtype.get(at).copied() {
            Some(current) if addrtype < current => {}
            Some(current) if addrtype == current => {
                // Refresh validity without changing the recorded source
                self.addrtype.updated = at;
                self.addrtype.stale_at = at + w.stale;
                self.addrtype.expires_at = at + w.expire;
            }
            _ => {
                self.addrtype.value = Some(addrtype);
                self.addrtype.source = source;
                self.addrtype.updated = at;
                self.addrtype.stale_at = at + w.stale;
                self.addrtype.expires_at = at + w.expire;
            }
        }
    }

    /// Resolve an ambiguous heading kind using operational status.
    fn resolve_heading(&self, kind: HeadingType, at: f64) -> HeadingType {
        let status = self.opstatus.get(at);
        let hrd = status.map_or(HeadingType::MagneticHeading, |s| s.hrd);
        match kind {
            HeadingType::MagneticOrTrue => hrd,
            HeadingType::TrackOrHeading => match status.map(|s| s.tah) {
                Some(HeadingType::GroundTrack) | None => HeadingType::GroundTrack,
                Some(_) => hrd,
            },
            other => other,
        }
    }

    fn update_heading(&mut self, heading: Heading, source: DataSource, at: f64, w: Windows) {
        let field = match self.resolve_heading(heading.kind, at) {
            HeadingType::TrueHeading => &mut self.true_heading,
            HeadingType::MagneticHeading => &mut self.mag_heading,
            _ => &mut self.track,
        };
        field.update(heading.degrees, source, at, w);
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Serialisable view of an aircraft holding only unexpired fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftSnapshot {
    pub hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addrtype: Option<AddressType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squawk: Option<Squawk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency: Option<Emergency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_baro: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_geom: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baro_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geom_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gs: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ias: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tas: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mach: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_heading: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mag_heading: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airground: Option<AirGround>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spi: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_source: Option<DataSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_pos: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nac_p: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nac_v: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sil: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sil_type: Option<SilType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gva: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sda: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic_baro: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_heading: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_altitude_mcp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_altitude_fms: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_qnh: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_modes: Option<NavModes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_altitude_source: Option<NavAltitudeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acas_ra: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrar: Option<Mrar>,
    pub messages: u64,
    pub seen: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
}

impl AircraftSnapshot {
    fn build(a: &Aircraft, now: f64, default_version: u8) -> Self {
        let version = a.version(now, default_version);
        let position = a.position.get(now);
        AircraftSnapshot {
            hex: a.address.to_string(),
            addrtype: a.addrtype.get(now).copied(),
            version: a.adsb_version.get(now).copied(),
            flight: a.callsign.get(now).cloned(),
            squawk: a.squawk.get(now).copied(),
            category: a.category.get(now).copied(),
            emergency: a.emergency.get(now).copied(),
            alt_baro: a.baro_alt.get(now).copied(),
            alt_geom: a.geom_alt.get(now).copied(),
            baro_rate: a.baro_rate.get(now).copied(),
            geom_rate: a.geom_rate.get(now).copied(),
            gs: a.gs.get(now).map(|gs| gs.for_version(version)),
            ias: a.ias.get(now).copied(),
            tas: a.tas.get(now).copied(),
            mach: a.mach.get(now).copied(),
            track: a.track.get(now).copied(),
            true_heading: a.true_heading.get(now).copied(),
            mag_heading: a.mag_heading.get(now).copied(),
            track_rate: a.track_rate.get(now).copied(),
            roll: a.roll.get(now).copied(),
            airground: a.airground.get(now).copied(),
            spi: a.spi.get(now).copied(),
            alert: a.alert.get(now).copied(),
            lat: position.map(|p| p.lat),
            lon: position.map(|p| p.lon),
            nic: position.map(|p| p.nic),
            rc: position.map(|p| p.rc),
            position_source: position.map(|_| a.position.source()),
            seen_pos: position.map(|_| now - a.position.updated()),
            nac_p: a.nac_p.get(now).copied(),
            nac_v: a.nac_v.get(now).copied(),
            sil: a.sil.get(now).copied(),
            sil_type: a.sil_type.get(now).copied(),
            gva: a.gva.get(now).copied(),
            sda: a.sda.get(now).copied(),
            nic_baro: a.nic_baro.get(now).copied(),
            nav_heading: a.nav_heading.get(now).copied(),
            nav_altitude_mcp: a.nav_mcp_altitude.get(now).copied(),
            nav_altitude_fms: a.nav_fms_altitude.get(now).copied(),
            nav_qnh: a.nav_qnh.get(now).copied(),
            nav_modes: a.nav_modes.get(now).copied(),
            nav_altitude_source: a.nav_altitude_source.get(now).copied(),
            acas_ra: a.acas_ra.get(now).map(|ra| hex_encode(ra)),
            mrar: a.mrar.get(now).copied(),
            messages: a.message_count,
            seen: now - a.last_seen,
            rssi: a.rssi(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Fold decoded messages into per-address aircraft state.
pub struct Tracker {
    aircraft: HashMap<Address, Aircraft>,
    config: TrackingConfig,
    receiver: ReceiverConfig,

    // Counters
    pub total_messages: u64,
    pub position_decodes: u64,
    pub position_failures: u64,
}

impl Tracker {
    pub fn new(config: TrackingConfig, receiver: ReceiverConfig) -> Self {
        Tracker {
            aircraft: HashMap::new(),
            config,
            receiver,
            total_messages: 0,
            position_decodes: 0,
            position_failures: 0,
        }
    }

    pub fn get(&self, address: &Address) -> Option<&Aircraft> {
        self.aircraft.get(address)
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    fn windows(&self) -> Windows {
        Windows {
            stale: self.config.stale_secs,
            expire: self.config.expire_secs,
        }
    }

    fn fast_windows(&self) -> Windows {
        Windows {
            stale: self.config.fast_stale_secs,
            expire: self.config.expire_secs,
        }
    }

    /// Fold one message into its track. Messages from an invalid source are
    /// ignored.
    pub fn update(&mut self, msg: &DecodedMessage) -> Option<&Aircraft> {
        if msg.source == DataSource::Invalid {
            return None;
        }
        self.total_messages += 1;

        let at = msg.sys_time;
        let src = msg.source;
        let w = self.windows();
        let fast = self.fast_windows();
        let default_version = self.config.default_adsb_version;

        let a = self
            .aircraft
            .entry(msg.address)
            .or_insert_with(|| Aircraft::new(msg.address, at));

        if a.signal.len() == SIGNAL_HISTORY {
            a.signal.pop_front();
        }
        a.signal.push_back(msg.signal);
        a.message_count += 1;
        a.last_seen = a.last_seen.max(at);

        a.update_addrtype(msg.addrtype, src, at, w);

        // Operational status first: it decides what headings mean
        if let Some(status) = msg.opstatus {
            if a.opstatus.update(status, src, at, w) {
                a.adsb_version.update(status.version, src, at, w);
            }
        }

        update_opt(&mut a.callsign, msg.callsign.clone(), src, at, w);
        update_opt(&mut a.squawk, msg.squawk, src, at, fast);
        update_opt(&mut a.category, msg.category, src, at, w);
        update_opt(&mut a.emergency, msg.emergency, src, at, w);

        update_opt(&mut a.baro_alt, msg.baro_alt.map(|alt| alt.in_feet()), src, at, fast);
        update_opt(&mut a.geom_alt, msg.geom_alt.map(|alt| alt.in_feet()), src, at, w);
        update_opt(&mut a.geom_delta, msg.geom_delta, src, at, w);
        update_opt(&mut a.baro_rate, msg.baro_rate, src, at, w);
        update_opt(&mut a.geom_rate, msg.geom_rate, src, at, w);

        update_opt(&mut a.gs, msg.gs, src, at, w);
        update_opt(&mut a.ias, msg.ias, src, at, w);
        update_opt(&mut a.tas, msg.tas, src, at, w);
        update_opt(&mut a.mach, msg.mach, src, at, w);
        update_opt(&mut a.track_rate, msg.track_rate, src, at, w);
        update_opt(&mut a.roll, msg.roll, src, at, w);
        if let Some(heading) = msg.heading {
            a.update_heading(heading, src, at, w);
        }

        update_opt(&mut a.airground, msg.airground, src, at, fast);
        update_opt(&mut a.spi, msg.spi, src, at, w);
        update_opt(&mut a.alert, msg.alert, src, at, w);

        let acc = &msg.accuracy;
        update_opt(&mut a.nic_a, acc.nic_a, src, at, w);
        update_opt(&mut a.nic_b, acc.nic_b, src, at, w);
        update_opt(&mut a.nic_c, acc.nic_c, src, at, w);
        update_opt(&mut a.nic_baro, acc.nic_baro, src, at, w);
        update_opt(&mut a.nac_p, acc.nac_p, src, at, w);
        update_opt(&mut a.nac_v, acc.nac_v, src, at, w);
        update_opt(&mut a.sil, acc.sil, src, at, w);
        update_opt(&mut a.sil_type, acc.sil_type, src, at, w);
        update_opt(&mut a.gva, acc.gva, src, at, w);
        update_opt(&mut a.sda, acc.sda, src, at, w);

        let nav = &msg.nav;
        update_opt(&mut a.nav_heading, nav.selected_heading, src, at, w);
        update_opt(&mut a.nav_mcp_altitude, nav.mcp_altitude, src, at, w);
        update_opt(&mut a.nav_fms_altitude, nav.fms_altitude, src, at, w);
        update_opt(&mut a.nav_qnh, nav.qnh, src, at, w);
        update_opt(&mut a.nav_modes, nav.modes, src, at, w);
        update_opt(&mut a.nav_altitude_source, nav.altitude_source, src, at, w);

        update_opt(&mut a.acas_ra, msg.acas_ra, src, at, w);
        update_opt(&mut a.mrar, msg.mrar, src, at, w);

        if let Some(cpr) = msg.cpr {
            let slot = if cpr.odd { &mut a.cpr_odd } else { &mut a.cpr_even };
            if slot.update(cpr, src, at, w) {
                let version = a.version(at, default_version);
                let metype = msg.metype.unwrap_or(0);
                match resolve_position(a, &cpr, metype, version, &self.config, &self.receiver, at) {
                    Ok((position, source)) => {
                        if a.position.update(position, source, at, w) {
                            self.position_decodes += 1;
                        }
                    }
                    Err(err) => {
                        self.position_failures += 1;
                        debug!(address = %msg.address, error = %err, "CPR decode failed");
                    }
                }
            }
        }

        Some(&*a)
    }

    /// Serialisable views of every track, sorted by address.
    pub fn snapshot(&self, now: f64) -> Vec<AircraftSnapshot> {
        let mut out: Vec<_> = self
            .aircraft
            .values()
            .map(|a| AircraftSnapshot::build(a, now, self.config.default_adsb_version))
            .collect();
        out.sort_by(|a, b| a.hex.cmp(&b.hex));
        out
    }

    /// Drop tracks silent for longer than the expiry window. Returns how many
    /// were removed.
    pub fn remove_inactive(&mut self, now: f64) -> usize {
        let expire = self.config.expire_secs;
        let before = self.aircraft.len();
        self.aircraft.retain(|_, a| now - a.last_seen <= expire);
        before - self.aircraft.len()
    }
}

// ---------------------------------------------------------------------------
// Position resolution
// ---------------------------------------------------------------------------

/// Resolve a position for `cpr`, the frame just stored. Tries a global
/// decode with the opposite slot, then a relative decode.
fn resolve_position(
    a: &Aircraft,
    cpr: &CprFrame,
    metype: u8,
    version: u8,
    config: &TrackingConfig,
    receiver: &ReceiverConfig,
    at: f64,
) -> Result<(Position, DataSource), CprError> {
    let (lat, lon, source) = match global(a, cpr, config, receiver, at) {
        Ok(found) => found,
        Err(err) => {
            debug!(address = %a.address, error = %err, "global CPR unavailable, trying local");
            let (lat, lon) = local(a, cpr, receiver, at)?;
            (lat, lon, a_slot(a, cpr.odd).source())
        }
    };

    if let Some((rlat, rlon)) = receiver.position() {
        if receiver.max_range_nm > 0.0 {
            let distance_m = cpr::distance_m(rlat, rlon, lat, lon);
            let limit_m = receiver.max_range_nm * METERS_PER_NM;
            if distance_m > limit_m {
                return Err(CprError::OutOfRange { distance_m, limit_m });
            }
        }
    }

    let nic_a = a.nic_a.get(at).copied().unwrap_or(false);
    let nic_b = a.nic_b.get(at).copied().unwrap_or(false);
    let nic_c = a.nic_c.get(at).copied().unwrap_or(false);
    let (nic, rc) = cpr::nic_rc(metype, version, nic_a, nic_b, nic_c);

    Ok((Position { lat, lon, nic, rc }, source))
}

fn a_slot(a: &Aircraft, odd: bool) -> &Tracked<CprFrame> {
    if odd {
        &a.cpr_odd
    } else {
        &a.cpr_even
    }
}

/// Reference for a decode: the track's position, else the receiver.
fn reference(a: &Aircraft, receiver: &ReceiverConfig, at: f64) -> Option<(f64, f64)> {
    a.position
        .get(at)
        .map(|p| (p.lat, p.lon))
        .or_else(|| receiver.position())
}

fn global(
    a: &Aircraft,
    cpr: &CprFrame,
    config: &TrackingConfig,
    receiver: &ReceiverConfig,
    at: f64,
) -> Result<(f64, f64, DataSource), CprError> {
    let this = a_slot(a, cpr.odd);
    let other = a_slot(a, !cpr.odd);
    let other_frame = other.get(at).ok_or(CprError::NoReference)?;

    if other_frame.kind != cpr.kind || cpr.kind == CprType::Coarse {
        return Err(CprError::TypeMismatch);
    }

    let window = match cpr.kind {
        CprType::Surface => {
            let moving_fast = a
                .gs
                .get(at)
                .is_some_and(|gs| gs.v0 > SURFACE_FAST_KT || gs.v2 > SURFACE_FAST_KT);
            if moving_fast {
                config.surface_pair_fast_secs
            } else {
                config.surface_pair_slow_secs
            }
        }
        _ => config.airborne_pair_secs,
    };
    let age = (this.updated() - other.updated()).abs();
    if age > window {
        return Err(CprError::PairTooOld { age });
    }

    let (even, odd) = if cpr.odd { (other_frame, cpr) } else { (cpr, other_frame) };
    let pair = CprPair {
        even_lat: even.lat,
        even_lon: even.lon,
        odd_lat: odd.lat,
        odd_lon: odd.lon,
        odd_newer: cpr.odd,
    };

    let (lat, lon) = match cpr.kind {
        CprType::Surface => {
            let (ref_lat, ref_lon) = reference(a, receiver, at).ok_or(CprError::NoReference)?;
            cpr::decode_surface(&pair, ref_lat, ref_lon)?
        }
        _ => cpr::decode_airborne(&pair)?,
    };

    // Both frames contribute; the weaker source labels the result
    Ok((lat, lon, this.source().min(other.source())))
}

fn local(
    a: &Aircraft,
    cpr: &CprFrame,
    receiver: &ReceiverConfig,
    at: f64,
) -> Result<(f64, f64), CprError> {
    let (ref_lat, ref_lon, limit_m) = if let Some(p) = a.position.get(at) {
        (p.lat, p.lon, TRACK_REFERENCE_LIMIT_NM * METERS_PER_NM)
    } else {
        if cpr.kind == CprType::Surface {
            return Err(CprError::NoReference);
        }
        let (lat, lon) = receiver.position().ok_or(CprError::NoReference)?;
        let limit = cpr::receiver_range_limit(receiver.max_range_nm).ok_or(CprError::NoReference)?;
        (lat, lon, limit)
    };

    let (lat, lon) =
        cpr::decode_relative_frame(ref_lat, ref_lon, cpr.lat, cpr.lon, cpr.odd, cpr.kind)?;
    let distance_m = cpr::distance_m(ref_lat, ref_lon, lat, lon);
    if distance_m > limit_m {
        return Err(CprError::OutOfRange { distance_m, limit_m });
    }
    Ok((lat, lon))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Altitude, Capabilities, OperationalModes, RxMeta};

    const ROME: (f64, f64) = (41.8902, 12.4922);

    fn tracker() -> Tracker {
        Tracker::new(TrackingConfig::default(), ReceiverConfig::default())
    }

    fn tracker_at(lat: f64, lon: f64) -> Tracker {
        let receiver = ReceiverConfig {
            lat: Some(lat),
            lon: Some(lon),
            ..ReceiverConfig::default()
        };
        Tracker::new(TrackingConfig::default(), receiver)
    }

    fn msg(address: u32, source: DataSource, t: f64) -> DecodedMessage {
        let mut m = DecodedMessage::new(vec![0; 14], RxMeta::at(t));
        m.df = 17;
        m.address = Address::icao(address);
        m.addrtype = AddressType::AdsbIcao;
        m.source = source;
        m
    }

    fn airborne(address: u32, source: DataSource, t: f64, odd: bool) -> DecodedMessage {
        let (lat, lon) = cpr::encode_airborne(ROME.0, ROME.1, odd);
        let mut m = msg(address, source, t);
        m.metype = Some(11);
        m.baro_alt = Some(Altitude::feet(38000));
        m.cpr = Some(CprFrame {
            lat,
            lon,
            odd,
            kind: CprType::Airborne,
            nucp: 7,
        });
        m
    }

    fn surface(address: u32, t: f64, odd: bool) -> DecodedMessage {
        let (lat, lon) = cpr::encode_surface(ROME.0, ROME.1, odd);
        let mut m = msg(address, DataSource::Adsb, t);
        m.metype = Some(7);
        m.airground = Some(AirGround::Ground);
        m.cpr = Some(CprFrame {
            lat,
            lon,
            odd,
            kind: CprType::Surface,
            nucp: 7,
        });
        m
    }

    fn position(t: &Tracker, address: u32, now: f64) -> Option<Position> {
        t.get(&Address::icao(address))?.position.get(now).copied()
    }

    // -- Tracked accept rule --

    #[test]
    fn test_tracked_priority_and_staleness() {
        let w = Windows {
            stale: 10.0,
            expire: 20.0,
        };
        let mut field = Tracked::default();
        assert!(field.update(1, DataSource::Adsb, 0.0, w));
        // Lower priority while fresh: rejected
        assert!(!field.update(2, DataSource::Mlat, 5.0, w));
        assert_eq!(field.get(5.0), Some(&1));
        // Same priority: accepted
        assert!(field.update(3, DataSource::Adsb, 6.0, w));
        // Lower priority once stale: accepted
        assert!(field.update(4, DataSource::Mlat, 17.0, w));
        assert_eq!(field.source(), DataSource::Mlat);
        // Expired
        assert_eq!(field.get(40.0), None);
    }

    #[test]
    fn test_tracked_out_of_order_never_overwrites() {
        let w = Windows {
            stale: 10.0,
            expire: 20.0,
        };
        let mut field = Tracked::default();
        field.update(1, DataSource::ModeS, 10.0, w);
        assert!(!field.update(2, DataSource::Adsb, 9.0, w));
        assert_eq!(field.get(10.0), Some(&1));
    }

    #[test]
    fn test_tracked_invalid_source_never_accepted() {
        let mut field: Tracked<i32> = Tracked::default();
        let w = Windows {
            stale: 10.0,
            expire: 20.0,
        };
        assert!(!field.update(1, DataSource::Invalid, 0.0, w));
        assert_eq!(field.get(0.0), None);
    }

    // -- Field fusion --

    #[test]
    fn test_lower_priority_altitude_rejected_until_stale() {
        let mut t = tracker();
        let mut m = msg(0x4840D6, DataSource::Adsb, 0.0);
        m.baro_alt = Some(Altitude::feet(38000));
        t.update(&m);

        let mut m = msg(0x4840D6, DataSource::ModeSChecked, 5.0);
        m.df = 4;
        m.baro_alt = Some(Altitude::feet(37000));
        t.update(&m);
        assert_eq!(t.get(&Address::icao(0x4840D6)).unwrap().baro_alt.get(5.0), Some(&38000));

        // Altitude uses the fast stale window
        let mut m = msg(0x4840D6, DataSource::ModeSChecked, 16.0);
        m.baro_alt = Some(Altitude::feet(37000));
        t.update(&m);
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.baro_alt.get(16.0), Some(&37000));
        assert_eq!(a.message_count, 3);
    }

    #[test]
    fn test_invalid_message_ignored() {
        let mut t = tracker();
        let m = msg(0x4840D6, DataSource::Invalid, 0.0);
        assert!(t.update(&m).is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn test_address_type_follows_priority() {
        let mut t = tracker();
        let mut m = msg(0x4840D6, DataSource::Tisb, 0.0);
        m.addrtype = AddressType::TisbIcao;
        t.update(&m);

        let mut m = msg(0x4840D6, DataSource::Adsb, 1.0);
        m.addrtype = AddressType::AdsbIcao;
        t.update(&m);
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.addrtype.get(1.0), Some(&AddressType::AdsbIcao));

        // Lower priority does not replace while valid
        let mut m = msg(0x4840D6, DataSource::Adsr, 2.0);
        m.addrtype = AddressType::AdsrIcao;
        t.update(&m);
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.addrtype.get(2.0), Some(&AddressType::AdsbIcao));

        // After expiry it may
        let mut m = msg(0x4840D6, DataSource::Adsr, 100.0);
        m.addrtype = AddressType::AdsrIcao;
        t.update(&m);
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.addrtype.get(100.0), Some(&AddressType::AdsrIcao));
    }

    #[test]
    fn test_heading_resolution_uses_hrd() {
        let mut t = tracker();
        let mut m = msg(0x4840D6, DataSource::Adsb, 0.0);
        m.heading = Some(Heading {
            degrees: 244.0,
            kind: HeadingType::MagneticOrTrue,
        });
        t.update(&m);
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.mag_heading.get(0.0), Some(&244.0));
        assert!(a.true_heading.get(0.0).is_none());

        let mut m = msg(0x4840D6, DataSource::Adsb, 1.0);
        m.opstatus = Some(OpStatus {
            version: 2,
            capabilities: Capabilities::empty(),
            modes: OperationalModes::empty(),
            hrd: HeadingType::TrueHeading,
            tah: HeadingType::GroundTrack,
            length_width: None,
            antenna_offset: None,
        });
        m.heading = Some(Heading {
            degrees: 250.0,
            kind: HeadingType::MagneticOrTrue,
        });
        t.update(&m);
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.true_heading.get(1.0), Some(&250.0));
        assert_eq!(a.version(1.0, 0), 2);
    }

    #[test]
    fn test_surface_heading_defaults_to_track() {
        let mut t = tracker();
        let mut m = msg(0x4840D6, DataSource::Adsb, 0.0);
        m.heading = Some(Heading {
            degrees: 90.0,
            kind: HeadingType::TrackOrHeading,
        });
        t.update(&m);
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.track.get(0.0), Some(&90.0));
    }

    // -- Positions --

    #[test]
    fn test_global_airborne_decode() {
        let mut t = tracker();
        t.update(&airborne(0x4840D6, DataSource::Adsb, 0.0, false));
        assert!(position(&t, 0x4840D6, 0.0).is_none());
        t.update(&airborne(0x4840D6, DataSource::Adsb, 2.0, true));
        let p = position(&t, 0x4840D6, 2.0).unwrap();
        assert!(cpr::distance_m(p.lat, p.lon, ROME.0, ROME.1) < 5.0);
        assert_eq!(p.nic, 8);
        assert_eq!(p.rc, 186);
        assert_eq!(t.position_decodes, 1);
    }

    #[test]
    fn test_global_pair_too_old() {
        let mut t = tracker();
        t.update(&airborne(0x4840D6, DataSource::Adsb, 0.0, false));
        t.update(&airborne(0x4840D6, DataSource::Adsb, 15.0, true));
        assert!(position(&t, 0x4840D6, 15.0).is_none());
        // Neither frame had a pair or a reference
        assert_eq!(t.position_failures, 2);
    }

    #[test]
    fn test_global_position_takes_weaker_source() {
        let mut t = tracker();
        t.update(&airborne(0x4840D6, DataSource::Mlat, 0.0, false));
        t.update(&airborne(0x4840D6, DataSource::Adsb, 1.0, true));
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.position.source(), DataSource::Mlat);
        assert_eq!(a.position.updated(), 1.0);
    }

    #[test]
    fn test_local_decode_relative_to_receiver() {
        let mut t = tracker_at(41.9, 12.5);
        t.update(&airborne(0x4840D6, DataSource::Adsb, 0.0, true));
        let p = position(&t, 0x4840D6, 0.0).unwrap();
        assert!(cpr::distance_m(p.lat, p.lon, ROME.0, ROME.1) < 5.0);
    }

    #[test]
    fn test_local_decode_uses_track_position() {
        let mut t = tracker();
        t.update(&airborne(0x4840D6, DataSource::Adsb, 0.0, false));
        t.update(&airborne(0x4840D6, DataSource::Adsb, 1.0, true));
        // Pair now too old, so this one resolves against the track
        t.update(&airborne(0x4840D6, DataSource::Adsb, 30.0, false));
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.position.updated(), 30.0);
    }

    #[test]
    fn test_receiver_range_rejects_distant_positions() {
        let mut t = tracker_at(60.0, 25.0);
        t.update(&airborne(0x4840D6, DataSource::Adsb, 0.0, false));
        t.update(&airborne(0x4840D6, DataSource::Adsb, 1.0, true));
        assert!(position(&t, 0x4840D6, 1.0).is_none());
    }

    #[test]
    fn test_surface_global_needs_reference() {
        let mut t = tracker();
        t.update(&surface(0x4840D6, 0.0, false));
        t.update(&surface(0x4840D6, 1.0, true));
        assert!(position(&t, 0x4840D6, 1.0).is_none());

        let mut t = tracker_at(41.9, 12.5);
        t.update(&surface(0x4840D6, 0.0, false));
        t.update(&surface(0x4840D6, 1.0, true));
        let p = position(&t, 0x4840D6, 1.0).unwrap();
        assert!(cpr::distance_m(p.lat, p.lon, ROME.0, ROME.1) < 5.0);
        let a = t.get(&Address::icao(0x4840D6)).unwrap();
        assert_eq!(a.airground.get(1.0), Some(&AirGround::Ground));
    }

    #[test]
    fn test_surface_and_airborne_frames_never_pair() {
        let mut t = tracker();
        t.update(&surface(0x4840D6, 0.0, false));
        t.update(&airborne(0x4840D6, DataSource::Adsb, 1.0, true));
        assert!(position(&t, 0x4840D6, 1.0).is_none());
    }

    // -- Snapshot --

    #[test]
    fn test_snapshot_only_unexpired_fields() {
        let mut t = tracker();
        let mut m = msg(0x4840D6, DataSource::Adsb, 0.0);
        m.callsign = Some("KLM1023 ".to_string());
        m.squawk = Some(Squawk(0x1200));
        t.update(&m);

        let snap = t.snapshot(1.0);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].hex, "4840D6");
        assert_eq!(snap[0].flight.as_deref(), Some("KLM1023 "));
        assert_eq!(snap[0].messages, 1);

        let snap = t.snapshot(100.0);
        assert_eq!(snap[0].flight, None);
        assert_eq!(snap[0].squawk, None);

        let json = serde_json::to_string(&t.snapshot(1.0)[0]).unwrap();
        assert!(json.contains("\"squawk\":\"1200\""));
    }

    #[test]
    fn test_snapshot_ground_speed_by_version() {
        let mut t = tracker();
        let mut m = msg(0x4840D6, DataSource::Adsb, 0.0);
        m.gs = Some(GroundSpeed { v0: 27.0, v2: 26.0 });
        t.update(&m);
        assert_eq!(t.snapshot(0.0)[0].gs, Some(27.0));
    }

    #[test]
    fn test_remove_inactive() {
        let mut t = tracker();
        t.update(&msg(0x000001, DataSource::Adsb, 0.0));
        t.update(&msg(0x000002, DataSource::Adsb, 50.0));
        assert_eq!(t.remove_inactive(100.0), 1);
        assert_eq!(t.len(), 1);
        assert!(t.get(&Address::icao(0x000002)).is_some());
    }
}
