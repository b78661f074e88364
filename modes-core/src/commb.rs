//! Comm-B (DF20/21 MB field) register inference.
//!
//! The MB field carries no register number, so each candidate register has a
//! plausibility predicate. A reply is decoded only when exactly one
//! predicate accepts it:
//! - BDS1,0: Data link capability report
//! - BDS1,7: Common usage GICB capability report
//! - BDS2,0: Aircraft identification
//! - BDS3,0: ACAS active resolution advisory
//! - BDS4,0: Selected vertical intention
//! - BDS4,4: Meteorological routine air report
//! - BDS5,0: Track and turn report
//! - BDS6,0: Heading and speed report

use crate::frame::{getbit, getbits};
use crate::message::{
    CommBFormat, DecodedMessage, HazardLevel, Heading, HeadingType, GroundSpeed, Mrar, MrarSource,
    NavAltitudeSource, NavModes, NavState,
};
use crate::types::decode_callsign;

/// Fields recovered from a single register.
#[derive(Debug, Clone, PartialEq)]
enum Register {
    DatalinkCaps,
    GicbCaps,
    Ident(String),
    AcasRa([u8; 7]),
    VerticalIntent(NavState),
    Mrar(Mrar),
    TrackTurn(TrackTurn),
    HeadingSpeed(HeadingSpeed),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct TrackTurn {
    roll: Option<f32>,
    track: Option<f32>,
    gs: Option<u32>,
    track_rate: Option<f32>,
    tas: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct HeadingSpeed {
    heading: Option<f32>,
    ias: Option<u32>,
    mach: Option<f32>,
    baro_rate: Option<i32>,
    inertial_rate: Option<i32>,
}

impl Register {
    fn format(&self) -> CommBFormat {
        match self {
            Register::DatalinkCaps => CommBFormat::DatalinkCaps,
            Register::GicbCaps => CommBFormat::GicbCaps,
            Register::Ident(_) => CommBFormat::AircraftIdent,
            Register::AcasRa(_) => CommBFormat::AcasRa,
            Register::VerticalIntent(_) => CommBFormat::VerticalIntent,
            Register::Mrar(_) => CommBFormat::Mrar,
            Register::TrackTurn(_) => CommBFormat::TrackTurn,
            Register::HeadingSpeed(_) => CommBFormat::HeadingSpeed,
        }
    }
}

type Predicate = fn(&[u8; 7]) -> Option<Register>;

const PREDICATES: &[Predicate] = &[
    bds_1_0, bds_1_7, bds_2_0, bds_3_0, bds_4_0, bds_4_4, bds_5_0, bds_6_0,
];

/// Evaluate every register predicate against `mb`.
fn candidates(mb: &[u8; 7]) -> Vec<Register> {
    PREDICATES.iter().filter_map(|p| p(mb)).collect()
}

/// Classify an MB field without touching a message.
pub fn classify(mb: &[u8; 7]) -> CommBFormat {
    if mb.iter().all(|&b| b == 0) {
        return CommBFormat::EmptyResponse;
    }
    let found = candidates(mb);
    match found.as_slice() {
        [] => CommBFormat::NotDecoded,
        [one] => one.format(),
        _ => CommBFormat::Ambiguous,
    }
}

/// Classify `mb` and, if exactly one register matches, copy its fields into
/// `msg`. Ambiguous replies carry the tag only.
pub fn decode_commb(msg: &mut DecodedMessage, mb: &[u8; 7]) {
    if mb.iter().all(|&b| b == 0) {
        msg.commb_format = Some(CommBFormat::EmptyResponse);
        return;
    }

    let mut found = candidates(mb);
    if found.len() != 1 {
        msg.commb_format = Some(if found.is_empty() {
            CommBFormat::NotDecoded
        } else {
            CommBFormat::Ambiguous
        });
        return;
    }

    let register = found.remove(0);
    msg.commb_format = Some(register.format());
    match register {
        Register::DatalinkCaps | Register::GicbCaps => {}
        Register::Ident(callsign) => msg.callsign = Some(callsign),
        Register::AcasRa(ra) => msg.acas_ra = Some(ra),
        Register::VerticalIntent(nav) => msg.nav = nav,
        Register::Mrar(mrar) => msg.mrar = Some(mrar),
        Register::TrackTurn(tt) => {
            msg.roll = tt.roll;
            msg.track_rate = tt.track_rate;
            msg.tas = tt.tas;
            msg.gs = tt.gs.map(|kt| GroundSpeed::both(kt as f32));
            msg.heading = tt.track.map(|degrees| Heading {
                degrees,
                kind: HeadingType::GroundTrack,
            });
        }
        Register::HeadingSpeed(hs) => {
            msg.ias = hs.ias;
            msg.mach = hs.mach;
            msg.baro_rate = hs.baro_rate;
            msg.geom_rate = hs.inertial_rate;
            msg.heading = hs.heading.map(|degrees| Heading {
                degrees,
                kind: HeadingType::MagneticHeading,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Read a status-gated field. A clear status bit requires the value bits to
/// be zero; `Err(())` flags a reply that cannot be this register.
fn gated(mb: &[u8; 7], status: usize, first: usize, last: usize) -> Result<Option<u32>, ()> {
    let value = getbits(mb, first, last);
    if getbit(mb, status) == 0 {
        return if value == 0 { Ok(None) } else { Err(()) };
    }
    Ok(Some(value))
}

/// Two's complement value of `bits` bits, where the top bit is the sign.
fn signed(raw: u32, bits: u32) -> i32 {
    if raw & (1 << (bits - 1)) != 0 {
        raw as i32 - (1 << bits)
    } else {
        raw as i32
    }
}

/// Angle in [0, 360) from a signed raw value.
fn angle(raw: i32, scale: f32) -> f32 {
    let degrees = raw as f32 * scale;
    if degrees < 0.0 {
        degrees + 360.0
    } else {
        degrees
    }
}

// ---------------------------------------------------------------------------
// Register predicates
// ---------------------------------------------------------------------------

fn bds_1_0(mb: &[u8; 7]) -> Option<Register> {
    if mb[0] != 0x10 {
        return None;
    }
    // Reserved
    if getbits(mb, 10, 14) != 0 {
        return None;
    }
    Some(Register::DatalinkCaps)
}

fn bds_1_7(mb: &[u8; 7]) -> Option<Register> {
    // Anything that answers GICB at all supports BDS2,0
    if getbit(mb, 7) == 0 {
        return None;
    }
    // Reserved
    if getbits(mb, 25, 56) != 0 {
        return None;
    }
    Some(Register::GicbCaps)
}

fn bds_2_0(mb: &[u8; 7]) -> Option<Register> {
    if mb[0] != 0x20 {
        return None;
    }
    decode_callsign(mb, 9).map(Register::Ident)
}

fn bds_3_0(mb: &[u8; 7]) -> Option<Register> {
    if mb[0] != 0x30 {
        return None;
    }
    // Threat type indicator 3 is not assigned
    if getbits(mb, 29, 30) == 3 {
        return None;
    }
    Some(Register::AcasRa(*mb))
}

fn bds_4_0(mb: &[u8; 7]) -> Option<Register> {
    // Reserved
    if getbits(mb, 40, 47) != 0 || getbits(mb, 52, 53) != 0 {
        return None;
    }

    let mcp = gated(mb, 1, 2, 13).ok()?;
    let fms = gated(mb, 14, 15, 26).ok()?;
    let baro = gated(mb, 27, 28, 39).ok()?;
    let modes = gated(mb, 48, 49, 51).ok()?;
    let source = gated(mb, 54, 55, 56).ok()?;

    if mcp.is_none() && fms.is_none() && baro.is_none() {
        return None;
    }

    let mut nav = NavState::default();

    if let Some(raw) = mcp {
        let alt = raw as i32 * 16;
        if !(1..=50000).contains(&alt) {
            return None;
        }
        nav.mcp_altitude = Some(alt);
    }
    if let Some(raw) = fms {
        let alt = raw as i32 * 16;
        if !(1..=50000).contains(&alt) {
            return None;
        }
        nav.fms_altitude = Some(alt);
    }
    if let Some(raw) = baro {
        let qnh = 800.0 + raw as f32 * 0.1;
        if !(900.0..=1100.0).contains(&qnh) {
            return None;
        }
        nav.qnh = Some(qnh);
    }
    if let Some(bits) = modes {
        let mut flags = NavModes::empty();
        flags.set(NavModes::VNAV, bits & 0b100 != 0);
        flags.set(NavModes::ALT_HOLD, bits & 0b010 != 0);
        flags.set(NavModes::APPROACH, bits & 0b001 != 0);
        nav.modes = Some(flags);
    }
    if let Some(code) = source {
        nav.altitude_source = Some(match code {
            1 => NavAltitudeSource::Aircraft,
            2 => NavAltitudeSource::Mcp,
            3 => NavAltitudeSource::Fms,
            _ => NavAltitudeSource::Unknown,
        });
    }

    Some(Register::VerticalIntent(nav))
}

fn bds_4_4(mb: &[u8; 7]) -> Option<Register> {
    let source = match getbits(mb, 1, 4) {
        1 => MrarSource::Ins,
        2 => MrarSource::Gnss,
        3 => MrarSource::DmeDme,
        4 => MrarSource::VorDme,
        _ => return None,
    };

    let wind = gated(mb, 5, 6, 23).ok()?;
    let pressure = gated(mb, 35, 36, 46).ok()?;
    let turbulence = gated(mb, 47, 48, 49).ok()?;
    let humidity = gated(mb, 50, 51, 56).ok()?;

    // Static air temperature is always present
    let sat = signed(getbits(mb, 24, 34), 11) as f32 * 0.25;
    if !(-80.0..=60.0).contains(&sat) {
        return None;
    }

    let mut mrar = Mrar {
        source: Some(source),
        temperature: Some(sat),
        ..Mrar::default()
    };

    if let Some(raw) = wind {
        let speed = (raw >> 9) as f32;
        if speed > 250.0 {
            return None;
        }
        mrar.wind_speed = Some(speed);
        mrar.wind_dir = Some((raw & 0x1FF) as f32 * 180.0 / 256.0);
    }
    if let Some(raw) = pressure {
        mrar.pressure = Some(raw as f32);
    }
    if let Some(raw) = turbulence {
        mrar.turbulence = Some(HazardLevel::from_code(raw as u8));
    }
    if let Some(raw) = humidity {
        mrar.humidity = Some(raw as f32 * 100.0 / 64.0);
    }

    Some(Register::Mrar(mrar))
}

fn bds_5_0(mb: &[u8; 7]) -> Option<Register> {
    let roll = gated(mb, 1, 2, 11).ok()?;
    let track = gated(mb, 12, 13, 23).ok()?;
    let gs = gated(mb, 24, 25, 34).ok()?;
    let rate = gated(mb, 35, 36, 45).ok()?;
    let tas = gated(mb, 46, 47, 56).ok()?;

    if roll.is_none() && track.is_none() && gs.is_none() && rate.is_none() && tas.is_none() {
        return None;
    }

    let mut tt = TrackTurn::default();

    if let Some(raw) = roll {
        let degrees = signed(raw, 10) as f32 * 45.0 / 256.0;
        if degrees.abs() > 50.0 {
            return None;
        }
        tt.roll = Some(degrees);
    }
    if let Some(raw) = track {
        tt.track = Some(angle(signed(raw, 11), 90.0 / 512.0));
    }
    if let Some(raw) = gs {
        let kt = raw * 2;
        if !(50..=1000).contains(&kt) {
            return None;
        }
        tt.gs = Some(kt);
    }
    if let Some(raw) = rate {
        let rate = signed(raw, 10) as f32 * 8.0 / 256.0;
        if rate.abs() > 16.0 {
            return None;
        }
        tt.track_rate = Some(rate);
    }
    if let Some(raw) = tas {
        let kt = raw * 2;
        if !(50..=1000).contains(&kt) {
            return None;
        }
        tt.tas = Some(kt);
    }
    if let (Some(gs), Some(tas)) = (tt.gs, tt.tas) {
        if gs.abs_diff(tas) > 200 {
            return None;
        }
    }

    Some(Register::TrackTurn(tt))
}

fn bds_6_0(mb: &[u8; 7]) -> Option<Register> {
    let heading = gated(mb, 1, 2, 12).ok()?;
    let ias = gated(mb, 13, 14, 23).ok()?;
    let mach = gated(mb, 24, 25, 34).ok()?;
    let baro = gated(mb, 35, 36, 45).ok()?;
    let inertial = gated(mb, 46, 47, 56).ok()?;

    if heading.is_none() && ias.is_none() && mach.is_none() && baro.is_none() && inertial.is_none()
    {
        return None;
    }

    let mut hs = HeadingSpeed::default();

    if let Some(raw) = heading {
        hs.heading = Some(angle(signed(raw, 11), 90.0 / 512.0));
    }
    if let Some(raw) = ias {
        if !(50..=500).contains(&raw) {
            return None;
        }
        hs.ias = Some(raw);
    }
    if let Some(raw) = mach {
        let mach = raw as f32 * 2.048 / 512.0;
        if !(0.1..=1.0).contains(&mach) {
            return None;
        }
        hs.mach = Some(mach);
    }
    if let Some(raw) = baro {
        let rate = signed(raw, 10) * 32;
        if rate.abs() > 6000 {
            return None;
        }
        hs.baro_rate = Some(rate);
    }
    if let Some(raw) = inertial {
        let rate = signed(raw, 10) * 32;
        if rate.abs() > 6000 {
            return None;
        }
        hs.inertial_rate = Some(rate);
    }

    Some(Register::HeadingSpeed(hs))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RxMeta;

    /// Build an MB field from (first bit, last bit, value) triples.
    fn mb(fields: &[(usize, usize, u32)]) -> [u8; 7] {
        let mut out = [0u8; 7];
        for &(first, last, value) in fields {
            for n in first..=last {
                if (value >> (last - n)) & 1 != 0 {
                    let i = n - 1;
                    out[i / 8] |= 1 << (7 - (i % 8));
                }
            }
        }
        out
    }

    fn decode(mb: &[u8; 7]) -> DecodedMessage {
        let mut msg = DecodedMessage::new(vec![0; 14], RxMeta::at(0.0));
        decode_commb(&mut msg, mb);
        msg
    }

    #[test]
    fn test_empty_response() {
        let msg = decode(&[0; 7]);
        assert_eq!(msg.commb_format, Some(CommBFormat::EmptyResponse));
    }

    #[test]
    fn test_aircraft_ident() {
        // KLM1023 as carried in BDS2,0
        let field = [0x20, 0x2C, 0xC3, 0x71, 0xC3, 0x2C, 0xE0];
        let msg = decode(&field);
        assert_eq!(msg.commb_format, Some(CommBFormat::AircraftIdent));
        assert_eq!(msg.callsign.as_deref(), Some("KLM1023 "));
    }

    #[test]
    fn test_datalink_caps() {
        let field = mb(&[(1, 8, 0x10), (25, 25, 1), (33, 40, 0x83)]);
        assert_eq!(classify(&field), CommBFormat::DatalinkCaps);
    }

    #[test]
    fn test_gicb_caps() {
        // BDS0,5 0,6 0,7 0,8 0,9 2,0 4,0 5,0 6,0 supported
        let field = mb(&[(1, 5, 0b11111), (7, 7, 1), (9, 9, 1), (16, 16, 1), (24, 24, 1)]);
        assert_eq!(classify(&field), CommBFormat::GicbCaps);
    }

    #[test]
    fn test_acas_ra() {
        let field = mb(&[(1, 8, 0x30), (9, 22, 0x1000), (29, 30, 1), (31, 56, 0x4840D6)]);
        let msg = decode(&field);
        assert_eq!(msg.commb_format, Some(CommBFormat::AcasRa));
        assert_eq!(msg.acas_ra, Some(field));

        let bad_tti = mb(&[(1, 8, 0x30), (29, 30, 3)]);
        assert_ne!(classify(&bad_tti), CommBFormat::AcasRa);
    }

    #[test]
    fn test_vertical_intent() {
        let field = mb(&[
            (1, 1, 1),
            (2, 13, 2250), // 36000 ft
            (27, 27, 1),
            (28, 39, 2132), // 1013.2 hPa
            (48, 48, 1),
            (49, 49, 1),
            (54, 54, 1),
            (55, 56, 2),
        ]);
        let msg = decode(&field);
        assert_eq!(msg.commb_format, Some(CommBFormat::VerticalIntent));
        assert_eq!(msg.nav.mcp_altitude, Some(36000));
        assert_eq!(msg.nav.fms_altitude, None);
        assert!((msg.nav.qnh.unwrap() - 1013.2).abs() < 0.01);
        assert_eq!(msg.nav.modes, Some(NavModes::VNAV));
        assert_eq!(msg.nav.altitude_source, Some(NavAltitudeSource::Mcp));
    }

    #[test]
    fn test_mrar() {
        let field = mb(&[
            (1, 4, 2),
            (5, 5, 1),
            (6, 14, 40),
            (15, 23, 128), // 90 degrees
            (24, 34, 0x7B0), // -20 C
            (35, 35, 1),
            (36, 46, 250),
            (47, 47, 1),
            (48, 49, 1),
        ]);
        let msg = decode(&field);
        assert_eq!(msg.commb_format, Some(CommBFormat::Mrar));
        let mrar = msg.mrar.unwrap();
        assert_eq!(mrar.source, Some(MrarSource::Gnss));
        assert_eq!(mrar.wind_speed, Some(40.0));
        assert_eq!(mrar.wind_dir, Some(90.0));
        assert_eq!(mrar.temperature, Some(-20.0));
        assert_eq!(mrar.pressure, Some(250.0));
        assert_eq!(mrar.turbulence, Some(HazardLevel::Light));
        assert_eq!(mrar.humidity, None);
    }

    #[test]
    fn test_track_turn() {
        let field = mb(&[
            (1, 1, 1),
            (2, 11, 0x3E9), // -4.04 degrees roll
            (12, 12, 1),
            (13, 23, 512), // 90 degrees
            (24, 24, 1),
            (25, 34, 220), // 440 kt
            (46, 46, 1),
            (47, 56, 230), // 460 kt
        ]);
        let msg = decode(&field);
        assert_eq!(msg.commb_format, Some(CommBFormat::TrackTurn));
        assert!((msg.roll.unwrap() + 4.04).abs() < 0.01);
        let heading = msg.heading.unwrap();
        assert_eq!(heading.degrees, 90.0);
        assert_eq!(heading.kind, HeadingType::GroundTrack);
        assert_eq!(msg.gs.unwrap().v0, 440.0);
        assert_eq!(msg.tas, Some(460));
        assert_eq!(msg.track_rate, None);
    }

    #[test]
    fn test_heading_speed() {
        let field = mb(&[
            (1, 1, 1),
            (2, 12, 0x600), // -90, i.e. 270 degrees
            (13, 13, 1),
            (14, 23, 280),
            (24, 24, 1),
            (25, 34, 195), // Mach 0.78
            (35, 35, 1),
            (36, 45, 0x3E0), // -1024 ft/min
        ]);
        let msg = decode(&field);
        assert_eq!(msg.commb_format, Some(CommBFormat::HeadingSpeed));
        let heading = msg.heading.unwrap();
        assert_eq!(heading.degrees, 270.0);
        assert_eq!(heading.kind, HeadingType::MagneticHeading);
        assert_eq!(msg.ias, Some(280));
        assert!((msg.mach.unwrap() - 0.78).abs() < 0.001);
        assert_eq!(msg.baro_rate, Some(-1024));
        assert_eq!(msg.geom_rate, None);
    }

    #[test]
    fn test_not_decoded() {
        // Status bits clear with data present fails every gated register
        let field = [0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let msg = decode(&field);
        assert_eq!(msg.commb_format, Some(CommBFormat::NotDecoded));
        assert!(msg.callsign.is_none());
        assert!(msg.heading.is_none());
    }

    #[test]
    fn test_ambiguous_carries_no_fields() {
        // Valid as both BDS5,0 (gs 440) and BDS6,0 (Mach 0.88)
        let field = mb(&[(24, 24, 1), (25, 34, 220)]);
        let msg = decode(&field);
        assert_eq!(msg.commb_format, Some(CommBFormat::Ambiguous));
        assert!(msg.gs.is_none());
        assert!(msg.ias.is_none());
        assert!(msg.mach.is_none());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let field = [0x20, 0x2C, 0xC3, 0x71, 0xC3, 0x2C, 0xE0];
        let first = classify(&field);
        for _ in 0..10 {
            assert_eq!(classify(&field), first);
        }
        assert_eq!(decode(&field).commb_format, Some(first));
    }
}
