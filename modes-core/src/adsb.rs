//! Extended squitter (DF17/18) ME field decoding.
//!
//! Handles the ADS-B type codes:
//! - TC 1-4:   Aircraft identification and category
//! - TC 5-8:   Surface position (movement, ground track, CPR)
//! - TC 0, 9-18: Airborne position, barometric altitude
//! - TC 19:    Airborne velocity (ground speed or airspeed)
//! - TC 20-22: Airborne position, GNSS altitude
//! - TC 23:    Test message (subtype 7 carries a squawk)
//! - TC 24:    Surface system status (recognised, nothing decoded)
//! - TC 28:    Aircraft status (emergency/squawk, ACAS RA broadcast)
//! - TC 29:    Target state and status
//! - TC 31:    Aircraft operational status
//!
//! CPR fields are populated here but never resolved into a position.

use crate::decode::decode_ac12;
use crate::frame::{getbit, getbits};
use crate::message::{
    AirGround, Capabilities, Category, CprFrame, CprType, DecodedMessage, Emergency, GroundSpeed,
    Heading, HeadingType, NavAltitudeSource, NavModes, OpStatus, OperationalModes, SilType, Squawk,
};
use crate::mode_ac::id13_to_mode_a;
use crate::types::{decode_callsign, AddressType, DataSource};

/// Decode a DF17 ME field into `msg`.
pub fn decode_df17(msg: &mut DecodedMessage, me: &[u8; 7]) {
    msg.addrtype = AddressType::AdsbIcao;
    decode_es(msg, me, false);
}

/// Decode a DF18 frame according to its control field.
///
/// CF 4 (TIS-B/ADS-R management) and CF 7 (reserved) are not decoded.
pub fn decode_df18(msg: &mut DecodedMessage, cf: u8, me: &[u8; 7]) {
    match cf {
        0 => {
            msg.addrtype = AddressType::AdsbIcaoNt;
            decode_es(msg, me, false);
        }
        1 => {
            msg.address = msg.address.to_non_icao();
            msg.addrtype = AddressType::AdsbOther;
            decode_es(msg, me, false);
        }
        2 => {
            msg.addrtype = AddressType::TisbIcao;
            msg.source = msg.source.min(DataSource::Tisb);
            decode_es(msg, me, true);
        }
        3 => {
            msg.addrtype = AddressType::TisbIcao;
            msg.source = msg.source.min(DataSource::Tisb);
            decode_coarse_tisb(msg, me);
        }
        5 => {
            msg.address = msg.address.to_non_icao();
            msg.addrtype = AddressType::TisbOther;
            msg.source = msg.source.min(DataSource::Tisb);
            decode_es(msg, me, false);
        }
        6 => {
            msg.addrtype = AddressType::AdsrIcao;
            msg.source = msg.source.min(DataSource::Adsr);
            decode_es(msg, me, true);
        }
        _ => {}
    }
}

/// Re-label an ICAO address as non-ICAO when the IMF bit is set.
fn set_imf(msg: &mut DecodedMessage) {
    msg.address = msg.address.to_non_icao();
    msg.addrtype = match msg.addrtype {
        AddressType::AdsbIcao | AddressType::AdsbIcaoNt => AddressType::AdsbOther,
        AddressType::TisbIcao => AddressType::TisbTrackfile,
        AddressType::AdsrIcao => AddressType::AdsrOther,
        other => other,
    };
}

/// Dispatch on the ME type code. `check_imf` is set for relayed formats
/// (fine TIS-B, ADS-R) where one bit of each message flags the address as
/// non-ICAO.
pub fn decode_es(msg: &mut DecodedMessage, me: &[u8; 7], check_imf: bool) {
    let metype = getbits(me, 1, 5) as u8;
    msg.metype = Some(metype);

    match metype {
        1..=4 => decode_identification(msg, me, metype),
        5..=8 => decode_surface_position(msg, me, metype, check_imf),
        0 | 9..=18 | 20..=22 => decode_airborne_position(msg, me, metype, check_imf),
        19 => decode_airborne_velocity(msg, me, check_imf),
        23 => decode_test_message(msg, me),
        24 => {
            msg.mesub = Some(getbits(me, 6, 8) as u8);
        }
        28 => decode_aircraft_status(msg, me, check_imf),
        29 => decode_target_state(msg, me, check_imf),
        31 => decode_operational_status(msg, me, check_imf),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Identification
// ---------------------------------------------------------------------------

fn decode_identification(msg: &mut DecodedMessage, me: &[u8; 7], metype: u8) {
    let sub = getbits(me, 6, 8) as u8;
    msg.mesub = Some(sub);
    // Type 4 is set A, type 1 set D
    msg.category = Some(Category(((0x0E - metype) << 4) | sub));
    msg.callsign = decode_callsign(me, 9);
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Surface movement to ground speed, version 0 quantisation.
fn movement_v0(movement: u32) -> f32 {
    let kt = if movement > 123 {
        199
    } else if movement > 108 {
        (movement - 108) * 5 + 100
    } else if movement > 93 {
        (movement - 93) * 2 + 70
    } else if movement > 38 {
        (movement - 38) + 15
    } else if movement > 12 {
        ((movement - 11) >> 1) + 2
    } else if movement > 8 {
        ((movement - 6) >> 2) + 1
    } else {
        0
    };
    kt as f32
}

/// Surface movement to ground speed, version 2 quantisation.
fn movement_v2(movement: u32) -> f32 {
    let m = movement as f32;
    match movement {
        0..=1 => 0.0,
        2..=8 => (m - 1.0) * 0.125,
        9..=12 => 1.0 + (m - 9.0) * 0.25,
        13..=38 => 2.0 + (m - 13.0) * 0.5,
        39..=93 => 15.0 + (m - 39.0),
        94..=108 => 70.0 + (m - 94.0) * 2.0,
        109..=123 => 100.0 + (m - 109.0) * 5.0,
        _ => 175.0,
    }
}

fn decode_surface_position(msg: &mut DecodedMessage, me: &[u8; 7], metype: u8, check_imf: bool) {
    if check_imf && getbit(me, 21) != 0 {
        set_imf(msg);
    }

    msg.airground = Some(AirGround::Ground);

    let movement = getbits(me, 6, 12);
    if movement > 0 && movement < 125 {
        msg.gs = Some(GroundSpeed {
            v0: movement_v0(movement),
            v2: movement_v2(movement),
        });
    }

    if getbit(me, 13) != 0 {
        msg.heading = Some(Heading {
            degrees: getbits(me, 14, 20) as f32 * 360.0 / 128.0,
            kind: HeadingType::TrackOrHeading,
        });
    }

    msg.cpr = Some(CprFrame {
        lat: getbits(me, 23, 39),
        lon: getbits(me, 40, 56),
        odd: getbit(me, 22) != 0,
        kind: CprType::Surface,
        nucp: 14 - metype,
    });
}

fn decode_airborne_position(msg: &mut DecodedMessage, me: &[u8; 7], metype: u8, check_imf: bool) {
    if check_imf && getbit(me, 8) != 0 {
        set_imf(msg);
    } else {
        msg.accuracy.nic_b = Some(getbit(me, 8) != 0);
    }

    match getbits(me, 6, 7) {
        1 | 2 => {
            msg.alert = Some(true);
            msg.spi = Some(false);
        }
        3 => {
            msg.alert = Some(false);
            msg.spi = Some(true);
        }
        _ => {
            msg.alert = Some(false);
            msg.spi = Some(false);
        }
    }

    let ac12 = getbits(me, 9, 20);
    if ac12 != 0 {
        if let Some(alt) = decode_ac12(ac12) {
            if (20..=22).contains(&metype) {
                msg.geom_alt = Some(alt);
            } else {
                msg.baro_alt = Some(alt);
            }
        }
    }

    msg.airground = Some(AirGround::Airborne);

    if metype == 0 {
        return;
    }
    let nucp = if metype >= 20 { 29 - metype } else { 18 - metype };
    msg.cpr = Some(CprFrame {
        lat: getbits(me, 23, 39),
        lon: getbits(me, 40, 56),
        odd: getbit(me, 22) != 0,
        kind: CprType::Airborne,
        nucp,
    });
}

/// Coarse TIS-B airborne position (DF18 CF=3).
///
/// Layout: IMF(1) SVID(2-5) altitude(6-17) track status(18) track(19-23)
/// ground speed(24-29) CPR format(30) lat(31-42) lon(43-54).
fn decode_coarse_tisb(msg: &mut DecodedMessage, me: &[u8; 7]) {
    if getbit(me, 1) != 0 {
        set_imf(msg);
    }

    let ac12 = getbits(me, 6, 17);
    if ac12 != 0 {
        msg.baro_alt = decode_ac12(ac12);
    }

    if getbit(me, 18) != 0 {
        msg.heading = Some(Heading {
            degrees: getbits(me, 19, 23) as f32 * 11.25,
            kind: HeadingType::GroundTrack,
        });
    }

    let speed = getbits(me, 24, 29);
    if speed != 0 {
        msg.gs = Some(GroundSpeed::both((speed - 1) as f32 * 16.0));
    }

    msg.airground = Some(AirGround::Airborne);
    msg.cpr = Some(CprFrame {
        lat: getbits(me, 31, 42),
        lon: getbits(me, 43, 54),
        odd: getbit(me, 30) != 0,
        kind: CprType::Coarse,
        nucp: 0,
    });
}

// ---------------------------------------------------------------------------
// Velocity
// ---------------------------------------------------------------------------

fn decode_airborne_velocity(msg: &mut DecodedMessage, me: &[u8; 7], check_imf: bool) {
    let sub = getbits(me, 6, 8) as u8;
    msg.mesub = Some(sub);
    if !(1..=4).contains(&sub) {
        return;
    }

    if check_imf && getbit(me, 9) != 0 {
        set_imf(msg);
    }

    let vert_rate = getbits(me, 38, 46) as i32;
    if vert_rate != 0 {
        let mut rate = (vert_rate - 1) * 64;
        if getbit(me, 37) != 0 {
            rate = -rate;
        }
        // Source bit: 1 = barometric, 0 = GNSS
        if getbit(me, 36) != 0 {
            msg.baro_rate = Some(rate);
        } else {
            msg.geom_rate = Some(rate);
        }
    }

    let supersonic = sub == 2 || sub == 4;
    let scale = if supersonic { 4 } else { 1 };

    match sub {
        1 | 2 => {
            let ew_raw = getbits(me, 15, 24) as i32;
            let ns_raw = getbits(me, 26, 35) as i32;
            if ew_raw != 0 && ns_raw != 0 {
                let mut ew = (ew_raw - 1) * scale;
                if getbit(me, 14) != 0 {
                    ew = -ew;
                }
                let mut ns = (ns_raw - 1) * scale;
                if getbit(me, 25) != 0 {
                    ns = -ns;
                }

                let (ew, ns) = (ew as f64, ns as f64);
                msg.gs = Some(GroundSpeed::both((ew * ew + ns * ns).sqrt() as f32));
                if ew != 0.0 || ns != 0.0 {
                    msg.heading = Some(Heading {
                        degrees: ew.atan2(ns).to_degrees().rem_euclid(360.0) as f32,
                        kind: HeadingType::GroundTrack,
                    });
                }
            }
        }
        _ => {
            let airspeed = getbits(me, 26, 35);
            if airspeed != 0 {
                let kt = (airspeed - 1) * scale as u32;
                if getbit(me, 25) != 0 {
                    msg.tas = Some(kt);
                } else {
                    msg.ias = Some(kt);
                }
            }
            if getbit(me, 14) != 0 {
                msg.heading = Some(Heading {
                    degrees: getbits(me, 15, 24) as f32 * 360.0 / 1024.0,
                    kind: HeadingType::MagneticOrTrue,
                });
            }
        }
    }

    let raw_delta = getbits(me, 50, 56) as i32;
    if raw_delta != 0 {
        let delta = (raw_delta - 1) * 25;
        msg.geom_delta = Some(if getbit(me, 49) != 0 { -delta } else { delta });
    }

    msg.accuracy.nac_v = Some(getbits(me, 11, 13) as u8);
    msg.airground = Some(AirGround::Airborne);
}

// ---------------------------------------------------------------------------
// Status messages
// ---------------------------------------------------------------------------

fn decode_test_message(msg: &mut DecodedMessage, me: &[u8; 7]) {
    let sub = getbits(me, 6, 8) as u8;
    msg.mesub = Some(sub);
    if sub == 7 {
        let id13 = getbits(me, 9, 21);
        if id13 != 0 {
            msg.squawk = Some(Squawk(id13_to_mode_a(id13) & 0x7777));
        }
    }
}

fn decode_aircraft_status(msg: &mut DecodedMessage, me: &[u8; 7], check_imf: bool) {
    let sub = getbits(me, 6, 8) as u8;
    msg.mesub = Some(sub);
    if check_imf && getbit(me, 56) != 0 {
        set_imf(msg);
    }

    match sub {
        1 => {
            msg.emergency = Some(Emergency::from_code(getbits(me, 9, 11) as u8));
            let id13 = getbits(me, 12, 24);
            if id13 != 0 {
                msg.squawk = Some(Squawk(id13_to_mode_a(id13) & 0x7777));
            }
        }
        2 => msg.acas_ra = Some(*me),
        _ => {}
    }
}

fn decode_target_state(msg: &mut DecodedMessage, me: &[u8; 7], check_imf: bool) {
    let sub = getbits(me, 6, 7) as u8;
    msg.mesub = Some(sub);
    if check_imf && getbit(me, 51) != 0 {
        set_imf(msg);
    }

    match sub {
        0 => {
            // Version 1 layout
            msg.accuracy.nac_p = Some(getbits(me, 40, 43) as u8);
            msg.accuracy.nic_baro = Some(getbit(me, 44) != 0);
            msg.accuracy.sil = Some(getbits(me, 45, 46) as u8);
            msg.accuracy.sil_type = Some(SilType::Unknown);
        }
        1 => {
            // Version 2 layout
            msg.accuracy.sil_type = Some(if getbit(me, 8) != 0 {
                SilType::PerSample
            } else {
                SilType::PerHour
            });

            let fms = getbit(me, 9) != 0;
            let alt_bits = getbits(me, 10, 20) as i32;
            if alt_bits != 0 {
                let alt = (alt_bits - 1) * 32;
                if fms {
                    msg.nav.fms_altitude = Some(alt);
                } else {
                    msg.nav.mcp_altitude = Some(alt);
                }
                msg.nav.altitude_source = Some(if fms {
                    NavAltitudeSource::Fms
                } else {
                    NavAltitudeSource::Mcp
                });
            }

            let baro_bits = getbits(me, 21, 29);
            if baro_bits != 0 {
                msg.nav.qnh = Some(800.0 + (baro_bits - 1) as f32 * 0.8);
            }

            if getbit(me, 30) != 0 {
                msg.nav.selected_heading = Some(getbits(me, 31, 39) as f32 * 180.0 / 256.0);
            }

            msg.accuracy.nac_p = Some(getbits(me, 40, 43) as u8);
            msg.accuracy.nic_baro = Some(getbit(me, 44) != 0);
            msg.accuracy.sil = Some(getbits(me, 45, 46) as u8);

            if getbit(me, 47) != 0 {
                let mut modes = NavModes::empty();
                modes.set(NavModes::AUTOPILOT, getbit(me, 48) != 0);
                modes.set(NavModes::VNAV, getbit(me, 49) != 0);
                modes.set(NavModes::ALT_HOLD, getbit(me, 50) != 0);
                modes.set(NavModes::APPROACH, getbit(me, 52) != 0);
                modes.set(NavModes::TCAS, getbit(me, 53) != 0);
                modes.set(NavModes::LNAV, getbit(me, 54) != 0);
                msg.nav.modes = Some(modes);
            }
        }
        _ => {}
    }
}

fn decode_operational_status(msg: &mut DecodedMessage, me: &[u8; 7], check_imf: bool) {
    let sub = getbits(me, 6, 8) as u8;
    msg.mesub = Some(sub);
    if sub > 1 {
        return;
    }
    if check_imf && getbit(me, 56) != 0 {
        set_imf(msg);
    }

    let surface = sub == 1;
    let version = getbits(me, 41, 43) as u8;
    let mut status = OpStatus {
        version,
        capabilities: Capabilities::empty(),
        modes: OperationalModes::empty(),
        hrd: HeadingType::TrueHeading,
        tah: HeadingType::GroundTrack,
        length_width: None,
        antenna_offset: None,
    };

    if version == 0 {
        msg.opstatus = Some(status);
        return;
    }

    let cc = &mut status.capabilities;
    if surface {
        cc.set(Capabilities::POA, getbit(me, 11) != 0);
        cc.set(Capabilities::CDTI, version == 1 && getbit(me, 12) != 0);
        cc.set(Capabilities::ES_1090_IN, version >= 2 && getbit(me, 12) != 0);
        cc.set(Capabilities::B2_LOW, getbit(me, 15) != 0);
        if version >= 2 {
            cc.set(Capabilities::UAT_IN, getbit(me, 16) != 0);
            msg.accuracy.nac_v = Some(getbits(me, 17, 19) as u8);
            msg.accuracy.nic_c = Some(getbit(me, 20) != 0);
            cc.insert(Capabilities::LW_VALID);
            status.length_width = Some(getbits(me, 21, 24) as u8);
            status.antenna_offset = Some(getbits(me, 33, 40) as u8);
        }
    } else {
        if version == 1 {
            // v1 carries "not ACAS" here
            cc.set(Capabilities::ACAS, getbit(me, 11) == 0);
            cc.set(Capabilities::CDTI, getbit(me, 12) != 0);
        } else {
            cc.set(Capabilities::ACAS, getbit(me, 11) != 0);
            cc.set(Capabilities::ES_1090_IN, getbit(me, 12) != 0);
            cc.set(Capabilities::UAT_IN, getbit(me, 19) != 0);
        }
        cc.set(Capabilities::ARV, getbit(me, 15) != 0);
        cc.set(Capabilities::TS, getbit(me, 16) != 0);
        cc.set(Capabilities::TC, getbits(me, 17, 18) != 0);
    }

    if getbits(me, 25, 26) == 0 {
        let om = &mut status.modes;
        om.set(OperationalModes::ACAS_RA_ACTIVE, getbit(me, 27) != 0);
        om.set(OperationalModes::IDENT_ACTIVE, getbit(me, 28) != 0);
        om.set(OperationalModes::ATC_SERVICES, getbit(me, 29) != 0);
        om.set(OperationalModes::SINGLE_ANTENNA, getbit(me, 30) != 0);
        if version >= 2 {
            msg.accuracy.sda = Some(getbits(me, 31, 32) as u8);
        }
    }

    msg.accuracy.nic_a = Some(getbit(me, 44) != 0);
    msg.accuracy.nac_p = Some(getbits(me, 45, 48) as u8);
    msg.accuracy.sil = Some(getbits(me, 51, 52) as u8);
    if version >= 2 {
        if !surface {
            msg.accuracy.gva = Some(getbits(me, 49, 50) as u8);
        }
        msg.accuracy.sil_type = Some(if getbit(me, 55) != 0 {
            SilType::PerSample
        } else {
            SilType::PerHour
        });
    } else {
        msg.accuracy.sil_type = Some(SilType::Unknown);
    }

    status.hrd = if getbit(me, 54) != 0 {
        HeadingType::MagneticHeading
    } else {
        HeadingType::TrueHeading
    };

    if surface {
        status.tah = if getbit(me, 53) != 0 {
            status.hrd
        } else {
            HeadingType::GroundTrack
        };
    } else {
        msg.accuracy.nic_baro = Some(getbit(me, 53) != 0);
    }

    msg.opstatus = Some(status);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
