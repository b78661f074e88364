//! Compact Position Reporting: CPR decode and encode.
//!
//! Decode modes:
//! - Global airborne: even+odd frame pair, no reference needed.
//! - Global surface: even+odd pair plus a reference to pick the quadrant
//!   (surface cells are 90° instead of 360°).
//! - Relative (local): a single frame plus a reference within half a cell.
//! - Coarse TIS-B: 12-bit CPR scaled to 17 bits and decoded relatively.
//!
//! Key constants:
//! - NZ = 15 (latitude zones per hemisphere for even frames)
//! - Nb = 17 (bits per coordinate)
//! - Dlat_even = 360 / (4 * NZ) = 6.0 degrees
//! - Dlat_odd = 360 / (4 * NZ - 1) ≈ 6.1017 degrees

use thiserror::Error;

use crate::message::CprType;

/// Number of latitude zones per hemisphere.
const NZ: f64 = 15.0;

/// Maximum CPR value (2^17 = 131072).
const CPR_MAX: f64 = 131072.0;

/// Coarse TIS-B positions carry 12-bit CPR values.
const COARSE_SHIFT: u32 = 5;

const EARTH_RADIUS_M: f64 = 6371e3;

pub const METERS_PER_NM: f64 = 1852.0;

/// Why a CPR decode produced no position.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CprError {
    #[error("decoded latitude out of range")]
    LatitudeOutOfRange,
    #[error("even and odd frames fall in different longitude zones")]
    ZoneMismatch,
    #[error("position is more than half a cell from the reference")]
    OutsideCell,
    #[error("position is {distance_m:.0} m from the reference, limit {limit_m:.0} m")]
    OutOfRange { distance_m: f64, limit_m: f64 },
    #[error("no reference position available")]
    NoReference,
    #[error("even/odd frames are {age:.1} s apart")]
    PairTooOld { age: f64 },
    #[error("even and odd frames are of different types")]
    TypeMismatch,
}

// ---------------------------------------------------------------------------
// NL function
// ---------------------------------------------------------------------------

/// Latitudes (degrees) below which NL takes the paired value.
///
/// Precomputed from NL(lat) = floor(2π / acos(1 - (1 - cos(π/2NZ)) / cos²(π lat/180))).
const NL_TABLE: [(f64, u32); 58] = [
    (10.47047130, 59),
    (14.82817437, 58),
    (18.18626357, 57),
    (21.02939493, 56),
    (23.54504487, 55),
    (25.82924707, 54),
    (27.93898710, 53),
    (29.91135686, 52),
    (31.77209708, 51),
    (33.53993436, 50),
    (35.22899598, 49),
    (36.85025108, 48),
    (38.41241892, 47),
    (39.92256684, 46),
    (41.38651832, 45),
    (42.80914012, 44),
    (44.19454951, 43),
    (45.54626723, 42),
    (46.86733252, 41),
    (48.16039128, 40),
    (49.42776439, 39),
    (50.67150166, 38),
    (51.89342469, 37),
    (53.09516153, 36),
    (54.27817472, 35),
    (55.44378444, 34),
    (56.59318756, 33),
    (57.72747354, 32),
    (58.84763776, 31),
    (59.95459277, 30),
    (61.04917774, 29),
    (62.13216659, 28),
    (63.20427479, 27),
    (64.26616523, 26),
    (65.31845310, 25),
    (66.36171008, 24),
    (67.39646774, 23),
    (68.42322022, 22),
    (69.44242631, 21),
    (70.45451075, 20),
    (71.45986473, 19),
    (72.45884545, 18),
    (73.45177442, 17),
    (74.43893416, 16),
    (75.42056257, 15),
    (76.39684391, 14),
    (77.36789461, 13),
    (78.33374083, 12),
    (79.29428225, 11),
    (80.24923213, 10),
    (81.19801349, 9),
    (82.13956981, 8),
    (83.07199445, 7),
    (83.99173563, 6),
    (84.89166191, 5),
    (85.75541621, 4),
    (86.53536998, 3),
    (87.0, 2),
];

/// Number of longitude zones at a given latitude (NL function).
///
/// Ranges from 59 at the equator to 1 near the poles.
pub fn nl(lat: f64) -> u32 {
    let lat = lat.abs();
    NL_TABLE
        .iter()
        .find(|(threshold, _)| lat < *threshold)
        .map(|&(_, n)| n)
        .unwrap_or(1)
}

fn n_zones(lat: f64, odd: bool) -> u32 {
    nl(lat).saturating_sub(odd as u32).max(1)
}

fn dlon(lat: f64, odd: bool, surface: bool) -> f64 {
    let span = if surface { 90.0 } else { 360.0 };
    span / n_zones(lat, odd) as f64
}

fn dlat(odd: bool, surface: bool) -> f64 {
    let span = if surface { 90.0 } else { 360.0 };
    span / (4.0 * NZ - odd as u8 as f64)
}

/// Modulo that always returns a non-negative result.
fn modulo(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

/// Wrap a longitude into [-180, 180).
fn wrap_lon(lon: f64) -> f64 {
    lon - ((lon + 180.0) / 360.0).floor() * 360.0
}

// ---------------------------------------------------------------------------
// Global decode
// ---------------------------------------------------------------------------

/// Raw even/odd frame values needed for a global decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CprPair {
    pub even_lat: u32,
    pub even_lon: u32,
    pub odd_lat: u32,
    pub odd_lon: u32,
    /// True when the odd frame is the more recent one.
    pub odd_newer: bool,
}

/// Latitude index j and the two candidate latitudes of a pair.
fn pair_latitudes(pair: &CprPair, surface: bool) -> (f64, f64) {
    let lat0 = pair.even_lat as f64;
    let lat1 = pair.odd_lat as f64;
    let j = ((59.0 * lat0 - 60.0 * lat1) / CPR_MAX + 0.5).floor();
    let rlat0 = dlat(false, surface) * (modulo(j, 60.0) + lat0 / CPR_MAX);
    let rlat1 = dlat(true, surface) * (modulo(j, 59.0) + lat1 / CPR_MAX);
    (rlat0, rlat1)
}

/// Longitude from the newer frame once latitude is settled.
fn pair_longitude(pair: &CprPair, rlat: f64, surface: bool) -> f64 {
    let lon0 = pair.even_lon as f64;
    let lon1 = pair.odd_lon as f64;
    let nl_val = nl(rlat) as f64;
    let m = ((lon0 * (nl_val - 1.0) - lon1 * nl_val) / CPR_MAX + 0.5).floor();
    let odd = pair.odd_newer;
    let ni = n_zones(rlat, odd) as f64;
    let frame_lon = if odd { lon1 } else { lon0 };
    dlon(rlat, odd, surface) * (modulo(m, ni) + frame_lon / CPR_MAX)
}

/// Global airborne decode from an even/odd frame pair.
///
/// Returns `(latitude, longitude)` of the newer frame.
pub fn decode_airborne(pair: &CprPair) -> Result<(f64, f64), CprError> {
    let (mut rlat0, mut rlat1) = pair_latitudes(pair, false);

    // Southern hemisphere values are 270..360
    if rlat0 >= 270.0 {
        rlat0 -= 360.0;
    }
    if rlat1 >= 270.0 {
        rlat1 -= 360.0;
    }

    if !(-90.0..=90.0).contains(&rlat0) || !(-90.0..=90.0).contains(&rlat1) {
        return Err(CprError::LatitudeOutOfRange);
    }
    if nl(rlat0) != nl(rlat1) {
        return Err(CprError::ZoneMismatch);
    }

    let rlat = if pair.odd_newer { rlat1 } else { rlat0 };
    let rlon = pair_longitude(pair, rlat, false);
    Ok((rlat, wrap_lon(rlon)))
}

/// Global surface decode. The reference picks the quadrant closest to it,
/// which is not necessarily the one containing it.
pub fn decode_surface(pair: &CprPair, ref_lat: f64, ref_lon: f64) -> Result<(f64, f64), CprError> {
    let (mut rlat0, mut rlat1) = pair_latitudes(pair, true);

    rlat0 += ((ref_lat - rlat0 + 45.0) / 90.0).floor() * 90.0;
    rlat1 += ((ref_lat - rlat1 + 45.0) / 90.0).floor() * 90.0;

    if !(-90.0..=90.0).contains(&rlat0) || !(-90.0..=90.0).contains(&rlat1) {
        return Err(CprError::LatitudeOutOfRange);
    }
    if nl(rlat0) != nl(rlat1) {
        return Err(CprError::ZoneMismatch);
    }

    let rlat = if pair.odd_newer { rlat1 } else { rlat0 };
    let mut rlon = pair_longitude(pair, rlat, true);
    rlon += ((ref_lon - rlon + 45.0) / 90.0).floor() * 90.0;
    Ok((rlat, wrap_lon(rlon)))
}

// ---------------------------------------------------------------------------
// Relative decode
// ---------------------------------------------------------------------------

/// Decode a single frame relative to a reference position.
///
/// Fails if the result lies more than half a cell from the reference in
/// either axis, since the frame would then be ambiguous.
pub fn decode_relative(
    ref_lat: f64,
    ref_lon: f64,
    cpr_lat: u32,
    cpr_lon: u32,
    odd: bool,
    surface: bool,
) -> Result<(f64, f64), CprError> {
    let frac_lat = cpr_lat as f64 / CPR_MAX;
    let frac_lon = cpr_lon as f64 / CPR_MAX;

    let dl = dlat(odd, surface);
    let j = (ref_lat / dl).floor() + (0.5 + modulo(ref_lat, dl) / dl - frac_lat).floor();
    let mut rlat = dl * (j + frac_lat);
    if rlat >= 270.0 {
        rlat -= 360.0;
    }
    if !(-90.0..=90.0).contains(&rlat) {
        return Err(CprError::LatitudeOutOfRange);
    }
    if (rlat - ref_lat).abs() > dl / 2.0 {
        return Err(CprError::OutsideCell);
    }

    let dlo = dlon(rlat, odd, surface);
    let m = (ref_lon / dlo).floor() + (0.5 + modulo(ref_lon, dlo) / dlo - frac_lon).floor();
    let mut rlon = dlo * (m + frac_lon);
    if rlon > 180.0 {
        rlon -= 360.0;
    }
    if (rlon - ref_lon).abs() > dlo / 2.0 {
        return Err(CprError::OutsideCell);
    }

    Ok((rlat, rlon))
}

/// Decode a coarse (12-bit) TIS-B position relative to a reference.
pub fn decode_coarse(
    ref_lat: f64,
    ref_lon: f64,
    cpr_lat: u32,
    cpr_lon: u32,
    odd: bool,
) -> Result<(f64, f64), CprError> {
    decode_relative(
        ref_lat,
        ref_lon,
        (cpr_lat & 0xFFF) << COARSE_SHIFT,
        (cpr_lon & 0xFFF) << COARSE_SHIFT,
        odd,
        false,
    )
}

/// Decode one frame of the given type relative to a reference.
pub fn decode_relative_frame(
    ref_lat: f64,
    ref_lon: f64,
    cpr_lat: u32,
    cpr_lon: u32,
    odd: bool,
    kind: CprType,
) -> Result<(f64, f64), CprError> {
    match kind {
        CprType::Airborne => decode_relative(ref_lat, ref_lon, cpr_lat, cpr_lon, odd, false),
        CprType::Surface => decode_relative(ref_lat, ref_lon, cpr_lat, cpr_lon, odd, true),
        CprType::Coarse => decode_coarse(ref_lat, ref_lon, cpr_lat, cpr_lon, odd),
    }
}

/// Range limit when decoding relative to the receiver location.
///
/// An airborne cell is at least 360 NM, so half a cell is 180 NM. A larger
/// configured range leaves only `360 - max_range` NM of unambiguous radius,
/// and at 360 NM nothing is unambiguous.
pub fn receiver_range_limit(max_range_nm: f64) -> Option<f64> {
    if max_range_nm <= 0.0 {
        None
    } else if max_range_nm <= 180.0 {
        Some(max_range_nm * METERS_PER_NM)
    } else if max_range_nm < 360.0 {
        Some((360.0 - max_range_nm) * METERS_PER_NM)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

fn encode(lat: f64, lon: f64, odd: bool, surface: bool) -> (u32, u32) {
    let dl = dlat(odd, surface);
    let yz = (CPR_MAX * (modulo(lat, dl) / dl) + 0.5).floor();
    let rlat = dl * (yz / CPR_MAX + (lat / dl).floor());
    let dlo = dlon(rlat, odd, surface);
    let xz = (CPR_MAX * (modulo(lon, dlo) / dlo) + 0.5).floor();
    ((yz as u32) & 0x1FFFF, (xz as u32) & 0x1FFFF)
}

/// Encode a position as an airborne CPR frame, returning `(lat, lon)`.
pub fn encode_airborne(lat: f64, lon: f64, odd: bool) -> (u32, u32) {
    encode(lat, lon, odd, false)
}

/// Encode a position as a surface CPR frame, returning `(lat, lon)`.
pub fn encode_surface(lat: f64, lon: f64, odd: bool) -> (u32, u32) {
    encode(lat, lon, odd, true)
}

// ---------------------------------------------------------------------------
// Integrity
// ---------------------------------------------------------------------------

/// Navigation Integrity Category and containment radius (metres) for a
/// position-bearing ES type.
///
/// Version 2 reads NIC supplements A/B (airborne) or A/C (surface); version 1
/// only has supplement A; version 0 has none.
pub fn nic_rc(metype: u8, version: u8, nic_a: bool, nic_b: bool, nic_c: bool) -> (u8, u32) {
    let (a, b, c) = match version {
        0 => (false, false, false),
        1 => (nic_a, nic_a, false),
        _ => (nic_a, nic_b, nic_c),
    };

    match metype {
        5 | 9 | 20 => (11, 8),
        6 | 10 | 21 => (10, 25),
        7 => {
            if (version == 2 && a && !c) || (version == 1 && a) {
                (9, 75)
            } else {
                (8, 186)
            }
        }
        8 => match (version, a, c) {
            (2, true, true) => (7, 370),
            (2, false, true) => (6, 556),
            (2, true, false) => (6, 1112),
            _ => (0, 0),
        },
        11 => {
            if a && b {
                (9, 75)
            } else {
                (8, 186)
            }
        }
        12 => (7, 370),
        13 => match (version, a, b) {
            (2, false, true) => (6, 556),
            (2, true, true) | (1, true, _) => (6, 1112),
            _ => (6, 926),
        },
        14 => (5, 1852),
        15 => (4, 3704),
        16 => {
            if a && b {
                (3, 7408)
            } else {
                (2, 14816)
            }
        }
        17 => (1, 37040),
        _ => (0, 0),
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Great-circle distance in metres.
pub fn distance_m(lat0: f64, lon0: f64, lat1: f64, lon1: f64) -> f64 {
    let p0 = lat0.to_radians();
    let p1 = lat1.to_radians();
    let dp = p1 - p0;
    let dl = (lon1 - lon0).to_radians();
    let h = (dp / 2.0).sin().powi(2) + p0.cos() * p1.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const ROME: (f64, f64) = (41.8902, 12.4922);

    fn riddle_pair(odd_newer: bool) -> CprPair {
        CprPair {
            even_lat: 93000,
            even_lon: 51372,
            odd_lat: 74158,
            odd_lon: 50194,
            odd_newer,
        }
    }

    #[test]
    fn test_nl_equator() {
        assert_eq!(nl(0.0), 59);
        assert_eq!(nl(10.0), 59);
        assert_eq!(nl(10.5), 58);
    }

    #[test]
    fn test_nl_poles() {
        assert_eq!(nl(87.0), 1);
        assert_eq!(nl(-87.0), 1);
        assert_eq!(nl(90.0), 1);
        assert_eq!(nl(86.9), 2);
    }

    #[test]
    fn test_nl_symmetric() {
        assert_eq!(nl(52.0), 36);
        assert_eq!(nl(-52.0), 36);
    }

    #[test]
    fn test_global_decode_known_pair() {
        // "The 1090MHz Riddle" pair, even frame newer
        let (lat, lon) = decode_airborne(&riddle_pair(false)).unwrap();
        assert_abs_diff_eq!(lat, 52.2572021484375, epsilon = 1e-9);
        assert_abs_diff_eq!(lon, 3.91937255859375, epsilon = 1e-9);
    }

    #[test]
    fn test_global_decode_odd_newer() {
        let (lat, lon) = decode_airborne(&riddle_pair(true)).unwrap();
        assert_abs_diff_eq!(lat, 52.26578, epsilon = 1e-4);
        assert_abs_diff_eq!(lon, 3.93891, epsilon = 1e-4);
    }

    #[test]
    fn test_rome_airborne_round_trip() {
        let (even_lat, even_lon) = encode_airborne(ROME.0, ROME.1, false);
        let (odd_lat, odd_lon) = encode_airborne(ROME.0, ROME.1, true);
        assert_eq!((even_lat, even_lon), (128673, 69052));
        assert_eq!((odd_lat, odd_lon), (113422, 64504));

        for odd_newer in [false, true] {
            let pair = CprPair {
                even_lat,
                even_lon,
                odd_lat,
                odd_lon,
                odd_newer,
            };
            let (lat, lon) = decode_airborne(&pair).unwrap();
            let err = distance_m(ROME.0, ROME.1, lat, lon);
            assert!(err < 5.0, "decoded {lat},{lon} is {err} m off");
        }
    }

    #[test]
    fn test_rome_surface_round_trip() {
        let (even_lat, even_lon) = encode_surface(ROME.0, ROME.1, false);
        let (odd_lat, odd_lon) = encode_surface(ROME.0, ROME.1, true);
        assert_eq!((even_lat, even_lon), (121478, 14064));
        assert_eq!((odd_lat, odd_lon), (60471, 126943));

        let pair = CprPair {
            even_lat,
            even_lon,
            odd_lat,
            odd_lon,
            odd_newer: false,
        };
        let (lat, lon) = decode_surface(&pair, 41.9, 12.5).unwrap();
        assert!(distance_m(ROME.0, ROME.1, lat, lon) < 5.0);

        let (lat, lon) = decode_relative(41.9, 12.5, even_lat, even_lon, false, true).unwrap();
        assert!(distance_m(ROME.0, ROME.1, lat, lon) < 5.0);
    }

    #[test]
    fn test_relative_decode() {
        let (lat, lon) = decode_relative(52.25, 3.92, 93000, 51372, false, false).unwrap();
        assert_abs_diff_eq!(lat, 52.2572021484375, epsilon = 1e-9);
        assert_abs_diff_eq!(lon, 3.91937255859375, epsilon = 1e-9);

        let (lat, lon) = decode_relative(52.25, 3.92, 74158, 50194, true, false).unwrap();
        assert_abs_diff_eq!(lat, 52.26578, epsilon = 1e-4);
        assert_abs_diff_eq!(lon, 3.93891, epsilon = 1e-4);
    }

    #[test]
    fn test_relative_decode_distant_reference_picks_wrong_zone() {
        let (even_lat, even_lon) = encode_airborne(ROME.0, ROME.1, false);

        let (lat, lon) = decode_relative(41.9, 12.5, even_lat, even_lon, false, false).unwrap();
        assert!(distance_m(ROME.0, ROME.1, lat, lon) < 5.0);

        // 4° north the frame still falls within half a cell, but of the
        // wrong zone; this is why callers must apply a range limit.
        let (lat, _) = decode_relative(46.0, 12.5, even_lat, even_lon, false, false).unwrap();
        assert_abs_diff_eq!(lat, 47.89018, epsilon = 1e-4);
        assert!((lat - ROME.0).abs() > 5.0);
    }

    #[test]
    fn test_coarse_decode() {
        let (even_lat, even_lon) = encode_airborne(ROME.0, ROME.1, false);
        let (lat, lon) = decode_coarse(41.9, 12.5, even_lat >> 5, even_lon >> 5, false).unwrap();
        assert!(distance_m(ROME.0, ROME.1, lat, lon) < 500.0);
    }

    #[test]
    fn test_receiver_range_limit() {
        assert_eq!(receiver_range_limit(100.0), Some(100.0 * METERS_PER_NM));
        assert_eq!(receiver_range_limit(300.0), Some(60.0 * METERS_PER_NM));
        assert_eq!(receiver_range_limit(360.0), None);
        assert_eq!(receiver_range_limit(0.0), None);
    }

    #[test]
    fn test_nic_rc() {
        assert_eq!(nic_rc(9, 2, false, false, false), (11, 8));
        assert_eq!(nic_rc(11, 2, true, true, false), (9, 75));
        assert_eq!(nic_rc(11, 2, true, false, false), (8, 186));
        assert_eq!(nic_rc(11, 1, true, false, false), (9, 75));
        assert_eq!(nic_rc(11, 0, true, true, true), (8, 186));
        assert_eq!(nic_rc(8, 2, true, false, true), (7, 370));
        assert_eq!(nic_rc(8, 0, true, false, true), (0, 0));
        assert_eq!(nic_rc(16, 2, true, true, false), (3, 7408));
        assert_eq!(nic_rc(18, 2, true, true, true), (0, 0));
    }

    #[test]
    fn test_distance() {
        assert_abs_diff_eq!(distance_m(0.0, 0.0, 0.0, 1.0), 111_195.0, epsilon = 10.0);
        assert_eq!(distance_m(41.9, 12.5, 41.9, 12.5), 0.0);
    }

    #[test]
    fn test_modulo_negative() {
        assert!((modulo(-1.0, 60.0) - 59.0).abs() < 1e-10);
    }
}
