//! Decode Mode S frames into typed aircraft messages.
//!
//! Handles all Downlink Formats:
//! - DF0/16:   Air-air surveillance (altitude, vertical status, ACAS RA in MV)
//! - DF4/20:   Surveillance / Comm-B altitude reply
//! - DF5/21:   Surveillance / Comm-B identity reply (squawk)
//! - DF11:     All-call reply (address acquisition, interrogator identifier)
//! - DF17/18:  Extended squitter, see [`crate::adsb`]
//! - DF24:     Comm-D extended length message (fields only)
//!
//! CRC validation and bit-error correction happen here, before any field is
//! trusted. Addresses recovered from address/parity overlays are checked
//! against the [`IcaoCache`].

use tracing::debug;

use crate::adsb::{decode_df17, decode_df18};
use crate::commb::decode_commb;
use crate::config::DecoderConfig;
use crate::crc::{crc24, fix_errors, fix_errors_including_df};
use crate::frame::{IcaoCache, ModeFrame};
use crate::message::{AirGround, Altitude, DecodedMessage, RxMeta, Squawk};
use crate::mode_ac::{id13_to_mode_a, mode_a_to_mode_c, mode_ac_message, ModeAcDetector};
use crate::types::*;

// ---------------------------------------------------------------------------
// Altitude decoding
// ---------------------------------------------------------------------------

/// Decode the 13-bit AC field of DF0/4/16/20.
///
/// M-bit and Q-bit select the mode:
/// - M=0, Q=1: 25-ft increments
/// - M=0, Q=0: 100-ft Gillham gray code
/// - M=1: metric altitude (not supported)
pub fn decode_ac13(ac13: u32) -> Option<Altitude> {
    if ac13 == 0 {
        return None;
    }

    if ac13 & 0x0040 != 0 {
        return None;
    }

    if ac13 & 0x0010 != 0 {
        // 25-ft mode: remove M and Q bits to get the 11-bit count
        let n = ((ac13 & 0x1F80) >> 2) | ((ac13 & 0x0020) >> 1) | (ac13 & 0x000F);
        return Some(Altitude::feet(n as i32 * 25 - 1000));
    }

    let hundreds = mode_a_to_mode_c(id13_to_mode_a(ac13))?;
    Some(Altitude::feet(hundreds * 100))
}

/// Decode the 12-bit altitude of an ES airborne position (the AC13 layout
/// without the M bit).
pub fn decode_ac12(ac12: u32) -> Option<Altitude> {
    if ac12 == 0 {
        return None;
    }

    if ac12 & 0x0010 != 0 {
        // 25-ft mode: remove the Q bit
        let n = ((ac12 & 0x0FE0) >> 1) | (ac12 & 0x000F);
        return Some(Altitude::feet(n as i32 * 25 - 1000));
    }

    // Re-insert a zero M bit and take the Gillham path
    let ac13 = ((ac12 & 0x0FC0) << 1) | (ac12 & 0x003F);
    decode_ac13(ac13)
}

/// Squawk from a 13-bit ID field.
pub fn decode_id13(id13: u32) -> Squawk {
    Squawk(id13_to_mode_a(id13) & 0x7777)
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Frame decoder: CRC handling, DF dispatch and the address cache.
pub struct Decoder {
    config: DecoderConfig,
    cache: IcaoCache,
    last_prune: f64,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        let cache = IcaoCache::new(config.address_ttl);
        Decoder {
            config,
            cache,
            last_prune: 0.0,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn cache(&self) -> &IcaoCache {
        &self.cache
    }

    /// Decode a frame from the demodulator.
    pub fn decode(&mut self, bytes: &[u8], meta: RxMeta) -> Result<DecodedMessage> {
        self.decode_inner(bytes, meta, None)
    }

    /// Decode a hex frame (14 or 28 characters) from the demodulator.
    pub fn decode_hex(&mut self, hex: &str, meta: RxMeta) -> Result<DecodedMessage> {
        let bytes = hex_decode(hex).ok_or_else(|| DecodeError::InvalidHex(hex.to_string()))?;
        self.decode(&bytes, meta)
    }

    /// Decode a frame that arrived from elsewhere (network, MLAT server).
    ///
    /// No error correction or CRC rejection is done and recovered addresses
    /// are not checked against the cache; the message carries `source`.
    pub fn decode_external(
        &mut self,
        bytes: &[u8],
        meta: RxMeta,
        source: DataSource,
    ) -> Result<DecodedMessage> {
        self.decode_inner(bytes, meta, Some(source))
    }

    /// Run the Mode A/C detector at `offset` and build a message from any
    /// reply found. Returns `None` when Mode A/C is disabled.
    pub fn decode_mode_ac(
        &self,
        detector: &ModeAcDetector,
        mag: &[u16],
        offset: usize,
        meta: RxMeta,
    ) -> Option<DecodedMessage> {
        if !self.config.mode_ac {
            return None;
        }
        let mode_a = detector.detect(mag, offset, meta.timestamp)?;
        Some(mode_ac_message(mode_a, meta))
    }

    fn decode_inner(
        &mut self,
        bytes: &[u8],
        meta: RxMeta,
        external: Option<DataSource>,
    ) -> Result<DecodedMessage> {
        let mut frame = ModeFrame::new(bytes.to_vec())?;
        if frame.df == 24 && !self.config.enable_df24 {
            return Err(DecodeError::Df24Disabled);
        }

        self.maybe_prune(meta.sys_time);

        let mut msg = DecodedMessage::new(bytes.to_vec(), meta);

        let residual = crc24(&frame.bytes);
        match frame.df {
            17 | 18 => self.check_extended_squitter(&mut frame, &mut msg, residual, external)?,
            11 => self.check_all_call(&mut frame, &mut msg, residual, external)?,
            _ => self.check_address_parity(&mut msg, residual, external)?,
        }

        msg.bytes = frame.bytes.clone();
        msg.df = frame.df;
        msg.fields = frame.fields();
        if frame.df == 11 {
            msg.fields.iid = Some((msg.crc & 0x7F) as u8);
        }

        decode_fields(&mut msg);
        Ok(msg)
    }

    /// DF17/18: the residual must be zero, possibly after correction.
    fn check_extended_squitter(
        &mut self,
        frame: &mut ModeFrame,
        msg: &mut DecodedMessage,
        residual: u32,
        external: Option<DataSource>,
    ) -> Result<()> {
        let mut residual = residual;

        if residual != 0 && external.is_none() && self.config.crc_bits > 0 {
            let mut fixed = frame.bytes.clone();
            let corrected = if self.config.fix_df {
                fix_errors_including_df(&mut fixed, residual, self.config.crc_bits)
            } else {
                fix_errors(&mut fixed, residual, self.config.crc_bits)
            };
            if let Some(n) = corrected {
                // A DF flip must still land on an ES format of the same length
                if let Ok(refixed) = ModeFrame::new(fixed) {
                    if matches!(refixed.df, 17 | 18) {
                        *frame = refixed;
                        msg.corrected_bits = n;
                        residual = 0;
                    }
                }
            }
        }

        if residual != 0 && external.is_none() && self.config.check_crc {
            debug!(syndrome = residual, "extended squitter failed CRC");
            return Err(DecodeError::CrcFailed { syndrome: residual });
        }

        let aa = frame.getbits(9, 32);
        msg.address = Address::icao(aa);
        msg.crc = residual;
        msg.source = match external {
            Some(source) => source,
            None if residual == 0 => DataSource::Adsb,
            None => DataSource::ModeS,
        };

        if residual == 0 {
            self.cache.register(msg.address, msg.sys_time);
        }
        Ok(())
    }

    /// DF11: the residual may carry an interrogator identifier in its low 7
    /// bits. Only single-bit errors against IID 0 are corrected.
    fn check_all_call(
        &mut self,
        frame: &mut ModeFrame,
        msg: &mut DecodedMessage,
        residual: u32,
        external: Option<DataSource>,
    ) -> Result<()> {
        let mut residual = residual;
        let mut valid = residual & 0xFF_FF80 == 0;

        if !valid && external.is_none() && self.config.crc_bits > 0 {
            let mut fixed = frame.bytes.clone();
            if let Some(n) = fix_errors(&mut fixed, residual, 1) {
                frame.bytes = fixed;
                msg.corrected_bits = n;
                residual = 0;
                valid = true;
            }
        }

        if !valid && external.is_none() && self.config.check_crc {
            debug!(syndrome = residual, "all-call reply failed CRC");
            return Err(DecodeError::CrcFailed { syndrome: residual });
        }

        msg.address = Address::icao(frame.getbits(9, 32));
        msg.addrtype = AddressType::AdsbIcao;
        msg.crc = residual;
        msg.source = match external {
            Some(source) => source,
            None if valid => DataSource::ModeSChecked,
            None => DataSource::ModeS,
        };

        if valid {
            self.cache.register(msg.address, msg.sys_time);
        }
        Ok(())
    }

    /// Address/parity formats: the residual is the address itself.
    fn check_address_parity(
        &mut self,
        msg: &mut DecodedMessage,
        residual: u32,
        external: Option<DataSource>,
    ) -> Result<()> {
        let address = Address::icao(residual);
        msg.address = address;
        msg.addrtype = AddressType::AdsbIcao;
        msg.crc = residual;

        msg.source = if let Some(source) = external {
            source
        } else if self.cache.is_known(&address, msg.sys_time) {
            DataSource::ModeSChecked
        } else if self.config.check_address {
            debug!(%address, "recovered address not recently seen");
            return Err(DecodeError::UnknownAddress(address));
        } else {
            DataSource::ModeS
        };
        Ok(())
    }

    fn maybe_prune(&mut self, now: f64) {
        if now - self.last_prune > self.config.address_ttl {
            self.cache.prune(now);
            self.last_prune = now;
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new(DecoderConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Per-DF field decoding
// ---------------------------------------------------------------------------

/// Flight status: (air/ground, alert, SPI).
fn flight_status(fs: u8) -> Option<(AirGround, bool, bool)> {
    match fs {
        0 => Some((AirGround::Uncertain, false, false)),
        1 => Some((AirGround::Ground, false, false)),
        2 => Some((AirGround::Uncertain, true, false)),
        3 => Some((AirGround::Ground, true, false)),
        4 => Some((AirGround::Uncertain, true, true)),
        5 => Some((AirGround::Uncertain, false, true)),
        _ => None,
    }
}

/// Air/ground from the capability field of DF11/17.
fn capability_airground(ca: u8) -> Option<AirGround> {
    match ca {
        4 => Some(AirGround::Ground),
        5 => Some(AirGround::Airborne),
        6 => Some(AirGround::Uncertain),
        _ => None,
    }
}

fn decode_fields(msg: &mut DecodedMessage) {
    let fields = msg.fields.clone();

    if let Some(ac) = fields.ac {
        msg.baro_alt = decode_ac13(ac as u32);
    }

    if let Some((airground, alert, spi)) = fields.fs.and_then(flight_status) {
        msg.airground = Some(airground);
        msg.alert = Some(alert);
        msg.spi = Some(spi);
    }

    match msg.df {
        0 | 16 => {
            msg.airground = Some(if fields.vs == Some(1) {
                AirGround::Ground
            } else {
                AirGround::Uncertain
            });
            if let Some(mv) = fields.mv {
                if mv[0] == 0x30 {
                    msg.acas_ra = Some(mv);
                }
            }
        }
        5 | 21 => {
            if let Some(id) = fields.id {
                msg.squawk = Some(decode_id13(id as u32));
            }
        }
        11 => {
            msg.airground = fields.ca.and_then(capability_airground);
        }
        17 => {
            msg.airground = fields.ca.and_then(capability_airground);
            if let Some(me) = fields.me {
                decode_df17(msg, &me);
            }
        }
        18 => {
            if let (Some(cf), Some(me)) = (fields.cf, fields.me) {
                decode_df18(msg, cf, &me);
            }
        }
        _ => {}
    }

    if let Some(mb) = fields.mb {
        decode_commb(msg, &mb);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
