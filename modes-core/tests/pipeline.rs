//! End-to-end: hex frames through the decoder into track fusion.

use modes_core::crc::set_parity;
use modes_core::message::{Altitude, RxMeta};
use modes_core::{
    Address, DataSource, DecodeError, Decoder, DecoderConfig, FusionHandle, ReceiverConfig,
    Tracker, TrackingConfig,
};

const KLM_IDENT: &str = "8D4840D6202CC371C32CE0576098";
const POS_ODD: &str = "8D40621D58C386435CC412692AD6";
const POS_EVEN: &str = "8D40621D58C382D690C8AC2863A7";
const VELOCITY: &str = "8D485020994409940838175B284F";

/// DF4 surveillance reply carrying `ac13`, addressed to `address`.
fn df4_altitude(address: u32, ac13: u16) -> Vec<u8> {
    let mut bytes = vec![0x20, 0x00, (ac13 >> 8) as u8 & 0x1F, ac13 as u8, 0, 0, 0];
    set_parity(&mut bytes, address);
    bytes
}

fn capture(decoder: &mut Decoder) -> Vec<modes_core::DecodedMessage> {
    let frames = [
        (KLM_IDENT, 0.0),
        (POS_ODD, 0.5),
        (POS_EVEN, 2.0),
        (VELOCITY, 2.5),
    ];
    frames
        .iter()
        .map(|(hex, t)| decoder.decode_hex(hex, RxMeta::at(*t)).unwrap())
        .collect()
}

#[test]
fn test_decode_and_track() {
    let mut decoder = Decoder::new(DecoderConfig::default());
    let mut tracker = Tracker::new(TrackingConfig::default(), ReceiverConfig::default());

    for msg in capture(&mut decoder) {
        assert_eq!(msg.source, DataSource::Adsb);
        tracker.update(&msg);
    }

    let snapshot = tracker.snapshot(3.0);
    assert_eq!(snapshot.len(), 3);

    let klm = snapshot.iter().find(|s| s.hex == "4840D6").unwrap();
    assert_eq!(klm.flight.as_deref(), Some("KLM1023 "));

    let pos = snapshot.iter().find(|s| s.hex == "40621D").unwrap();
    assert_eq!(pos.alt_baro, Some(38000));
    assert!((pos.lat.unwrap() - 52.2572).abs() < 1e-3);
    assert!((pos.lon.unwrap() - 3.9194).abs() < 1e-3);
    assert_eq!(pos.nic, Some(8));
    assert_eq!(pos.position_source, Some(DataSource::Adsb));

    let vel = snapshot.iter().find(|s| s.hex == "485020").unwrap();
    assert!((vel.gs.unwrap() - 159.2).abs() < 0.1);
    assert!((vel.track.unwrap() - 182.88).abs() < 0.01);
}

#[test]
fn test_mode_s_altitude_arbitration() {
    let mut decoder = Decoder::new(DecoderConfig::default());
    let mut tracker = Tracker::new(TrackingConfig::default(), ReceiverConfig::default());
    for msg in capture(&mut decoder) {
        tracker.update(&msg);
    }

    // 37000 ft surveillance reply, only accepted once ADS-B altitude is stale
    let reply = df4_altitude(0x40621D, 0x17B0);
    let msg = decoder.decode(&reply, RxMeta::at(3.0)).unwrap();
    assert_eq!(msg.source, DataSource::ModeSChecked);
    assert_eq!(msg.baro_alt, Some(Altitude::feet(37000)));
    tracker.update(&msg);
    let ac = tracker.get(&Address::icao(0x40621D)).unwrap();
    assert_eq!(ac.baro_alt.get(3.0), Some(&38000));

    let msg = decoder.decode(&reply, RxMeta::at(20.0)).unwrap();
    tracker.update(&msg);
    let ac = tracker.get(&Address::icao(0x40621D)).unwrap();
    assert_eq!(ac.baro_alt.get(20.0), Some(&37000));
    assert_eq!(ac.baro_alt.source(), DataSource::ModeSChecked);
}

#[test]
fn test_unknown_address_rejected() {
    let mut decoder = Decoder::new(DecoderConfig::default());
    let reply = df4_altitude(0x123456, 0x17B0);
    assert_eq!(
        decoder.decode(&reply, RxMeta::at(0.0)),
        Err(DecodeError::UnknownAddress(Address::icao(0x123456)))
    );
}

#[test]
fn test_mlat_frames_keep_external_source() {
    let mut decoder = Decoder::new(DecoderConfig::default());
    let mut tracker = Tracker::new(TrackingConfig::default(), ReceiverConfig::default());

    let bytes = modes_core::hex_decode(POS_EVEN).unwrap();
    let msg = decoder
        .decode_external(&bytes, RxMeta::at(0.0), DataSource::Mlat)
        .unwrap();
    assert_eq!(msg.source, DataSource::Mlat);
    tracker.update(&msg);

    // ADS-B replaces MLAT altitude straight away
    let msg = decoder.decode_hex(POS_ODD, RxMeta::at(1.0)).unwrap();
    tracker.update(&msg);
    let ac = tracker.get(&Address::icao(0x40621D)).unwrap();
    assert_eq!(ac.baro_alt.source(), DataSource::Adsb);
    // The pair mixes sources, so the position carries the weaker one
    assert_eq!(ac.position.source(), DataSource::Mlat);
}

#[tokio::test]
async fn test_fusion_handle_pipeline() {
    let mut decoder = Decoder::new(DecoderConfig::default());
    let fusion =
        FusionHandle::spawn(3, TrackingConfig::default(), ReceiverConfig::default()).unwrap();

    for msg in capture(&mut decoder) {
        fusion.submit(msg).await.unwrap();
    }

    let snapshot = fusion.snapshot(3.0).await.unwrap();
    let hexes: Vec<_> = snapshot.iter().map(|s| s.hex.as_str()).collect();
    assert_eq!(hexes, ["40621D", "4840D6", "485020"]);
    assert!(snapshot[0].lat.is_some());

    // Everything expires eventually
    let later = fusion.snapshot(1000.0).await.unwrap();
    assert!(later.iter().all(|s| s.lat.is_none() && s.flight.is_none()));

    // and can then be dropped from the shards
    assert_eq!(fusion.remove_inactive(1.0e9).await.unwrap(), 3);
    assert!(fusion.snapshot(1.0e9).await.unwrap().is_empty());
}
