//! modes-core: Mode S / ADS-B decoding and multi-source track fusion.
//!
//! Decoding is pure; the only async code is the sharded fusion front in
//! [`fusion`]. The feeder binary (`modes-feeder`) wraps this crate with file
//! input and JSON output.

pub mod adsb;
pub mod commb;
pub mod config;
pub mod cpr;
pub mod crc;
pub mod decode;
pub mod frame;
pub mod fusion;
pub mod message;
pub mod mode_ac;
pub mod tracker;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{Config, DecoderConfig, ReceiverConfig, TrackingConfig};
pub use cpr::CprError;
pub use decode::Decoder;
pub use frame::{IcaoCache, ModeFrame};
pub use fusion::{FusionError, FusionHandle};
pub use message::{DecodedMessage, RxMeta};
pub use mode_ac::ModeAcDetector;
pub use tracker::{AircraftSnapshot, Tracker};
pub use types::*;
