//! Configuration file management for modes-decode.
//!
//! Reads/writes `~/.modes-decode/config.yaml` with decoder switches, the
//! receiver location, and track-fusion validity windows. The `Config` value
//! is the explicit context object handed to the decoder and tracker.

use std::path::PathBuf;

use crate::types::ConfigError;

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub decoder: DecoderConfig,
    pub receiver: ReceiverConfig,
    pub tracking: TrackingConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    /// Reject frames whose CRC fails and cannot be corrected.
    pub check_crc: bool,
    /// Bit-error correction budget for extended squitters (0 disables).
    pub crc_bits: usize,
    /// Allow correction to flip bits of the DF field.
    pub fix_df: bool,
    /// Reject address/parity replies from addresses not recently seen.
    pub check_address: bool,
    /// Decode DF24 (Comm-D) frames.
    pub enable_df24: bool,
    /// Accept legacy Mode A/C replies.
    pub mode_ac: bool,
    /// How long an address stays known after a CRC-checked reply (seconds).
    pub address_ttl: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Positions farther than this from the receiver are discarded.
    pub max_range_nm: f64,
}

impl ReceiverConfig {
    /// Receiver position, when both coordinates are configured.
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// Seconds after which a field may be replaced by a lower-priority source.
    pub stale_secs: f64,
    /// Seconds after which a field is dropped.
    pub expire_secs: f64,
    /// Stale window for fast-changing fields (altitude, squawk, air/ground).
    pub fast_stale_secs: f64,
    /// ADS-B version assumed until operational status is received.
    pub default_adsb_version: u8,
    /// Maximum age difference of an airborne even/odd CPR pair.
    pub airborne_pair_secs: f64,
    /// Surface pair window when moving faster than 25 kt.
    pub surface_pair_fast_secs: f64,
    /// Surface pair window otherwise.
    pub surface_pair_slow_secs: f64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            check_crc: true,
            crc_bits: 1,
            fix_df: false,
            check_address: true,
            enable_df24: true,
            mode_ac: false,
            address_ttl: 60.0,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            name: "default".into(),
            lat: None,
            lon: None,
            max_range_nm: 300.0,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            stale_secs: 60.0,
            expire_secs: 70.0,
            fast_stale_secs: 15.0,
            default_adsb_version: 0,
            airborne_pair_secs: 10.0,
            surface_pair_fast_secs: 25.0,
            surface_pair_slow_secs: 50.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            decoder: DecoderConfig::default(),
            receiver: ReceiverConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }
}

/// Get the config directory path (`~/.modes-decode/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".modes-decode")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.modes-decode/config.yaml`.
///
/// Returns the default config if the file doesn't exist.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_file();
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(&path)?;
    parse_config(&text)
}

/// Save config to `~/.modes-decode/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, ConfigError> {
    std::fs::create_dir_all(config_dir())?;
    let path = config_file();
    std::fs::write(&path, serialize_config(config))?;
    Ok(path)
}

/// Parse simple YAML-like config text.
pub fn parse_config(text: &str) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');
        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }

        match current_section.as_deref() {
            Some("decoder") => {
                let d = &mut config.decoder;
                match key {
                    "check_crc" => d.check_crc = parse_bool(key, val)?,
                    "crc_bits" => d.crc_bits = parse_number(key, val)?,
                    "fix_df" => d.fix_df = parse_bool(key, val)?,
                    "check_address" => d.check_address = parse_bool(key, val)?,
                    "enable_df24" => d.enable_df24 = parse_bool(key, val)?,
                    "mode_ac" => d.mode_ac = parse_bool(key, val)?,
                    "address_ttl" => d.address_ttl = parse_number(key, val)?,
                    _ => {}
                }
            }
            Some("receiver") => {
                let r = &mut config.receiver;
                match key {
                    "name" => {
                        if let Some(v) = parse_string_value(val) {
                            r.name = v;
                        }
                    }
                    "lat" => r.lat = parse_optional(key, val)?,
                    "lon" => r.lon = parse_optional(key, val)?,
                    "max_range_nm" => r.max_range_nm = parse_number(key, val)?,
                    _ => {}
                }
            }
            Some("tracking") => {
                let t = &mut config.tracking;
                match key {
                    "stale_secs" => t.stale_secs = parse_number(key, val)?,
                    "expire_secs" => t.expire_secs = parse_number(key, val)?,
                    "fast_stale_secs" => t.fast_stale_secs = parse_number(key, val)?,
                    "default_adsb_version" => t.default_adsb_version = parse_number(key, val)?,
                    "airborne_pair_secs" => t.airborne_pair_secs = parse_number(key, val)?,
                    "surface_pair_fast_secs" => t.surface_pair_fast_secs = parse_number(key, val)?,
                    "surface_pair_slow_secs" => t.surface_pair_slow_secs = parse_number(key, val)?,
                    _ => {}
                }
            }
            _ => {}
        }
    }

    Ok(config)
}

fn invalid(key: &str, val: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: val.to_string(),
    }
}

fn parse_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val {
        "true" | "yes" | "on" => Ok(true),
        "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, val)),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, val: &str) -> Result<T, ConfigError> {
    val.parse().map_err(|_| invalid(key, val))
}

fn parse_optional(key: &str, val: &str) -> Result<Option<f64>, ConfigError> {
    if val == "null" || val == "~" || val.is_empty() {
        return Ok(None);
    }
    parse_number(key, val).map(Some)
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let optional = |v: Option<f64>| v.map_or_else(|| "null".to_string(), |v| v.to_string());
    let d = &config.decoder;
    let r = &config.receiver;
    let t = &config.tracking;

    let lines = [
        "# modes-decode configuration".to_string(),
        String::new(),
        "decoder:".into(),
        format!("  check_crc: {}", d.check_crc),
        format!("  crc_bits: {}", d.crc_bits),
        format!("  fix_df: {}", d.fix_df),
        format!("  check_address: {}", d.check_address),
        format!("  enable_df24: {}", d.enable_df24),
        format!("  mode_ac: {}", d.mode_ac),
        format!("  address_ttl: {}", d.address_ttl),
        String::new(),
        "receiver:".into(),
        format!("  name: \"{}\"", r.name),
        format!("  lat: {}", optional(r.lat)),
        format!("  lon: {}", optional(r.lon)),
        format!("  max_range_nm: {}", r.max_range_nm),
        String::new(),
        "tracking:".into(),
        format!("  stale_secs: {}", t.stale_secs),
        format!("  expire_secs: {}", t.expire_secs),
        format!("  fast_stale_secs: {}", t.fast_stale_secs),
        format!("  default_adsb_version: {}", t.default_adsb_version),
        format!("  airborne_pair_secs: {}", t.airborne_pair_secs),
        format!("  surface_pair_fast_secs: {}", t.surface_pair_fast_secs),
        format!("  surface_pair_slow_secs: {}", t.surface_pair_slow_secs),
    ];

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.receiver.name, "default");
        assert!(config.decoder.check_crc);
        assert_eq!(config.decoder.crc_bits, 1);
        assert!(config.receiver.position().is_none());
        assert_eq!(config.tracking.expire_secs, 70.0);
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
decoder:
  check_crc: false
  crc_bits: 2
  mode_ac: yes

receiver:
  name: "mystation"
  lat: 52.25
  lon: 3.92
  max_range_nm: 180

tracking:
  default_adsb_version: 2
  airborne_pair_secs: 8.5
"#;
        let config = parse_config(text).unwrap();
        assert!(!config.decoder.check_crc);
        assert_eq!(config.decoder.crc_bits, 2);
        assert!(config.decoder.mode_ac);
        assert!(config.decoder.enable_df24);
        assert_eq!(config.receiver.name, "mystation");
        assert_eq!(config.receiver.position(), Some((52.25, 3.92)));
        assert_eq!(config.receiver.max_range_nm, 180.0);
        assert_eq!(config.tracking.default_adsb_version, 2);
        assert_eq!(config.tracking.airborne_pair_secs, 8.5);
        assert_eq!(config.tracking.stale_secs, 60.0);
    }

    #[test]
    fn test_parse_config_null_values() {
        let text = "receiver:\n  lat: null\n  lon: ~\n";
        let config = parse_config(text).unwrap();
        assert!(config.receiver.lat.is_none());
        assert!(config.receiver.lon.is_none());
    }

    #[test]
    fn test_parse_config_invalid_value() {
        let err = parse_config("decoder:\n  crc_bits: lots\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "crc_bits"));
        assert!(parse_config("decoder:\n  check_crc: maybe\n").is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.receiver.name = "test".into();
        config.receiver.lat = Some(41.9);
        config.receiver.lon = Some(12.5);
        config.decoder.fix_df = true;
        config.tracking.fast_stale_secs = 12.0;

        let text = serialize_config(&config);
        let parsed = parse_config(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
