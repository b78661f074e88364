//! modes-feeder: run captured Mode S frames through modes-core.
//!
//! - `decode <file>` prints one JSON object per decoded message
//! - `track <file>` fuses the file into tracks and prints snapshots
//! - `config` shows or writes `~/.modes-decode/config.yaml`

use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, Table};
use tracing::{debug, info, warn, Level};

use modes_core::config::{self, Config};
use modes_core::mode_ac::mode_ac_message;
use modes_core::tracker::AircraftSnapshot;
use modes_core::{DataSource, DecodedMessage, Decoder, FusionHandle};

mod capture;

use capture::{FrameReader, RawFrame};

#[derive(Parser)]
#[command(
    name = "modes-feeder",
    version,
    about = "Decode and track pre-demodulated Mode S frames"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode frames from a file and print messages as JSON lines
    Decode {
        /// File containing hex frames (one per line)
        file: PathBuf,

        #[command(flatten)]
        decoder: DecoderArgs,
    },

    /// Fuse frames from a file into tracks and print snapshots
    Track {
        /// File containing hex frames (one per line)
        file: PathBuf,

        #[command(flatten)]
        decoder: DecoderArgs,

        /// Receiver latitude
        #[arg(long, env = "MODES_LAT", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Receiver longitude
        #[arg(long, env = "MODES_LON", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Discard positions farther than this from the receiver (NM)
        #[arg(long)]
        max_range: Option<f64>,

        /// Number of fusion shards
        #[arg(long, default_value = "4")]
        shards: usize,

        /// Print a summary table instead of JSON lines
        #[arg(long)]
        table: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write it to ~/.modes-decode/config.yaml
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args)]
struct DecoderArgs {
    /// Maximum number of bit errors to correct (0 disables correction)
    #[arg(long)]
    crc_bits: Option<usize>,

    /// Allow corrections in the downlink format bits
    #[arg(long)]
    fix_df: bool,

    /// Keep frames that fail the CRC check
    #[arg(long)]
    no_crc_check: bool,

    /// Treat frames as received from this source (no correction)
    #[arg(long, value_enum)]
    source: Option<SourceArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Mlat,
    ModeS,
    Tisb,
    Adsr,
    Adsb,
}

impl From<SourceArg> for DataSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Mlat => DataSource::Mlat,
            SourceArg::ModeS => DataSource::ModeS,
            SourceArg::Tisb => DataSource::Tisb,
            SourceArg::Adsr => DataSource::Adsr,
            SourceArg::Adsb => DataSource::Adsb,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = config::load_config().unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    match cli.command {
        Commands::Decode { file, decoder } => {
            decoder.apply(&mut config);
            cmd_decode(file, &config, decoder.source.map(DataSource::from));
        }
        Commands::Track {
            file,
            decoder,
            lat,
            lon,
            max_range,
            shards,
            table,
        } => {
            decoder.apply(&mut config);
            if lat.is_some() {
                config.receiver.lat = lat;
            }
            if lon.is_some() {
                config.receiver.lon = lon;
            }
            if let Some(range) = max_range {
                config.receiver.max_range_nm = range;
            }
            cmd_track(file, &config, decoder.source.map(DataSource::from), shards, table);
        }
        Commands::Config { write } => cmd_config(&config, write),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

impl DecoderArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(bits) = self.crc_bits {
            config.decoder.crc_bits = bits;
        }
        if self.fix_df {
            config.decoder.fix_df = true;
        }
        if self.no_crc_check {
            config.decoder.check_crc = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn read_frames(file: &Path) -> Vec<RawFrame> {
    let frames = FrameReader::new(file).read_all().unwrap_or_else(|e| {
        eprintln!("Error reading {}: {e}", file.display());
        std::process::exit(1);
    });
    info!(file = %file.display(), frames = frames.len(), "read frames");
    frames
}

/// Decode every frame, skipping the ones the decoder rejects.
fn decode_frames<'a>(
    frames: &'a [RawFrame],
    config: &'a Config,
    source: Option<DataSource>,
) -> impl Iterator<Item = DecodedMessage> + 'a {
    let mut decoder = Decoder::new(config.decoder.clone());
    frames.iter().filter_map(move |raw| {
        if let Some(mode_a) = raw.mode_a() {
            return decoder
                .config()
                .mode_ac
                .then(|| mode_ac_message(mode_a, raw.meta));
        }
        let result = match source {
            Some(source) => decoder.decode_external(&raw.bytes, raw.meta, source),
            None => decoder.decode(&raw.bytes, raw.meta),
        };
        match result {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!(frame = %raw.hex, error = %e, "frame rejected");
                None
            }
        }
    })
}

fn cmd_decode(file: PathBuf, config: &Config, source: Option<DataSource>) {
    let frames = read_frames(&file);
    let mut decoded = 0u64;

    for msg in decode_frames(&frames, config, source) {
        match serde_json::to_string(&msg) {
            Ok(line) => {
                decoded += 1;
                println!("{line}");
            }
            Err(e) => warn!(error = %e, "could not serialise message"),
        }
    }

    eprintln!("{} frames, {decoded} decoded", frames.len());
}

fn cmd_track(
    file: PathBuf,
    config: &Config,
    source: Option<DataSource>,
    shards: usize,
    table: bool,
) {
    let frames = read_frames(&file);
    let now = frames.iter().map(|f| f.meta.sys_time).fold(0.0, f64::max);

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Error starting runtime: {e}");
        std::process::exit(1);
    });

    let result = runtime.block_on(async {
        let fusion = FusionHandle::spawn(shards, config.tracking.clone(), config.receiver.clone())?;
        let mut decoded = 0u64;
        for msg in decode_frames(&frames, config, source) {
            decoded += 1;
            fusion.submit(msg).await?;
        }
        let removed = fusion.remove_inactive(now).await?;
        info!(removed, "dropped inactive tracks");
        let snapshot = fusion.snapshot(now).await?;
        Ok::<_, modes_core::FusionError>((decoded, snapshot))
    });

    let (decoded, snapshot) = result.unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    if table {
        print_table(&snapshot);
    } else {
        for aircraft in &snapshot {
            match serde_json::to_string(aircraft) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "could not serialise snapshot"),
            }
        }
    }

    eprintln!(
        "{} frames, {decoded} decoded, {} aircraft",
        frames.len(),
        snapshot.len()
    );
}

fn cmd_config(config: &Config, write: bool) {
    if write {
        match config::save_config(config) {
            Ok(path) => eprintln!("Wrote {}", path.display()),
            Err(e) => {
                eprintln!("Error writing config: {e}");
                std::process::exit(1);
            }
        }
    } else {
        print!("{}", config::serialize_config(config));
    }
}

fn print_table(snapshot: &[AircraftSnapshot]) {
    if snapshot.is_empty() {
        return;
    }

    let dash = || "-".to_string();
    let mut table = Table::new();
    table.set_header(vec![
        "Address", "Callsign", "Squawk", "Alt (ft)", "GS (kt)", "Track", "Lat", "Lon", "Source",
        "Msgs",
    ]);

    for ac in snapshot {
        table.add_row(vec![
            Cell::new(&ac.hex),
            Cell::new(ac.flight.as_deref().map_or("-", str::trim)),
            Cell::new(ac.squawk.map_or_else(dash, |s| s.to_string())),
            Cell::new(ac.alt_baro.map_or_else(dash, |a| a.to_string())),
            Cell::new(ac.gs.map_or_else(dash, |g| format!("{g:.0}"))),
            Cell::new(ac.track.map_or_else(dash, |t| format!("{t:.1}"))),
            Cell::new(ac.lat.map_or_else(dash, |l| format!("{l:.4}"))),
            Cell::new(ac.lon.map_or_else(dash, |l| format!("{l:.4}"))),
            Cell::new(ac.position_source.map_or_else(dash, |s| format!("{s:?}"))),
            Cell::new(ac.messages),
        ]);
    }

    println!("{table}");
}
