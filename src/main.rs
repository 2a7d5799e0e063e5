//! hookwm - scriptable hotkey and window-event daemon for EWMH desktops.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use hookwm::config::{self, Config};
use hookwm::display::XDisplay;
use hookwm::wm::Wm;

#[derive(Parser)]
#[command(name = "hookwm", version, about = "Hotkeys and window rules for EWMH window managers")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to log file (log to stderr by default)
    #[arg(short, long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Log level
    #[arg(long, value_name = "LOGLEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&args.log_level);
    if let Some(path) = &args.log {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to open log file {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();

    let config_path = args.config.unwrap_or_else(Config::default_path);
    if !config_path.is_file() {
        log::info!("There is no config file at {:?}, exiting", config_path);
        return Ok(());
    }

    // A config that exists but does not load is the one fatal
    // configuration error.
    let config = match Config::load_from_path(&config_path) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{:#}", err);
            std::process::exit(1);
        }
    };

    let conn = XDisplay::connect()?;
    let mut wm = Wm::new(conn)?;
    config::apply(&mut wm, &config)?;
    wm.init()?;
    log::info!("Started successfully");

    wm.run(move |wm| {
        let config = Config::load_from_path(&config_path)?;
        config::apply(wm, &config)
    })
}
