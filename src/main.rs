//! cage-recorder - record one video stream and four RFID readers into a
//! timestamped session directory
//!
//! Runs until `--record-time` elapses or until interrupted with Ctrl-C or
//! SIGTERM, then finalizes every output and prints a summary.

use anyhow::{Context, Result};
use cage_recorder_lib::config::{SessionConfig, DEFAULT_CONFIG_FILE};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cage-recorder")]
#[command(about = "Synchronized video and RFID capture for tracker cages")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./cage-recorder.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory under which session directories are created
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Record for this many seconds
    #[arg(long, conflicts_with = "user_interrupt_only")]
    record_time: Option<u64>,

    /// Record until interrupted
    #[arg(long)]
    user_interrupt_only: bool,

    /// Retime the finalized video to the measured capture rate
    #[arg(long)]
    post_process: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let default_file = PathBuf::from(DEFAULT_CONFIG_FILE);

    let mut config = match (&cli.config, &cli.data_root) {
        (Some(path), _) => SessionConfig::load(Some(path.as_path()))?,
        (None, _) if default_file.exists() => SessionConfig::load(None)?,
        (None, Some(root)) => SessionConfig::user_interrupt(root),
        (None, None) => anyhow::bail!(
            "no {} found; pass --config or --data-root",
            DEFAULT_CONFIG_FILE
        ),
    };

    if let Some(root) = &cli.data_root {
        config.data_root = root.clone();
    }
    if let Some(secs) = cli.record_time {
        config.user_interrupt_only = false;
        config.record_time_sec = Some(secs);
    }
    if cli.user_interrupt_only {
        config.user_interrupt_only = true;
        config.record_time_sec = None;
    }
    if cli.post_process {
        config.fps_post_process = true;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cage_recorder_lib::init_tracing(cli.log_level.as_deref());

    let config = load_config(&cli).context("invalid configuration")?;
    let summary = cage_recorder_lib::run_session(config).context("session failed")?;

    println!("Session: {}", summary.session_path);
    println!("Frames written: {}", summary.frames_written);
    for (channel, lines) in &summary.channel_lines {
        println!("rfid_reader_{}: {} lines", channel, lines);
    }
    if let Some(path) = &summary.post_processed {
        println!("Post-processed: {}", path);
    }
    if let Some(error) = &summary.post_process_error {
        eprintln!("Post-processing failed: {}", error.message);
    }

    Ok(())
}
