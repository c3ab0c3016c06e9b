//! Cymbal GW
//!
//! Plays note sheets and live keyboard input on bus-addressed percussion
//! hammers.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cymbal_gw::config::{AppConfig, TransportKind};
use cymbal_gw::input::EventReader;
use cymbal_gw::session::{self, Programming};
use cymbal_gw::transport::{BusTransport, ConsoleTransport, DeviceFileTransport};
use cymbal_gw::{DeviceController, DeviceId, Sequencer};

/// Cymbal GW - drive percussion hammers from note sheets and a keyboard
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Note sheet played before the interactive loop starts
    sheet: Option<PathBuf>,

    /// Path to configuration file (defaults to the stock instrument)
    #[arg(short, long, env = "CYMBAL_CONFIG")]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log frames instead of writing them to the bus
    #[arg(long)]
    dry_run: bool,

    /// Print the note and duration tables and exit
    #[arg(long)]
    list_notes: bool,

    /// Reassign the device answering to --target to this id, then exit
    #[arg(long, value_name = "NEW_ID")]
    program_id: Option<u8>,

    /// Store the power-on position of --target, then exit
    #[arg(long, value_name = "POSITION")]
    program_start: Option<u8>,

    /// Device addressed by the programming options (255 = broadcast)
    #[arg(long, value_name = "ID", default_value_t = 0xFF)]
    target: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting Cymbal GW...");

    let config = match &args.config {
        Some(path) => {
            info!("Configuration file: {}", path);
            AppConfig::load(path).await?
        }
        None => {
            info!("No configuration file given, using the stock instrument");
            AppConfig::default()
        }
    };

    if args.list_notes {
        print_tables(&config);
        return Ok(());
    }

    // Cleared by Ctrl+C; every loop checks it between steps
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                running.store(false, Ordering::Relaxed);
            }
        });
    }

    let transport = open_transport(&config, args.dry_run).await?;
    let sequencer = Sequencer::new(
        DeviceController::new(transport),
        config.note_table(),
        config.duration_table(),
        config.sequencer_timing(),
    );

    let outcome = if args.program_id.is_some() || args.program_start.is_some() {
        let request = Programming {
            target: DeviceId(args.target),
            new_id: args.program_id.map(DeviceId),
            start_position: args.program_start,
        };
        session::program(sequencer, request).await
    } else {
        let input = EventReader::open(&config.input.device, config.input.record_layout);
        session::run(
            sequencer,
            config.dispatch_settings(),
            args.sheet.as_deref(),
            input,
            &running,
        )
        .await
    };

    if let Err(e) = &outcome {
        error!("Cymbal GW stopped with an error: {:#}", e);
    }
    info!("Cymbal GW shutdown complete");
    outcome
}

async fn open_transport(config: &AppConfig, dry_run: bool) -> Result<Box<dyn BusTransport>> {
    if dry_run || config.bus.transport == TransportKind::Console {
        info!("Using console transport (frames are logged, not sent)");
        return Ok(Box::new(ConsoleTransport::new("console")));
    }

    let transport = DeviceFileTransport::open(&config.bus.device, config.bus.speed_hz).await?;
    Ok(Box::new(transport))
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

fn print_tables(config: &AppConfig) {
    use colored::*;

    println!("\n{}", "=== Note Table ===".bold().cyan());
    for (note, placement) in config.note_table().iter() {
        println!(
            "  {}  hammer {}  position {}",
            note.to_string().yellow(),
            placement.device.to_string().green(),
            placement.position.to_string().green()
        );
    }

    println!("\n{}", "=== Durations ===".bold().cyan());
    for (symbol, delay) in config.duration_table().iter() {
        println!(
            "  {}  {}",
            symbol.to_string().yellow(),
            format!("{} ms", delay.as_millis()).green()
        );
    }
    println!();
}
