// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! zone-memmgrd
//!
//! Standalone entry point: parses CLI arguments, loads and validates the
//! data-source configuration, spawns the builder thread, wires a default
//! stdio-based bus transport, and drives the manager event loop until
//! SIGTERM/SIGINT.
//!
//! The concrete `Segment`/`ZoneLoader` wiring here
//! (`segment::FileMarkerSegment`, `segment::MarkerFileLoader`) is a
//! placeholder standing in for the out-of-scope mmap primitive and DNS zone
//! loader, exactly as `StdioBus` stands in for a real message bus transport.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use nix::sys::signal::Signal;
use tracing::{error, info, warn, Level};

use zone_memmgr::builder::{BuilderChannel, BuilderCommand};
use zone_memmgr::bus::{Bus, StdioBus};
use zone_memmgr::config::{Config, DataSourceConfig};
use zone_memmgr::manager::Manager;
use zone_memmgr::segment::{FileMarkerSegmentFactory, MarkerFileLoader, SegmentFactory};
use zone_memmgr::signal::register_signal_callback;
use zone_memmgr::thread_manager::{spawn_builder, Message as ThreadMessage};

#[derive(Parser, Debug)]
#[command(author, name = "zone-memmgrd", version, about, long_about = None)]
struct Cli {
    /// Directory where mapped segment files live. Must exist and be writable.
    #[arg(long)]
    mapped_file_dir: PathBuf,

    /// Path to the data-source configuration file (JSON array of
    /// `{rr_class, name}` objects), consumed once at startup.
    #[arg(long)]
    config: PathBuf,

    /// Emit structured (JSON) log messages. Default is human readable.
    #[arg(short, long)]
    json_output: bool,
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn init_tracing(json_output: bool) {
    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    let builder = tracing_subscriber::fmt().with_max_level(Level::DEBUG);
    if json_output {
        builder.event_format(format.json().flatten_event(true)).init();
    } else {
        builder.event_format(format).init();
    }
}

fn load_data_sources(path: &PathBuf) -> Result<Vec<DataSourceConfig>, String> {
    let file = File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| format!("cannot parse {}: {e}", path.display()))
}

fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing(args.json_output);
    info!("zone-memmgrd starting");

    let data_sources = match load_data_sources(&args.config) {
        Ok(ds) => ds,
        Err(e) => {
            error!(error = %e, "fatal: could not load data-source configuration");
            return ExitCode::FAILURE;
        }
    };

    let config = Config {
        mapped_file_dir: args.mapped_file_dir.clone(),
        data_sources,
    };
    if let Err(e) = config.validate() {
        error!(error = %e, "fatal: invalid initial configuration");
        return ExitCode::FAILURE;
    }

    let builder_channel = match BuilderChannel::new() {
        Ok(channel) => channel,
        Err(e) => {
            error!(error = %e, "fatal: could not create builder channel");
            return ExitCode::FAILURE;
        }
    };

    let (builder_handle, lifecycle_mbox) =
        spawn_builder(builder_channel.clone(), Arc::new(MarkerFileLoader));

    if register_signal_callback(Signal::SIGTERM, request_shutdown).is_err()
        || register_signal_callback(Signal::SIGINT, request_shutdown).is_err()
    {
        warn!("continuing without signal-driven graceful shutdown");
    }

    let bus: Box<dyn Bus> = Box::new(StdioBus::new(
        BufReader::new(std::io::stdin()),
        std::io::stdout(),
    ));
    let segment_factory: Box<dyn SegmentFactory> = Box::new(FileMarkerSegmentFactory);
    let mut manager = Manager::with_segment_factory(bus, builder_channel.clone(), segment_factory);

    let generation_id = manager.next_generation_id();
    let generation = FileMarkerSegmentFactory.build_generation(generation_id, &config);
    for command in manager.adopt_generation(generation) {
        builder_channel.send_command(command);
    }

    while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        manager.step(100);

        match lifecycle_mbox.try_recv() {
            Ok(ThreadMessage::ThreadPanic(channel)) => {
                error!(channel = ?channel, "builder thread panicked, shutting down");
                break;
            }
            Ok(ThreadMessage::ThreadTerminate(channel)) => {
                info!(channel = ?channel, "builder thread exited, shutting down");
                break;
            }
            Err(_) => {}
        }
    }

    info!("zone-memmgrd shutting down");
    builder_channel.send_command(BuilderCommand::Shutdown);
    let _ = builder_handle.join();

    ExitCode::SUCCESS
}
