// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! flashbyte
//!
//! Runs the flashbyte serial console against a simulated NUCLEO board's
//! flash peripheral.  Commands are read from stdin, or from `--script`, and
//! progress is written to stdout.  Logs go to stderr.

use clap::Parser;
use embedded_io_adapters::std::FromStd;
use log::LevelFilter;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use strum::IntoEnumIterator;

use flashbyte_core::Board;
use flashbyte_prog::sim::SimBus;
use flashbyte_prog::{FlashController, ProgramGuard};

mod config;
mod console;
mod device;
mod error;
mod routine;

use config::Config;
use console::Console;
use device::Device;
use error::FlashbyteError;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "flashbyte", version, about = "STM32 flash test console")]
struct Cli {
    /// Board to simulate, for example nucleo-f401re
    #[arg(short, long)]
    board: Option<Board>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Guard used by the byte test
    #[arg(short, long, value_enum)]
    guard: Option<ProgramGuard>,

    /// Run these command bytes instead of reading stdin
    #[arg(short, long)]
    script: Option<String>,

    /// Do not echo command bytes
    #[arg(long)]
    no_echo: bool,

    /// List the supported boards and exit
    #[arg(long)]
    list_boards: bool,

    /// Print the configuration as JSON and exit
    #[arg(long)]
    show_config: bool,
}

fn config(cli: &Cli) -> Result<Config, FlashbyteError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(board) = cli.board {
        config.board = board;
    }
    if let Some(guard) = cli.guard {
        config.guard = guard;
    }
    if cli.no_echo {
        config.echo = false;
    }
    Ok(config)
}

fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info).parse_default_env();
    if let Some(level) = config.level_filter() {
        builder.filter_level(level);
    }
    builder.init();
}

fn run(config: &Config, script: Option<&str>) -> Result<(), FlashbyteError> {
    let device = Device::new(config.board);
    info!("{PKG_NAME} v{PKG_VERSION}");
    info!("Board: {device}");

    let board = config.board;
    let mut bus = SimBus::for_board(board);
    bus.set_busy_reads(config.busy_reads);
    let flash = FlashController::for_board(bus, board);
    let out = FromStd::new(io::stdout());

    let result = match script {
        Some(script) => Console::new(script.as_bytes(), out, flash, &device, config).run(),
        None => Console::new(FromStd::new(io::stdin()), out, flash, &device, config).run(),
    };
    info!("Session ended after {} s", device.uptime_secs());
    result
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.list_boards {
        for board in Board::iter() {
            println!("{:<14} {}", board.name(), Device::new(board));
        }
        return ExitCode::SUCCESS;
    }

    let config = match config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.show_config {
        return match config.to_json() {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    init_logging(&config);

    match run(&config, cli.script.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
