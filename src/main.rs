//! Entry point: parse arguments, bring up the engine, daemonize, install
//! the teardown signal handler, and run the command loop.

use clap::Parser;
use log::error;

use servod_rs::command_loop;
use servod_rs::config::{Cli, Config};
use servod_rs::engine::{Engine, EngineInitError};
use servod_rs::teardown;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let daemonize = !cli.no_daemonize;

    let config = match Config::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("servod: fatal: {e}");
            std::process::exit(1);
        }
    };

    let mut engine = match Engine::try_init(config) {
        Ok(e) => e,
        Err(EngineInitError::Config(e)) => {
            eprintln!("servod: fatal: {e}");
            std::process::exit(1);
        }
        Err(EngineInitError::Resource(e)) => {
            eprintln!("servod: fatal: {e}");
            std::process::exit(1);
        }
    };

    let fifo = match command_loop::setup_fifo(&engine) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("servod: fatal: {e}");
            engine.teardown();
            std::process::exit(1);
        }
    };

    if daemonize {
        daemonize_process();
    }

    teardown::register(&mut engine);
    if let Err(e) = teardown::install_handlers() {
        error!("fatal: {e}");
        engine.teardown();
        std::process::exit(1);
    }

    if let Err(e) = command_loop::run(&mut engine, fifo) {
        error!("fatal: {e}");
        engine.teardown();
        std::process::exit(1);
    }
}

/// Double-fork to detach from the controlling terminal, the way the
/// original daemon backgrounds itself.
fn daemonize_process() {
    unsafe {
        match libc::fork() {
            -1 => {
                eprintln!("servod: fatal: fork failed");
                std::process::exit(1);
            }
            0 => {}
            _ => std::process::exit(0),
        }
        libc::setsid();
        match libc::fork() {
            -1 => {
                eprintln!("servod: fatal: fork failed");
                std::process::exit(1);
            }
            0 => {}
            _ => std::process::exit(0),
        }
    }
}
