//! The FIFO command loop.
//!
//! Grounded on `servod.c::go_go_go`: a `select`-driven read loop over a
//! named pipe, woken either by input or by the next idle deadline.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;

use log::{info, warn};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::config::{CFGFILE, DEVFILE};
use crate::engine::Engine;
use crate::error::ResourceError;
use crate::parse::{parse_line, resolve_width, Command};
use crate::status::status_message;

const LINE_BUFFER_CAP: usize = 126;

/// Recreate the command FIFO and write the human-readable config file.
pub fn setup_fifo(engine: &Engine) -> Result<std::fs::File, ResourceError> {
    let _ = std::fs::remove_file(DEVFILE);
    mkfifo(DEVFILE, Mode::from_bits_truncate(0o666)).map_err(|e| ResourceError::FifoCreateFailed {
        path: DEVFILE.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
    })?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(DEVFILE)
        .map_err(|e| ResourceError::FifoCreateFailed {
            path: DEVFILE.to_string(),
            source: e,
        })?;

    write_config_file(engine)?;
    Ok(file)
}

fn write_config_file(engine: &Engine) -> Result<(), ResourceError> {
    let mut out = String::new();
    out.push_str(&format!(
        "p1pins={}\n",
        engine
            .config
            .p1pins
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
    ));
    out.push_str(&format!(
        "p5pins={}\n",
        engine
            .config
            .p5pins
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
    ));
    for i in engine.servos.mapped_indices() {
        out.push_str(&format!(
            "servo {} on gpio {}\n",
            i,
            engine.servos.slots[i].gpio.unwrap()
        ));
    }
    std::fs::write(CFGFILE, out).map_err(|e| ResourceError::FifoCreateFailed {
        path: CFGFILE.to_string(),
        source: e,
    })
}

/// Run the command loop until terminated by a signal. Never returns on
/// success; errors here are all fatal resource failures.
pub fn run(engine: &mut Engine, mut fifo: std::fs::File) -> Result<(), ResourceError> {
    let mut line = String::new();
    let mut read_buf = [0u8; 512];

    loop {
        let timeout = engine.retire_idle_and_next_timeout();
        let timeout_ms: nix::libc::c_int = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as nix::libc::c_int,
            None => -1,
        };

        let mut fds = [PollFd::new(fifo.as_raw_fd(), PollFlags::POLLIN)];
        let n = poll(&mut fds, timeout_ms).map_err(|e| ResourceError::MailboxIoctl {
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;
        if n == 0 {
            // Timed out: the idle scan above already retired whatever expired.
            continue;
        }

        let read = match fifo.read(&mut read_buf) {
            Ok(0) => continue, // writer closed; FIFO stays open for the next one
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                return Err(ResourceError::FifoCreateFailed {
                    path: DEVFILE.to_string(),
                    source: e,
                })
            }
        };

        for &byte in &read_buf[..read] {
            if byte == b'\n' {
                dispatch(engine, &line);
                line.clear();
                continue;
            }
            if line.len() < LINE_BUFFER_CAP {
                line.push(byte as char);
            } else {
                warn!("command line too long, discarding");
                line.clear();
            }
        }
    }
}

fn dispatch(engine: &mut Engine, line: &str) {
    let command = match parse_line(line) {
        Ok(c) => c,
        Err(e) => {
            warn!("bad command {line:?}: {e}");
            return;
        }
    };

    match command {
        Command::Debug => {
            print!("{}", engine.debug_dump());
            let _ = std::io::stdout().flush();
        }
        Command::Status { path } => {
            let alive = engine.probe_dma_alive();
            if let Err(e) = std::fs::write(&path, status_message(alive)) {
                warn!("failed to write status to {path}: {e}");
            }
        }
        Command::SetServoIndex { servo, width } => {
            apply_width(engine, servo as usize, width);
        }
        Command::SetHeaderPin { header, pin, width } => {
            match engine.servo_for_header_pin(header, pin) {
                Ok(s) => apply_width(engine, s, width),
                Err(e) => warn!("{e}"),
            }
        }
    }
}

fn apply_width(engine: &mut Engine, servo: usize, width: crate::parse::ParsedWidth) {
    if servo >= crate::servo::MAX_SERVOS || !engine.servos.slots[servo].is_mapped() {
        warn!("unknown servo index {servo}");
        return;
    }
    let current = engine.servos.slots[servo].width;
    let ticks = match resolve_width(
        width,
        current,
        engine.config.step_time_us,
        engine.config.min_ticks,
        engine.config.max_ticks,
    ) {
        Ok(t) => t,
        Err(e) => {
            warn!("invalid width for servo {servo}: {e}");
            return;
        }
    };
    if let Err(e) = engine.set_servo(servo, ticks) {
        warn!("{e}");
    } else {
        info!("servo {servo} set to {ticks} ticks");
    }
}
