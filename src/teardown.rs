//! Signal-driven teardown.
//!
//! Grounded on `hardware.c::terminate`/`setup_sighandlers`: one handler is
//! installed across every signal number from 1 to 63 and runs the complete,
//! synchronous teardown sequence itself (stop DMA before freeing the memory
//! it reads, restore GPIO modes, release the mailbox allocation, remove the
//! FIFO and config file, exit). See SPEC_FULL.md §9 for why this spec's
//! required semantic is "full teardown in the handler" rather than a
//! safer deferred-flag redesign.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::time::Duration;

use log::warn;
use once_cell::sync::OnceCell;

use crate::config::{CFGFILE, DEVFILE};
use crate::engine::Engine;
use crate::error::ResourceError;
use crate::hardware_init;

static ENGINE_FOR_SIGNAL: OnceCell<AtomicPtr<Engine>> = OnceCell::new();

/// Record the one live [`Engine`] so the signal handler can reach it.
///
/// # Safety
///
/// `engine` must outlive the process (it does: it is never dropped before
/// `std::process::exit`), and no other thread mutates it concurrently with
/// a signal delivery.
pub fn register(engine: &mut Engine) {
    let ptr = engine as *mut Engine;
    ENGINE_FOR_SIGNAL
        .get_or_init(|| AtomicPtr::new(ptr))
        .store(ptr, Ordering::SeqCst);
}

/// Install the teardown handler on every signal number the source installs
/// it on.
pub fn install_handlers() -> Result<(), ResourceError> {
    for signum in 1..64 {
        if signum == libc::SIGKILL || signum == libc::SIGSTOP {
            continue;
        }
        unsafe {
            signal_hook::low_level::register(signum, handle_signal)
                .map_err(|source| ResourceError::SignalHandlerFailed { source })?;
        }
    }
    Ok(())
}

fn handle_signal() {
    let Some(cell) = ENGINE_FOR_SIGNAL.get() else {
        std::process::exit(1);
    };
    let ptr = cell.load(Ordering::SeqCst);
    if ptr.is_null() {
        std::process::exit(1);
    }
    let engine = unsafe { &mut *ptr };
    run(engine);
    std::process::exit(1);
}

/// The full teardown sequence, also invoked directly by the command loop on
/// a clean shutdown.
pub fn run(engine: &mut Engine) {
    let mapped: Vec<usize> = engine.servos.mapped_indices().collect();
    for s in mapped.iter().copied() {
        let _ = engine.set_servo(s, 0);
    }
    std::thread::sleep(Duration::from_micros(engine.config.cycle_time_us as u64));

    hardware_init::stop_dma(&mut engine.peripherals);

    for s in mapped {
        let slot = engine.servos.slots[s];
        if let Some(gpio) = slot.gpio {
            engine
                .peripherals
                .gpio()
                .set_mode(gpio, slot.saved_gpio_mode);
        }
    }
    engine.arena.release();
    if let Err(e) = std::fs::remove_file(DEVFILE) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove {DEVFILE}: {e}");
        }
    }
    if let Err(e) = std::fs::remove_file(CFGFILE) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove {CFGFILE}: {e}");
        }
    }
}

