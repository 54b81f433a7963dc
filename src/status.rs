//! DMA liveness probe.
//!
//! Grounded on `servod.c::do_status`: read `DMA_CONBLK_AD`, sleep
//! `2*step_time_us`, read again; if it moved, the DMA engine is alive.

use std::thread::sleep;
use std::time::Duration;

use crate::peripherals::Peripherals;

pub fn probe_dma_alive(peripherals: &mut Peripherals, step_time_us: u32) -> bool {
    let before = peripherals.dma().read_conblk_ad();
    sleep(Duration::from_micros(step_time_us as u64 * 2));
    let after = peripherals.dma().read_conblk_ad();
    before != after
}

pub fn status_message(alive: bool) -> &'static str {
    if alive {
        "OK\n"
    } else {
        "ERROR: DMA not running\n"
    }
}
