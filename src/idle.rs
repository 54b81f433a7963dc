//! Idle-timeout supervisor.
//!
//! Grounded on `servod.c::update_idle_time`/`get_next_idle_timeout`: each
//! `set_servo` call (re-)arms a deadline; the command loop scans for expired
//! ones before blocking and computes how long it may safely block for.

use std::time::{Duration, Instant};

use crate::regs::gpio::MmioGpio;
use crate::servo::Servos;
use crate::width_engine::{set_servo_idle, MaskBuffers};

/// Upper bound on how long the command loop will ever block in one `select`
/// call, regardless of how far away the next deadline is.
const MAX_SELECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Arm or refresh the idle deadline for servo `s`, if an idle timeout is
/// configured.
pub fn arm(servos: &mut Servos, s: usize, idle_timeout: Option<Duration>) {
    servos.slots[s].kill_time = idle_timeout.map(|d| Instant::now() + d);
}

/// Idle every servo whose deadline has passed, and return the timeout the
/// caller's `select`/`poll` should use to wake up for the next one (or
/// `None` if no servo has an armed deadline).
pub fn retire_expired_and_next_timeout(
    servos: &mut Servos,
    masks: &MaskBuffers,
    gpio: &mut MmioGpio,
    invert: bool,
    now: Instant,
) -> Option<Duration> {
    let mut next: Option<Duration> = None;
    for s in 0..servos.slots.len() {
        let Some(deadline) = servos.slots[s].kill_time else {
            continue;
        };
        if deadline <= now {
            set_servo_idle(servos, masks, gpio, invert, s);
            servos.slots[s].kill_time = None;
            continue;
        }
        // Deadline in the future (or exactly `now`, already handled above):
        // a past deadline is never propagated as a negative duration, it is
        // always retired immediately in the branch above instead.
        let remaining = deadline - now;
        next = Some(next.map_or(remaining, |cur| cur.min(remaining)));
    }
    next.map(|d| d.min(MAX_SELECT_TIMEOUT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::gpio::Gpio;

    fn make_masks(num_samples: u32, max_servos: usize) -> (Vec<u32>, Vec<u32>, MaskBuffers) {
        let mut turnoff = vec![0xFFFF_FFFFu32; num_samples as usize];
        let mut turnon = vec![0u32; max_servos];
        let masks =
            unsafe { MaskBuffers::new(turnoff.as_mut_ptr(), turnon.as_mut_ptr(), num_samples) };
        (turnoff, turnon, masks)
    }

    fn make_gpio() -> (Box<[u32; 15]>, MmioGpio<'static>) {
        let mut regs = Box::new([0u32; 15]);
        let gpio = Gpio::new_mmio_at(regs.as_mut_ptr() as usize);
        (regs, gpio)
    }

    #[test]
    fn no_armed_deadlines_means_no_timeout() {
        let mut servos = Servos::new();
        let (_t1, _t2, masks) = make_masks(2000, 32);
        let (_regs, mut gpio) = make_gpio();
        assert_eq!(
            retire_expired_and_next_timeout(&mut servos, &masks, &mut gpio, false, Instant::now()),
            None
        );
    }

    #[test]
    fn expired_deadline_idles_the_servo() {
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        servos.slots[0].width = 150;
        let (_t1, turnon, masks) = make_masks(2000, 32);
        let (_regs, mut gpio) = make_gpio();
        arm(&mut servos, 0, Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(1));
        let next = retire_expired_and_next_timeout(&mut servos, &masks, &mut gpio, false, Instant::now());
        assert!(next.is_none());
        assert_eq!(turnon[0], 0);
        assert_eq!(servos.slots[0].width, 150);
    }

    #[test]
    fn future_deadline_yields_minimum_remaining_time() {
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        servos.slots[1].gpio = Some(17);
        let (_t1, _t2, masks) = make_masks(2000, 32);
        let (_regs, mut gpio) = make_gpio();
        let now = Instant::now();
        servos.slots[0].kill_time = Some(now + Duration::from_millis(500));
        servos.slots[1].kill_time = Some(now + Duration::from_millis(200));
        let next = retire_expired_and_next_timeout(&mut servos, &masks, &mut gpio, false, now).unwrap();
        assert!(next <= Duration::from_millis(200));
    }
}
