//! Per-servo slot state.
//!
//! Grounded on `servod.c`'s parallel `servo2gpio`/`servostart`/`servowidth`
//! global arrays, restructured as one owned struct per slot in the style of
//! `src/pwm.rs`'s `PwmPin`.

use std::time::Instant;

pub const MAX_SERVOS: usize = 32;
pub const DMY: u8 = 255;

#[derive(Debug, Clone, Copy)]
pub struct ServoSlot {
    /// GPIO number this slot drives, or `None` if unmapped.
    pub gpio: Option<u8>,
    /// Sample-slot offset at which this servo's pulse begins in the cycle.
    pub start: u32,
    /// Current pulse width in ticks; 0 means idle.
    pub width: u32,
    /// Function-select mode captured at startup, restored on teardown.
    pub saved_gpio_mode: u8,
    /// Absolute deadline after which the slot is forced idle, if armed.
    pub kill_time: Option<Instant>,
}

impl Default for ServoSlot {
    fn default() -> Self {
        Self {
            gpio: None,
            start: 0,
            width: 0,
            saved_gpio_mode: 0,
            kill_time: None,
        }
    }
}

impl ServoSlot {
    pub fn is_mapped(&self) -> bool {
        self.gpio.is_some()
    }

    pub fn mask(&self) -> u32 {
        match self.gpio {
            Some(g) => 1 << g,
            None => 0,
        }
    }
}

/// The full MAX_SERVOS-slot table plus the staggering assignment of start
/// offsets for whichever slots end up mapped.
pub struct Servos {
    pub slots: [ServoSlot; MAX_SERVOS],
}

impl Servos {
    pub fn new() -> Self {
        Self {
            slots: [ServoSlot::default(); MAX_SERVOS],
        }
    }

    pub fn mapped_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_SERVOS).filter(move |&i| self.slots[i].is_mapped())
    }

    pub fn mapped_count(&self) -> usize {
        self.mapped_indices().count()
    }

    /// Assign `servostart` offsets to every mapped slot, evenly staggered
    /// across the cycle in ascending servo-index rank order.
    pub fn assign_start_offsets(&mut self, num_samples: u32) {
        let mapped: Vec<usize> = self.mapped_indices().collect();
        let n = mapped.len() as u32;
        if n == 0 {
            return;
        }
        let stride = num_samples / n;
        for (rank, idx) in mapped.into_iter().enumerate() {
            self.slots[idx].start = rank as u32 * stride;
        }
    }

    pub fn gpio_already_mapped(&self, gpio: u8) -> bool {
        self.slots.iter().any(|s| s.gpio == Some(gpio))
    }
}

impl Default for Servos {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_offsets_stagger_evenly() {
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        servos.slots[1].gpio = Some(17);
        servos.slots[2].gpio = Some(27);
        servos.slots[3].gpio = Some(22);
        servos.assign_start_offsets(2000);
        assert_eq!(servos.slots[0].start, 0);
        assert_eq!(servos.slots[1].start, 500);
        assert_eq!(servos.slots[2].start, 1000);
        assert_eq!(servos.slots[3].start, 1500);
    }

    #[test]
    fn no_mapped_servos_is_a_no_op() {
        let mut servos = Servos::new();
        servos.assign_start_offsets(2000);
        assert!(servos.slots.iter().all(|s| s.start == 0));
    }

    #[test]
    fn detects_duplicate_gpio() {
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        assert!(servos.gpio_already_mapped(4));
        assert!(!servos.gpio_already_mapped(5));
    }
}
