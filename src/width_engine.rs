//! Glitch-free pulse-width update protocol.
//!
//! Grounded on `servod.c::set_servo`/`set_servo_idle`: the mask buffers are
//! DMA-visible memory, so every single-word write must be issued through a
//! volatile raw pointer, never through a safe `&mut [u32]` the optimizer
//! could reorder or coalesce (see SPEC_FULL.md §5).

use std::ptr;

use crate::regs::gpio::MmioGpio;
use crate::servo::Servos;

/// Raw, volatile access to the two mask buffers shared with the DMA engine.
pub struct MaskBuffers {
    turnoff_mask: *mut u32,
    turnon_mask: *mut u32,
    num_samples: u32,
}

impl MaskBuffers {
    /// # Safety
    ///
    /// `turnoff_mask` must point to `num_samples` live `u32` words and
    /// `turnon_mask` to `MAX_SERVOS` live `u32` words, both inside the
    /// DMA-coherent arena, for the lifetime of this value.
    pub unsafe fn new(turnoff_mask: *mut u32, turnon_mask: *mut u32, num_samples: u32) -> Self {
        Self {
            turnoff_mask,
            turnon_mask,
            num_samples,
        }
    }

    fn read_turnoff(&self, slot: u32) -> u32 {
        unsafe { ptr::read_volatile(self.turnoff_mask.add((slot % self.num_samples) as usize)) }
    }

    fn write_turnoff(&self, slot: u32, value: u32) {
        unsafe {
            ptr::write_volatile(
                self.turnoff_mask.add((slot % self.num_samples) as usize),
                value,
            )
        }
    }

    fn write_turnon(&self, servo: usize, value: u32) {
        unsafe { ptr::write_volatile(self.turnon_mask.add(servo), value) }
    }

    pub fn init_all_clear(&self, mask: u32) {
        for i in 0..self.num_samples {
            self.write_turnoff(i, mask);
        }
    }
}

/// Set servo `s` to pulse width `width` ticks (0 means idle), performing the
/// minimal glitch-free sequence of mask-buffer writes to get there from
/// whatever width it currently has.
pub fn set_servo(servos: &mut Servos, masks: &MaskBuffers, s: usize, width: u32) {
    let slot = servos.slots[s];
    let Some(gpio) = slot.gpio else { return };
    let pin_bit = 1u32 << gpio;
    let old = slot.width;
    let start = slot.start;
    let n = masks.num_samples;

    if width > old {
        // Widening: clear bits from the new end backwards to the old end.
        for k in (old..width).rev() {
            let i = (start + k) % n;
            let v = masks.read_turnoff(i);
            masks.write_turnoff(i, v & !pin_bit);
        }
    } else if width < old {
        // Narrowing: set bits from the new end forwards to the old end.
        for k in width..old {
            let i = (start + k) % n;
            let v = masks.read_turnoff(i);
            masks.write_turnoff(i, v | pin_bit);
        }
    }

    servos.slots[s].width = width;
    masks.write_turnon(s, if width == 0 { 0 } else { pin_bit });
}

/// Force servo `s` idle without forgetting its configured width, so it can
/// be re-armed later with `set_servo(servos, masks, s, servos.slots[s].width)`.
///
/// At 100% duty (`width == num_samples`) every turnoff-mask slot is clear for
/// this pin, so the DMA chain never issues a clear write for it; clearing
/// `turnon_mask` alone would leave the pin stuck high. Fall back to a
/// synchronous GPIO write in that case, to whichever level is inactive under
/// `invert`.
pub fn set_servo_idle(
    servos: &mut Servos,
    masks: &MaskBuffers,
    gpio: &mut MmioGpio,
    invert: bool,
    s: usize,
) {
    let slot = servos.slots[s];
    let Some(pin) = slot.gpio else { return };
    masks.write_turnon(s, 0);
    if slot.width == masks.num_samples {
        if invert {
            gpio.set_high(pin);
        } else {
            gpio.set_low(pin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::gpio::Gpio;
    use crate::servo::Servos;

    fn make_masks(num_samples: u32, max_servos: usize) -> (Vec<u32>, Vec<u32>, MaskBuffers) {
        let mut turnoff = vec![0xFFFF_FFFFu32; num_samples as usize];
        let mut turnon = vec![0u32; max_servos];
        let masks = unsafe { MaskBuffers::new(turnoff.as_mut_ptr(), turnon.as_mut_ptr(), num_samples) };
        (turnoff, turnon, masks)
    }

    /// A `Gpio` register block backed by plain memory instead of `/dev/mem`,
    /// so `set_servo_idle`'s fallback GPIO write can be exercised off-board.
    fn make_gpio() -> (Box<[u32; 15]>, MmioGpio<'static>) {
        let mut regs = Box::new([0u32; 15]);
        let gpio = Gpio::new_mmio_at(regs.as_mut_ptr() as usize);
        (regs, gpio)
    }

    #[test]
    fn widening_clears_contiguous_run_from_start() {
        let (turnoff, _turnon, masks) = make_masks(2000, 32);
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        servos.slots[0].start = 0;
        set_servo(&mut servos, &masks, 0, 150);
        assert_eq!(servos.slots[0].width, 150);
        let bit = 1u32 << 4;
        for i in 0..150 {
            assert_eq!(turnoff[i] & bit, 0, "slot {i} should be cleared");
        }
        for i in 150..2000 {
            assert_eq!(turnoff[i] & bit, bit, "slot {i} should be set");
        }
    }

    #[test]
    fn narrowing_restores_tail() {
        let (turnoff, _turnon, masks) = make_masks(2000, 32);
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        set_servo(&mut servos, &masks, 0, 150);
        set_servo(&mut servos, &masks, 0, 100);
        let bit = 1u32 << 4;
        for i in 0..100 {
            assert_eq!(turnoff[i] & bit, 0);
        }
        for i in 100..2000 {
            assert_eq!(turnoff[i] & bit, bit);
        }
    }

    #[test]
    fn idempotent_set_to_same_width() {
        let (turnoff_before, _turnon, masks) = make_masks(2000, 32);
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        set_servo(&mut servos, &masks, 0, 150);
        let snapshot: Vec<u32> = turnoff_before.clone();
        set_servo(&mut servos, &masks, 0, 150);
        assert_eq!(turnoff_before, snapshot);
    }

    #[test]
    fn turnon_mask_tracks_idle_state() {
        let (_turnoff, turnon, masks) = make_masks(2000, 32);
        let (_regs, mut gpio) = make_gpio();
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        set_servo(&mut servos, &masks, 0, 150);
        assert_eq!(turnon[0], 1 << 4);
        set_servo_idle(&mut servos, &masks, &mut gpio, false, 0);
        assert_eq!(turnon[0], 0);
        assert_eq!(servos.slots[0].width, 150);
    }

    #[test]
    fn full_duty_idle_falls_back_to_synchronous_gpio_write() {
        let (_turnoff, _turnon, masks) = make_masks(2000, 32);
        let (regs, mut gpio) = make_gpio();
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        set_servo(&mut servos, &masks, 0, 2000);
        set_servo_idle(&mut servos, &masks, &mut gpio, false, 0);
        assert_eq!(regs[10] & (1 << 4), 1 << 4, "CLR0 write expected at full duty");
    }

    #[test]
    fn full_duty_idle_respects_invert() {
        let (_turnoff, _turnon, masks) = make_masks(2000, 32);
        let (regs, mut gpio) = make_gpio();
        let mut servos = Servos::new();
        servos.slots[0].gpio = Some(4);
        set_servo(&mut servos, &masks, 0, 2000);
        set_servo_idle(&mut servos, &masks, &mut gpio, true, 0);
        assert_eq!(regs[7] & (1 << 4), 1 << 4, "SET0 write expected when inverted");
    }

    #[test]
    fn staggered_start_offset_is_respected() {
        let (turnoff, _turnon, masks) = make_masks(2000, 32);
        let mut servos = Servos::new();
        servos.slots[1].gpio = Some(17);
        servos.slots[1].start = 500;
        set_servo(&mut servos, &masks, 1, 100);
        let bit = 1u32 << 17;
        for i in 500..600 {
            assert_eq!(turnoff[i] & bit, 0);
        }
        assert_eq!(turnoff[499] & bit, bit);
        assert_eq!(turnoff[600] & bit, bit);
    }
}
