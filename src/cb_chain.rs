//! Builds the circular DMA control-block chain once, before DMA is started.
//!
//! Grounded on `servod.c::init_ctrl_data`: for every sample slot, emit a
//! clear block, an optional set block for whichever servo starts here, and a
//! delay block that blocks the engine on the pacer's DREQ line.

use std::ptr;

use crate::arena::Arena;
use crate::regs::dma::{dma_per_map, DmaCb, DMA_D_DREQ, DMA_NO_WIDE_BURSTS, DMA_PCM_DREQ, DMA_PWM_DREQ, DMA_WAIT_RESP};
use crate::servo::Servos;

/// Bus address alias through which peripherals (including their DMA request
/// lines) are addressed by the DMA engine.
pub const PERIPHERAL_BUS_BASE: u32 = 0x7E00_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacer {
    Pwm,
    Pcm,
}

impl Pacer {
    fn dreq(&self) -> u32 {
        match self {
            Pacer::Pwm => DMA_PWM_DREQ,
            Pacer::Pcm => DMA_PCM_DREQ,
        }
    }

    fn fifo_bus_addr(&self, peripheral_offset_base: u32) -> u32 {
        match self {
            Pacer::Pwm => peripheral_offset_base + crate::regs::PWM_OFFSET as u32 + 0x18,
            Pacer::Pcm => peripheral_offset_base + crate::regs::PCM_OFFSET as u32 + 0x04,
        }
    }
}

const GPIO_SET0_OFFSET: u32 = 0x1C;
const GPIO_CLR0_OFFSET: u32 = 0x28;

/// Build the full CB chain into the arena and return the bus address of
/// `cb[0]` (to be written into `DMA_CONBLK_AD`).
pub fn build(
    arena: &Arena,
    servos: &Servos,
    num_samples: u32,
    invert: bool,
    pacer: Pacer,
) -> u32 {
    let gpio_set_offset = if invert {
        GPIO_CLR0_OFFSET
    } else {
        GPIO_SET0_OFFSET
    };
    let gpio_clr_offset = if invert {
        GPIO_SET0_OFFSET
    } else {
        GPIO_CLR0_OFFSET
    };
    let gpio_set_bus = PERIPHERAL_BUS_BASE + crate::regs::GPIO_OFFSET as u32 + gpio_set_offset;
    let gpio_clr_bus = PERIPHERAL_BUS_BASE + crate::regs::GPIO_OFFSET as u32 + gpio_clr_offset;
    let fifo_bus = pacer.fifo_bus_addr(PERIPHERAL_BUS_BASE);
    let dreq_info = DMA_NO_WIDE_BURSTS | DMA_WAIT_RESP | DMA_D_DREQ | dma_per_map(pacer.dreq());
    let immediate_info = DMA_NO_WIDE_BURSTS | DMA_WAIT_RESP;

    let turnoff_mask = arena.turnoff_mask_ptr();
    let turnon_mask = arena.turnon_mask_ptr();
    let cb = arena.cb_ptr();
    let num_cbs = arena.num_cbs();

    // Map each sample slot to the (rank-ordered) servo that starts there, if
    // any, so set-blocks come out in strictly increasing `servostart` order.
    let mut starts: Vec<(u32, usize)> = servos
        .mapped_indices()
        .map(|s| (servos.slots[s].start, s))
        .collect();
    starts.sort_by_key(|&(start, _)| start);
    let mut next_start_idx = 0usize;

    let mut cb_idx = 0usize;
    for slot in 0..num_samples {
        let clear_cb = unsafe { cb.add(cb_idx) };
        unsafe {
            ptr::write_volatile(
                clear_cb,
                DmaCb {
                    info: immediate_info,
                    src: arena.virt_to_bus(unsafe { turnoff_mask.add(slot as usize) as *const u8 }),
                    dst: gpio_clr_bus,
                    length: 4,
                    stride: 0,
                    next: 0, // patched below once the next CB's address is known
                    pad: [0; 2],
                },
            );
        }
        cb_idx += 1;

        if next_start_idx < starts.len() && starts[next_start_idx].0 == slot {
            let servo = starts[next_start_idx].1;
            next_start_idx += 1;
            let set_cb = unsafe { cb.add(cb_idx) };
            unsafe {
                ptr::write_volatile(
                    set_cb,
                    DmaCb {
                        info: immediate_info,
                        src: arena.virt_to_bus(unsafe { turnon_mask.add(servo) as *const u8 }),
                        dst: gpio_set_bus,
                        length: 4,
                        stride: 0,
                        next: 0,
                        pad: [0; 2],
                    },
                );
            }
            cb_idx += 1;
        }

        let delay_cb = unsafe { cb.add(cb_idx) };
        unsafe {
            ptr::write_volatile(
                delay_cb,
                DmaCb {
                    info: dreq_info,
                    // Any arena word works as the throwaway source for the
                    // pacing write; the turnoff mask's first word is as good
                    // as any.
                    src: arena.virt_to_bus(turnoff_mask as *const u8),
                    dst: fifo_bus,
                    length: 4,
                    stride: 0,
                    next: 0,
                    pad: [0; 2],
                },
            );
        }
        cb_idx += 1;
    }
    // `num_cbs` is the arena's worst-case capacity (sized for `MAX_SERVOS`
    // mapped servos); `cb_idx` is how many CBs this run actually populated.
    // Only the latter are live, so the ring must close over `cb_idx`, never
    // over the unwritten tail of the arena's CB region.
    debug_assert!(cb_idx <= num_cbs);
    let live_cbs = cb_idx;

    // Second pass: link every CB to its successor, closing the ring.
    for i in 0..live_cbs {
        let next_addr = if i + 1 < live_cbs {
            arena.virt_to_bus(unsafe { cb.add(i + 1) as *const u8 })
        } else {
            arena.virt_to_bus(cb as *const u8)
        };
        unsafe {
            let ptr_i = cb.add(i);
            let mut block = ptr::read_volatile(ptr_i);
            block.next = next_addr;
            ptr::write_volatile(ptr_i, block);
        }
    }

    arena.virt_to_bus(cb as *const u8)
}
