//! Typed volatile views over the BCM283x peripheral register blocks this
//! daemon drives: DMA, PWM, PCM, the clock manager, and GPIO.
//!
//! Each block follows the same `derive_mmio`-generated pattern the teacher
//! crate uses for its own peripheral register blocks (see `gpio/regs.rs` and
//! `timer/regs.rs` upstream), except the base address is a runtime `/dev/mem`
//! mmap virtual address rather than a compile-time SoC constant.

pub mod clk;
pub mod dma;
pub mod gpio;
pub mod pcm;
pub mod pwm;

/// Byte offset of the DMA register window from the peripheral base.
pub const DMA_OFFSET: usize = 0x0000_7000;
/// Byte offset of the clock-manager register window from the peripheral base.
pub const CLK_OFFSET: usize = 0x0010_1000;
/// Byte offset of the PCM register window from the peripheral base.
pub const PCM_OFFSET: usize = 0x0020_3000;
/// Byte offset of the PWM register window from the peripheral base.
pub const PWM_OFFSET: usize = 0x0020_C000;
/// Byte offset of the GPIO register window from the peripheral base.
pub const GPIO_OFFSET: usize = 0x0020_0000;

/// Byte stride between two DMA channels' register blocks.
pub const DMA_CHAN_SIZE: usize = 0x100;
/// Default DMA channel used for the control-block chain.
pub const DMA_CHAN_DEFAULT: u8 = 14;

/// Mask applied to a bus address to obtain the CPU-physical address
/// (`BUS_TO_PHYS` in the original implementation).
pub const fn bus_to_phys(addr: u32) -> u32 {
    addr & !0xC000_0000
}
