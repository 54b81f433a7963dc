//! Maps the DMA, PWM, PCM, clock and GPIO register windows from `/dev/mem`.
//!
//! Grounded on the `mmap_bcm_register` helper in the retrieval pack's
//! `rpi_led_panel` registers module, generalized from one `Rc<MmapMut>` per
//! block to a typed `derive-mmio` view per block.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;

use memmap2::{MmapMut, MmapOptions};

use crate::error::ResourceError;
use crate::regs;

/// Physical base address of the peripheral register space, which varies by
/// SoC generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralBase {
    /// BCM2835 (Pi 1, Zero).
    Bcm2835 = 0x2000_0000,
    /// BCM2836/2837 (Pi 2, Pi 3).
    Bcm2836 = 0x3F00_0000,
    /// BCM2711 (Pi 4).
    Bcm2711 = 0xFE00_0000,
}

impl PeripheralBase {
    pub fn detect() -> Result<Self, ResourceError> {
        let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").map_err(|e| {
            ResourceError::OpenFailed {
                path: "/proc/cpuinfo".into(),
                source: e,
            }
        })?;
        Ok(Self::from_cpuinfo(&cpuinfo))
    }

    fn from_cpuinfo(cpuinfo: &str) -> Self {
        for line in cpuinfo.lines() {
            if let Some(v) = line.strip_prefix("Hardware") {
                let v = v.trim_start_matches([':', '\t', ' ']);
                return match v.trim() {
                    "BCM2708" | "BCM2835" => PeripheralBase::Bcm2835,
                    "BCM2836" | "BCM2837" => PeripheralBase::Bcm2836,
                    "BCM2711" => PeripheralBase::Bcm2711,
                    _ => PeripheralBase::Bcm2836,
                };
            }
        }
        PeripheralBase::Bcm2836
    }

    pub fn addr(&self) -> u64 {
        *self as u64
    }

    /// PLLD frequency in MHz feeding the PWM/PCM clock generator on this SoC.
    pub fn plld_freq_mhz(&self) -> u32 {
        match self {
            PeripheralBase::Bcm2835 => 500,
            PeripheralBase::Bcm2836 => 500,
            PeripheralBase::Bcm2711 => 750,
        }
    }
}

/// Open `/dev/mem` and map `size_bytes` starting at `base + offset`.
fn mmap_register_window(base: u64, offset: u64, size_bytes: usize) -> Result<MmapMut, ResourceError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open("/dev/mem")
        .map_err(|e| ResourceError::OpenFailed {
            path: "/dev/mem".into(),
            source: e,
        })?;
    unsafe {
        MmapOptions::new()
            .offset(base + offset)
            .len(size_bytes)
            .map_mut(&file)
    }
    .map_err(|e| ResourceError::MmapFailed {
        what: format!("register window at offset {offset:#x}"),
        source: e,
    })
}

/// Owns the five `/dev/mem` mappings this daemon needs and exposes typed
/// views into each.
pub struct Peripherals {
    dma_map: MmapMut,
    pwm_map: MmapMut,
    pcm_map: MmapMut,
    clk_map: MmapMut,
    gpio_map: MmapMut,
    pub dma_chan: u8,
}

impl Peripherals {
    pub fn map(base: PeripheralBase, dma_chan: u8) -> Result<Self, ResourceError> {
        let dma_map = mmap_register_window(base.addr(), regs::DMA_OFFSET as u64, 0x1000)?;
        let pwm_map = mmap_register_window(base.addr(), regs::PWM_OFFSET as u64, 0x28)?;
        let pcm_map = mmap_register_window(base.addr(), regs::PCM_OFFSET as u64, 0x24)?;
        let clk_map = mmap_register_window(base.addr(), regs::CLK_OFFSET as u64, 0xA8)?;
        let gpio_map = mmap_register_window(base.addr(), regs::GPIO_OFFSET as u64, 0xB4)?;
        Ok(Self {
            dma_map,
            pwm_map,
            pcm_map,
            clk_map,
            gpio_map,
            dma_chan,
        })
    }

    pub fn dma(&mut self) -> regs::dma::MmioDmaChannel<'static> {
        let base = self.dma_map.as_mut_ptr() as usize + self.dma_chan as usize * regs::DMA_CHAN_SIZE;
        regs::dma::DmaChannel::new_mmio_at(base)
    }

    pub fn pwm(&mut self) -> regs::pwm::MmioPwm<'static> {
        regs::pwm::Pwm::new_mmio_at(self.pwm_map.as_mut_ptr() as usize)
    }

    pub fn pcm(&mut self) -> regs::pcm::MmioPcm<'static> {
        regs::pcm::Pcm::new_mmio_at(self.pcm_map.as_mut_ptr() as usize)
    }

    pub fn clk_pwm(&mut self) -> regs::clk::MmioClkPwm<'static> {
        regs::clk::ClkPwm::new_mmio_at(self.clk_map.as_mut_ptr() as usize + 0xA0)
    }

    pub fn clk_pcm(&mut self) -> regs::clk::MmioClkPcm<'static> {
        regs::clk::ClkPcm::new_mmio_at(self.clk_map.as_mut_ptr() as usize + 0x98)
    }

    pub fn gpio(&mut self) -> regs::gpio::MmioGpio<'static> {
        regs::gpio::Gpio::new_mmio_at(self.gpio_map.as_mut_ptr() as usize)
    }
}
