//! Layout of the firmware-allocated DMA memory arena: `turnoff_mask`,
//! `turnon_mask`, and the control-block chain, in that order, inside one
//! physically-contiguous buffer.
//!
//! Grounded on `servod.c`'s `map_dma_mem`/`init_ctrl_data` memory math.

use memmap2::MmapMut;

use crate::error::{ConfigError, ResourceError};
use crate::mailbox::{Mailbox, MEM_FLAG_COHERENT, MEM_FLAG_DIRECT};
use crate::regs::bus_to_phys;
use crate::regs::dma::DmaCb;

/// Hard cap on the arena size (`MAX_MEMORY_USAGE` in the original).
pub const MAX_ARENA_BYTES: usize = 16 * 1024 * 1024;
const PAGE_SIZE: usize = 4096;

/// Owns the mailbox allocation backing the arena and the `/dev/mem` mapping
/// used to access it from the CPU side.
pub struct Arena {
    mailbox: Mailbox,
    handle: u32,
    bus_addr: u32,
    map: MmapMut,
    num_samples: u32,
    max_servos: usize,
    num_cbs: usize,
    released: bool,
}

/// Byte offsets of the three regions within the arena, in words/CBs.
pub struct ArenaLayout {
    pub turnoff_mask_offset: usize,
    pub turnon_mask_offset: usize,
    pub cb_offset: usize,
    pub total_bytes: usize,
}

impl ArenaLayout {
    pub fn compute(num_samples: u32, max_servos: usize) -> Self {
        let turnoff_mask_bytes = num_samples as usize * 4;
        let turnon_mask_bytes = max_servos * 4;
        let num_cbs = 2 * num_samples as usize + max_servos;
        let cb_bytes = num_cbs * core::mem::size_of::<DmaCb>();
        let turnoff_mask_offset = 0;
        let turnon_mask_offset = turnoff_mask_bytes;
        // control blocks are 8 words (32 bytes) each; already aligned.
        let cb_offset = turnon_mask_offset + turnon_mask_bytes;
        let total_bytes = cb_offset + cb_bytes;
        ArenaLayout {
            turnoff_mask_offset,
            turnon_mask_offset,
            cb_offset,
            total_bytes,
        }
    }
}

impl Arena {
    pub fn allocate(
        num_samples: u32,
        max_servos: usize,
        coherent_flag_required: bool,
        mem_base_phys: u64,
    ) -> Result<Self, ResourceError> {
        let layout = ArenaLayout::compute(num_samples, max_servos);
        let num_pages = layout.total_bytes.div_ceil(PAGE_SIZE);
        let size_bytes = num_pages * PAGE_SIZE;
        if size_bytes > MAX_ARENA_BYTES {
            return Err(ResourceError::MailboxAllocFailed { size: size_bytes });
        }

        let mailbox = Mailbox::open()?;
        let flags = if coherent_flag_required {
            MEM_FLAG_DIRECT | MEM_FLAG_COHERENT
        } else {
            MEM_FLAG_DIRECT
        };
        let handle = mailbox.mem_alloc(size_bytes as u32, PAGE_SIZE as u32, flags)?;
        let bus_addr = match mailbox.mem_lock(handle) {
            Ok(addr) => addr,
            Err(e) => {
                let _ = mailbox.mem_free(handle);
                return Err(e);
            }
        };
        let phys_addr = bus_to_phys(bus_addr) as u64;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/mem")
            .map_err(|e| ResourceError::OpenFailed {
                path: "/dev/mem".into(),
                source: e,
            })?;
        let map = unsafe {
            memmap2::MmapOptions::new()
                .offset(mem_base_phys + phys_addr)
                .len(size_bytes)
                .map_mut(&file)
        }
        .map_err(|e| ResourceError::MmapFailed {
            what: "DMA arena".into(),
            source: e,
        })?;

        Ok(Self {
            mailbox,
            handle,
            bus_addr,
            map,
            num_samples,
            max_servos,
            num_cbs: 2 * num_samples as usize + max_servos,
            released: false,
        })
    }

    pub fn layout(&self) -> ArenaLayout {
        ArenaLayout::compute(self.num_samples, self.max_servos)
    }

    pub fn virt_base(&self) -> *mut u8 {
        self.map.as_ptr() as *mut u8
    }

    /// Convert a virtual address inside the arena into the bus address the
    /// DMA engine must use to refer to the same byte.
    pub fn virt_to_bus(&self, virt: *const u8) -> u32 {
        let offset = virt as usize - self.virt_base() as usize;
        self.bus_addr + offset as u32
    }

    pub fn turnoff_mask_ptr(&self) -> *mut u32 {
        unsafe { self.virt_base().add(self.layout().turnoff_mask_offset) as *mut u32 }
    }

    pub fn turnon_mask_ptr(&self) -> *mut u32 {
        unsafe { self.virt_base().add(self.layout().turnon_mask_offset) as *mut u32 }
    }

    pub fn cb_ptr(&self) -> *mut DmaCb {
        unsafe { self.virt_base().add(self.layout().cb_offset) as *mut DmaCb }
    }

    pub fn num_cbs(&self) -> usize {
        self.num_cbs
    }

    /// Unlock and free the mailbox allocation now, synchronously.
    ///
    /// Teardown must call this directly rather than rely on `Drop`, because
    /// the signal handler exits the process with `std::process::exit`,
    /// which never runs destructors.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        let _ = self.mailbox.mem_unlock(self.handle);
        let _ = self.mailbox.mem_free(self.handle);
        self.released = true;
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.release();
    }
}

pub fn validate_sizes(cycle_time_us: u32, step_time_us: u32) -> Result<u32, ConfigError> {
    if step_time_us == 0 || cycle_time_us % step_time_us != 0 {
        return Err(ConfigError::CycleNotDivisible {
            cycle_time_us,
            step_time_us,
        });
    }
    let num_samples = cycle_time_us / step_time_us;
    if num_samples < 100 {
        return Err(ConfigError::TooFewSamples { num_samples });
    }
    Ok(num_samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_contiguous_and_ordered() {
        let layout = ArenaLayout::compute(2000, 32);
        assert_eq!(layout.turnoff_mask_offset, 0);
        assert_eq!(layout.turnon_mask_offset, 2000 * 4);
        assert_eq!(layout.cb_offset, 2000 * 4 + 32 * 4);
        assert_eq!(layout.total_bytes, layout.cb_offset + (2 * 2000 + 32) * 32);
    }

    #[test]
    fn validate_sizes_rejects_indivisible() {
        assert!(validate_sizes(20000, 13).is_err());
    }

    #[test]
    fn validate_sizes_rejects_too_few_samples() {
        assert!(validate_sizes(500, 10).is_err());
    }

    #[test]
    fn validate_sizes_default_is_2000_samples() {
        assert_eq!(validate_sizes(20000, 10).unwrap(), 2000);
    }
}
