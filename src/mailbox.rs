//! Minimal client for the VideoCore mailbox property interface.
//!
//! Used only to allocate, lock, and free the physically-contiguous,
//! bus-addressable memory the DMA engine needs for the mask buffers and
//! control-block chain. The wire format and ioctl plumbing are exactly what
//! the firmware documents; nothing here is specific to this daemon, which is
//! why it is treated as an external collaborator (see SPEC_FULL.md §4.9).

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;

use crate::error::ResourceError;

const MAJOR_NUM: u8 = 100;
const IOCTL_MBOX_PROPERTY: u64 = request_code_readwrite(MAJOR_NUM, 0, core::mem::size_of::<u32>());

/// Minimal reimplementation of the Linux `_IOWR` macro for the one ioctl this
/// client needs.
const fn request_code_readwrite(ty: u8, nr: u8, size: usize) -> u64 {
    const IOC_READ: u64 = 2;
    const IOC_WRITE: u64 = 1;
    const IOC_NRSHIFT: u64 = 0;
    const IOC_TYPESHIFT: u64 = 8;
    const IOC_SIZESHIFT: u64 = 16;
    const IOC_DIRSHIFT: u64 = 30;
    ((IOC_READ | IOC_WRITE) << IOC_DIRSHIFT)
        | ((ty as u64) << IOC_TYPESHIFT)
        | ((nr as u64) << IOC_NRSHIFT)
        | ((size as u64) << IOC_SIZESHIFT)
}

/// `MEM_FLAG_DIRECT`: uncached memory alias.
pub const MEM_FLAG_DIRECT: u32 = 0x04;
/// `MEM_FLAG_COHERENT`: DMA-coherent alias, required in addition to
/// `MEM_FLAG_DIRECT` on the original Pi 1 SoC.
pub const MEM_FLAG_COHERENT: u32 = 0x08;

pub struct Mailbox {
    file: File,
}

impl Mailbox {
    pub fn open() -> Result<Self, ResourceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/vcio")
            .map_err(|e| ResourceError::OpenFailed {
                path: "/dev/vcio".into(),
                source: e,
            })?;
        Ok(Self { file })
    }

    /// Submit one property-tag request and return its response words.
    fn property(&self, tag: u32, args: &[u32]) -> Result<Vec<u32>, ResourceError> {
        let mut buf = vec![0u32; 6 + args.len()];
        let resp_len = (args.len() * 4) as u32;
        buf[1] = 0; // request
        buf[2] = tag;
        buf[3] = resp_len;
        buf[4] = resp_len; // request indicator, cleared on success by firmware
        buf[5..5 + args.len()].copy_from_slice(args);
        buf[5 + args.len()] = 0; // end tag
        buf[0] = (buf.len() * 4) as u32;

        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_MBOX_PROPERTY as libc::c_ulong,
                buf.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(ResourceError::MailboxIoctl {
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(buf[5..5 + args.len()].to_vec())
    }

    /// Allocate `size` bytes of physically-contiguous memory, aligned to
    /// `align`, with the given mailbox flags. Returns the firmware memory
    /// handle.
    pub fn mem_alloc(&self, size: u32, align: u32, flags: u32) -> Result<u32, ResourceError> {
        let resp = self.property(0x3000c, &[size, align, flags])?;
        let handle = resp[0];
        if handle == 0 {
            return Err(ResourceError::MailboxAllocFailed {
                size: size as usize,
            });
        }
        Ok(handle)
    }

    /// Lock an allocation, returning its bus address.
    pub fn mem_lock(&self, handle: u32) -> Result<u32, ResourceError> {
        let resp = self.property(0x3000d, &[handle])?;
        let bus_addr = resp[0];
        if bus_addr == 0 {
            return Err(ResourceError::MailboxLockFailed { handle });
        }
        Ok(bus_addr)
    }

    pub fn mem_unlock(&self, handle: u32) -> Result<(), ResourceError> {
        self.property(0x3000e, &[handle])?;
        Ok(())
    }

    pub fn mem_free(&self, handle: u32) -> Result<(), ResourceError> {
        self.property(0x3000f, &[handle])?;
        Ok(())
    }
}
