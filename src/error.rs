//! Error taxonomy for the daemon.
//!
//! Partitioned by how the caller is expected to react: [`ConfigError`] and
//! [`ResourceError`] are fatal at startup, [`CommandError`] is logged and
//! discarded by the command loop.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cycle time {cycle_time_us}us is not a multiple of step time {step_time_us}us")]
    CycleNotDivisible {
        cycle_time_us: u32,
        step_time_us: u32,
    },
    #[error("number of samples {num_samples} must be at least 100")]
    TooFewSamples { num_samples: u32 },
    #[error("invalid header pin specification: {0}")]
    InvalidPinSpec(String),
    #[error("pin {pin} on header {header} is not wired to a GPIO on this board")]
    UnmappedHeaderPin { header: u8, pin: u8 },
    #[error("GPIO {gpio} is mapped more than once")]
    DuplicateGpio { gpio: u8 },
    #[error("more than {max} servos configured")]
    TooManyServos { max: usize },
    #[error("invalid min/max width argument: {0}")]
    InvalidWidthArg(String),
    #[error("min width {min} must be less than max width {max}")]
    MinNotLessThanMax { min: u32, max: u32 },
    #[error("requested arena size exceeds the {max_mib} MiB cap")]
    ArenaTooLarge { max_mib: u32 },
    #[error("could not determine board revision: {0}")]
    UnknownBoard(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("failed to open {path}: {source}")]
    OpenFailed { path: String, source: io::Error },
    #[error("failed to map {what}: {source}")]
    MmapFailed { what: String, source: io::Error },
    #[error("mailbox allocation of {size} bytes failed")]
    MailboxAllocFailed { size: usize },
    #[error("mailbox lock of handle {handle} failed")]
    MailboxLockFailed { handle: u32 },
    #[error("mailbox ioctl failed: {source}")]
    MailboxIoctl { source: io::Error },
    #[error("failed to create FIFO {path}: {source}")]
    FifoCreateFailed { path: String, source: io::Error },
    #[error("failed to install signal handler: {source}")]
    SignalHandlerFailed { source: io::Error },
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("line too long, discarded")]
    LineTooLong,
    #[error("empty command")]
    Empty,
    #[error("unknown servo index {0}")]
    UnknownServo(u8),
    #[error("header {header} pin {pin} is not a mapped servo")]
    UnmappedPin { header: u8, pin: u8 },
    #[error("could not parse width: {0}")]
    BadWidth(String),
    #[error("width {width} out of range [{min}, {max}]")]
    WidthOutOfRange { width: i32, min: u32, max: u32 },
    #[error("malformed command: {0}")]
    Malformed(String),
}
