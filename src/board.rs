//! Board revision detection and header-pin-to-GPIO tables.
//!
//! Not the focus of this crate (see SPEC_FULL.md §4.8); the tables are
//! reproduced verbatim from the hardware each board revision actually wires.

use std::fs;

use crate::error::ConfigError;

/// Sentinel for a header pin that is not wired to a GPIO (power, ground, ID).
pub const DMY: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardRevision {
    /// Original 26-pin P1 header only.
    Rev1_26Pin,
    /// 26-pin P1 header plus the 8-pin P5 header.
    Rev2_26PinPlusP5,
    /// 40-pin P1 header (B+ and later).
    BPlus40Pin,
}

impl BoardRevision {
    pub fn p1_table(&self) -> &'static [u8] {
        match self {
            BoardRevision::Rev1_26Pin => &REV1_P1,
            BoardRevision::Rev2_26PinPlusP5 => &REV2_P1,
            BoardRevision::BPlus40Pin => &BPLUS_P1,
        }
    }

    pub fn p5_table(&self) -> &'static [u8] {
        match self {
            BoardRevision::Rev2_26PinPlusP5 => &REV2_P5,
            _ => &[],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BoardRevision::Rev1_26Pin => "P1 (26 pins)",
            BoardRevision::Rev2_26PinPlusP5 => "P1 (26 pins), P5 (8 pins)",
            BoardRevision::BPlus40Pin => "P1 (40 pins)",
        }
    }

    /// Translate a 1-based `(header, pin)` pair into a GPIO number.
    pub fn gpio_for_pin(&self, header: u8, pin: u8) -> Result<u8, ConfigError> {
        let table = match header {
            1 => self.p1_table(),
            5 => self.p5_table(),
            _ => return Err(ConfigError::InvalidPinSpec(format!("unknown header P{header}"))),
        };
        let idx = pin.checked_sub(1).ok_or_else(|| {
            ConfigError::InvalidPinSpec(format!("pin numbers start at 1, got {pin}"))
        })? as usize;
        let gpio = *table
            .get(idx)
            .ok_or_else(|| ConfigError::UnmappedHeaderPin { header, pin })?;
        if gpio == DMY {
            return Err(ConfigError::UnmappedHeaderPin { header, pin });
        }
        Ok(gpio)
    }

    /// Determine the running board's revision from `/proc/cpuinfo`.
    pub fn detect() -> Result<Self, ConfigError> {
        let cpuinfo = fs::read_to_string("/proc/cpuinfo")
            .map_err(|e| ConfigError::UnknownBoard(e.to_string()))?;
        Self::from_cpuinfo(&cpuinfo)
    }

    fn from_cpuinfo(cpuinfo: &str) -> Result<Self, ConfigError> {
        let mut hardware = None;
        let mut revision = None;
        for line in cpuinfo.lines() {
            if let Some(v) = line.strip_prefix("Hardware") {
                hardware = v.split(':').nth(1).map(|s| s.trim().to_string());
            }
            if let Some(v) = line.strip_prefix("Revision") {
                revision = v.split(':').nth(1).map(|s| s.trim().to_string());
            }
        }
        let revision = revision
            .ok_or_else(|| ConfigError::UnknownBoard("no Revision: line in /proc/cpuinfo".into()))?;
        let last_byte = u8::from_str_radix(&revision[revision.len().saturating_sub(2)..], 16)
            .map_err(|_| ConfigError::UnknownBoard(format!("unparseable revision {revision}")))?;
        match last_byte {
            0x00 | 0x01 => Err(ConfigError::UnknownBoard(format!(
                "revision {revision} predates GPIO header"
            ))),
            0x02 | 0x03 => Ok(BoardRevision::Rev1_26Pin),
            _ if hardware.as_deref() == Some("BCM2708") => Ok(BoardRevision::Rev2_26PinPlusP5),
            _ => Ok(BoardRevision::BPlus40Pin),
        }
    }
}

#[rustfmt::skip]
const REV1_P1: [u8; 26] = [
    DMY, DMY, 0, DMY, 1, DMY, 4, 14, DMY, 15,
    17, 18, 21, DMY, 22, 23, DMY, 24, 10, DMY,
    9, 25, 11, 8, DMY, 7,
];

#[rustfmt::skip]
const REV2_P1: [u8; 26] = [
    DMY, DMY, 2, DMY, 3, DMY, 4, 14, DMY, 15,
    17, 18, 27, DMY, 22, 23, DMY, 24, 10, DMY,
    9, 25, 11, 8, DMY, 7,
];

#[rustfmt::skip]
const REV2_P5: [u8; 8] = [DMY, DMY, 28, 29, 30, 31, DMY, DMY];

#[rustfmt::skip]
const BPLUS_P1: [u8; 40] = [
    DMY, DMY, 2, DMY, 3, DMY, 4, 14, DMY, 15,
    17, 18, 27, DMY, 22, 23, DMY, 24, 10, DMY,
    9, 25, 11, 8, DMY, 7, DMY, DMY, 5, DMY,
    6, 12, 13, DMY, 19, 16, 26, 20, DMY, 21,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rev1_p1_pin7_is_gpio4() {
        assert_eq!(BoardRevision::Rev1_26Pin.gpio_for_pin(1, 7).unwrap(), 4);
    }

    #[test]
    fn rev2_p1_pin3_is_gpio2_not_gpio0() {
        assert_eq!(BoardRevision::Rev2_26PinPlusP5.gpio_for_pin(1, 3).unwrap(), 2);
    }

    #[test]
    fn bplus_pin40_is_gpio21() {
        assert_eq!(BoardRevision::BPlus40Pin.gpio_for_pin(1, 40).unwrap(), 21);
    }

    #[test]
    fn power_pins_are_unmapped() {
        assert!(BoardRevision::Rev1_26Pin.gpio_for_pin(1, 1).is_err());
    }

    #[test]
    fn rev1_has_no_p5_header() {
        assert!(BoardRevision::Rev1_26Pin.gpio_for_pin(5, 3).is_err());
    }

    #[test]
    fn rev2_p5_pin3_is_gpio28() {
        assert_eq!(
            BoardRevision::Rev2_26PinPlusP5.gpio_for_pin(5, 3).unwrap(),
            28
        );
    }

    #[test]
    fn from_cpuinfo_rev1() {
        let txt = "Hardware\t: BCM2708\nRevision\t: 0002\n";
        assert_eq!(
            BoardRevision::from_cpuinfo(txt).unwrap(),
            BoardRevision::Rev1_26Pin
        );
    }

    #[test]
    fn from_cpuinfo_bplus() {
        let txt = "Hardware\t: BCM2835\nRevision\t: a02082\n";
        assert_eq!(
            BoardRevision::from_cpuinfo(txt).unwrap(),
            BoardRevision::BPlus40Pin
        );
    }
}
