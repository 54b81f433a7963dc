//! Command and width grammar.
//!
//! Grounded on `servod.c::parse_width`/`parse_min_max_arg` for the width
//! suffix grammar, and `servod.c::go_go_go`'s command dispatch for the line
//! grammar.

use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthUnit {
    Ticks,
    Microseconds,
    Percent,
}

#[derive(Debug, Clone, Copy)]
pub struct ParsedWidth {
    pub relative: bool,
    pub negative: bool,
    pub value: u32,
    pub unit: WidthUnit,
}

/// Parse the `<width>` grammar: optional sign, decimal digits, optional
/// `us`/`%` suffix.
pub fn parse_width_token(s: &str) -> Result<ParsedWidth, CommandError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CommandError::BadWidth(s.to_string()));
    }
    let (relative, negative, rest) = if let Some(rest) = s.strip_prefix('+') {
        (true, false, rest)
    } else if let Some(rest) = s.strip_prefix('-') {
        (true, true, rest)
    } else {
        (false, false, s)
    };
    let (digits, unit) = if let Some(d) = rest.strip_suffix("us") {
        (d, WidthUnit::Microseconds)
    } else if let Some(d) = rest.strip_suffix('%') {
        (d, WidthUnit::Percent)
    } else {
        (rest, WidthUnit::Ticks)
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CommandError::BadWidth(s.to_string()));
    }
    let value: u32 = digits
        .parse()
        .map_err(|_| CommandError::BadWidth(s.to_string()))?;
    Ok(ParsedWidth {
        relative,
        negative,
        value,
        unit,
    })
}

/// Resolve a parsed width token against the current width and the
/// configured timing lattice, producing a tick count clamped into
/// `[min_ticks, max_ticks]` (0 always passes through unclamped).
pub fn resolve_width(
    parsed: ParsedWidth,
    current_ticks: u32,
    step_time_us: u32,
    min_ticks: u32,
    max_ticks: u32,
) -> Result<u32, CommandError> {
    let magnitude: i64 = match parsed.unit {
        WidthUnit::Ticks => parsed.value as i64,
        WidthUnit::Microseconds => parsed.value as i64 / step_time_us as i64,
        WidthUnit::Percent => {
            let span = (max_ticks - min_ticks) as i64;
            min_ticks as i64 + (parsed.value as i64 * span) / 100
        }
    };
    let signed = if parsed.negative { -magnitude } else { magnitude };

    let absolute = if parsed.relative {
        let sum = current_ticks as i64 + signed;
        sum.clamp(min_ticks as i64, max_ticks as i64)
    } else {
        signed
    };

    if absolute == 0 {
        return Ok(0);
    }
    if absolute < min_ticks as i64 || absolute > max_ticks as i64 {
        return Err(CommandError::WidthOutOfRange {
            width: absolute as i32,
            min: min_ticks,
            max: max_ticks,
        });
    }
    Ok(absolute as u32)
}

#[derive(Debug, Clone)]
pub enum Command {
    SetServoIndex { servo: u8, width: ParsedWidth },
    SetHeaderPin { header: u8, pin: u8, width: ParsedWidth },
    Debug,
    Status { path: String },
}

/// Parse one command line (without the trailing newline).
pub fn parse_line(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(CommandError::Empty);
    }
    if line == "debug" {
        return Ok(Command::Debug);
    }
    if let Some(path) = line.strip_prefix("status ") {
        return Ok(Command::Status {
            path: path.trim().to_string(),
        });
    }
    let (lhs, rhs) = line
        .split_once('=')
        .ok_or_else(|| CommandError::Malformed(line.to_string()))?;
    let width = parse_width_token(rhs)?;

    if let Some(rest) = lhs.strip_prefix('P') {
        let (header, pin) = rest
            .split_once('-')
            .ok_or_else(|| CommandError::Malformed(line.to_string()))?;
        let header: u8 = header
            .parse()
            .map_err(|_| CommandError::Malformed(line.to_string()))?;
        let pin: u8 = pin
            .parse()
            .map_err(|_| CommandError::Malformed(line.to_string()))?;
        return Ok(Command::SetHeaderPin { header, pin, width });
    }

    let servo: u8 = lhs
        .parse()
        .map_err(|_| CommandError::Malformed(line.to_string()))?;
    Ok(Command::SetServoIndex { servo, width })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_ticks() {
        let p = parse_width_token("150").unwrap();
        assert_eq!(p.value, 150);
        assert_eq!(p.unit, WidthUnit::Ticks);
        assert!(!p.relative);
    }

    #[test]
    fn parses_microseconds_suffix() {
        let p = parse_width_token("1500us").unwrap();
        assert_eq!(resolve_width(p, 0, 10, 50, 250).unwrap(), 150);
    }

    #[test]
    fn parses_percent_suffix() {
        // 50% of [50, 250] ticks is 50 + 100 = 150.
        let p = parse_width_token("50%").unwrap();
        assert_eq!(resolve_width(p, 0, 10, 50, 250).unwrap(), 150);
    }

    #[test]
    fn relative_plus_clamped_to_max() {
        let p = parse_width_token("+9999").unwrap();
        assert_eq!(resolve_width(p, 130, 10, 50, 250).unwrap(), 250);
    }

    #[test]
    fn relative_minus_clamped_to_min() {
        let p = parse_width_token("-9999").unwrap();
        assert_eq!(resolve_width(p, 130, 10, 50, 250).unwrap(), 50);
    }

    #[test]
    fn relative_minus_is_applied() {
        let p = parse_width_token("-30").unwrap();
        assert_eq!(resolve_width(p, 130, 10, 50, 250).unwrap(), 100);
    }

    #[test]
    fn zero_is_always_accepted() {
        let p = parse_width_token("0").unwrap();
        assert_eq!(resolve_width(p, 130, 10, 50, 250).unwrap(), 0);
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(parse_width_token("abc").is_err());
    }

    #[test]
    fn parses_servo_index_command() {
        match parse_line("0=150").unwrap() {
            Command::SetServoIndex { servo, width } => {
                assert_eq!(servo, 0);
                assert_eq!(width.value, 150);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_header_pin_command() {
        match parse_line("P1-7=150").unwrap() {
            Command::SetHeaderPin { header, pin, width } => {
                assert_eq!(header, 1);
                assert_eq!(pin, 7);
                assert_eq!(width.value, 150);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_debug_and_status() {
        assert!(matches!(parse_line("debug").unwrap(), Command::Debug));
        match parse_line("status /tmp/s").unwrap() {
            Command::Status { path } => assert_eq!(path, "/tmp/s"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(parse_line("nonsense").is_err());
    }
}
