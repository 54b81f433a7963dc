//! Command-line interface and the immutable configuration derived from it.
//!
//! Grounded on `servod.c::main`'s argument parsing loop; CLI plumbing itself
//! uses `clap`'s derive API the way `tock-tock`'s host tools and
//! `betrusted-io-xous-core`'s `fido-signer` do.

use clap::Parser;

use crate::cb_chain::Pacer;
use crate::error::ConfigError;
use crate::parse::{parse_width_token, WidthUnit};

const DEFAULT_CYCLE_TIME_US: u32 = 20000;
const DEFAULT_STEP_TIME_US: u32 = 10;
const DEFAULT_SERVO_MIN_US: u32 = 500;
const DEFAULT_SERVO_MAX_US: u32 = 2500;
pub const DEVFILE: &str = "/dev/servoblaster";
pub const CFGFILE: &str = "/dev/servoblaster-cfg";

#[derive(Parser, Debug)]
#[command(name = "servod", about = "DMA-paced multi-servo PWM daemon")]
pub struct Cli {
    /// Total PWM cycle length in microseconds.
    #[arg(long = "cycle-time", default_value_t = DEFAULT_CYCLE_TIME_US)]
    pub cycle_time_us: u32,

    /// Smallest representable change in pulse width, in microseconds.
    #[arg(long = "step-size", default_value_t = DEFAULT_STEP_TIME_US)]
    pub step_time_us: u32,

    /// Comma-separated P1 header pin numbers, in servo-index order.
    #[arg(long = "p1pins")]
    pub p1pins: Option<String>,

    /// Comma-separated P5 header pin numbers, in servo-index order
    /// (following immediately after the P1 servos).
    #[arg(long = "p5pins")]
    pub p5pins: Option<String>,

    /// Minimum pulse width, accepting the same `us`/`%` suffix grammar as a
    /// width command.
    #[arg(long = "min")]
    pub min: Option<String>,

    /// Maximum pulse width, accepting the same `us`/`%` suffix grammar as a
    /// width command.
    #[arg(long = "max")]
    pub max: Option<String>,

    /// Idle timeout in milliseconds; 0 disables it.
    #[arg(long = "idle-timeout", default_value_t = 0)]
    pub idle_timeout_ms: u64,

    /// Invert polarity: a pulse is represented as a low level instead of a
    /// high level.
    #[arg(long)]
    pub invert: bool,

    /// Use the PCM peripheral to pace the DMA chain instead of PWM.
    #[arg(long)]
    pub pcm: bool,

    /// DMA channel to drive the chain with.
    #[arg(long = "dma-chan", default_value_t = crate::regs::DMA_CHAN_DEFAULT)]
    pub dma_chan: u8,

    /// Run in the foreground instead of daemonizing.
    #[arg(long = "no-daemonize")]
    pub no_daemonize: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cycle_time_us: u32,
    pub step_time_us: u32,
    pub num_samples: u32,
    pub p1pins: Vec<u8>,
    pub p5pins: Vec<u8>,
    pub min_ticks: u32,
    pub max_ticks: u32,
    pub idle_timeout_ms: u64,
    pub invert: bool,
    pub pacer: Pacer,
    pub dma_chan: u8,
    pub daemonize: bool,
}

fn parse_pin_list(spec: &str) -> Result<Vec<u8>, ConfigError> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u8>()
                .map_err(|_| ConfigError::InvalidPinSpec(spec.to_string()))
        })
        .collect()
}

fn parse_width_arg(spec: &str, step_time_us: u32, cycle_time_us: u32) -> Result<u32, ConfigError> {
    let parsed = parse_width_token(spec).map_err(|_| ConfigError::InvalidWidthArg(spec.to_string()))?;
    let ticks = match parsed.unit {
        WidthUnit::Ticks => parsed.value,
        WidthUnit::Microseconds => parsed.value / step_time_us,
        WidthUnit::Percent => {
            let num_samples = cycle_time_us / step_time_us;
            (parsed.value * num_samples) / 100
        }
    };
    Ok(ticks)
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let num_samples = crate::arena::validate_sizes(cli.cycle_time_us, cli.step_time_us)?;

        let min_ticks = match &cli.min {
            Some(s) => parse_width_arg(s, cli.step_time_us, cli.cycle_time_us)?,
            None => DEFAULT_SERVO_MIN_US / cli.step_time_us,
        };
        let max_ticks = match &cli.max {
            Some(s) => parse_width_arg(s, cli.step_time_us, cli.cycle_time_us)?,
            None => DEFAULT_SERVO_MAX_US / cli.step_time_us,
        };
        if min_ticks >= max_ticks {
            return Err(ConfigError::MinNotLessThanMax {
                min: min_ticks,
                max: max_ticks,
            });
        }

        let p1pins = match &cli.p1pins {
            Some(s) => parse_pin_list(s)?,
            None => vec![7, 11, 12, 13, 15, 16, 18, 22],
        };
        let p5pins = match &cli.p5pins {
            Some(s) => parse_pin_list(s)?,
            None => vec![],
        };
        if p1pins.len() + p5pins.len() > crate::servo::MAX_SERVOS {
            return Err(ConfigError::TooManyServos {
                max: crate::servo::MAX_SERVOS,
            });
        }

        Ok(Config {
            cycle_time_us: cli.cycle_time_us,
            step_time_us: cli.step_time_us,
            num_samples,
            p1pins,
            p5pins,
            min_ticks,
            max_ticks,
            idle_timeout_ms: cli.idle_timeout_ms,
            invert: cli.invert,
            pacer: if cli.pcm { Pacer::Pcm } else { Pacer::Pwm },
            dma_chan: cli.dma_chan,
            daemonize: !cli.no_daemonize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_min_max_are_50_and_250_ticks() {
        let cli = Cli::parse_from(["servod"]);
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.min_ticks, 50);
        assert_eq!(cfg.max_ticks, 250);
    }

    #[test]
    fn default_p1_pins_match_original() {
        let cli = Cli::parse_from(["servod"]);
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.p1pins, vec![7, 11, 12, 13, 15, 16, 18, 22]);
    }

    #[test]
    fn rejects_indivisible_cycle() {
        let cli = Cli::parse_from(["servod", "--cycle-time", "20000", "--step-size", "13"]);
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn explicit_min_max_override_defaults() {
        let cli = Cli::parse_from(["servod", "--min", "600us", "--max", "2400us"]);
        let cfg = Config::from_cli(cli).unwrap();
        assert_eq!(cfg.min_ticks, 60);
        assert_eq!(cfg.max_ticks, 240);
    }

    #[test]
    fn too_many_pins_is_rejected() {
        let many: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        let cli = Cli::parse_from(["servod", "--p1pins", &many.join(",")]);
        assert!(Config::from_cli(cli).is_err());
    }
}
