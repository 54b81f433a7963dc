//! Ties the peripheral maps, DMA arena, servo table and configuration
//! together into the one long-lived object the rest of the daemon operates
//! on.
//!
//! Grounded on the teacher crate's convention of a single owned driver
//! struct per peripheral (e.g. `PwmPin`); here there is exactly one such
//! struct for the whole process, since exactly one DMA channel is owned.

use log::info;

use crate::arena::Arena;
use crate::board::BoardRevision;
use crate::cb_chain;
use crate::config::Config;
use crate::error::{CommandError, ConfigError, ResourceError};
use crate::hardware_init;
use crate::idle;
use crate::peripherals::{PeripheralBase, Peripherals};
use crate::regs::gpio::FunctionSelect;
use crate::servo::{Servos, MAX_SERVOS};
use crate::width_engine::{self, MaskBuffers};

pub struct Engine {
    pub config: Config,
    pub board: BoardRevision,
    pub peripherals: Peripherals,
    pub arena: Arena,
    pub servos: Servos,
    masks: MaskBuffers,
}

impl Engine {
    pub fn try_init(config: Config) -> Result<Self, EngineInitError> {
        let board = BoardRevision::detect().map_err(EngineInitError::Config)?;
        Self::init_with_board(config, board)
    }

    fn init_with_board(config: Config, board: BoardRevision) -> Result<Self, EngineInitError> {
        let mut servos = Servos::new();
        map_pins(&mut servos, &board, &config.p1pins, 1)?;
        map_pins(&mut servos, &board, &config.p5pins, 5)?;
        servos.assign_start_offsets(config.num_samples);

        let peripheral_base =
            PeripheralBase::detect().map_err(EngineInitError::Resource)?;
        let mut peripherals = Peripherals::map(peripheral_base, config.dma_chan)
            .map_err(EngineInitError::Resource)?;

        for idx in servos.mapped_indices().collect::<Vec<_>>() {
            let gpio = servos.slots[idx].gpio.unwrap();
            servos.slots[idx].saved_gpio_mode = peripherals.gpio().mode(gpio);
            peripherals.gpio().set_mode(gpio, FunctionSelect::Output as u8);
        }

        let coherent_required = matches!(peripheral_base, PeripheralBase::Bcm2835);
        let arena = Arena::allocate(
            config.num_samples,
            MAX_SERVOS,
            coherent_required,
            peripheral_base.addr(),
        )
        .map_err(EngineInitError::Resource)?;

        let masks = unsafe {
            MaskBuffers::new(
                arena.turnoff_mask_ptr(),
                arena.turnon_mask_ptr(),
                config.num_samples,
            )
        };
        let all_mapped_mask: u32 = servos
            .mapped_indices()
            .map(|i| servos.slots[i].mask())
            .fold(0, |acc, m| acc | m);
        masks.init_all_clear(all_mapped_mask);

        let cb0 = cb_chain::build(&arena, &servos, config.num_samples, config.invert, config.pacer);
        hardware_init::init_pacer(
            &mut peripherals,
            config.pacer,
            config.step_time_us,
            peripheral_base.plld_freq_mhz(),
        );
        hardware_init::start_dma(&mut peripherals, cb0);
        if config.pacer == crate::cb_chain::Pacer::Pcm {
            hardware_init::enable_pcm_tx(&mut peripherals);
        }

        info!(
            "board {:?} ({}), {} servo(s) mapped, cycle={}us step={}us",
            board,
            board.description(),
            servos.mapped_count(),
            config.cycle_time_us,
            config.step_time_us,
        );

        Ok(Self {
            config,
            board,
            peripherals,
            arena,
            servos,
            masks,
        })
    }

    pub fn set_servo(&mut self, s: usize, ticks: u32) -> Result<(), CommandError> {
        if s >= MAX_SERVOS || !self.servos.slots[s].is_mapped() {
            return Err(CommandError::UnknownServo(s as u8));
        }
        width_engine::set_servo(&mut self.servos, &self.masks, s, ticks);
        let timeout = if self.config.idle_timeout_ms > 0 {
            Some(std::time::Duration::from_millis(self.config.idle_timeout_ms))
        } else {
            None
        };
        idle::arm(&mut self.servos, s, timeout);
        Ok(())
    }

    pub fn servo_for_header_pin(&self, header: u8, pin: u8) -> Result<usize, CommandError> {
        let gpio = self
            .board
            .gpio_for_pin(header, pin)
            .map_err(|_| CommandError::UnmappedPin { header, pin })?;
        self.servos
            .slots
            .iter()
            .position(|s| s.gpio == Some(gpio))
            .ok_or(CommandError::UnmappedPin { header, pin })
    }

    pub fn retire_idle_and_next_timeout(&mut self) -> Option<std::time::Duration> {
        let mut gpio = self.peripherals.gpio();
        idle::retire_expired_and_next_timeout(
            &mut self.servos,
            &self.masks,
            &mut gpio,
            self.config.invert,
            std::time::Instant::now(),
        )
    }

    pub fn probe_dma_alive(&mut self) -> bool {
        crate::status::probe_dma_alive(&mut self.peripherals, self.config.step_time_us)
    }

    pub fn debug_dump(&mut self) -> String {
        let mut out = String::new();
        out.push_str("Servo   Start   Width   TurnOn\n");
        for i in self.servos.mapped_indices() {
            let s = self.servos.slots[i];
            out.push_str(&format!(
                "{:5}   {:5}   {:5}   {:6}\n",
                i,
                s.start,
                s.width,
                if s.width > 0 { 1 } else { 0 }
            ));
        }
        let mapped_mask: u32 = self
            .servos
            .mapped_indices()
            .map(|i| self.servos.slots[i].mask())
            .fold(0, |a, m| a | m);
        let turnoff = self.arena.turnoff_mask_ptr();
        let mut previous: Option<u32> = None;
        for slot in 0..self.config.num_samples {
            let value = unsafe { std::ptr::read_volatile(turnoff.add(slot as usize)) } & mapped_mask;
            if previous != Some(value) {
                out.push_str(&format!("@{slot}: {value:08x}\n"));
                previous = Some(value);
            }
        }
        out
    }

    pub fn teardown(&mut self) {
        crate::teardown::run(self);
    }
}

pub enum EngineInitError {
    Config(ConfigError),
    Resource(ResourceError),
}

fn map_pins(
    servos: &mut Servos,
    board: &BoardRevision,
    pins: &[u8],
    header: u8,
) -> Result<(), EngineInitError> {
    for &pin in pins {
        let gpio = board
            .gpio_for_pin(header, pin)
            .map_err(EngineInitError::Config)?;
        if servos.gpio_already_mapped(gpio) {
            return Err(EngineInitError::Config(ConfigError::DuplicateGpio { gpio }));
        }
        let slot = servos
            .slots
            .iter()
            .position(|s| !s.is_mapped())
            .ok_or(EngineInitError::Config(ConfigError::TooManyServos {
                max: MAX_SERVOS,
            }))?;
        servos.slots[slot].gpio = Some(gpio);
    }
    Ok(())
}
