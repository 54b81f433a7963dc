//! Peripheral bring-up: PWM or PCM FIFO pacing, then DMA start.
//!
//! Grounded on `servod.c::init_hardware` and `hardware.c`'s exact register
//! write sequences; every value here must be bit-exact with that source.

use std::thread::sleep;
use std::time::Duration;

use crate::cb_chain::Pacer;
use crate::peripherals::Peripherals;
use crate::regs::clk::{cm_div_divi, CM_CTL_ENAB, CM_CTL_SRC_PLLD, CM_PASSWD};
use crate::regs::dma::{DMA_END, DMA_INT, DMA_RESET};
use crate::regs::pcm::{
    pcm_dreq_tx, PCM_CS_A_DMAEN, PCM_CS_A_EN, PCM_CS_A_TXCLR, PCM_CS_A_TXON, PCM_TXC_A_CH1EN,
    PCM_TXC_A_CH1WEX, PCM_TXC_A_CH1WID_8BIT,
};
use crate::regs::pwm::{
    pwm_dmac_threshold, PWM_CTL_CLRF1, PWM_CTL_PWEN1, PWM_CTL_USEF1, PWM_DMAC_ENAB,
};

fn udelay(us: u64) {
    sleep(Duration::from_micros(us));
}

/// Program the PWM peripheral to drain one FIFO word every `step_time_us`.
pub fn init_pwm(peripherals: &mut Peripherals, step_time_us: u32, plld_freq_mhz: u32) {
    let mut ctl = peripherals.pwm();
    ctl.write_ctl(0);
    udelay(10);

    let mut clk = peripherals.clk_pwm();
    clk.write_ctl(CM_PASSWD | CM_CTL_SRC_PLLD);
    udelay(100);
    clk.write_div(CM_PASSWD | cm_div_divi(plld_freq_mhz));
    udelay(100);
    clk.write_ctl(CM_PASSWD | CM_CTL_ENAB | CM_CTL_SRC_PLLD);
    udelay(100);

    let mut pwm = peripherals.pwm();
    pwm.write_rng1(step_time_us);
    udelay(10);
    pwm.write_dmac(PWM_DMAC_ENAB | pwm_dmac_threshold(15, 15));
    udelay(10);
    pwm.write_ctl(PWM_CTL_CLRF1);
    udelay(10);
    pwm.write_ctl(PWM_CTL_USEF1 | PWM_CTL_PWEN1);
}

/// Program the PCM peripheral to drain one FIFO byte every `step_time_us`,
/// the alternative pacer selected with `--pcm`.
pub fn init_pcm(peripherals: &mut Peripherals, step_time_us: u32, plld_freq_mhz: u32) {
    let mut cs = peripherals.pcm();
    cs.write_cs_a(PCM_CS_A_EN);
    udelay(100);

    let mut clk = peripherals.clk_pcm();
    clk.write_ctl(CM_PASSWD | CM_CTL_SRC_PLLD);
    udelay(100);
    clk.write_div(CM_PASSWD | cm_div_divi(plld_freq_mhz));
    udelay(100);
    clk.write_ctl(CM_PASSWD | CM_CTL_ENAB | CM_CTL_SRC_PLLD);
    udelay(100);

    let mut pcm = peripherals.pcm();
    pcm.write_txc_a(PCM_TXC_A_CH1WEX | PCM_TXC_A_CH1EN | PCM_TXC_A_CH1WID_8BIT);
    udelay(100);
    pcm.write_mode_a((step_time_us.saturating_sub(1)) << 10);
    udelay(100);
    pcm.write_cs_a(PCM_CS_A_EN | PCM_CS_A_TXCLR);
    udelay(100);
    pcm.write_dreq_a(pcm_dreq_tx(64, 64));
    udelay(100);
    pcm.write_cs_a(PCM_CS_A_EN | PCM_CS_A_DMAEN);
    udelay(100);
    // TX itself is enabled only once the DMA engine is already running, in
    // `enable_pcm_tx`, to match the original bring-up order.
}

/// Enable PCM Tx. Must run after `start_dma`, once the DMA engine is already
/// pulling from the FIFO.
pub fn enable_pcm_tx(peripherals: &mut Peripherals) {
    let mut pcm = peripherals.pcm();
    pcm.write_cs_a(PCM_CS_A_EN | PCM_CS_A_DMAEN | PCM_CS_A_TXON);
}

pub fn init_pacer(peripherals: &mut Peripherals, pacer: Pacer, step_time_us: u32, plld_freq_mhz: u32) {
    match pacer {
        Pacer::Pwm => init_pwm(peripherals, step_time_us, plld_freq_mhz),
        Pacer::Pcm => init_pcm(peripherals, step_time_us, plld_freq_mhz),
    }
}

/// Reset the DMA channel and point it at the head of the CB chain.
pub fn start_dma(peripherals: &mut Peripherals, cb0_bus_addr: u32) {
    let mut dma = peripherals.dma();
    dma.write_cs(DMA_RESET);
    udelay(10);
    dma.write_cs(DMA_INT | DMA_END);
    dma.write_conblk_ad(cb0_bus_addr);
    dma.write_debug(7); // clear error flags
    dma.write_cs(0x1088_0001); // go, mid priority, wait for outstanding writes
}

/// Stop the DMA channel, used during teardown before the arena is freed.
pub fn stop_dma(peripherals: &mut Peripherals) {
    let mut dma = peripherals.dma();
    dma.write_cs(DMA_RESET);
    udelay(10);
}
