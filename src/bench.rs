//! Deterministic instrument bench: a simulated OCXO, phase detector, DAC
//! and trim cell for exercising the discipline loop without hardware.
//!
//! The oscillator model is the whole physics: its rate is the nominal
//! clock plus a free-running error, minus the tuning slope times the DAC
//! steps away from mid-scale (the DAC inverts, so more word means less
//! frequency). Each simulated second delivers the overflow interrupts the
//! 16-bit counter would have produced and then the PPS capture.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;

use crate::config::SamplingConfig;
use crate::controller::CaptureFront;
use crate::shared::SharedState;
use crate::timebase::NOMINAL_CLOCK;
use crate::traits::{Leds, PhaseAdc, TrimDac, TrimStore, Watchdog};
use crate::trim::DAC_MIDPOINT;

/// State every bench component hangs off.
pub struct BenchState {
    /// Word currently applied to the simulated DAC.
    pub dac_word: u16,
    /// Frames that actually reached the part (repeats are suppressed).
    pub dac_writes: u32,
    /// Free-running oscillator error at mid-scale, ppb.
    pub base_error_ppb: f64,
    /// Tuning slope, ppb per DAC step. 0.012 ppb (12 ppt) matches the
    /// OH300 build.
    pub slope_ppb_per_step: f64,
    /// Code the phase-comparator ADC returns.
    pub phase_code: u16,
}

impl BenchState {
    pub fn shared(base_error_ppb: f64, phase_midpoint: u16) -> Rc<RefCell<BenchState>> {
        Rc::new(RefCell::new(BenchState {
            dac_word: DAC_MIDPOINT,
            dac_writes: 0,
            base_error_ppb,
            slope_ppb_per_step: 0.012,
            phase_code: phase_midpoint,
        }))
    }

    /// Effective oscillator error at the current word, ppb.
    pub fn error_ppb(&self) -> f64 {
        self.base_error_ppb
            - self.slope_ppb_per_step * f64::from(i32::from(self.dac_word) - i32::from(DAC_MIDPOINT))
    }
}

/// The oscillator and counter front end. Owns the capture path.
pub struct BenchOscillator {
    shared: Arc<SharedState>,
    state: Rc<RefCell<BenchState>>,
    capture: CaptureFront<BenchAdc>,
    total_ticks: u64,
    frac_ticks: f64,
}

impl BenchOscillator {
    pub fn new(
        shared: Arc<SharedState>,
        state: Rc<RefCell<BenchState>>,
        cfg: &SamplingConfig,
    ) -> Self {
        let capture = CaptureFront::new(shared.clone(), BenchAdc(state.clone()), cfg);
        BenchOscillator {
            shared,
            state,
            capture,
            total_ticks: 0,
            frac_ticks: 0.0,
        }
    }

    /// Advance one true GPS second and deliver the PPS edge.
    pub fn pps_second(&mut self) -> Result<()> {
        self.frac_ticks += self.state.borrow().error_ppb() * 0.01;
        let extra = self.frac_ticks.trunc();
        self.frac_ticks -= extra;
        self.total_ticks = self
            .total_ticks
            .wrapping_add(u64::from(NOMINAL_CLOCK))
            .wrapping_add_signed(extra as i64);

        // Replay the overflow interrupts the counter produced this second.
        let target = ((self.total_ticks >> 16) & 0xFFFF) as u16;
        while self.shared.ticks.hibits() != target {
            self.shared.ticks.overflow();
        }
        self.capture
            .on_capture((self.total_ticks & 0xFFFF) as u16, false)
    }
}

pub struct BenchAdc(pub Rc<RefCell<BenchState>>);

impl PhaseAdc for BenchAdc {
    fn convert(&mut self) -> Result<u16> {
        Ok(self.0.borrow().phase_code)
    }
}

/// Simulated AD5061: applies the word to the oscillator model and counts
/// physical writes; repeats are suppressed like the real driver's. Powers
/// up at mid-scale.
pub struct BenchDac(pub Rc<RefCell<BenchState>>);

impl TrimDac for BenchDac {
    fn write(&mut self, word: u16) -> Result<()> {
        let mut state = self.0.borrow_mut();
        if state.dac_word == word {
            return Ok(());
        }
        state.dac_word = word;
        state.dac_writes += 1;
        Ok(())
    }
}

/// In-memory trim cell with a write counter; starts blank.
pub struct MemTrimStore(pub Rc<RefCell<MemCell>>);

pub struct MemCell {
    pub word: u16,
    pub writes: u32,
}

impl MemTrimStore {
    pub fn blank() -> (Self, Rc<RefCell<MemCell>>) {
        Self::with_word(0xFFFF)
    }

    pub fn with_word(word: u16) -> (Self, Rc<RefCell<MemCell>>) {
        let cell = Rc::new(RefCell::new(MemCell { word, writes: 0 }));
        (MemTrimStore(cell.clone()), cell)
    }
}

impl TrimStore for MemTrimStore {
    fn read(&mut self) -> Result<u16> {
        Ok(self.0.borrow().word)
    }

    fn write(&mut self, word: u16) -> Result<()> {
        let mut cell = self.0.borrow_mut();
        cell.word = word;
        cell.writes += 1;
        Ok(())
    }
}

pub struct NullWatchdog;

impl Watchdog for NullWatchdog {
    fn pet(&mut self) {}
}

pub struct NullLeds;

impl Leds for NullLeds {
    fn set(&mut self, _led0: bool, _led1: bool) {}
}
