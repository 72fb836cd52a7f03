use serde::{Deserialize, Serialize};

use crate::fixed::Deci;
use crate::timebase::OVERFLOWS_PER_SECOND;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpsFix {
    Unlocked,
    Locked3D,
}

/// Lock quality derived from the rolling-window drift magnitude. The
/// thresholds are about 50 / 5 / 1 ppb at the reference window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockGrade {
    None = 0,
    Good = 1,
    Better = 2,
    Best = 3,
}

impl LockGrade {
    /// Grade one closed window. `fill` is the number of valid samples held;
    /// anything short of a full buffer is unconditionally `None`.
    pub fn classify(fill: usize, window: usize, drift: Deci) -> LockGrade {
        if fill < window {
            return LockGrade::None;
        }
        match drift.abs() {
            d if d < 25 => LockGrade::Best,
            d if d < 125 => LockGrade::Better,
            d if d < 1250 => LockGrade::Good,
            _ => LockGrade::None,
        }
    }

    /// The two-bit value shown on the lock LEDs.
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// Why the controller (re)started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetCause {
    PowerOn,
    External,
    BrownOut,
    Watchdog,
}

impl ResetCause {
    pub fn tag(self) -> &'static str {
        match self {
            ResetCause::PowerOn => "RES_PO",
            ResetCause::External => "RES_EXT",
            ResetCause::BrownOut => "RES_BO",
            ResetCause::Watchdog => "RES_WD",
        }
    }
}

/// Indicator state for one foreground pass. Unlocked: the pair alternates
/// at 2 Hz, phased off the tick counter's high half. Locked: the grade in
/// binary.
pub fn led_pattern(fix: GpsFix, grade: LockGrade, hibits: u16) -> (bool, bool) {
    match fix {
        GpsFix::Locked3D => {
            let bits = grade.bits();
            (bits & 1 != 0, bits & 2 != 0)
        }
        GpsFix::Unlocked => {
            let blink_pos = u32::from(hibits) % OVERFLOWS_PER_SECOND;
            let blink_pos = (4 * blink_pos) / OVERFLOWS_PER_SECOND;
            if blink_pos & 1 == 1 {
                (true, false)
            } else {
                (false, true)
            }
        }
    }
}

/// Loop snapshot published by the foreground for observers.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DisciplineStatus {
    pub fix: GpsFix,
    pub grade: LockGrade,
    /// Valid samples currently in the rolling window.
    pub sample_fill: usize,
    /// Rolling average drift, one-decimal ticks per window.
    pub sample_drift_deci: i64,
    /// Window-averaged phase error, thousandths of the ADC midpoint.
    pub phase_error_milli: i64,
    /// Combined error of the last closed window, two-decimal.
    pub current_error_centi: i64,
    /// Integrator contents, two-decimal.
    pub total_error_centi: i64,
    /// Trim in conventional sign (positive = higher frequency), two-decimal
    /// DAC steps from midpoint.
    pub trim_percent_centi: i64,
    pub dac_word: u16,
    /// PDOP reported by the receiver, diagnostic only.
    pub pdop: String,
    pub pps_seen: u32,
    pub windows_seen: u32,
}

impl Default for DisciplineStatus {
    fn default() -> Self {
        DisciplineStatus {
            fix: GpsFix::Unlocked,
            grade: LockGrade::None,
            sample_fill: 0,
            sample_drift_deci: 0,
            phase_error_milli: 0,
            current_error_centi: 0,
            total_error_centi: 0,
            trim_percent_centi: 0,
            dac_word: 0x8000,
            pdop: String::new(),
            pps_seen: 0,
            windows_seen: 0,
        }
    }
}
