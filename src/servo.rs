use log::debug;

use crate::config::ServoConfig;
use crate::fixed::Centi;

/// Fixed-point PI update for the trim value.
///
/// Gains are integers in units of 1e-6 DAC counts per error count; the
/// trailing division by 10_000 collapses the intermediate scaling and must
/// stay last (integer division here is not associative, and the DAC
/// trajectory depends on the exact ordering). The DAC sign is folded into
/// the output so the caller always subtracts the adjustment.
#[derive(Debug)]
pub struct PiServo {
    kp: i64,
    ki: i64,
    dac_sign: i64,
    total_error: Centi,
}

impl PiServo {
    pub fn new(cfg: &ServoConfig) -> Self {
        PiServo {
            kp: cfg.kp,
            ki: cfg.ki,
            dac_sign: cfg.dac_sign,
            total_error: Centi(0),
        }
    }

    /// Drop the accumulated history. Called on every fix transition: the
    /// integral is only meaningful within one uninterrupted reference
    /// interval.
    pub fn reset(&mut self) {
        self.total_error = Centi(0);
    }

    pub fn total_error(&self) -> Centi {
        self.total_error
    }

    /// Integrate one window's error and return the trim adjustment to
    /// subtract from the trim value.
    pub fn update(&mut self, current_error: Centi) -> Centi {
        self.total_error += current_error;
        let adj = Centi(
            self.dac_sign * (current_error.0 * self.kp + self.total_error.0 * self.ki) / 10_000,
        );
        debug!(
            "servo: CE={} TE={} AV={}",
            current_error, self.total_error, adj
        );
        adj
    }
}
