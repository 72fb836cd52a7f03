use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub servo: ServoConfig,
    pub sampling: SamplingConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoConfig {
    /// Proportional gain, units of 1e-6 DAC counts per error count.
    ///
    /// The tuning step is the oscillator's voltage slope (ppm/V) times the
    /// DAC step voltage. For the OH300 build that is roughly 12 ppt per
    /// step, so a one-count error (4 ppb over the reference window) wants
    /// a step of a few hundred DAC units. Both the error and the trim are
    /// two-digit fixed point; the 1e-6 scale absorbs the rest.
    pub kp: i64,
    /// Integral gain applied to the accumulated error, same units as `kp`.
    pub ki: i64,
    /// +1 or -1. The AD5061 drives an inverting stage: -1.
    pub dac_sign: i64,
    /// Divisor blending the phase-error mils into the combined error. An
    /// empirically tuned mix, not a derivation.
    pub phase_weight: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Window length W in seconds. Must be odd, or a PPS edge straddling a
    /// tick boundary aliases into alternating +1/-1 deltas in adjacent
    /// windows. Must stay under ~400 s so W x 10 MHz fits the 32-bit tick.
    pub sample_seconds: u32,
    /// Rolling-window depth K.
    pub sample_count: usize,
    /// Outlier bound in ticks per window. 2500 is 10 ppm over the
    /// reference window; anything past it means a broken measurement, not
    /// a frequency error.
    pub max_delta: i64,
    /// ADC code of the phase comparator at zero phase error.
    pub phase_midpoint: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// A window with |current_error| below this counts as dialed in.
    pub steady_error_limit: i64,
    /// Minimum distance between the stored word and the current one before
    /// a rewrite is worth an EEPROM cycle. 75 is around 1 ppb.
    pub update_offset: u16,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            servo: ServoConfig {
                kp: 31_400,
                ki: 13,
                dac_sign: -1,
                phase_weight: 14,
            },
            sampling: SamplingConfig {
                sample_seconds: 25,
                sample_count: 10,
                max_delta: 2500,
                phase_midpoint: 512,
            },
            persistence: PersistenceConfig {
                steady_error_limit: 100,
                update_offset: 75,
            },
        }
    }
}

impl SystemConfig {
    pub fn validate(&self) -> Result<()> {
        let s = &self.sampling;
        if s.sample_seconds == 0 || s.sample_seconds % 2 == 0 {
            bail!("sample_seconds must be odd, got {}", s.sample_seconds);
        }
        if s.sample_seconds > 400 {
            bail!(
                "sample_seconds {} overflows the 32-bit tick span (max 400)",
                s.sample_seconds
            );
        }
        if s.sample_count == 0 {
            bail!("sample_count must be at least 1");
        }
        if s.max_delta <= 0 {
            bail!("max_delta must be positive");
        }
        if s.phase_midpoint == 0 || s.phase_midpoint > 1023 {
            bail!(
                "phase_midpoint {} outside the 10-bit ADC range",
                s.phase_midpoint
            );
        }
        if self.servo.dac_sign != 1 && self.servo.dac_sign != -1 {
            bail!("dac_sign must be +1 or -1");
        }
        if self.servo.phase_weight == 0 {
            bail!("phase_weight must be nonzero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        SystemConfig::default().validate().expect("reference config");
    }

    #[test]
    fn test_even_window_rejected() {
        let mut cfg = SystemConfig::default();
        cfg.sampling.sample_seconds = 24;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_long_window_rejected() {
        let mut cfg = SystemConfig::default();
        cfg.sampling.sample_seconds = 401;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_dac_sign_rejected() {
        let mut cfg = SystemConfig::default();
        cfg.servo.dac_sign = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let cfg = SystemConfig::default();
        let json = serde_json::to_string(&cfg).expect("serialize failed");
        let restored: SystemConfig = serde_json::from_str(&json).expect("deserialize failed");
        assert_eq!(restored.servo.kp, 31_400);
        assert_eq!(restored.sampling.sample_seconds, 25);
        assert_eq!(restored.persistence.update_offset, 75);
    }
}
