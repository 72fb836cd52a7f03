use anyhow::Result;

/// Steering DAC. The loop only commands 16-bit words; implementations own
/// the wire format and must suppress writes of a repeated word (a redundant
/// transfer glitches the output for nothing).
#[cfg_attr(test, mockall::automock)]
pub trait TrimDac {
    fn write(&mut self, word: u16) -> Result<()>;
}

/// Phase-comparator ADC. `convert` starts a conversion and blocks until the
/// result is ready; the hardware bounds that wait to microseconds, well
/// inside the watchdog budget.
#[cfg_attr(test, mockall::automock)]
pub trait PhaseAdc {
    fn convert(&mut self) -> Result<u16>;
}

/// One 16-bit non-volatile cell holding the last dialed-in DAC word. An
/// unprogrammed cell reads 0xFFFF.
#[cfg_attr(test, mockall::automock)]
pub trait TrimStore {
    fn read(&mut self) -> Result<u16>;
    fn write(&mut self, word: u16) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
pub trait Watchdog {
    fn pet(&mut self);
}

/// The two lock indicator LEDs.
#[cfg_attr(test, mockall::automock)]
pub trait Leds {
    fn set(&mut self, led0: bool, led1: bool);
}
