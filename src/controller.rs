//! The discipline loop proper: capture front, fix gate and foreground.
//!
//! The split mirrors the interrupt structure of the instrument.
//! `CaptureFront` is the PPS capture interrupt body, `FixGate` the
//! sentence-complete path of the receive interrupt, `Foreground` the main
//! loop. They meet only through `SharedState`; the foreground discovers
//! work by watching the monotonic counters advance.

use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use log::{debug, info, warn};

use crate::config::{SamplingConfig, SystemConfig};
use crate::fixed::{Centi, Deci, Milli};
use crate::nmea;
use crate::persistence::TrimPersistence;
use crate::sampler::{self, PhaseAccumulator};
use crate::servo::PiServo;
use crate::shared::SharedState;
use crate::status::{self, DisciplineStatus, GpsFix, LockGrade, ResetCause};
use crate::traits::{Leds, PhaseAdc, TrimDac, TrimStore, Watchdog};
use crate::trim::TrimState;

/// PPS capture path. Runs to completion per edge: extend the tick, sample
/// the phase ADC, and when the fix is good run the window countdown.
pub struct CaptureFront<A: PhaseAdc> {
    shared: Arc<SharedState>,
    adc: A,
    last_tick: u32,
    window_secs: u32,
    max_delta: i64,
}

impl<A: PhaseAdc> CaptureFront<A> {
    pub fn new(shared: Arc<SharedState>, adc: A, cfg: &SamplingConfig) -> Self {
        CaptureFront {
            shared,
            adc,
            last_tick: 0,
            window_secs: cfg.sample_seconds,
            max_delta: cfg.max_delta,
        }
    }

    /// Capture interrupt body. `lowbits` is the latched counter value and
    /// `overflow_pending` the overflow flag sampled in the same handler.
    pub fn on_capture(&mut self, lowbits: u16, overflow_pending: bool) -> Result<()> {
        let tick = self.shared.ticks.extend(lowbits, overflow_pending);

        // The conversion is a bounded busy-wait in hardware, microseconds.
        let adc_value = self.adc.convert()?;
        self.shared.last_adc.store(adc_value, Ordering::Release);

        if self.shared.fix() != GpsFix::Locked3D {
            // Keep tracking the top of the second so the first window
            // after lock has a baseline.
            self.last_tick = tick;
            return Ok(());
        }
        self.shared.pps_count.fetch_add(1, Ordering::Release);

        if self.shared.window_pos.fetch_sub(1, Ordering::AcqRel) > 1 {
            return Ok(()); // window still open
        }
        self.shared
            .window_pos
            .store(self.window_secs, Ordering::Release);

        let delta = sampler::window_delta(tick, self.last_tick, self.window_secs);
        self.last_tick = tick;

        match self.shared.samples.lock() {
            Ok(mut samples) => {
                // While the warm-up marker is armed the delta is spent on
                // the marker no matter its size, so the bound only applies
                // after.
                if delta.abs() > self.max_delta && !samples.skip_armed() {
                    self.shared
                        .erroneous_delta
                        .store(delta as i32, Ordering::Release);
                    return Ok(());
                }
                samples.record(delta as i32);
            }
            Err(_) => return Ok(()),
        }
        self.shared.sample_count.fetch_add(1, Ordering::Release);
        Ok(())
    }
}

/// Applies parsed fix transitions. Any change of reference state discards
/// the measurement history and arms one warm-up window; the trim value is
/// deliberately untouched, so holdover coasts at the last good frequency.
pub struct FixGate {
    shared: Arc<SharedState>,
    window_secs: u32,
}

impl FixGate {
    pub fn new(shared: Arc<SharedState>, cfg: &SamplingConfig) -> Self {
        FixGate {
            shared,
            window_secs: cfg.sample_seconds,
        }
    }

    /// Complete-sentence entry point; undecodable input drops silently.
    pub fn on_sentence(&mut self, sentence: &[u8]) {
        let Some(update) = nmea::parse_gsa(sentence) else {
            return;
        };
        if !update.pdop.is_empty() {
            if let Ok(mut pdop) = self.shared.pdop.lock() {
                *pdop = update.pdop;
            }
        }

        let fix = if update.fix_3d {
            GpsFix::Locked3D
        } else {
            GpsFix::Unlocked
        };
        if fix == self.shared.fix() {
            return;
        }
        self.shared.set_fix(fix);
        if let Ok(mut samples) = self.shared.samples.lock() {
            samples.arm_skip();
        }
        self.shared
            .window_pos
            .store(self.window_secs, Ordering::Release);
    }
}

/// Foreground loop state: servo, trim, grade, persistence and the
/// published status snapshot.
pub struct Foreground<D, S, W, L>
where
    D: TrimDac,
    S: TrimStore,
    W: Watchdog,
    L: Leds,
{
    shared: Arc<SharedState>,
    config: SystemConfig,
    dac: D,
    watchdog: W,
    leds: L,
    servo: PiServo,
    trim: TrimState,
    phase: PhaseAccumulator,
    persistence: TrimPersistence<S>,
    grade: LockGrade,
    seen_fix: GpsFix,
    last_pps: u32,
    last_window: u32,
    last_fill: usize,
    last_drift: Deci,
    last_phase: Milli,
    last_error: Centi,
    status_shared: Arc<RwLock<DisciplineStatus>>,
}

impl<D, S, W, L> Foreground<D, S, W, L>
where
    D: TrimDac,
    S: TrimStore,
    W: Watchdog,
    L: Leds,
{
    /// Power-on path: validate the configuration, restore the persisted
    /// trim, command the DAC, and start unlocked with the warm-up marker
    /// armed (`SharedState` boots armed).
    pub fn new(
        shared: Arc<SharedState>,
        config: SystemConfig,
        mut dac: D,
        store: S,
        watchdog: W,
        leds: L,
        reset_cause: ResetCause,
        status_shared: Arc<RwLock<DisciplineStatus>>,
    ) -> Result<Self> {
        config.validate()?;
        info!("START");
        info!("{}", reset_cause.tag());

        let mut persistence = TrimPersistence::new(store, &config.persistence);
        let word = persistence.restore()?;
        let trim = TrimState::from_word(word);
        dac.write(word)?;
        info!("TP={}", Centi(config.servo.dac_sign * trim.percent().0));

        let servo = PiServo::new(&config.servo);
        Ok(Foreground {
            shared,
            dac,
            watchdog,
            leds,
            servo,
            trim,
            phase: PhaseAccumulator::default(),
            persistence,
            grade: LockGrade::None,
            seen_fix: GpsFix::Unlocked,
            last_pps: 0,
            last_window: 0,
            last_fill: 0,
            last_drift: Deci(0),
            last_phase: Milli(0),
            last_error: Centi(0),
            status_shared,
            config,
        })
    }

    pub fn status_shared(&self) -> Arc<RwLock<DisciplineStatus>> {
        self.status_shared.clone()
    }

    pub fn grade(&self) -> LockGrade {
        self.grade
    }

    pub fn dac_word(&self) -> u16 {
        self.trim.word()
    }

    pub fn total_error(&self) -> Centi {
        self.servo.total_error()
    }

    /// One foreground pass: pet the watchdog, track fix changes, drive the
    /// LEDs, then handle any PPS and window work that arrived since the
    /// last pass.
    pub fn poll(&mut self) -> Result<()> {
        self.watchdog.pet();

        let fix = self.shared.fix();
        if fix != self.seen_fix {
            self.seen_fix = fix;
            match fix {
                GpsFix::Locked3D => info!("G_LK"),
                GpsFix::Unlocked => info!("G_UN"),
            }
            // The integral is meaningless across a reference interruption,
            // and the half-built phase window goes with it. Trim stays:
            // holdover runs open loop at the last commanded frequency.
            self.servo.reset();
            self.phase = PhaseAccumulator::default();
            self.grade = LockGrade::None;
            self.publish_status();
        }

        let (led0, led1) = status::led_pattern(fix, self.grade, self.shared.ticks.hibits());
        self.leds.set(led0, led1);

        let pps = self.shared.pps_count.load(Ordering::Acquire);
        if pps == self.last_pps {
            return Ok(());
        }
        self.last_pps = pps;

        let erroneous = self.shared.erroneous_delta.swap(0, Ordering::AcqRel);
        if erroneous != 0 {
            warn!("XXX={}", erroneous);
            return Ok(());
        }

        let adc = self.shared.last_adc.load(Ordering::Acquire);
        debug!("ADC={}", adc);
        self.phase
            .record(self.config.sampling.phase_midpoint, adc);

        let windows = self.shared.sample_count.load(Ordering::Acquire);
        if windows == self.last_window {
            return Ok(());
        }
        self.last_window = windows;

        self.process_window()
    }

    /// A window just closed: fold the phase average in, grade the drift,
    /// and when at least one valid sample exists run the PI update.
    fn process_window(&mut self) -> Result<()> {
        let sampling = &self.config.sampling;
        let phase = self
            .phase
            .close(sampling.sample_seconds, sampling.phase_midpoint);

        let (fill, sum) = match self.shared.samples.lock() {
            Ok(samples) => {
                if !samples.samples().is_empty() {
                    debug!("SB={:?}", samples.samples());
                }
                (samples.fill(), samples.sum())
            }
            Err(_) => return Ok(()),
        };

        let drift = Deci(sum * 10 / sampling.sample_count as i64);
        debug!("ER={} PE={}", drift, phase);

        self.grade = LockGrade::classify(fill, sampling.sample_count, drift);
        self.last_fill = fill;
        self.last_drift = drift;
        self.last_phase = phase;

        if fill == 0 {
            // The warm-up window, or nothing measured yet: classify only.
            self.publish_status();
            return Ok(());
        }

        // The phase term is in mils of midpoint, already ten times finer
        // than the drift term; the weight makes the mix comparable.
        let current_error = drift.to_centi() + Centi(phase.0 / self.config.servo.phase_weight);
        debug!("CE={}", current_error);

        let adj = self.servo.update(current_error);
        self.trim.apply(adj);
        let word = self.trim.word();
        self.dac.write(word)?;

        debug!(
            "TE={} AV={} TP={} TV=0x{:04x}",
            self.servo.total_error(),
            adj,
            Centi(self.config.servo.dac_sign * self.trim.percent().0),
            word
        );
        if let Ok(pdop) = self.shared.pdop.lock() {
            if !pdop.is_empty() {
                debug!("PD={}", pdop);
            }
        }

        self.last_error = current_error;
        self.persistence.maybe_store(current_error, word)?;
        self.publish_status();
        Ok(())
    }

    fn publish_status(&self) {
        if let Ok(mut st) = self.status_shared.write() {
            st.fix = self.seen_fix;
            st.grade = self.grade;
            st.sample_fill = self.last_fill;
            st.sample_drift_deci = self.last_drift.0;
            st.phase_error_milli = self.last_phase.0;
            st.current_error_centi = self.last_error.0;
            st.total_error_centi = self.servo.total_error().0;
            st.trim_percent_centi = self.config.servo.dac_sign * self.trim.percent().0;
            st.dac_word = self.trim.word();
            st.pps_seen = self.last_pps;
            st.windows_seen = self.last_window;
            if let Ok(pdop) = self.shared.pdop.lock() {
                st.pdop = pdop.clone();
            }
        }
    }
}
